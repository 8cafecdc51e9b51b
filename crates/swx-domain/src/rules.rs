//! Fingerprint-acquisition signatures inside the host's shipped program
//! files, kept as a versioned data table so new vendor phrasings can be
//! added without touching the mutation engine.
//!
//! Patterns are regex sources; they are compiled by the mutator. The vendor
//! has changed the exact phrasing across releases, so every rule carries
//! the known variants and the first match wins.

/// Which platform's program files a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePlatform {
    MacOs,
    Windows,
    Linux,
}

impl RulePlatform {
    /// The platform of the running build.
    #[must_use]
    pub fn host() -> Self {
        #[cfg(target_os = "macos")]
        {
            RulePlatform::MacOs
        }
        #[cfg(target_os = "windows")]
        {
            RulePlatform::Windows
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            RulePlatform::Linux
        }
    }
}

/// One fingerprint-acquisition signature: any of `patterns` is rewritten to
/// `replacement`, which synthesizes a fresh identifier at host startup
/// instead of probing the machine.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintRule {
    pub name: &'static str,
    pub patterns: &'static [&'static str],
    pub replacement: &'static str,
}

/// Hardware-identifier probe via the platform device registry tool.
const MACOS_RULES: &[FingerprintRule] = &[FingerprintRule {
    name: "platform-uuid-probe",
    patterns: &[
        r"ioreg\s+-rd1\s+-c\s+IOPlatformExpertDevice",
        // The same invocation as it appears once the bundler has escaped it.
        r"ioreg\\s\+-rd1\\s\+-c\\s\+IOPlatformExpertDevice",
    ],
    replacement:
        r#"UUID=$(uuidgen | tr '[:upper:]' '[:lower:]');echo \"IOPlatformUUID = \"$UUID\";"#,
}];

/// Registry value read via the system query utility, in every phrasing the
/// vendor has shipped so far.
const WINDOWS_RULES: &[FingerprintRule] = &[FingerprintRule {
    name: "machine-guid-query",
    patterns: &[
        r"\$\{v\d+\[s\$\(\)\]\}\\{1,2}REG\.exe\s+QUERY\s+HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Cryptography\s+/v\s+MachineGuid",
        r"REG\.exe\s+QUERY\s+HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Cryptography\s+/v\s+MachineGuid",
        r#"(?i)reg\s+query\s+"?HKLM\\SOFTWARE\\Microsoft\\Cryptography"?\s+/v\s+MachineGuid"#,
        r"(?i)wmic\s+csproduct\s+get\s+uuid",
        r"(?i)Get-ItemProperty\s+[^\r\n]*HKLM[^\r\n]*Cryptography[^\r\n]*MachineGuid",
    ],
    replacement: r#"powershell -Command "[guid]::NewGuid().ToString().ToLower()""#,
}];

/// Machine-id file reads; the replacement path yields a fresh random UUID
/// on every read.
const LINUX_RULES: &[FingerprintRule] = &[FingerprintRule {
    name: "machine-id-file",
    patterns: &[
        r"/var/lib/dbus/machine-id",
        r"/etc/machine-id",
    ],
    replacement: "/proc/sys/kernel/random/uuid",
}];

#[must_use]
pub fn fingerprint_rules(platform: RulePlatform) -> &'static [FingerprintRule] {
    match platform {
        RulePlatform::MacOs => MACOS_RULES,
        RulePlatform::Windows => WINDOWS_RULES,
        RulePlatform::Linux => LINUX_RULES,
    }
}

/// What kind of fresh identifier a literal rewrite substitutes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Hex128,
    Uuid,
}

/// Hard-coded identifier-shaped literal: `pattern` locates it, `template`
/// (with an `{id}` placeholder) rebuilds it around a freshly generated
/// value.
#[derive(Debug, Clone, Copy)]
pub struct LiteralRewrite {
    pub name: &'static str,
    pub pattern: &'static str,
    pub template: &'static str,
    pub kind: LiteralKind,
}

const LITERAL_REWRITES: &[LiteralRewrite] = &[
    LiteralRewrite {
        name: "machine-id-literal",
        pattern: r#"machineId["']?\s*:\s*["'][0-9a-fA-F]{32,}["']"#,
        template: r#"machineId:"{id}""#,
        kind: LiteralKind::Hex128,
    },
    LiteralRewrite {
        name: "device-id-literal",
        pattern: r#"deviceId["']?\s*:\s*["'][0-9a-fA-F]{32,}["']"#,
        template: r#"deviceId:"{id}""#,
        kind: LiteralKind::Hex128,
    },
    LiteralRewrite {
        name: "sqm-id-literal",
        pattern: r#"sqmId["']?\s*:\s*["'][^"']{32,}["']"#,
        template: r#"sqmId:"{id}""#,
        kind: LiteralKind::Uuid,
    },
    LiteralRewrite {
        name: "machine-guid-literal",
        pattern: r#"(?i)MACHINE_GUID\s*[:=]\s*["'][^"']{32,}["']"#,
        template: r#"MACHINE_GUID="{id}""#,
        kind: LiteralKind::Uuid,
    },
    LiteralRewrite {
        name: "device-guid-literal",
        pattern: r#"(?i)deviceGuid\s*[:=]\s*["'][^"']{32,}["']"#,
        template: r#"deviceGuid="{id}""#,
        kind: LiteralKind::Uuid,
    },
];

/// Rewrites applied after the acquisition patterns, on every platform.
#[must_use]
pub fn literal_rewrites() -> &'static [LiteralRewrite] {
    LITERAL_REWRITES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_platform_has_at_least_one_rule() {
        for platform in [RulePlatform::MacOs, RulePlatform::Windows, RulePlatform::Linux] {
            assert!(!fingerprint_rules(platform).is_empty());
        }
    }

    #[test]
    fn rules_carry_variants_and_replacements() {
        for rule in fingerprint_rules(RulePlatform::Windows) {
            assert!(!rule.patterns.is_empty());
            assert!(!rule.replacement.is_empty());
        }
    }

    #[test]
    fn literal_templates_have_the_placeholder() {
        for rewrite in literal_rewrites() {
            assert!(rewrite.template.contains("{id}"), "{}", rewrite.name);
        }
    }
}
