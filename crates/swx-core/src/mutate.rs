//! Textual patching of the host's shipped program files so it derives its
//! device fingerprint from synthesized values instead of probing the
//! machine.
//!
//! The signatures live in `swx_domain::rules` as a versioned table; the
//! vendor rephrases them between releases, so an unmatched pattern is an
//! expected, reported, non-fatal outcome. Every target file is copied to a
//! timestamped backup location before it is touched.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rand::RngCore;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use swx_domain::{
    filename_timestamp, fingerprint_rules, literal_rewrites, FingerprintRule, HostLayout,
    LiteralKind, LiteralRewrite, RulePlatform,
};

use crate::fsutil;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Modified,
    NotFound,
    NoPatternMatched,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub file: String,
    pub status: FileStatus,
}

impl FileOutcome {
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.status {
            FileStatus::Modified => format!("{}: modified", self.file),
            FileStatus::NotFound => format!("{}: not found", self.file),
            FileStatus::NoPatternMatched => format!("{}: no pattern matched", self.file),
            FileStatus::Error(cause) => format!("{}: error: {cause}", self.file),
        }
    }
}

/// Per-file outcomes plus free-form detail lines (signing steps, backup
/// location). `success` is false only when the host installation itself is
/// missing; version-fragile pattern misses never fail the step.
#[derive(Debug, Clone)]
pub struct MutationReport {
    pub success: bool,
    pub outcomes: Vec<FileOutcome>,
    pub details: Vec<String>,
}

impl MutationReport {
    #[must_use]
    pub fn detail_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .outcomes
            .iter()
            .map(FileOutcome::describe)
            .collect();
        lines.extend(self.details.iter().cloned());
        lines
    }
}

pub struct DeepIdentityMutator {
    host: HostLayout,
    backup_root: PathBuf,
    rules: &'static [FingerprintRule],
    rewrites: &'static [LiteralRewrite],
}

impl DeepIdentityMutator {
    #[must_use]
    pub fn new(host: HostLayout, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            host,
            backup_root: backup_root.into(),
            rules: fingerprint_rules(RulePlatform::host()),
            rewrites: literal_rewrites(),
        }
    }

    /// Override the rule table (tests exercise foreign-platform tables).
    #[must_use]
    pub fn with_rules(mut self, rules: &'static [FingerprintRule]) -> Self {
        self.rules = rules;
        self
    }

    /// Run the full platform sequence over every known target file.
    pub fn apply(&self) -> Result<MutationReport> {
        if !self.host.install_dir().exists() {
            return Ok(MutationReport {
                success: false,
                outcomes: Vec::new(),
                details: vec![format!(
                    "host installation not found at {}",
                    self.host.install_dir().display()
                )],
            });
        }

        let backup_dir = self
            .backup_root
            .join(format!("patch_{}", filename_timestamp(OffsetDateTime::now_utc())));
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("failed to create {}", backup_dir.display()))?;

        let mut outcomes = Vec::new();
        for (label, candidates) in self.host.patch_targets() {
            let Some(path) = candidates.iter().find(|candidate| candidate.is_file()) else {
                outcomes.push(FileOutcome {
                    file: label,
                    status: FileStatus::NotFound,
                });
                continue;
            };
            let status = match self.patch_file(path, &backup_dir.join(&label)) {
                Ok(status) => status,
                Err(err) => {
                    warn!(file = %label, %err, "program file mutation failed");
                    FileStatus::Error(format!("{err:#}"))
                }
            };
            outcomes.push(FileOutcome {
                file: label,
                status,
            });
        }

        let mut details = vec![format!("backups in {}", backup_dir.display())];
        self.finish_signing(&mut details);

        Ok(MutationReport {
            success: true,
            outcomes,
            details,
        })
    }

    fn patch_file(&self, path: &std::path::Path, backup: &std::path::Path) -> Result<FileStatus> {
        fsutil::copy_path(path, backup)?;
        let mut content =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

        let mut matched = false;
        'rules: for rule in self.rules {
            for pattern in rule.patterns {
                let regex = match Regex::new(pattern) {
                    Ok(regex) => regex,
                    Err(err) => {
                        warn!(rule = rule.name, %err, "skipping unparsable pattern");
                        continue;
                    }
                };
                if regex.is_match(&content) {
                    // NoExpand: replacements carry literal `$` shell text.
                    content = regex
                        .replace(&content, regex::NoExpand(rule.replacement))
                        .into_owned();
                    debug!(rule = rule.name, file = %path.display(), "acquisition pattern replaced");
                    matched = true;
                    break 'rules;
                }
            }
        }

        for rewrite in self.rewrites {
            let regex = match Regex::new(rewrite.pattern) {
                Ok(regex) => regex,
                Err(err) => {
                    warn!(rewrite = rewrite.name, %err, "skipping unparsable rewrite");
                    continue;
                }
            };
            if regex.is_match(&content) {
                let replacement = rewrite.template.replace("{id}", &fresh_id(rewrite.kind));
                content = regex
                    .replace_all(&content, regex::NoExpand(replacement.as_str()))
                    .into_owned();
                matched = true;
            }
        }

        // The marker changes the content hash even when nothing matched.
        let mut marker = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut marker);
        content.push_str(&format!(
            "\n// {} {}\n",
            hex::encode(marker),
            OffsetDateTime::now_utc().unix_timestamp()
        ));
        fs::write(path, &content)
            .with_context(|| format!("failed to write {}", path.display()))?;

        Ok(if matched {
            FileStatus::Modified
        } else {
            FileStatus::NoPatternMatched
        })
    }

    /// The host's files are cryptographically signed on macOS; after
    /// editing them the signature must be stripped and an ad-hoc one
    /// applied or the host refuses to start.
    #[cfg(target_os = "macos")]
    fn finish_signing(&self, details: &mut Vec<String>) {
        use std::process::{Command, Stdio};

        let app = self.host.install_dir().as_os_str();
        let run = |args: &[&std::ffi::OsStr]| {
            Command::new(args[0])
                .args(&args[1..])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false)
        };
        let codesign = std::ffi::OsStr::new("codesign");
        if run(&[codesign, "--remove-signature".as_ref(), app]) {
            details.push("signature removed".into());
        } else {
            details.push("signature removal failed".into());
        }
        if run(&[
            codesign,
            "--force".as_ref(),
            "--deep".as_ref(),
            "--sign".as_ref(),
            "-".as_ref(),
            app,
        ]) {
            details.push("ad-hoc signature applied".into());
        } else {
            details.push("ad-hoc signing failed".into());
        }
        if run(&[
            std::ffi::OsStr::new("xattr"),
            "-cr".as_ref(),
            app,
        ]) {
            details.push("quarantine attributes cleared".into());
        } else {
            details.push("attribute clearing failed".into());
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn finish_signing(&self, _details: &mut Vec<String>) {}
}

fn fresh_id(kind: LiteralKind) -> String {
    match kind {
        LiteralKind::Hex128 => {
            let mut raw = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut raw);
            hex::encode(raw)
        }
        LiteralKind::Uuid => Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn host(tmp: &std::path::Path) -> HostLayout {
        HostLayout::new(tmp.join("data"), tmp.join("install"), "Host")
    }

    fn write_target(layout: &HostLayout, label: &str, content: &str) -> PathBuf {
        let (_, candidates) = layout
            .patch_targets()
            .into_iter()
            .find(|(name, _)| name == label)
            .expect("known target");
        let path = candidates[0].clone();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn mutator(tmp: &std::path::Path) -> DeepIdentityMutator {
        DeepIdentityMutator::new(host(tmp), tmp.join("patch-backups"))
    }

    #[test]
    fn missing_installation_reports_failure_without_touching_anything() -> Result<()> {
        let tmp = tempdir()?;
        let report = mutator(tmp.path()).apply()?;
        assert!(!report.success);
        assert!(report.outcomes.is_empty());
        Ok(())
    }

    #[test]
    fn acquisition_pattern_is_replaced_and_backed_up() -> Result<()> {
        let tmp = tempdir()?;
        let layout = host(tmp.path());
        let source = r#"const id = readFile("/etc/machine-id");"#;
        let path = write_target(&layout, "main.js", source);

        let report = mutator(tmp.path())
            .with_rules(fingerprint_rules(RulePlatform::Linux))
            .apply()?;
        assert!(report.success);
        let main = report
            .outcomes
            .iter()
            .find(|outcome| outcome.file == "main.js")
            .expect("main.js outcome");
        assert_eq!(main.status, FileStatus::Modified);

        let patched = fs::read_to_string(&path)?;
        assert!(patched.contains("/proc/sys/kernel/random/uuid"));
        assert!(!patched.contains("/etc/machine-id"));

        let backups: Vec<_> = fs::read_dir(tmp.path().join("patch-backups"))?
            .filter_map(Result::ok)
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(
            fs::read_to_string(backups[0].path().join("main.js"))?,
            source
        );
        Ok(())
    }

    #[test]
    fn windows_registry_query_variants_all_match() {
        let rules = fingerprint_rules(RulePlatform::Windows);
        let variants = [
            r"REG.exe QUERY HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Cryptography /v MachineGuid",
            r"reg query HKLM\SOFTWARE\Microsoft\Cryptography /v MachineGuid",
            r"wmic csproduct get uuid",
        ];
        for variant in variants {
            let hit = rules.iter().any(|rule| {
                rule.patterns
                    .iter()
                    .any(|pattern| Regex::new(pattern).unwrap().is_match(variant))
            });
            assert!(hit, "no rule matched: {variant}");
        }
    }

    #[test]
    fn identifier_literals_are_rewritten_with_fresh_values() -> Result<()> {
        let tmp = tempdir()?;
        let layout = host(tmp.path());
        let stale = "a1b2c3d4e5f6a7b8a1b2c3d4e5f6a7b8";
        let path = write_target(
            &layout,
            "cliProcessMain.js",
            &format!(r#"cfg={{machineId:"{stale}"}}"#),
        );

        mutator(tmp.path()).apply()?;
        let patched = fs::read_to_string(&path)?;
        assert!(!patched.contains(stale));
        assert!(patched.contains("machineId:\""));
        Ok(())
    }

    #[test]
    fn unmatched_file_still_gets_a_marker_and_is_not_fatal() -> Result<()> {
        let tmp = tempdir()?;
        let layout = host(tmp.path());
        let source = "console.log('nothing identifying here')";
        let path = write_target(&layout, "main.js", source);

        let report = mutator(tmp.path()).apply()?;
        assert!(report.success);
        let main = report
            .outcomes
            .iter()
            .find(|outcome| outcome.file == "main.js")
            .unwrap();
        assert_eq!(main.status, FileStatus::NoPatternMatched);

        let patched = fs::read_to_string(&path)?;
        assert_ne!(patched, source);
        assert!(patched.starts_with(source));
        assert!(patched.contains("// "));
        Ok(())
    }

    #[test]
    fn absent_targets_are_reported_not_found() -> Result<()> {
        let tmp = tempdir()?;
        fs::create_dir_all(tmp.path().join("install"))?;
        let report = mutator(tmp.path()).apply()?;
        assert!(report.success);
        assert!(report
            .outcomes
            .iter()
            .all(|outcome| outcome.status == FileStatus::NotFound));
        let lines = report.detail_lines();
        assert!(lines.iter().any(|line| line.contains("not found")));
        Ok(())
    }
}
