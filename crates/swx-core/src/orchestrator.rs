//! The identity-switch workflows: sequenced, partially recoverable, and
//! explicit about which step failures abort and which are carried as
//! warnings.
//!
//! Per-state policy for `switch_to`:
//!
//! | state                     | on failure                                |
//! |---------------------------|-------------------------------------------|
//! | CapturingCurrentIdentity  | warn, continue                            |
//! | TerminatingHost           | abort (`HostBusy`)                        |
//! | SnapshottingEnvironment   | warn, continue without a snapshot         |
//! | ResolvingTargetIdentity   | fall through to DeepResetting             |
//! | DeepResetting             | accumulate details, continue              |
//! | RestoringEnvironment      | continue; temp snapshot deleted anyway    |
//! | InjectingCredential       | warn, continue                            |
//! | MarkingCurrent            | warn, continue                            |
//! | RelaunchingHost           | warn, continue                            |
//!
//! The overall result is a success as long as termination succeeded; the
//! workflow optimizes for the best attainable state, not strict
//! correctness. Only one workflow runs at a time: a second caller fails
//! fast with `WorkflowBusy` instead of interleaving.

use anyhow::Result;
use serde_json::json;
use tracing::info;

use swx_domain::{DeviceIdentityBundle, Profile, SnapshotKind};

use crate::context::ServiceContext;
use crate::inject::SessionCredential;
use crate::license::{Activation, LicenseError};
use crate::outcome::ExecutionOutcome;
use crate::process::HostProcess;
use crate::store::ProfileUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchStep {
    CapturingCurrentIdentity,
    TerminatingHost,
    SnapshottingEnvironment,
    ResolvingTargetIdentity,
    DeepResetting,
    RestoringEnvironment,
    InjectingCredential,
    MarkingCurrent,
    RelaunchingHost,
}

impl SwitchStep {
    fn as_str(self) -> &'static str {
        match self {
            SwitchStep::CapturingCurrentIdentity => "capturing_current_identity",
            SwitchStep::TerminatingHost => "terminating_host",
            SwitchStep::SnapshottingEnvironment => "snapshotting_environment",
            SwitchStep::ResolvingTargetIdentity => "resolving_target_identity",
            SwitchStep::DeepResetting => "deep_resetting",
            SwitchStep::RestoringEnvironment => "restoring_environment",
            SwitchStep::InjectingCredential => "injecting_credential",
            SwitchStep::MarkingCurrent => "marking_current",
            SwitchStep::RelaunchingHost => "relaunching_host",
        }
    }
}

pub struct SwitchOrchestrator<'a> {
    ctx: &'a ServiceContext,
    process: &'a dyn HostProcess,
}

impl<'a> SwitchOrchestrator<'a> {
    #[must_use]
    pub fn new(ctx: &'a ServiceContext, process: &'a dyn HostProcess) -> Self {
        Self { ctx, process }
    }

    /// Switch the host to `profile_id`, preserving the working session.
    pub fn switch_to(&self, profile_id: &str) -> Result<ExecutionOutcome> {
        let Ok(_guard) = self.ctx.workflow_guard().try_lock() else {
            return Ok(workflow_busy());
        };
        let store = self.ctx.store();
        let Some(target) = store.get(profile_id)? else {
            return Ok(ExecutionOutcome::user_error(
                format!("profile {profile_id} not found"),
                json!({ "reason": "NotFound" }),
            ));
        };

        let identity_store = self.ctx.identity_store();
        let mut warnings: Vec<String> = Vec::new();
        let mut details: Vec<String> = Vec::new();

        step(SwitchStep::CapturingCurrentIdentity);
        if let Some(current) = store.current()? {
            if let Some(live) = identity_store.read() {
                match store.update(
                    &current.id,
                    &ProfileUpdate {
                        device_identity: Some(Some(live)),
                        ..ProfileUpdate::default()
                    },
                ) {
                    Ok(_) => details.push(format!("captured live identity onto {}", current.email)),
                    Err(err) => warnings.push(format!("could not capture live identity: {err:#}")),
                }
            }
        }

        step(SwitchStep::TerminatingHost);
        if self.process.is_running() && !self.process.terminate() {
            store.append_log(
                "switch_profile_aborted",
                Some(&format!("host busy, target {}", target.email)),
            )?;
            return Ok(ExecutionOutcome::user_error(
                "the host application could not be terminated; close it and retry",
                json!({ "reason": "HostBusy", "profile": target.email }),
            ));
        }

        step(SwitchStep::SnapshottingEnvironment);
        let engine = self.ctx.backup_engine();
        let snapshot = match engine.snapshot(SnapshotKind::Complete, None, true) {
            Ok(snapshot) => {
                details.push(format!("captured {} session members", snapshot.members.len()));
                Some(snapshot)
            }
            Err(err) => {
                warnings.push(format!("session snapshot failed: {err:#}"));
                None
            }
        };

        step(SwitchStep::ResolvingTargetIdentity);
        let mut identity_restored = false;
        if let Some(bundle) = &target.device_identity {
            match identity_store.replace(bundle) {
                Ok(()) => {
                    identity_restored = true;
                    details.push("restored the profile's captured device identity".into());
                }
                Err(err) => warnings.push(format!("identity restore failed: {err}")),
            }
        }

        step(SwitchStep::DeepResetting);
        if !identity_restored {
            let fresh = DeviceIdentityBundle::generate();
            match identity_store.replace(&fresh) {
                Ok(()) => {
                    details.push("generated a fresh device identity".into());
                    // Persist so the next switch back restores it.
                    if let Err(err) = store.update(
                        &target.id,
                        &ProfileUpdate {
                            device_identity: Some(Some(fresh)),
                            ..ProfileUpdate::default()
                        },
                    ) {
                        warnings.push(format!("could not persist generated identity: {err:#}"));
                    }
                }
                Err(err) => warnings.push(format!("identity replacement failed: {err}")),
            }
        }
        match self.ctx.mutator().apply() {
            Ok(report) => {
                if !report.success {
                    warnings.push("program-file mutation skipped: host install missing".into());
                }
                details.extend(report.detail_lines());
            }
            Err(err) => warnings.push(format!("program-file mutation failed: {err:#}")),
        }

        step(SwitchStep::RestoringEnvironment);
        if let Some(snapshot) = snapshot {
            match engine.restore(&snapshot) {
                Ok(report) => {
                    details.push(format!(
                        "restored {}/{} session members",
                        report.restored.len(),
                        report.intended
                    ));
                    if let Some(cause) = report.error {
                        warnings.push(format!("session restore incomplete: {cause}"));
                    }
                }
                Err(err) => warnings.push(format!("session restore failed: {err:#}")),
            }
            // The temporary snapshot is consumed either way.
            if let Err(err) = engine.delete(&snapshot) {
                warnings.push(format!("could not delete temporary snapshot: {err:#}"));
            }
        }

        step(SwitchStep::InjectingCredential);
        let credential = SessionCredential {
            email: target.email.clone(),
            access_token: target.access_token.clone(),
            refresh_token: target.refresh_token.clone(),
        };
        match self.ctx.injector().inject(&credential) {
            Ok(()) => details.push("credential injected into the host session".into()),
            Err(err) => warnings.push(format!("credential injection failed: {err:#}")),
        }

        step(SwitchStep::MarkingCurrent);
        if let Err(err) = store.set_current(&target.id) {
            warnings.push(format!("could not mark profile current: {err:#}"));
        }
        store.append_log("switch_profile", Some(&target.email))?;

        step(SwitchStep::RelaunchingHost);
        if self.auto_relaunch_enabled() {
            if self.process.launch() {
                details.push("host relaunched".into());
            } else {
                warnings.push("host relaunch failed".into());
            }
        }

        Ok(ExecutionOutcome::success(
            switch_message(&target, &warnings),
            json!({
                "profile": target.email,
                "details": details,
                "warnings": warnings,
            }),
        ))
    }

    /// Relaunch preference: the environment flag wins, the stored config
    /// table is the fallback.
    fn auto_relaunch_enabled(&self) -> bool {
        if self.ctx.config().auto_relaunch {
            return true;
        }
        matches!(
            self.ctx.store().get_config("autoRelaunch"),
            Ok(Some(value)) if matches!(value.as_str(), "1" | "true")
        )
    }

    /// Terminate, generate and install a fresh identity bundle, log. No
    /// snapshot, no credential change.
    pub fn reset_identity(&self) -> Result<ExecutionOutcome> {
        let Ok(_guard) = self.ctx.workflow_guard().try_lock() else {
            return Ok(workflow_busy());
        };
        if self.process.is_running() && !self.process.terminate() {
            return Ok(host_busy());
        }
        let identity_store = self.ctx.identity_store();
        let old = identity_store.read();
        let fresh = DeviceIdentityBundle::generate();
        if let Err(err) = identity_store.replace(&fresh) {
            return Ok(ExecutionOutcome::failure(
                format!("identity reset failed: {err}"),
                json!({ "reason": error_reason(&err) }),
            ));
        }
        self.ctx.store().append_log(
            "reset_identity",
            Some(&format!("machine id now {}", fresh.machine_id)),
        )?;
        Ok(ExecutionOutcome::success(
            "device identity regenerated",
            json!({
                "old_machine_id": old.map(|bundle| bundle.machine_id),
                "new_machine_id": fresh.machine_id,
            }),
        ))
    }

    /// Irreversible wholesale wipe: identity, auth artifacts, caches,
    /// session storage, workspace history. No snapshot is taken.
    pub fn factory_reset(&self) -> Result<ExecutionOutcome> {
        let Ok(_guard) = self.ctx.workflow_guard().try_lock() else {
            return Ok(workflow_busy());
        };
        if self.process.is_running() && !self.process.terminate() {
            return Ok(host_busy());
        }

        let host = &self.ctx.config().host;
        let mut details: Vec<String> = Vec::new();

        let identity_store = self.ctx.identity_store();
        match identity_store.replace(&DeviceIdentityBundle::generate()) {
            Ok(()) => details.push("device identity regenerated".into()),
            Err(err) => details.push(format!("identity reset failed: {err}")),
        }

        for file in host.auth_files() {
            if file.exists() {
                match crate::fsutil::remove_path(&file) {
                    Ok(()) => details.push(format!("removed {}", display_name(&file))),
                    Err(err) => details.push(format!("could not remove {}: {err:#}", display_name(&file))),
                }
            }
        }
        for dir in host.cache_dirs() {
            if dir.exists() {
                match crate::fsutil::remove_path(&dir) {
                    Ok(()) => details.push(format!("cleared {}", display_name(&dir))),
                    Err(err) => details.push(format!("could not clear {}: {err:#}", display_name(&dir))),
                }
            }
        }
        for dir in [
            host.data_file("Local Storage"),
            host.data_file("Session Storage"),
            host.data_file("logs"),
        ] {
            if dir.exists() {
                match crate::fsutil::remove_path(&dir) {
                    Ok(()) => details.push(format!("cleared {}", display_name(&dir))),
                    Err(err) => details.push(format!("could not clear {}: {err:#}", display_name(&dir))),
                }
            }
        }
        // Workspace history trees are recreated empty so the host starts
        // with a sane layout.
        for dir in [host.workspace_storage(), host.history_dir()] {
            if dir.exists() {
                if let Err(err) = crate::fsutil::remove_path(&dir) {
                    details.push(format!("could not clear {}: {err:#}", display_name(&dir)));
                    continue;
                }
                if std::fs::create_dir_all(&dir).is_ok() {
                    details.push(format!("reset {}", display_name(&dir)));
                }
            }
        }

        let injector = self.ctx.injector();
        if injector.db_path().exists() {
            match injector.clear_auth() {
                Ok(()) => details.push("cached auth cleared from the session database".into()),
                Err(err) => details.push(format!("could not clear cached auth: {err:#}")),
            }
        }

        self.ctx
            .store()
            .append_log("factory_reset", Some(&format!("{} items", details.len())))?;
        Ok(ExecutionOutcome::success(
            format!("factory reset complete ({} items)", details.len()),
            json!({ "details": details }),
        ))
    }

    /// Terminate, then run the program-file mutator. No credential change.
    pub fn deep_reset(&self) -> Result<ExecutionOutcome> {
        let Ok(_guard) = self.ctx.workflow_guard().try_lock() else {
            return Ok(workflow_busy());
        };
        if self.process.is_running() && !self.process.terminate() {
            return Ok(host_busy());
        }
        let report = self.ctx.mutator().apply()?;
        self.ctx.store().append_log("deep_reset", None)?;
        let details = report.detail_lines();
        if report.success {
            Ok(ExecutionOutcome::success(
                "deep reset complete",
                json!({ "details": details }),
            ))
        } else {
            Ok(ExecutionOutcome::failure(
                "deep reset could not run",
                json!({ "details": details }),
            ))
        }
    }

    /// Activate a license key and seed one profile per returned token.
    pub fn activate_license(
        &self,
        key: &str,
        server_override: Option<&str>,
    ) -> Result<ExecutionOutcome> {
        let activation = match self.ctx.verifier().activate(key, server_override) {
            Ok(activation) => activation,
            Err(err) => return Ok(license_failure(&err)),
        };
        let created = self.seed_profiles(&activation)?;
        self.ctx.store().append_log(
            "activate_license",
            Some(&format!(
                "{} ({} tokens, {} profiles created)",
                activation.key_prefix,
                activation.tokens.len(),
                created.len()
            )),
        )?;
        Ok(ExecutionOutcome::success(
            format!(
                "license activated: {} token(s), {} new profile(s)",
                activation.tokens.len(),
                created.len()
            ),
            json!({
                "keyPrefix": activation.key_prefix,
                "email": activation.email,
                "expiresAt": activation.expires_at,
                "remainingDays": activation.remaining_days,
                "createdProfiles": created,
            }),
        ))
    }

    /// One profile per token, named deterministically from the key prefix
    /// and a 1-based index. Existing emails are updated, not duplicated.
    fn seed_profiles(&self, activation: &Activation) -> Result<Vec<String>> {
        let store = self.ctx.store();
        let base_email = activation
            .email
            .clone()
            .unwrap_or_else(|| format!("{}@license.local", activation.key_prefix.to_lowercase()));
        let mut created = Vec::new();

        if activation.tokens.len() == 1 {
            let token = &activation.tokens[0];
            match store.get_by_email(&base_email)? {
                Some(existing) => {
                    store.update(
                        &existing.id,
                        &ProfileUpdate {
                            access_token: Some(token.clone()),
                            ..ProfileUpdate::default()
                        },
                    )?;
                }
                None => {
                    store.add(&base_email, token, None, None)?;
                    created.push(base_email);
                }
            }
            return Ok(created);
        }

        for (index, token) in activation.tokens.iter().enumerate() {
            let ordinal = index + 1;
            let email = format!("{base_email}_{ordinal}");
            let name = format!("{}-{ordinal}", activation.key_prefix);
            if store.get_by_email(&email)?.is_some() {
                continue;
            }
            store.add(&email, token, None, Some(&name))?;
            created.push(email);
        }
        Ok(created)
    }

    /// Import whatever credential the host is currently signed in with.
    pub fn import_current(&self, display_name: Option<&str>) -> Result<ExecutionOutcome> {
        let session = match self.ctx.injector().read_session() {
            Ok(Some(session)) => session,
            Ok(None) => {
                return Ok(ExecutionOutcome::user_error(
                    "the host has no signed-in session to import",
                    json!({ "reason": "NotFound" }),
                ))
            }
            Err(err) => {
                return Ok(ExecutionOutcome::failure(
                    format!("could not read the host session: {err:#}"),
                    json!({}),
                ))
            }
        };
        let store = self.ctx.store();
        let profile = match store.get_by_email(&session.email)? {
            Some(existing) => store.update(
                &existing.id,
                &ProfileUpdate {
                    access_token: Some(session.access_token.clone()),
                    refresh_token: Some(session.refresh_token.clone()),
                    ..ProfileUpdate::default()
                },
            )?,
            None => {
                let profile = store.add(
                    &session.email,
                    &session.access_token,
                    session.refresh_token.as_deref(),
                    display_name,
                )?;
                store.append_log("import_profile", Some(&session.email))?;
                profile
            }
        };
        store.set_current(&profile.id)?;
        Ok(ExecutionOutcome::success(
            format!("imported {}", profile.email),
            json!({ "profile": profile.email }),
        ))
    }
}

fn step(step: SwitchStep) {
    info!(step = step.as_str(), "workflow step");
}

fn switch_message(target: &Profile, warnings: &[String]) -> String {
    if warnings.is_empty() {
        format!("switched to {}", target.label())
    } else {
        format!(
            "switched to {} with {} warning(s)",
            target.label(),
            warnings.len()
        )
    }
}

fn workflow_busy() -> ExecutionOutcome {
    ExecutionOutcome::user_error(
        "another workflow is already running",
        json!({ "reason": "WorkflowBusy" }),
    )
}

fn host_busy() -> ExecutionOutcome {
    ExecutionOutcome::user_error(
        "the host application could not be terminated; close it and retry",
        json!({ "reason": "HostBusy" }),
    )
}

fn license_failure(err: &LicenseError) -> ExecutionOutcome {
    let reason = match err {
        LicenseError::Network(_) => "NetworkError",
        LicenseError::InvalidKey => "InvalidKey",
        LicenseError::Revoked => "Revoked",
        LicenseError::Expired => "Expired",
        LicenseError::SignatureInvalid => "SignatureInvalid",
        LicenseError::NotActivated => "NotActivated",
        LicenseError::ServerNotConfigured => "ServerNotConfigured",
        LicenseError::Rejected(_) => "Rejected",
        LicenseError::Storage(_) => "Storage",
    };
    if matches!(err, LicenseError::Network(_)) {
        ExecutionOutcome::failure(err.to_string(), json!({ "reason": reason }))
    } else {
        ExecutionOutcome::user_error(err.to_string(), json!({ "reason": reason }))
    }
}

fn error_reason(err: &crate::identity::IdentityError) -> &'static str {
    match err {
        crate::identity::IdentityError::ConfigNotFound(_) => "ConfigNotFound",
        crate::identity::IdentityError::WriteFailed(_) => "WriteFailed",
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| {
            name.to_string_lossy().to_string()
        })
}
