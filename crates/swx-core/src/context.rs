//! Explicit service wiring: everything is constructed once per process and
//! passed by reference, no ambient global state.

use std::sync::Mutex;

use anyhow::Result;

use crate::backup::ArchiveBackupEngine;
use crate::config::Config;
use crate::identity::DeviceIdentityStore;
use crate::inject::SessionInjector;
use crate::license::LicenseVerifier;
use crate::mutate::DeepIdentityMutator;
use crate::process::SystemProcessController;
use crate::store::CredentialStore;

pub struct ServiceContext {
    config: Config,
    store: CredentialStore,
    /// Single-flight guard: at most one orchestrator workflow at a time.
    workflow_guard: Mutex<()>,
}

impl ServiceContext {
    pub fn new(config: Config) -> Result<Self> {
        let store = CredentialStore::open(&config.app.profiles_db())?;
        Ok(Self {
            config,
            store,
            workflow_guard: Mutex::new(()),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: Config) -> Self {
        Self {
            config,
            store: CredentialStore::in_memory().expect("in-memory store"),
            workflow_guard: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    #[must_use]
    pub fn identity_store(&self) -> DeviceIdentityStore {
        DeviceIdentityStore::new(self.config.host.storage_json())
    }

    #[must_use]
    pub fn injector(&self) -> SessionInjector {
        SessionInjector::new(self.config.host.session_db())
    }

    #[must_use]
    pub fn backup_engine(&self) -> ArchiveBackupEngine {
        ArchiveBackupEngine::new(self.config.app.backups_root(), self.config.host.clone())
    }

    #[must_use]
    pub fn mutator(&self) -> DeepIdentityMutator {
        DeepIdentityMutator::new(
            self.config.host.clone(),
            self.config.app.patch_backups_root(),
        )
    }

    #[must_use]
    pub fn process_controller(&self) -> SystemProcessController {
        SystemProcessController::new(&self.config.host)
    }

    #[must_use]
    pub fn verifier(&self) -> LicenseVerifier<'_> {
        LicenseVerifier::new(
            &self.store,
            self.identity_store(),
            self.config.license.clone(),
        )
    }

    #[must_use]
    pub fn workflow_guard(&self) -> &Mutex<()> {
        &self.workflow_guard
    }
}
