//! In-memory stand-ins for the external collaborators, shared by the unit
//! tests across modules.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use serde_json::json;

use crate::apps::{AppsSync, InstallMode};
use crate::bootloader::{Bootloader, MalformedVersionFile};
use crate::cancel::CancelToken;
use crate::config::{Config, TlsKeys};
use crate::remote::Remote;
use crate::sysroot::Sysroot;
use crate::target::Target;
use crate::tuf::TufSource;
use crate::version_store::VersionStore;

pub fn config() -> Config {
    Config {
        sysroot: PathBuf::from("/sysroot"),
        ostree_server: "https://example.io/treehub".to_string(),
        tags: vec!["main".to_string()],
        storage_watermark: 90,
        bootupgrade_blocker: false,
        force_downgrade: false,
        hardware_id: "hw".to_string(),
        ecu_serial: String::new(),
        secondary_hardware_ids: Vec::new(),
        server: "https://example.io".to_string(),
        tls_keys: TlsKeys {
            ca_file: None,
            cert_file: None,
            pkey_file: None,
        },
    }
}

pub fn target_with_version(name: &str, hash: &str, version: i64) -> Target {
    hw_target(name, hash, version, &["hw"])
}

pub fn tagged_target(name: &str, hash: &str, version: i64, tags: &[&str]) -> Target {
    let tags = tags.iter().map(|t| t.to_string()).collect();
    Target::new(
        name.to_string(),
        hash.to_string(),
        version,
        vec!["hw".to_string()],
        tags,
        json!({"version": version.to_string()}),
    )
}

pub fn hw_target(name: &str, hash: &str, version: i64, hwids: &[&str]) -> Target {
    let hwids = hwids.iter().map(|h| h.to_string()).collect();
    Target::new(
        name.to_string(),
        hash.to_string(),
        version,
        hwids,
        vec!["main".to_string()],
        json!({"version": version.to_string()}),
    )
}

#[derive(Default)]
pub struct FakeSysroot {
    pub root: PathBuf,
    pub booted: RefCell<String>,
    pub pending: RefCell<String>,
    pub rollback: RefCell<String>,
    pub commit_files: HashMap<(String, String), String>,
    pub remotes: RefCell<Vec<String>>,
    /// Scripted pull failures, consumed front to back; an empty queue means
    /// pulls succeed.
    pub pull_errors: RefCell<VecDeque<String>>,
    pub pulled: RefCell<Vec<String>>,
    pub deploy_error: RefCell<Option<String>>,
    pub deployed: RefCell<Vec<String>>,
    pub reload_changed: Cell<bool>,
    pub reload_count: Cell<u32>,
}

impl FakeSysroot {
    pub fn booted(hash: &str) -> Self {
        Self {
            booted: RefCell::new(hash.to_string()),
            ..Self::default()
        }
    }

    pub fn booted_at(hash: &str, root: &Path) -> Self {
        Self {
            booted: RefCell::new(hash.to_string()),
            root: root.to_path_buf(),
            ..Self::default()
        }
    }
}

impl Sysroot for FakeSysroot {
    fn path(&self) -> &Path {
        &self.root
    }

    fn repo_path(&self) -> PathBuf {
        self.root.clone()
    }

    fn booted_hash(&self) -> String {
        self.booted.borrow().clone()
    }

    fn pending_hash(&self) -> String {
        self.pending.borrow().clone()
    }

    fn rollback_hash(&self) -> String {
        self.rollback.borrow().clone()
    }

    fn has_remote(&self, name: &str) -> bool {
        self.remotes.borrow().iter().any(|r| r == name)
    }

    fn add_remote(&self, remote: &Remote) -> Result<()> {
        self.remotes.borrow_mut().push(remote.name.clone());
        Ok(())
    }

    fn pull(&self, remote: &Remote, _hash: &str) -> Result<()> {
        self.pulled.borrow_mut().push(remote.name.clone());

        if let Some(err) = self.pull_errors.borrow_mut().pop_front() {
            bail!(err);
        }
        Ok(())
    }

    fn deploy(&self, hash: &str) -> Result<()> {
        self.deployed.borrow_mut().push(hash.to_string());

        if let Some(err) = self.deploy_error.borrow().as_ref() {
            bail!(err.clone());
        }
        Ok(())
    }

    fn read_commit_file(&self, hash: &str, path: &str) -> Result<Option<String>> {
        Ok(self.commit_files.get(&(hash.to_string(), path.to_string())).cloned())
    }

    fn reload(&self) -> Result<bool> {
        self.reload_count.set(self.reload_count.get() + 1);
        Ok(self.reload_changed.get())
    }
}

#[derive(Default)]
pub struct FakeBootloader {
    pub supported: bool,
    pub update_in_progress: bool,
    pub rollback_protection: bool,
    pub current_version: Option<String>,
    pub target_version: Option<String>,
    pub malformed_version_file: bool,
    pub notify_count: Cell<u32>,
}

impl Bootloader for FakeBootloader {
    fn is_update_supported(&self) -> bool {
        self.supported
    }

    fn is_update_in_progress(&self) -> bool {
        self.update_in_progress
    }

    fn is_rollback_protection_enabled(&self) -> bool {
        self.rollback_protection
    }

    fn get_current_version(&self) -> Option<String> {
        self.current_version.clone()
    }

    fn get_target_version(&self, _commit: &str) -> Result<Option<String>, MalformedVersionFile> {
        if self.malformed_version_file {
            return Err(MalformedVersionFile("no bootfirmware_version entry".to_string()));
        }
        Ok(self.target_version.clone())
    }

    fn update_notify(&self) {
        self.notify_count.set(self.notify_count.get() + 1);
    }
}

pub struct FakeTuf {
    pub targets: Vec<Target>,
    pub fail_fetch: Cell<bool>,
    pub no_cache: Cell<bool>,
    pub fail_verify: Cell<bool>,
    pub report_target: RefCell<Option<String>>,
}

impl FakeTuf {
    pub fn with_targets(targets: Vec<Target>) -> Self {
        Self {
            targets,
            fail_fetch: Cell::new(false),
            no_cache: Cell::new(false),
            fail_verify: Cell::new(false),
            report_target: RefCell::new(None),
        }
    }
}

impl TufSource for FakeTuf {
    fn fetch_targets(&self) -> Result<Vec<Target>> {
        if self.fail_fetch.get() {
            bail!("metadata server unreachable");
        }
        Ok(self.targets.clone())
    }

    fn verify_target(&self, target: &Target) -> Result<()> {
        if self.fail_verify.get() {
            return Err(anyhow!("hash of {} disagrees with the signed role", target.name()));
        }
        Ok(())
    }

    fn fetch_cached(&self) -> Option<Vec<Target>> {
        if self.no_cache.get() {
            None
        } else {
            Some(self.targets.clone())
        }
    }

    fn set_report_target(&self, name: &str) {
        *self.report_target.borrow_mut() = Some(name.to_string());
    }
}

#[derive(Default)]
pub struct FakeApps {
    pub fail_sync: Cell<bool>,
    pub synced: RefCell<Vec<String>>,
    pub started: RefCell<Vec<String>>,
}

impl AppsSync for FakeApps {
    fn sync(&self, target: &Target, _mode: InstallMode, _token: &CancelToken) -> Result<()> {
        if self.fail_sync.get() {
            bail!("app containers failed to start");
        }
        self.synced.borrow_mut().push(target.name().to_string());
        Ok(())
    }

    fn start_only(&self, target: &Target, _root: &Path) -> Result<()> {
        self.started.borrow_mut().push(target.name().to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemVersionStore {
    installed: RefCell<Vec<Target>>,
    pending: RefCell<Option<Target>>,
    failed: RefCell<Vec<String>>,
}

impl MemVersionStore {
    pub fn seed(&self, target: &Target) {
        self.installed.borrow_mut().push(target.clone());
    }
}

impl VersionStore for MemVersionStore {
    fn installed(&self) -> Vec<Target> {
        self.installed.borrow().clone()
    }

    fn record_installed(&self, target: &Target) -> Result<()> {
        let mut installed = self.installed.borrow_mut();
        if !installed.iter().any(|t| t.sha256() == target.sha256()) {
            installed.push(target.clone());
        }
        self.failed.borrow_mut().retain(|h| h != target.sha256());
        Ok(())
    }

    fn pending(&self) -> Option<Target> {
        self.pending.borrow().clone()
    }

    fn set_pending(&self, target: Option<&Target>) -> Result<()> {
        *self.pending.borrow_mut() = target.cloned();
        Ok(())
    }

    fn mark_failed(&self, target: &Target) -> Result<()> {
        self.failed.borrow_mut().push(target.sha256().to_string());
        Ok(())
    }

    fn is_failed(&self, sha256: &str) -> bool {
        self.failed.borrow().iter().any(|h| h == sha256)
    }
}
