mod status;
pub use status::{InstallState, UpdateStatus};

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;
use log::{error, info, warn};

use crate::apps::{AppsSync, InstallMode};
use crate::bootloader::Bootloader;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::sysroot::Sysroot;
use crate::target::Target;
use crate::tree::{DownloadOutcome, InstallCode, InstallOutcome, TreeManager};
use crate::tuf::{LocalTuf, TufSource};
use crate::version_store::VersionStore;

/// Top-level orchestration: check-in against the signed metadata, one
/// install traversal at a time, finalize-or-rollback after reboot.
pub struct Controller {
    cfg: Config,
    tree: TreeManager,
    tuf: Box<dyn TufSource>,
    store: Box<dyn VersionStore>,
    apps: Option<Box<dyn AppsSync>>,
    sysroot: Rc<dyn Sysroot>,
    bootloader: Rc<dyn Bootloader>,
    targets: RefCell<Vec<Target>>,
    state: Cell<InstallState>,
    offline: RefCell<Option<OfflineSource>>,
}

struct OfflineSource {
    ostree_repo: String,
    apps_dir: Option<PathBuf>,
}

impl Controller {
    #[rustfmt::skip]
    pub fn new(
        cfg: Config,
        sysroot: Rc<dyn Sysroot>,
        bootloader: Rc<dyn Bootloader>,
        tuf: Box<dyn TufSource>,
        store: Box<dyn VersionStore>,
        apps: Option<Box<dyn AppsSync>>,
        http: reqwest::blocking::Client,
    ) -> Self {
        let tree = TreeManager::new(&cfg, sysroot.clone(), bootloader.clone(), http);

        let controller = Self {
            cfg,
            tree,
            tuf,
            store,
            apps,
            sysroot,
            bootloader,
            targets: RefCell::new(Vec::new()),
            state: Cell::new(InstallState::Idle),
            offline: RefCell::new(None),
        };
        controller.bootstrap_initial_target();
        controller
    }

    /// A device booted from a factory image has a commit the database has
    /// never heard of; record it so rollback has somewhere to land.
    fn bootstrap_initial_target(&self) {
        let booted = self.sysroot.booted_hash();
        if booted.is_empty() || self.store.is_known(&booted) {
            return;
        }

        // a staged update awaiting finalization, not a factory image
        if self.store.pending().is_some_and(|p| p.sha256() == booted) {
            return;
        }

        let initial = Target::initial(&booted, &self.cfg.hardware_id);
        info!("registering initial target {} for commit {booted}", initial.name());

        if let Err(err) = self.store.record_installed(&initial) {
            warn!("failed to record the initial target: {err:#}");
        }
    }

    pub fn state(&self) -> InstallState {
        self.state.get()
    }

    fn select_targets(&self, raw: Vec<Target>) -> Vec<Target> {
        #[rustfmt::skip]
        let mut selected: Vec<Target> = raw.into_iter()
            .filter(|t| t.matches_tags(&self.cfg.tags))
            .filter(|t| t.matches_hardware(&self.cfg.hardware_id, &self.cfg.secondary_hardware_ids))
            .collect();

        selected.sort_by_key(Target::version);
        selected
    }

    pub fn check_in(&self) -> (UpdateStatus, Vec<Target>) {
        let (status, raw) = match self.tuf.fetch_targets() {
            Ok(raw) => (UpdateStatus::Ok, raw),
            Err(err) => {
                warn!("check-in failed: {err:#}");
                match self.tuf.fetch_cached() {
                    Some(cached) => {
                        info!("using the cached targets role");
                        (UpdateStatus::CheckinOkCached, cached)
                    }
                    None => return (UpdateStatus::CheckinFailure, Vec::new()),
                }
            }
        };

        let selected = self.select_targets(raw);
        *self.targets.borrow_mut() = selected.clone();
        self.state.set(InstallState::CheckedIn);

        if !self.cfg.ecu_serial.is_empty() {
            let current = self.get_current().map(|t| t.name().to_string()).unwrap_or_default();
            if let Err(err) = self.tuf.register_device(&self.cfg.ecu_serial, &current) {
                warn!("device registration failed: {err:#}");
            }
        }

        (status, selected)
    }

    /// Offline check-in from a directory pair: a verified metadata copy and
    /// a local ostree repo with the commits already in it.
    pub fn check_in_local(&self, tuf_repo: &Path, ostree_repo: &Path, apps_dir: Option<&Path>) -> (UpdateStatus, Vec<Target>) {
        let local = LocalTuf::new(tuf_repo);

        let raw = match local.fetch_targets() {
            Ok(raw) => raw,
            Err(err) => {
                error!("offline check-in failed: {err:#}");
                return (UpdateStatus::TufMetaPullFailure, Vec::new());
            }
        };

        let selected = self.select_targets(raw);
        *self.targets.borrow_mut() = selected.clone();
        self.state.set(InstallState::CheckedIn);

        *self.offline.borrow_mut() = Some(OfflineSource {
            ostree_repo: format!("file://{}", ostree_repo.display()),
            apps_dir: apps_dir.map(Path::to_path_buf),
        });

        (UpdateStatus::Ok, selected)
    }

    /// Latest checked-in target whose first hardware id is the requested
    /// one, relying on the version-sorted order of the list.
    pub fn get_latest(&self, hwid: &str) -> Option<Target> {
        #[rustfmt::skip]
        let latest = self.targets.borrow().iter().rev()
            .find(|t| t.hardware_ids().first().map(String::as_str) == Some(hwid))
            .cloned();

        latest
    }

    pub fn get_by_version(&self, version: i64) -> Option<Target> {
        self.targets.borrow().iter().find(|t| t.version() == version).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Target> {
        self.targets.borrow().iter().find(|t| t.name() == name).cloned()
    }

    /// The target the device is running, as far as the database knows.
    pub fn get_current(&self) -> Option<Target> {
        let booted = self.sysroot.booted_hash();
        if booted.is_empty() {
            return None;
        }
        self.store.installed().into_iter().find(|t| t.sha256() == booted)
    }

    pub fn get_pending_target(&self) -> Option<Target> {
        self.store.pending()
    }

    pub fn is_installation_in_progress(&self) -> bool {
        self.get_pending_target().is_some()
    }

    /// A target the device already backed out of, either by bootloader
    /// action or because its apps would not start.
    pub fn is_rollback(&self, target: &Target) -> bool {
        target.sha256() == self.sysroot.rollback_hash() || self.store.is_failed(target.sha256())
    }

    /// Newest known-installed target older than the pending one.
    pub fn get_rollback_target(&self) -> Option<Target> {
        let pending = self.store.pending()?;

        #[rustfmt::skip]
        let rollback = self.store.installed().into_iter()
            .filter(|t| t.sha256() != pending.sha256())
            .filter(|t| t.version() < pending.version())
            .filter(|t| !self.store.is_failed(t.sha256()))
            .max_by_key(Target::version);

        rollback
    }

    /// Downgrades need an explicit opt-in, either configured or forced on
    /// the command line.
    pub fn is_blocked_downgrade(&self, target: &Target, force: bool) -> bool {
        if force || self.cfg.force_downgrade {
            return false;
        }

        match self.get_current() {
            Some(current) => target.version() < current.version(),
            None => false,
        }
    }

    pub fn installer(&self, target: Target, reason: &str) -> Installer<'_> {
        info!("installer for {} ({reason})", target.name());
        Installer {
            controller: self,
            target,
        }
    }

    pub fn hardware_id(&self) -> &str {
        &self.cfg.hardware_id
    }

    pub fn is_boot_fw_update_in_progress(&self) -> bool {
        self.bootloader.is_update_in_progress()
    }

    /// App sync on behalf of the CLI driver; `DelayAppInstall` pulls
    /// without starting anything.
    pub fn sync_apps_for(&self, target: &Target, mode: InstallMode) -> Result<()> {
        self.sync_apps(target, mode)
    }

    /// Keep the pending marker so a later `complete` starts the apps that
    /// were pulled but deliberately not launched.
    pub fn defer_app_finalization(&self, target: &Target) {
        if let Err(err) = self.store.set_pending(Some(target)) {
            warn!("failed to mark {} pending: {err:#}", target.name());
        }
    }

    fn sync_apps(&self, target: &Target, mode: InstallMode) -> Result<()> {
        let Some(apps) = &self.apps else {
            return Ok(());
        };

        if let Some(offline) = self.offline.borrow().as_ref() {
            if let Some(dir) = &offline.apps_dir {
                return apps.start_only(target, dir);
            }
        }

        apps.sync(target, mode, &CancelToken::new())
    }

    /// Post-reboot confirmation. Either we are on the pending commit and
    /// finalize it, or the bootloader already fell back and we clean up.
    pub fn complete_installation(&self) -> UpdateStatus {
        let Some(pending) = self.store.pending() else {
            return UpdateStatus::NoPendingInstallation;
        };

        let current = self.sysroot.booted_hash();

        if current == pending.sha256() {
            return self.finalize(&pending);
        }

        warn!("bootloader rolled back from {}; device is on {current}", pending.sha256());

        let _ = self.store.set_pending(None);
        let _ = self.store.mark_failed(&pending);
        self.state.set(InstallState::RolledBack);

        match self.get_current() {
            Some(current_target) => match self.sync_apps(&current_target, InstallMode::All) {
                Ok(()) => UpdateStatus::InstallRollbackOk,
                Err(err) => {
                    error!("failed to sync apps after the rollback: {err:#}");
                    UpdateStatus::InstallRollbackFailed
                }
            },
            // nothing known to sync against still counts as a clean fallback
            None => UpdateStatus::InstallRollbackOk,
        }
    }

    fn finalize(&self, pending: &Target) -> UpdateStatus {
        match self.sync_apps(pending, InstallMode::All) {
            Ok(()) => {
                if let Err(err) = self.store.record_installed(pending) {
                    warn!("failed to record {}: {err:#}", pending.name());
                }
                let _ = self.store.set_pending(None);
                self.tuf.set_report_target(pending.name());
                self.state.set(InstallState::Finalized);

                if self.bootloader.is_update_in_progress() {
                    UpdateStatus::OkNeedsRebootForBootFw
                } else {
                    UpdateStatus::Ok
                }
            }
            Err(err) => {
                error!("apps failed to start on {}: {err:#}", pending.name());
                let _ = self.store.mark_failed(pending);
                self.app_driven_rollback()
            }
        }
    }

    fn app_driven_rollback(&self) -> UpdateStatus {
        let Some(rollback) = self.get_rollback_target() else {
            error!("no rollback target available");
            self.state.set(InstallState::Failed);
            return UpdateStatus::InstallRollbackFailed;
        };

        info!("rolling back to {}", rollback.name());
        let outcome = self.tree.install(&rollback);
        self.state.set(InstallState::RolledBack);

        match outcome.code {
            InstallCode::Ok | InstallCode::NeedCompletion => {
                let _ = self.store.set_pending(Some(&rollback));
                UpdateStatus::InstallRollbackNeedsReboot
            }
            _ => {
                error!("rollback install failed: {}", outcome.description);
                UpdateStatus::InstallRollbackFailed
            }
        }
    }
}

/// One download-then-install traversal for one target.
pub struct Installer<'a> {
    controller: &'a Controller,
    target: Target,
}

impl Installer<'_> {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn download(&self, token: &CancelToken) -> InstallOutcome {
        let ctrl = self.controller;
        ctrl.state.set(InstallState::Downloading);

        let server = ctrl.offline.borrow().as_ref().map(|o| o.ostree_repo.clone());
        let outcome = match server {
            Some(server) => ctrl.tree.download_from(&server, &self.target, token),
            None => ctrl.tree.download(&self.target, token),
        };

        match outcome {
            DownloadOutcome::NoSpace(desc) => {
                ctrl.state.set(InstallState::Failed);
                InstallOutcome::new(InstallCode::DownloadFailedNoSpace, &desc)
            }
            DownloadOutcome::Failed(desc) => {
                ctrl.state.set(InstallState::Failed);
                InstallOutcome::new(InstallCode::DownloadFailed, &desc)
            }
            DownloadOutcome::Ok => match ctrl.tuf.verify_target(&self.target) {
                Ok(()) => {
                    ctrl.state.set(InstallState::Downloaded);
                    InstallOutcome::ok("downloaded")
                }
                Err(err) => {
                    // tell the finalizer this one must never be completed
                    let _ = ctrl.store.mark_failed(&self.target);
                    ctrl.state.set(InstallState::Failed);
                    InstallOutcome::new(InstallCode::VerificationFailed, &format!("{err:#}"))
                }
            },
        }
    }

    pub fn install(&self) -> InstallOutcome {
        let ctrl = self.controller;
        ctrl.state.set(InstallState::Installing);

        let outcome = ctrl.tree.install(&self.target);

        match outcome.code {
            InstallCode::Ok => {
                if let Err(err) = ctrl.store.record_installed(&self.target) {
                    warn!("failed to record {}: {err:#}", self.target.name());
                }
                ctrl.tuf.set_report_target(self.target.name());
                ctrl.state.set(InstallState::Ok);
            }
            InstallCode::NeedCompletion => {
                if let Err(err) = ctrl.store.set_pending(Some(&self.target)) {
                    warn!("failed to mark {} pending: {err:#}", self.target.name());
                }
                ctrl.tuf.set_report_target(self.target.name());
                ctrl.state.set(InstallState::NeedsReboot);
            }
            _ => ctrl.state.set(InstallState::Failed),
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{self, target_with_version, FakeBootloader, FakeSysroot, FakeTuf, MemVersionStore};

    struct Rig {
        sysroot: Rc<FakeSysroot>,
    }

    fn controller_with_apps(tuf: FakeTuf, store: MemVersionStore, booted: &str, apps: Option<Box<dyn AppsSync>>) -> (Controller, Rig) {
        let sysroot = Rc::new(FakeSysroot::booted(booted));
        let bootloader = Rc::new(FakeBootloader::default());

        let mut cfg = fixture::config();
        cfg.ostree_server = "file:///var/repo".to_string();

        let ctrl = Controller::new(
            cfg,
            sysroot.clone(),
            bootloader,
            Box::new(tuf),
            Box::new(store),
            apps,
            reqwest::blocking::Client::new(),
        );

        (
            ctrl,
            Rig {
                sysroot,
            },
        )
    }

    fn controller(tuf: FakeTuf, store: MemVersionStore, booted: &str) -> (Controller, Rig) {
        controller_with_apps(tuf, store, booted, None)
    }

    fn three_versions() -> Vec<Target> {
        vec![
            target_with_version("lmp-2", "h2", 2),
            target_with_version("lmp-1", "h1", 1),
            target_with_version("lmp-3", "h3", 3),
        ]
    }

    #[test]
    fn check_in_sorts_ascending_by_version() {
        let (ctrl, _) = controller(FakeTuf::with_targets(three_versions()), MemVersionStore::default(), "h1");

        let (status, targets) = ctrl.check_in();

        assert_eq!(status, UpdateStatus::Ok);
        let versions: Vec<i64> = targets.iter().map(Target::version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(ctrl.state(), InstallState::CheckedIn);
    }

    #[test]
    fn check_in_filters_by_tag_and_hardware() {
        let foreign_hw = fixture::hw_target("other-1", "h9", 9, &["rpi4"]);
        let foreign_tag = fixture::tagged_target("lmp-9", "h8", 9, &["devel"]);

        let mut targets = three_versions();
        targets.push(foreign_tag);
        targets.push(foreign_hw);

        let (ctrl, _) = controller(FakeTuf::with_targets(targets), MemVersionStore::default(), "h1");

        let (_, selected) = ctrl.check_in();
        let names: Vec<&str> = selected.iter().map(Target::name).collect();
        assert_eq!(names, vec!["lmp-1", "lmp-2", "lmp-3"]);
    }

    #[test]
    fn check_in_falls_back_to_cache() {
        let tuf = FakeTuf::with_targets(three_versions());
        tuf.fail_fetch.set(true);

        let (ctrl, _) = controller(tuf, MemVersionStore::default(), "h1");
        let (status, targets) = ctrl.check_in();

        assert_eq!(status, UpdateStatus::CheckinOkCached);
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn check_in_without_cache_fails() {
        let tuf = FakeTuf::with_targets(three_versions());
        tuf.fail_fetch.set(true);
        tuf.no_cache.set(true);

        let (ctrl, _) = controller(tuf, MemVersionStore::default(), "h1");
        let (status, targets) = ctrl.check_in();

        assert_eq!(status, UpdateStatus::CheckinFailure);
        assert!(targets.is_empty());
    }

    #[test]
    fn get_latest_honors_the_first_hardware_id() {
        let secondary_first = fixture::hw_target("sec-9", "h9", 9, &["rpi4", "hw"]);

        let mut targets = three_versions();
        targets.push(secondary_first);

        let (ctrl, _) = controller(FakeTuf::with_targets(targets), MemVersionStore::default(), "h1");
        ctrl.check_in();

        // sec-9 is newest but leads with a different hwid
        assert_eq!(ctrl.get_latest("hw").unwrap().name(), "lmp-3");
    }

    #[test]
    fn bootstraps_an_initial_target() {
        let store = MemVersionStore::default();
        let (ctrl, _) = controller(FakeTuf::with_targets(Vec::new()), store, "deadbeef");

        let current = ctrl.get_current().unwrap();
        assert!(current.name().starts_with("initial-target-"));
        assert_eq!(current.sha256(), "deadbeef");
    }

    #[test]
    fn downgrade_needs_force() {
        let store = MemVersionStore::default();
        store.seed(&target_with_version("lmp-2", "h2", 2));

        let (ctrl, _) = controller(FakeTuf::with_targets(three_versions()), store, "h2");
        ctrl.check_in();

        let older = ctrl.get_by_version(1).unwrap();
        assert!(ctrl.is_blocked_downgrade(&older, false));
        assert!(!ctrl.is_blocked_downgrade(&older, true));

        let newer = ctrl.get_by_version(3).unwrap();
        assert!(!ctrl.is_blocked_downgrade(&newer, false));
    }

    #[test]
    fn download_then_verify_failure_marks_the_target() {
        let tuf = FakeTuf::with_targets(three_versions());
        tuf.fail_verify.set(true);
        let (ctrl, _) = controller(tuf, MemVersionStore::default(), "h1");
        ctrl.check_in();

        let target = ctrl.get_by_version(3).unwrap();
        let installer = ctrl.installer(target.clone(), "test");
        let outcome = installer.download(&CancelToken::new());

        assert_eq!(outcome.code, InstallCode::VerificationFailed);
        assert!(ctrl.store.is_failed(target.sha256()));
        assert_eq!(ctrl.state(), InstallState::Failed);
    }

    #[test]
    fn full_traversal_stages_and_marks_pending() {
        let (ctrl, rig) = controller(FakeTuf::with_targets(three_versions()), MemVersionStore::default(), "h1");
        ctrl.check_in();

        let target = ctrl.get_latest("hw").unwrap();
        let installer = ctrl.installer(target.clone(), "test");

        let outcome = installer.download(&CancelToken::new());
        assert!(outcome.is_ok());
        assert_eq!(ctrl.state(), InstallState::Downloaded);

        let outcome = installer.install();
        assert_eq!(outcome.code, InstallCode::NeedCompletion);
        assert_eq!(ctrl.state(), InstallState::NeedsReboot);
        assert!(ctrl.is_installation_in_progress());
        assert_eq!(ctrl.get_pending_target().unwrap().sha256(), "h3");
        assert_eq!(rig.sysroot.deployed.borrow().len(), 1);
    }

    #[test]
    fn complete_without_pending_is_a_noop() {
        let (ctrl, _) = controller(FakeTuf::with_targets(Vec::new()), MemVersionStore::default(), "h1");
        assert_eq!(ctrl.complete_installation(), UpdateStatus::NoPendingInstallation);
    }

    #[test]
    fn complete_finalizes_when_booted_into_pending() {
        let store = MemVersionStore::default();
        store.seed(&target_with_version("lmp-1", "h1", 1));
        store.set_pending(Some(&target_with_version("lmp-2", "h2", 2))).unwrap();

        let (ctrl, _) = controller(FakeTuf::with_targets(Vec::new()), store, "h2");

        assert_eq!(ctrl.complete_installation(), UpdateStatus::Ok);
        assert!(!ctrl.is_installation_in_progress());
        assert_eq!(ctrl.state(), InstallState::Finalized);
        assert!(ctrl.store.is_known("h2"));
    }

    #[test]
    fn complete_reports_pending_boot_firmware() {
        let store = MemVersionStore::default();
        store.set_pending(Some(&target_with_version("lmp-2", "h2", 2))).unwrap();

        let sysroot = Rc::new(FakeSysroot::booted("h2"));
        let bootloader = Rc::new(FakeBootloader {
            update_in_progress: true,
            ..FakeBootloader::default()
        });
        let mut cfg = fixture::config();
        cfg.ostree_server = "file:///var/repo".to_string();
        let ctrl = Controller::new(
            cfg,
            sysroot,
            bootloader,
            Box::new(FakeTuf::with_targets(Vec::new())),
            Box::new(store),
            None,
            reqwest::blocking::Client::new(),
        );

        assert_eq!(ctrl.complete_installation(), UpdateStatus::OkNeedsRebootForBootFw);
    }

    #[test]
    fn complete_detects_a_bootloader_rollback() {
        let store = MemVersionStore::default();
        store.seed(&target_with_version("lmp-1", "h1", 1));
        store.set_pending(Some(&target_with_version("lmp-2", "h2", 2))).unwrap();

        // device rebooted but is still on h1
        let (ctrl, _) = controller(FakeTuf::with_targets(Vec::new()), store, "h1");

        assert_eq!(ctrl.complete_installation(), UpdateStatus::InstallRollbackOk);
        assert!(ctrl.store.is_failed("h2"));
        assert!(!ctrl.is_installation_in_progress());
        assert_eq!(ctrl.state(), InstallState::RolledBack);
    }

    #[test]
    fn failing_apps_trigger_an_app_driven_rollback() {
        let store = MemVersionStore::default();
        store.seed(&target_with_version("lmp-1", "h1", 1));
        store.set_pending(Some(&target_with_version("lmp-2", "h2", 2))).unwrap();

        let apps = fixture::FakeApps {
            fail_sync: std::cell::Cell::new(true),
            ..fixture::FakeApps::default()
        };

        // kernel booted into h2 but the apps will not come up
        let (ctrl, rig) = controller_with_apps(FakeTuf::with_targets(Vec::new()), store, "h2", Some(Box::new(apps)));

        assert_eq!(ctrl.complete_installation(), UpdateStatus::InstallRollbackNeedsReboot);
        assert!(ctrl.store.is_failed("h2"));
        assert_eq!(ctrl.get_pending_target().unwrap().sha256(), "h1");
        assert_eq!(*rig.sysroot.deployed.borrow(), vec!["h1".to_string()]);
        assert_eq!(ctrl.state(), InstallState::RolledBack);
    }

    #[test]
    fn app_rollback_without_a_candidate_fails() {
        let store = MemVersionStore::default();
        store.set_pending(Some(&target_with_version("lmp-2", "h2", 2))).unwrap();

        let apps = fixture::FakeApps {
            fail_sync: std::cell::Cell::new(true),
            ..fixture::FakeApps::default()
        };

        let (ctrl, _) = controller_with_apps(FakeTuf::with_targets(Vec::new()), store, "h2", Some(Box::new(apps)));

        assert_eq!(ctrl.complete_installation(), UpdateStatus::InstallRollbackFailed);
    }

    #[test]
    fn rollback_target_is_the_newest_older_install() {
        let store = MemVersionStore::default();
        store.seed(&target_with_version("lmp-1", "h1", 1));
        store.seed(&target_with_version("lmp-2", "h2", 2));
        store.set_pending(Some(&target_with_version("lmp-3", "h3", 3))).unwrap();

        let (ctrl, _) = controller(FakeTuf::with_targets(Vec::new()), store, "h3");

        assert_eq!(ctrl.get_rollback_target().unwrap().sha256(), "h2");
    }

    #[test]
    fn is_rollback_consults_deployment_and_failures() {
        let store = MemVersionStore::default();
        store.mark_failed(&target_with_version("lmp-2", "h2", 2)).unwrap();

        let (ctrl, rig) = controller(FakeTuf::with_targets(Vec::new()), store, "h1");
        *rig.sysroot.rollback.borrow_mut() = "h0".to_string();

        assert!(ctrl.is_rollback(&target_with_version("lmp-0", "h0", 0)));
        assert!(ctrl.is_rollback(&target_with_version("lmp-2", "h2", 2)));
        assert!(!ctrl.is_rollback(&target_with_version("lmp-3", "h3", 3)));
    }
}
