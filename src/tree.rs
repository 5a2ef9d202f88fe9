use std::rc::Rc;

use log::{debug, info, warn};

use crate::bootloader::{self, Bootloader};
use crate::cancel::CancelToken;
use crate::config::{Config, TlsKeys};
use crate::deltastats::{self, DeltaStat};
use crate::remote::{self, Remote, PRIMARY_REMOTE_NAME};
use crate::storage::{self, StorageStat};
use crate::sysroot::Sysroot;
use crate::target::Target;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Ok,
    Failed(String),
    NoSpace(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallCode {
    Ok,
    NeedCompletion,
    InstallFailed,
    VerificationFailed,
    DownloadFailed,
    DownloadFailedNoSpace,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub code: InstallCode,
    pub description: String,
}

impl InstallOutcome {
    pub fn new(code: InstallCode, description: &str) -> Self {
        Self {
            code,
            description: description.to_string(),
        }
    }

    pub fn ok(description: &str) -> Self {
        Self::new(InstallCode::Ok, description)
    }

    pub fn is_ok(&self) -> bool {
        self.code == InstallCode::Ok
    }
}

/// Admission figures for one delta, all in bytes. Logged verbatim so a
/// refused update can be diagnosed from the journal alone.
#[derive(Debug, Clone, Copy)]
pub struct UpdateStat {
    pub capacity_bytes: u64,
    pub watermark_percent: u8,
    pub max_available_bytes: u64,
    pub available_bytes: u64,
    pub required_bytes: u64,
}

impl UpdateStat {
    pub fn fits(&self) -> bool {
        self.required_bytes <= self.available_bytes
    }
}

/// Block arithmetic behind `canDeltaFitOnDisk`: the watermark caps how full
/// the filesystem may become, the delta's uncompressed size is rounded up to
/// whole blocks.
pub fn delta_admission(stat: &StorageStat, watermark: u8, uncompressed_size: u64) -> UpdateStat {
    let max_blocks = stat.total_blocks * watermark as u64 / 100;
    let used_blocks = stat.total_blocks.saturating_sub(stat.free_blocks);
    let available_blocks = max_blocks.saturating_sub(used_blocks);
    let required_blocks = uncompressed_size.div_ceil(stat.block_size);

    UpdateStat {
        capacity_bytes: stat.total_blocks * stat.block_size,
        watermark_percent: watermark,
        max_available_bytes: max_blocks * stat.block_size,
        available_bytes: available_blocks * stat.block_size,
        required_bytes: required_blocks * stat.block_size,
    }
}

/// The ostree pull error texts that mean the disk, not the origin, is the
/// problem. Trying another remote cannot help with these.
fn is_no_space_pull_error(desc: &str) -> bool {
    let min_free_space = desc.contains("would be exceeded, at least") && (desc.contains("min-free-space-size") || desc.contains("min-free-space-percent"));
    let delta_space = desc.contains("Delta requires") && desc.contains("free space, but only");

    min_free_space || delta_space
}

/// Orchestrates download and staging of rootfs commits: origin fallback,
/// delta admission, the bootloader interlock and the deployment notify
/// dance.
pub struct TreeManager {
    sysroot: Rc<dyn Sysroot>,
    bootloader: Rc<dyn Bootloader>,
    http: reqwest::blocking::Client,
    ostree_server: String,
    watermark: u8,
    update_block: bool,
    tls_keys: Option<TlsKeys>,
}

impl TreeManager {
    pub fn new(cfg: &Config, sysroot: Rc<dyn Sysroot>, bootloader: Rc<dyn Bootloader>, http: reqwest::blocking::Client) -> Self {
        Self {
            sysroot,
            bootloader,
            http,
            ostree_server: cfg.ostree_server.clone(),
            watermark: cfg.storage_watermark,
            update_block: cfg.bootupgrade_blocker,
            tls_keys: if cfg.tls_keys.is_empty() {
                None
            } else {
                Some(cfg.tls_keys.clone())
            },
        }
    }

    pub fn download(&self, target: &Target, token: &CancelToken) -> DownloadOutcome {
        self.download_from(&self.ostree_server, target, token)
    }

    /// Same download flow against another origin, used for update-from-disk
    /// where the commits sit in a local repo.
    pub fn download_from(&self, server: &str, target: &Target, token: &CancelToken) -> DownloadOutcome {
        let remotes = remote::get_remotes(&self.http, server, target.name(), self.tls_keys.clone());
        let from_hash = self.sysroot.booted_hash();
        let mut errors: Vec<String> = Vec::new();

        for mut rmt in remotes {
            if token.is_cancelled() {
                return DownloadOutcome::Failed("cancelled".to_string());
            }

            if !rmt.is_remote_set {
                // presigned gcs URLs change per target, the primary is stable
                if rmt.name != PRIMARY_REMOTE_NAME || !self.sysroot.has_remote(&rmt.name) {
                    if let Err(err) = self.sysroot.add_remote(&rmt) {
                        warn!("failed to register remote {}: {err:#}", rmt.name);
                        errors.push(format!("{}: {err:#}", rmt.name));
                        continue;
                    }
                }
                rmt.is_remote_set = true;
            }

            if let Some(stat) = self.delta_stat(&rmt, target, &from_hash) {
                match storage::stat_path(&self.sysroot.repo_path()) {
                    Ok(fs_stat) => {
                        let admission = delta_admission(&fs_stat, self.watermark, stat.u_size);
                        info!(
                            "delta admission: required {} of {} available ({}% watermark over {} capacity)",
                            admission.required_bytes, admission.available_bytes, admission.watermark_percent, admission.capacity_bytes
                        );

                        if !admission.fits() {
                            // later remotes see the same full disk, stop here
                            return DownloadOutcome::NoSpace(format!(
                                "delta needs {} bytes but only {} are available under the {}% watermark",
                                admission.required_bytes, admission.available_bytes, admission.watermark_percent
                            ));
                        }
                    }
                    Err(err) => {
                        warn!("cannot stat the repo, pulling without an admission check: {err:#}");
                    }
                }
            } else {
                debug!("no delta stats for {} via {}, pulling without a size check", target.name(), rmt.name);
            }

            match self.sysroot.pull(&rmt, target.sha256()) {
                Ok(()) => return DownloadOutcome::Ok,
                Err(err) => {
                    let desc = format!("{err:#}");
                    if is_no_space_pull_error(&desc) {
                        return DownloadOutcome::NoSpace(desc);
                    }
                    warn!("pull from {} failed: {desc}", rmt.name);
                    errors.push(format!("{}: {desc}", rmt.name));
                }
            }
        }

        DownloadOutcome::Failed(errors.join("; "))
    }

    fn delta_stat(&self, rmt: &Remote, target: &Target, from_hash: &str) -> Option<DeltaStat> {
        if from_hash.is_empty() {
            // fresh device, nothing for a delta to start from
            return None;
        }

        let stats_ref = target.delta_stats_ref()?;
        let stats = deltastats::download(&self.http, rmt, &stats_ref)?;
        deltastats::find_stat(&stats, from_hash, target.sha256())
    }

    pub fn install(&self, target: &Target) -> InstallOutcome {
        let current = self.sysroot.booted_hash();
        let pending = self.sysroot.pending_hash();

        if current != target.sha256() && self.bootloader.is_update_supported() {
            let gate = bootloader::verify_update(&*self.bootloader, self.update_block, target.sha256());
            if gate.code != InstallCode::Ok {
                return gate;
            }
        }

        if current == target.sha256() && (pending.is_empty() || pending == target.sha256()) {
            return InstallOutcome::ok("already installed");
        }

        self.bootloader.update_notify();

        let mut outcome = match self.sysroot.deploy(target.sha256()) {
            Ok(()) => InstallOutcome::new(InstallCode::NeedCompletion, "deployment staged, reboot to apply"),
            Err(err) => InstallOutcome::new(InstallCode::InstallFailed, &format!("{err:#}")),
        };

        if current == target.sha256() && outcome.code == InstallCode::NeedCompletion {
            // staging the booted commit again only undeploys the pending one
            outcome = InstallOutcome::ok("OSTree hash already installed, same as current");
            self.bootloader.update_notify();
        }

        self.install_notify();
        outcome
    }

    fn install_notify(&self) {
        match self.sysroot.reload() {
            Ok(true) => {}
            Ok(false) => warn!("sysroot reload found no changes after an install"),
            Err(err) => warn!("failed to reload the sysroot: {err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{target_with_version, FakeBootloader, FakeSysroot};
    use serde_json::json;

    fn storage_stat() -> StorageStat {
        StorageStat {
            total_blocks: 1000,
            free_blocks: 200,
            block_size: 4096,
        }
    }

    #[test]
    fn admission_refuses_an_oversized_delta() {
        let admission = delta_admission(&storage_stat(), 90, 500_000);

        // 900 max - 800 used = 100 blocks available; 123 required
        assert_eq!(admission.available_bytes, 100 * 4096);
        assert_eq!(admission.required_bytes, 123 * 4096);
        assert!(!admission.fits());
    }

    #[test]
    fn admission_rounds_up_to_whole_blocks() {
        let admission = delta_admission(&storage_stat(), 90, 500_000);

        assert!(admission.required_bytes >= 500_000);
        assert!(admission.required_bytes < 500_000 + 4096);
    }

    #[test]
    fn admission_accepts_a_fitting_delta() {
        let admission = delta_admission(&storage_stat(), 90, 100 * 4096);
        assert!(admission.fits());
    }

    #[test]
    fn no_space_error_texts() {
        assert!(is_no_space_pull_error("opcode close: min-free-space-size 100MB would be exceeded, at least 13 bytes requested"));
        assert!(is_no_space_pull_error("min-free-space-percent '3%' would be exceeded, at least 100 bytes requested"));
        assert!(is_no_space_pull_error("Delta requires 1.5 GB free space, but only 500 MB available"));
        assert!(!is_no_space_pull_error("Server returned HTTP 404"));
        assert!(!is_no_space_pull_error("min-free-space-size mentioned without the rest"));
    }

    fn manager(sysroot: Rc<FakeSysroot>, bootloader: Rc<FakeBootloader>) -> TreeManager {
        let mut cfg = crate::fixture::config();
        // non-http server keeps the remote selector off the network
        cfg.ostree_server = "file:///var/repo".to_string();
        TreeManager::new(&cfg, sysroot, bootloader, reqwest::blocking::Client::new())
    }

    #[test]
    fn install_is_idempotent_for_the_booted_target() {
        let sysroot = Rc::new(FakeSysroot::booted("h1"));
        let bl = Rc::new(FakeBootloader::default());
        let tree = manager(sysroot.clone(), bl.clone());

        let outcome = tree.install(&target_with_version("t1", "h1", 1));

        assert!(outcome.is_ok());
        assert_eq!(outcome.description, "already installed");
        assert!(sysroot.deployed.borrow().is_empty());
        assert_eq!(bl.notify_count.get(), 0);
    }

    #[test]
    fn install_stages_a_new_target() {
        let sysroot = Rc::new(FakeSysroot::booted("h1"));
        sysroot.reload_changed.set(true);
        let bl = Rc::new(FakeBootloader::default());
        let tree = manager(sysroot.clone(), bl.clone());

        let outcome = tree.install(&target_with_version("t2", "h2", 2));

        assert_eq!(outcome.code, InstallCode::NeedCompletion);
        assert_eq!(*sysroot.deployed.borrow(), vec!["h2".to_string()]);
        assert_eq!(bl.notify_count.get(), 1);
    }

    #[test]
    fn installing_the_booted_target_undeploys_a_pending_one() {
        let sysroot = Rc::new(FakeSysroot::booted("h1"));
        *sysroot.pending.borrow_mut() = "h2".to_string();
        sysroot.reload_changed.set(true);
        let bl = Rc::new(FakeBootloader::default());
        let tree = manager(sysroot.clone(), bl.clone());

        let outcome = tree.install(&target_with_version("t1", "h1", 1));

        assert!(outcome.is_ok());
        assert_eq!(outcome.description, "OSTree hash already installed, same as current");
        assert_eq!(*sysroot.deployed.borrow(), vec!["h1".to_string()]);
        // once before the deploy, once after the undeploy rewrite
        assert_eq!(bl.notify_count.get(), 2);
    }

    #[test]
    fn interlock_blocks_the_install() {
        let sysroot = Rc::new(FakeSysroot::booted("h1"));
        let bl = Rc::new(FakeBootloader {
            supported: true,
            update_in_progress: true,
            ..FakeBootloader::default()
        });
        let mut cfg = crate::fixture::config();
        cfg.ostree_server = "file:///var/repo".to_string();
        cfg.bootupgrade_blocker = true;
        let tree = TreeManager::new(&cfg, sysroot.clone(), bl, reqwest::blocking::Client::new());

        let outcome = tree.install(&target_with_version("t2", "h2", 2));

        assert_eq!(outcome.code, InstallCode::NeedCompletion);
        assert!(sysroot.deployed.borrow().is_empty());
    }

    #[test]
    fn download_falls_back_to_the_next_remote() {
        let sysroot = Rc::new(FakeSysroot::booted("h1"));
        sysroot.pull_errors.borrow_mut().push_back("Server returned HTTP 500".to_string());
        let tree = manager(sysroot.clone(), Rc::new(FakeBootloader::default()));

        // only the primary remote exists for a file:// server, so one scripted
        // failure exhausts the list
        let outcome = tree.download(&target_with_version("t2", "h2", 2), &CancelToken::new());

        assert!(matches!(outcome, DownloadOutcome::Failed(ref d) if d.contains("HTTP 500")));
    }

    #[test]
    fn download_succeeds_via_the_primary() {
        let sysroot = Rc::new(FakeSysroot::booted("h1"));
        let tree = manager(sysroot.clone(), Rc::new(FakeBootloader::default()));

        let outcome = tree.download(&target_with_version("t2", "h2", 2), &CancelToken::new());

        assert_eq!(outcome, DownloadOutcome::Ok);
        assert_eq!(*sysroot.pulled.borrow(), vec!["treehub".to_string()]);
    }

    #[test]
    fn pull_time_disk_exhaustion_stops_the_fallback() {
        let sysroot = Rc::new(FakeSysroot::booted("h1"));
        let no_space = "min-free-space-size 100MB would be exceeded, at least 13 bytes requested";
        sysroot.pull_errors.borrow_mut().push_back(no_space.to_string());
        let tree = manager(sysroot.clone(), Rc::new(FakeBootloader::default()));

        let outcome = tree.download(&target_with_version("t2", "h2", 2), &CancelToken::new());

        assert!(matches!(outcome, DownloadOutcome::NoSpace(_)));
    }

    #[test]
    fn cancelled_token_aborts_before_any_pull() {
        let sysroot = Rc::new(FakeSysroot::booted("h1"));
        let tree = manager(sysroot.clone(), Rc::new(FakeBootloader::default()));

        let token = CancelToken::new();
        token.cancel();
        let outcome = tree.download(&target_with_version("t2", "h2", 2), &token);

        assert_eq!(outcome, DownloadOutcome::Failed("cancelled".to_string()));
        assert!(sysroot.pulled.borrow().is_empty());
    }

    #[test]
    fn mangled_delta_stats_are_advisory() {
        let dir = tempfile::tempdir().unwrap();
        let sysroot = Rc::new(FakeSysroot::booted_at("h1", dir.path()));

        // a stats reference the resolver rejects must not block the pull
        let mut target = target_with_version("t2", "h2", 2);
        target.set_custom(json!({"delta-stats": {"sha256": "ab"}}));

        let tree = manager(sysroot.clone(), Rc::new(FakeBootloader::default()));
        let outcome = tree.download(&target, &CancelToken::new());

        assert_eq!(outcome, DownloadOutcome::Ok);
        assert_eq!(sysroot.pulled.borrow().len(), 1);
    }
}
