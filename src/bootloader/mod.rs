mod lite;
pub use lite::BootloaderLite;

use std::fmt;

use log::{debug, warn};

use crate::tree::{InstallCode, InstallOutcome};

pub const VERSION_FILE: &str = "/usr/lib/firmware/version.txt";
pub const VERSION_KEY: &str = "bootfirmware_version";

/// The capability set the engine needs from whatever controls boot firmware.
/// `BootloaderLite` drives a U-Boot environment; tests use fakes.
pub trait Bootloader {
    fn is_update_supported(&self) -> bool;
    fn is_update_in_progress(&self) -> bool;
    fn is_rollback_protection_enabled(&self) -> bool;

    /// Version of the currently running boot firmware; `None` when it
    /// cannot be read.
    fn get_current_version(&self) -> Option<String>;

    /// Version the given rootfs commit would install. `Ok(None)` when the
    /// commit carries no version file (no firmware update rides along);
    /// `Err` when the file is there but does not parse.
    fn get_target_version(&self, commit: &str) -> Result<Option<String>, MalformedVersionFile>;

    /// Tells the bootloader a rootfs update is underway so its rollback
    /// counter arms. Non-atomic; false positives are tolerated.
    fn update_notify(&self);
}

#[derive(Debug)]
pub struct MalformedVersionFile(pub String);

impl fmt::Display for MalformedVersionFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "malformed boot firmware version file: {}", self.0)
    }
}

impl std::error::Error for MalformedVersionFile {}

/// Extracts `bootfirmware_version=<value>` from `key=value` lines. A file
/// without the key is malformed, not absent.
pub fn parse_version_file(content: &str) -> Result<String, MalformedVersionFile> {
    for line in content.lines() {
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == VERSION_KEY {
                return Ok(value.trim().to_string());
            }
        }
    }

    Err(MalformedVersionFile(format!("no {VERSION_KEY} entry")))
}

/// Gate evaluated before any rootfs staging; first matching rule wins.
///
/// 1. blocker on + firmware update pending -> NeedCompletion
/// 2. rollback protection off -> Ok
/// 3. no target version readable -> Ok; malformed file -> InstallFailed
/// 4. target version not a u64 -> InstallFailed
/// 5. unreadable current version counts as 0
/// 6. target < current -> InstallFailed
pub fn verify_update(bootloader: &dyn Bootloader, update_block: bool, target_commit: &str) -> InstallOutcome {
    if update_block && bootloader.is_update_in_progress() {
        return InstallOutcome::new(InstallCode::NeedCompletion, "reboot to finalize the pending boot firmware update");
    }

    if !bootloader.is_rollback_protection_enabled() {
        return InstallOutcome::ok("bootloader rollback protection disabled");
    }

    let target_version = match bootloader.get_target_version(target_commit) {
        Ok(Some(version)) => version,
        Ok(None) => {
            debug!("commit {target_commit} carries no boot firmware version, nothing to gate");
            return InstallOutcome::ok("no boot firmware update in target");
        }
        Err(err) => {
            return InstallOutcome::new(InstallCode::InstallFailed, &err.to_string());
        }
    };

    let target_version: u64 = match target_version.parse() {
        Ok(v) => v,
        Err(_) => {
            return InstallOutcome::new(InstallCode::InstallFailed, &format!("boot firmware version `{target_version}` is not an unsigned integer"));
        }
    };

    let current_version: u64 = match bootloader.get_current_version().and_then(|v| v.parse().ok()) {
        Some(v) => v,
        None => {
            warn!("current boot firmware version unreadable, assuming 0");
            0
        }
    };

    if target_version < current_version {
        return InstallOutcome::new(
            InstallCode::InstallFailed,
            &format!("bootloader rollback from version {current_version} to {target_version} detected"),
        );
    }

    InstallOutcome::ok("boot firmware version check passed")
}
