use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::rc::Rc;

use log::{debug, warn};

use super::{parse_version_file, Bootloader, MalformedVersionFile, VERSION_FILE};
use crate::config::truthy;
use crate::sysroot::Sysroot;

const FW_PRINTENV: &str = "fw_printenv";
const FW_SETENV: &str = "fw_setenv";

const ENV_UPGRADE_AVAILABLE: &str = "upgrade_available";
const ENV_BOOTUPGRADE_AVAILABLE: &str = "bootupgrade_available";
const ENV_ROLLBACK_PROTECTION: &str = "rollback_protection";

/// U-Boot-backed implementation: firmware versions come from the version
/// file inside the rootfs trees, state bits from the bootloader environment.
pub struct BootloaderLite {
    sysroot: Rc<dyn Sysroot>,
    version_file: PathBuf,
}

impl BootloaderLite {
    pub fn new(sysroot: Rc<dyn Sysroot>) -> Self {
        Self {
            sysroot,
            version_file: PathBuf::from(VERSION_FILE),
        }
    }

    #[cfg(test)]
    pub fn with_version_file(sysroot: Rc<dyn Sysroot>, version_file: PathBuf) -> Self {
        Self {
            sysroot,
            version_file,
        }
    }

    fn env_get(&self, name: &str) -> Option<String> {
        let out = Command::new(FW_PRINTENV).arg(name).output().ok()?;
        if !out.status.success() {
            return None;
        }

        // fw_printenv prints `name=value`
        let text = String::from_utf8(out.stdout).ok()?;
        let (_, value) = text.trim().split_once('=')?;
        Some(value.to_string())
    }

    fn env_set(&self, name: &str, value: &str) {
        match Command::new(FW_SETENV).arg(name).arg(value).status() {
            Ok(status) if status.success() => debug!("set {name}={value}"),
            Ok(status) => warn!("{FW_SETENV} {name} exited with {status}"),
            Err(err) => warn!("failed to run {FW_SETENV}: {err}"),
        }
    }
}

impl Bootloader for BootloaderLite {
    fn is_update_supported(&self) -> bool {
        self.version_file.exists()
    }

    fn is_update_in_progress(&self) -> bool {
        self.env_get(ENV_BOOTUPGRADE_AVAILABLE).as_deref().map(truthy).unwrap_or(false)
    }

    fn is_rollback_protection_enabled(&self) -> bool {
        self.env_get(ENV_ROLLBACK_PROTECTION).as_deref().map(truthy).unwrap_or(false)
    }

    fn get_current_version(&self) -> Option<String> {
        let content = fs::read_to_string(&self.version_file).ok()?;
        parse_version_file(&content).ok()
    }

    fn get_target_version(&self, commit: &str) -> Result<Option<String>, MalformedVersionFile> {
        let content = match self.sysroot.read_commit_file(commit, VERSION_FILE) {
            Ok(Some(content)) => content,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!("boot firmware version lookup failed for {commit}: {err:#}");
                return Ok(None);
            }
        };

        parse_version_file(&content).map(Some)
    }

    fn update_notify(&self) {
        self.env_set(ENV_UPGRADE_AVAILABLE, "1");
    }
}
