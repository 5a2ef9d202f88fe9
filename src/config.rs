use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::error;
use serde::Deserialize;

pub const DEFAULT_STORAGE_WATERMARK: u8 = 90;
pub const MIN_STORAGE_WATERMARK: u8 = 50;
pub const MAX_STORAGE_WATERMARK: u8 = 95;

/// Everything except `"0"` and `"false"` counts as set.
pub fn truthy(value: &str) -> bool {
    value != "0" && value != "false"
}

/// Watermark values outside [50, 95] clamp to the nearer limit; values that
/// do not parse at all fall back to the default. Both get an error log.
pub fn watermark_from_str(value: &str) -> u8 {
    let parsed: u8 = match value.parse() {
        Ok(v) => v,
        Err(_) => {
            error!("sysroot_storage_watermark `{value}` is not a number, using default {DEFAULT_STORAGE_WATERMARK}");
            return DEFAULT_STORAGE_WATERMARK;
        }
    };

    if parsed < MIN_STORAGE_WATERMARK {
        error!("sysroot_storage_watermark {parsed} is below the minimum, clamping to {MIN_STORAGE_WATERMARK}");
        MIN_STORAGE_WATERMARK
    } else if parsed > MAX_STORAGE_WATERMARK {
        error!("sysroot_storage_watermark {parsed} is above the maximum, clamping to {MAX_STORAGE_WATERMARK}");
        MAX_STORAGE_WATERMARK
    } else {
        parsed
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_string).collect()
}

#[derive(Deserialize, Default)]
struct RawPacman {
    sysroot: Option<PathBuf>,
    ostree_server: Option<String>,
    tags: Option<String>,
    sysroot_storage_watermark: Option<String>,
    bootupgrade_available_blocker: Option<String>,
    force_downgrade: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawProvision {
    primary_ecu_hardware_id: Option<String>,
    primary_ecu_serial: Option<String>,
    secondary_hardware_ids: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawTls {
    server: Option<String>,
    ca_file: Option<PathBuf>,
    cert_file: Option<PathBuf>,
    pkey_file: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    pacman: RawPacman,
    #[serde(default)]
    provision: RawProvision,
    #[serde(default)]
    tls: RawTls,
}

#[derive(Debug, Clone)]
pub struct TlsKeys {
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub pkey_file: Option<PathBuf>,
}

impl TlsKeys {
    pub fn is_empty(&self) -> bool {
        self.ca_file.is_none() && self.cert_file.is_none() && self.pkey_file.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sysroot: PathBuf,
    pub ostree_server: String,
    pub tags: Vec<String>,
    pub storage_watermark: u8,
    pub bootupgrade_blocker: bool,
    pub force_downgrade: bool,
    pub hardware_id: String,
    pub ecu_serial: String,
    pub secondary_hardware_ids: Vec<String>,
    pub server: String,
    pub tls_keys: TlsKeys,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).context(format!("failed to read config {:?}", path.display()))?;
        let raw: RawConfig = toml::from_str(&text).context(format!("failed to parse config {:?}", path.display()))?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        Self {
            sysroot: raw.pacman.sysroot.unwrap_or_else(|| PathBuf::from("/sysroot")),
            ostree_server: raw.pacman.ostree_server.unwrap_or_default(),
            tags: raw.pacman.tags.as_deref().map(split_list).unwrap_or_default(),
            storage_watermark: raw.pacman.sysroot_storage_watermark.as_deref().map(watermark_from_str).unwrap_or(DEFAULT_STORAGE_WATERMARK),
            bootupgrade_blocker: raw.pacman.bootupgrade_available_blocker.as_deref().map(truthy).unwrap_or(false),
            force_downgrade: raw.pacman.force_downgrade.as_deref().map(truthy).unwrap_or(false),
            hardware_id: raw.provision.primary_ecu_hardware_id.unwrap_or_default(),
            ecu_serial: raw.provision.primary_ecu_serial.unwrap_or_default(),
            secondary_hardware_ids: raw.provision.secondary_hardware_ids.as_deref().map(split_list).unwrap_or_default(),
            server: raw.tls.server.unwrap_or_default(),
            tls_keys: TlsKeys {
                ca_file: raw.tls.ca_file,
                cert_file: raw.tls.cert_file,
                pkey_file: raw.tls.pkey_file,
            },
        }
    }
}
