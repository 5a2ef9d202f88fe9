use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::target::Target;

/// Narrow accessor over the installed-versions database. The update
/// controller is the sole writer; everything else reads through here.
pub trait VersionStore {
    fn installed(&self) -> Vec<Target>;
    fn record_installed(&self, target: &Target) -> Result<()>;

    fn pending(&self) -> Option<Target>;
    fn set_pending(&self, target: Option<&Target>) -> Result<()>;

    fn mark_failed(&self, target: &Target) -> Result<()>;
    fn is_failed(&self, sha256: &str) -> bool;

    fn is_known(&self, sha256: &str) -> bool {
        self.installed().iter().any(|t| t.sha256() == sha256)
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct StoredTarget {
    name: String,
    sha256: String,
    version: i64,
    #[serde(default)]
    hardware_ids: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    custom: Value,
    #[serde(default)]
    is_pending: bool,
    #[serde(default)]
    is_failed: bool,
}

impl StoredTarget {
    fn from_target(target: &Target) -> Self {
        Self {
            name: target.name().to_string(),
            sha256: target.sha256().to_string(),
            version: target.version(),
            hardware_ids: target.hardware_ids().to_vec(),
            tags: target.tags().to_vec(),
            custom: target.custom().clone(),
            is_pending: false,
            is_failed: false,
        }
    }

    fn to_target(&self) -> Target {
        Target::new(
            self.name.clone(),
            self.sha256.clone(),
            self.version,
            self.hardware_ids.clone(),
            self.tags.clone(),
            self.custom.clone(),
        )
    }
}

#[derive(Serialize, Deserialize, Default)]
struct StoreFile {
    targets: Vec<StoredTarget>,
}

/// JSON file backend, by default `installed_versions.json` under the agent
/// state directory.
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn load(&self) -> StoreFile {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return StoreFile::default(),
        };

        match serde_json::from_str(&text) {
            Ok(file) => file,
            Err(err) => {
                warn!("unreadable installed-versions db {:?}, starting empty: {err}", self.path.display());
                StoreFile::default()
            }
        }
    }

    fn save(&self, file: &StoreFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context(format!("failed to create {:?}", parent.display()))?;
        }

        let text = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, text).context(format!("failed to write {:?}", self.path.display()))
    }
}

impl VersionStore for FileVersionStore {
    fn installed(&self) -> Vec<Target> {
        self.load().targets.iter().map(StoredTarget::to_target).collect()
    }

    fn record_installed(&self, target: &Target) -> Result<()> {
        let mut file = self.load();

        match file.targets.iter_mut().find(|t| t.sha256 == target.sha256()) {
            Some(existing) => {
                existing.is_pending = false;
                existing.is_failed = false;
            }
            None => file.targets.push(StoredTarget::from_target(target)),
        }

        self.save(&file)
    }

    fn pending(&self) -> Option<Target> {
        self.load().targets.iter().find(|t| t.is_pending).map(StoredTarget::to_target)
    }

    fn set_pending(&self, target: Option<&Target>) -> Result<()> {
        let mut file = self.load();

        for stored in &mut file.targets {
            stored.is_pending = false;
        }

        if let Some(target) = target {
            match file.targets.iter_mut().find(|t| t.sha256 == target.sha256()) {
                Some(existing) => existing.is_pending = true,
                None => {
                    let mut stored = StoredTarget::from_target(target);
                    stored.is_pending = true;
                    file.targets.push(stored);
                }
            }
        }

        self.save(&file)
    }

    fn mark_failed(&self, target: &Target) -> Result<()> {
        let mut file = self.load();

        match file.targets.iter_mut().find(|t| t.sha256 == target.sha256()) {
            Some(existing) => existing.is_failed = true,
            None => {
                let mut stored = StoredTarget::from_target(target);
                stored.is_failed = true;
                file.targets.push(stored);
            }
        }

        self.save(&file)
    }

    fn is_failed(&self, sha256: &str) -> bool {
        self.load().targets.iter().any(|t| t.sha256 == sha256 && t.is_failed)
    }
}
