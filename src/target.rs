use anyhow::{anyhow, Result};
use log::warn;
use serde_json::Value;

use crate::deltastats::{self, DeltaStatsRef};

/// A signed update candidate out of the targets role. Immutable once built;
/// two targets are the same update iff their commit hashes match.
#[derive(Debug, Clone)]
pub struct Target {
    name: String,
    sha256: String,
    version: i64,
    hardware_ids: Vec<String>,
    tags: Vec<String>,
    custom: Value,
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.sha256 == other.sha256
    }
}

impl Eq for Target {}

fn string_list(custom: &Value, key: &str) -> Vec<String> {
    match custom.get(key).and_then(Value::as_array) {
        Some(items) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        None => Vec::new(),
    }
}

impl Target {
    /// Builds a target from one member of the (already verified) targets
    /// role. An unparseable version demotes the target to -1 instead of
    /// dropping it.
    pub fn from_tuf(name: &str, meta: &Value) -> Result<Self> {
        #[rustfmt::skip]
        let sha256 = meta.pointer("/hashes/sha256")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("target {name} carries no sha256 hash"))?
            .to_string();

        let custom = meta.get("custom").cloned().unwrap_or(Value::Null);

        let version = match custom.get("version").and_then(Value::as_str) {
            Some(v) => v.parse().unwrap_or_else(|_| {
                warn!("target {name} has unparseable version `{v}`, treating as -1");
                -1
            }),
            None => -1,
        };

        Ok(Self {
            name: name.to_string(),
            sha256,
            version,
            hardware_ids: string_list(&custom, "hardwareIds"),
            tags: string_list(&custom, "tags"),
            custom,
        })
    }

    pub fn new(name: String, sha256: String, version: i64, hardware_ids: Vec<String>, tags: Vec<String>, custom: Value) -> Self {
        Self {
            name,
            sha256,
            version,
            hardware_ids,
            tags,
            custom,
        }
    }

    /// Synthesized entry for a device whose booted commit predates any
    /// check-in, so rollback always has something to land on.
    pub fn initial(hash: &str, hardware_id: &str) -> Self {
        let prefix: String = hash.chars().take(7).collect();
        Self {
            name: format!("initial-target-{prefix}"),
            sha256: hash.to_string(),
            version: -1,
            hardware_ids: vec![hardware_id.to_string()],
            tags: Vec::new(),
            custom: Value::Null,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn hardware_ids(&self) -> &[String] {
        &self.hardware_ids
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn custom(&self) -> &Value {
        &self.custom
    }

    #[cfg(test)]
    pub(crate) fn set_custom(&mut self, custom: Value) {
        self.custom = custom;
    }

    pub fn delta_stats_ref(&self) -> Option<DeltaStatsRef> {
        deltastats::find_ref(&self.custom)
    }

    /// `(name, registry uri)` pairs from `custom.docker_compose_apps`.
    pub fn apps(&self) -> Vec<(String, String)> {
        let Some(apps) = self.custom.get("docker_compose_apps").and_then(Value::as_object) else {
            return Vec::new();
        };

        #[rustfmt::skip]
        let apps = apps.iter()
            .filter_map(|(name, entry)| {
                let uri = entry.get("uri").and_then(Value::as_str)?;
                Some((name.clone(), uri.to_string()))
            })
            .collect();

        apps
    }

    pub fn matches_hardware(&self, hwid: &str, secondary: &[String]) -> bool {
        self.hardware_ids.iter().any(|id| id == hwid || secondary.iter().any(|s| s == id))
    }

    pub fn matches_tags(&self, tags: &[String]) -> bool {
        if tags.is_empty() {
            return true;
        }
        self.tags.iter().any(|t| tags.contains(t))
    }
}
