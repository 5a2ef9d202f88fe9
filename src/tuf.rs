use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde_json::Value;

use crate::target::Target;

/// Report header carrying the name of the last installed target.
pub const TARGET_HEADER: &str = "x-ats-target";

const TARGETS_ROLE: &str = "targets.json";

/// The signed-metadata collaborator. Signature verification happens in the
/// delegated TUF library; what crosses this trait is the accepted targets
/// role and the post-download re-check.
pub trait TufSource {
    fn fetch_targets(&self) -> Result<Vec<Target>>;

    /// Confirms a downloaded artifact still matches the signed metadata.
    fn verify_target(&self, target: &Target) -> Result<()>;

    /// Last-known-good target set, for offline check-ins.
    fn fetch_cached(&self) -> Option<Vec<Target>> {
        None
    }

    /// Remember which target to report on subsequent requests.
    fn set_report_target(&self, _name: &str) {}

    /// Register secondary ECUs with the device gateway.
    fn register_device(&self, _serial: &str, _target_name: &str) -> Result<()> {
        Ok(())
    }
}

/// Every target in the role that parses; ones that do not are logged and
/// skipped rather than failing the whole check-in.
pub fn parse_targets_role(doc: &Value) -> Result<Vec<Target>> {
    #[rustfmt::skip]
    let members = doc.pointer("/signed/targets")
        .and_then(Value::as_object)
        .context("targets role carries no signed.targets object")?;

    let mut targets = Vec::new();
    for (name, meta) in members {
        match Target::from_tuf(name, meta) {
            Ok(target) => targets.push(target),
            Err(err) => warn!("skipping target {name}: {err:#}"),
        }
    }

    Ok(targets)
}

/// Device-gateway source: fetches the verified role over HTTPS and keeps a
/// copy on disk for offline operation.
pub struct GatewayTuf {
    http: reqwest::blocking::Client,
    base: String,
    cache_path: PathBuf,
    report_target: RefCell<Option<String>>,
}

impl GatewayTuf {
    pub fn new(http: reqwest::blocking::Client, server: &str, cache_dir: &Path) -> Self {
        Self {
            http,
            base: server.trim_end_matches('/').to_string(),
            cache_path: cache_dir.join(TARGETS_ROLE),
            report_target: RefCell::new(None),
        }
    }

    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let mut req = self.http.get(url);
        if let Some(name) = self.report_target.borrow().as_deref() {
            req = req.header(TARGET_HEADER, name);
        }

        let resp = req.send().context(format!("GET {url} failed"))?;
        if !resp.status().is_success() {
            bail!("GET {} returned status code {}", url, resp.status());
        }

        Ok(resp.bytes().context("failed to read response body")?.to_vec())
    }
}

impl TufSource for GatewayTuf {
    fn fetch_targets(&self) -> Result<Vec<Target>> {
        let url = format!("{}/repo/{TARGETS_ROLE}", self.base);
        let body = self.get(&url)?;

        let doc: Value = serde_json::from_slice(&body).context("failed to parse targets role")?;
        let targets = parse_targets_role(&doc)?;

        if let Err(err) = fs::write(&self.cache_path, &body) {
            warn!("failed to cache the targets role: {err}");
        }

        Ok(targets)
    }

    fn verify_target(&self, target: &Target) -> Result<()> {
        let targets = self.fetch_targets().or_else(|err| {
            warn!("re-verification falling back to the cached role: {err:#}");
            self.fetch_cached().context("no cached targets role")
        })?;

        let matched = targets.iter().any(|t| t.name() == target.name() && t.sha256() == target.sha256());
        if !matched {
            bail!("target {} ({}) is not in the signed set", target.name(), target.sha256());
        }

        Ok(())
    }

    fn fetch_cached(&self) -> Option<Vec<Target>> {
        let text = fs::read_to_string(&self.cache_path).ok()?;
        let doc: Value = serde_json::from_str(&text).ok()?;

        match parse_targets_role(&doc) {
            Ok(targets) => Some(targets),
            Err(err) => {
                warn!("cached targets role is unreadable: {err:#}");
                None
            }
        }
    }

    fn set_report_target(&self, name: &str) {
        debug!("reporting {TARGET_HEADER}: {name}");
        *self.report_target.borrow_mut() = Some(name.to_string());
    }

    fn register_device(&self, serial: &str, target_name: &str) -> Result<()> {
        let url = format!("{}/ecus", self.base);
        let body = serde_json::json!({serial: {"target": target_name}});

        #[rustfmt::skip]
        let resp = self.http.put(&url)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .context(format!("PUT {url} failed"))?;

        if !resp.status().is_success() {
            bail!("PUT {} returned status code {}", url, resp.status());
        }

        Ok(())
    }
}

/// Offline source reading the verified role straight from a directory, for
/// update-from-disk flows.
pub struct LocalTuf {
    repo: PathBuf,
}

impl LocalTuf {
    pub fn new(repo: &Path) -> Self {
        Self {
            repo: repo.to_path_buf(),
        }
    }
}

impl TufSource for LocalTuf {
    fn fetch_targets(&self) -> Result<Vec<Target>> {
        let path = self.repo.join(TARGETS_ROLE);
        let text = fs::read_to_string(&path).context(format!("failed to read {:?}", path.display()))?;
        let doc: Value = serde_json::from_str(&text).context("failed to parse targets role")?;

        parse_targets_role(&doc)
    }

    fn verify_target(&self, target: &Target) -> Result<()> {
        let targets = self.fetch_targets()?;

        if !targets.iter().any(|t| t.name() == target.name() && t.sha256() == target.sha256()) {
            bail!("target {} ({}) is not in the signed set", target.name(), target.sha256());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn role() -> Value {
        json!({
            "signed": {
                "targets": {
                    "lmp-1": {
                        "hashes": {"sha256": "a".repeat(64)},
                        "custom": {"version": "1", "hardwareIds": ["hw"], "tags": ["main"]},
                    },
                    "broken": {
                        "custom": {"version": "2"},
                    },
                },
            },
        })
    }

    #[test]
    fn parses_role_and_skips_broken_members() {
        let targets = parse_targets_role(&role()).unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name(), "lmp-1");
    }

    #[test]
    fn rejects_role_without_targets() {
        assert!(parse_targets_role(&json!({"signed": {}})).is_err());
    }

    #[test]
    fn local_source_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("targets.json"), role().to_string()).unwrap();

        let local = LocalTuf::new(dir.path());
        let targets = local.fetch_targets().unwrap();

        assert_eq!(targets.len(), 1);
        assert!(local.verify_target(&targets[0]).is_ok());

        let impostor = crate::fixture::target_with_version("lmp-1", &"b".repeat(64), 1);
        assert!(local.verify_target(&impostor).is_err());
    }

    #[test]
    fn gateway_cache_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("targets.json"), role().to_string()).unwrap();

        let gateway = GatewayTuf::new(reqwest::blocking::Client::new(), "https://gw", dir.path());
        let cached = gateway.fetch_cached().unwrap();

        assert_eq!(cached.len(), 1);
    }
}
