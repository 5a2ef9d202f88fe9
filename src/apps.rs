use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::hash::hash_on_disk_sha256;
use crate::target::Target;
use ocidist::{Sha256Sum, Uri, OCI_MANIFEST_FORMAT};

const TOKEN_FETCH_TRIES: u32 = 3;
const TOKEN_RETRY_DELAY: Duration = Duration::from_secs(2);

/// The transport can be transient; a denied or malformed auth response will
/// not improve on a second ask.
fn token_error_is_transient(err: &ocidist::Error) -> bool {
    match err {
        ocidist::Error::SendRequest(..) => true,
        ocidist::Error::RequestFailed(_, status) => status.is_server_error(),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    All,
    DelayAppInstall,
}

impl std::str::FromStr for InstallMode {
    type Err = String;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "all" => Ok(InstallMode::All),
            "delay-app-install" => Ok(InstallMode::DelayAppInstall),
            other => Err(format!("unknown install mode `{other}`")),
        }
    }
}

/// Starting containers belongs to the runtime, not the engine.
pub trait AppRuntime {
    fn start(&self, name: &str, dir: &Path) -> Result<()>;
}

/// What the update controller needs from the app side: fetch a target's app
/// set, or just start one that is already staged on disk.
pub trait AppsSync {
    fn sync(&self, target: &Target, mode: InstallMode, token: &CancelToken) -> Result<()>;
    fn start_only(&self, target: &Target, root: &Path) -> Result<()>;
}

/// Compose-file runtime driven through the `docker` binary.
pub struct ComposeCli;

impl AppRuntime for ComposeCli {
    fn start(&self, name: &str, dir: &Path) -> Result<()> {
        info!("starting app {name}");

        #[rustfmt::skip]
        let status = Command::new("docker")
            .arg("compose")
            .arg("up")
            .arg("-d")
            .arg("--remove-orphans")
            .current_dir(dir)
            .status()
            .context("failed to run docker compose")?;

        if !status.success() {
            bail!("docker compose up for {name} exited with {status}");
        }

        Ok(())
    }
}

/// Pulls each app's pinned manifest and blobs out of the registry and hands
/// the staged directory to the runtime.
pub struct AppsManager {
    client: ocidist::Client,
    runtime: Box<dyn AppRuntime>,
    apps_root: PathBuf,
}

impl AppsManager {
    pub fn new(client: ocidist::Client, runtime: Box<dyn AppRuntime>, apps_root: &Path) -> Self {
        Self {
            client,
            runtime,
            apps_root: apps_root.to_path_buf(),
        }
    }

    pub fn app_dir(&self, name: &str) -> PathBuf {
        self.apps_root.join(name)
    }

    /// The token leg is the only part of a pull retried in place; manifest
    /// and blob failures are final and bubble up to the caller.
    fn fetch_token(&self, name: &str, uri: &Uri) -> Result<String> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.client.token_for(uri) {
                Ok(bearer) => return Ok(bearer),
                Err(err) => err,
            };

            if attempt >= TOKEN_FETCH_TRIES || !token_error_is_transient(&err) {
                return Err(err).context(format!("failed to obtain a pull token for {name}"));
            }

            warn!("token fetch for {name} failed (attempt {attempt} of {TOKEN_FETCH_TRIES}): {err}");
            thread::sleep(TOKEN_RETRY_DELAY);
        }
    }

    fn pull(&self, name: &str, uri: &str, token: &CancelToken) -> Result<()> {
        let uri = Uri::parse(uri).context(format!("bad uri for app {name}"))?;
        info!("pulling app {name} from {uri}");

        let bearer = self.fetch_token(name, &uri)?;
        let manifest = self.client.get_manifest(&uri, &bearer, OCI_MANIFEST_FORMAT).context(format!("failed to fetch the manifest for {name}"))?;

        let dir = self.app_dir(name);
        let blobs = dir.join("blobs");
        fs::create_dir_all(&blobs).context(format!("failed to create {:?}", blobs.display()))?;

        for entry in manifest_blobs(&manifest)? {
            if token.is_cancelled() {
                bail!("cancelled");
            }
            self.fetch_blob(&uri, &bearer, &blobs, &entry)?;
        }

        let manifest_path = dir.join("manifest.json");
        fs::write(&manifest_path, manifest.to_string()).context(format!("failed to write {:?}", manifest_path.display()))?;

        Ok(())
    }

    fn fetch_blob(&self, app_uri: &Uri, bearer: &str, blobs_dir: &Path, entry: &BlobEntry) -> Result<()> {
        let path = blobs_dir.join(&entry.hash);

        // a blob left over from an earlier pull is good if it still hashes
        if path.exists() {
            if let Ok(sum) = hash_on_disk_sha256(&path, None) {
                if sum.to_string() == entry.hash {
                    debug!("blob {} already present", entry.hash);
                    return Ok(());
                }
            }
        }

        let digest = Sha256Sum::from_hex(&entry.hash).map_err(|_| anyhow::anyhow!("manifest digest {} is not 64 hex characters", entry.hash))?;
        let blob_uri = app_uri.with_digest(digest);

        self.client.download_blob(&blob_uri, bearer, &path, entry.size).context(format!("failed to download blob {}", entry.hash))?;

        Ok(())
    }
}

impl AppsSync for AppsManager {
    /// Fetch everything the target's app set references, then start the
    /// apps unless installation is delayed until after reboot.
    fn sync(&self, target: &Target, mode: InstallMode, token: &CancelToken) -> Result<()> {
        let apps = target.apps();
        if apps.is_empty() {
            debug!("target {} has no apps to sync", target.name());
            return Ok(());
        }

        for (name, uri) in &apps {
            self.pull(name, uri, token)?;
        }

        if mode == InstallMode::All {
            for (name, _) in &apps {
                self.runtime.start(name, &self.app_dir(name))?;
            }
        }

        Ok(())
    }

    /// Start apps from an already populated directory, for offline flows.
    fn start_only(&self, target: &Target, root: &Path) -> Result<()> {
        for (name, _) in target.apps() {
            self.runtime.start(&name, &root.join(&name))?;
        }
        Ok(())
    }
}

struct BlobEntry {
    hash: String,
    size: u64,
}

/// Config blob plus layers, each a `{digest, size}` pair. A manifest member
/// missing either field is a hard error, not something to skip.
fn manifest_blobs(manifest: &Value) -> Result<Vec<BlobEntry>> {
    let mut entries = Vec::new();

    let mut members: Vec<&Value> = Vec::new();
    if let Some(config) = manifest.get("config") {
        members.push(config);
    }
    if let Some(layers) = manifest.get("layers").and_then(Value::as_array) {
        members.extend(layers);
    }

    for member in members {
        let digest = member.get("digest").and_then(Value::as_str).context("manifest member carries no digest")?;
        let size = member.get("size").and_then(Value::as_u64).context("manifest member carries no size")?;

        let hash = digest.strip_prefix("sha256:").context(format!("unsupported digest type: {digest}"))?;

        entries.push(BlobEntry {
            hash: hash.to_string(),
            size,
        });
    }

    Ok(entries)
}
