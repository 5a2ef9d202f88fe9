use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};

use crate::remote::Remote;

/// The slice of the tree tool the engine consumes. The real implementation
/// drives the `ostree` binary; tests swap in an in-memory fake.
pub trait Sysroot {
    fn path(&self) -> &Path;
    fn repo_path(&self) -> PathBuf;

    /// Commit hash of the booted deployment; empty on a fresh device the
    /// tool knows nothing about.
    fn booted_hash(&self) -> String;
    /// Commit hash of the staged-but-not-booted deployment, empty if none.
    fn pending_hash(&self) -> String;
    /// Commit hash of the deployment a rollback would land on, empty if none.
    fn rollback_hash(&self) -> String;

    fn has_remote(&self, name: &str) -> bool;
    fn add_remote(&self, remote: &Remote) -> Result<()>;

    /// Block-level pull of one commit from one origin. The error text is
    /// surfaced verbatim; the caller matches on it to tell disk-full from
    /// transport trouble.
    fn pull(&self, remote: &Remote, hash: &str) -> Result<()>;

    /// Stage a deployment of `hash`. Success always means a reboot is still
    /// needed to observe it.
    fn deploy(&self, hash: &str) -> Result<()>;

    /// Read `path` out of a committed tree. `Ok(None)` when the commit or
    /// the file cannot be found.
    fn read_commit_file(&self, hash: &str, path: &str) -> Result<Option<String>>;

    /// Re-read deployment state; returns whether anything changed.
    fn reload(&self) -> Result<bool>;
}

#[derive(Debug, Default, Clone, PartialEq)]
struct DeployState {
    booted: String,
    pending: String,
    rollback: String,
}

/// `ostree admin status` lines look like
///
/// ```text
///   lmp 8d9dbb… (pending)
/// * lmp 5c0612….0
///   lmp a9f1e3….1 (rollback)
/// ```
///
/// The hash token carries a deploy serial suffix after the booted line.
fn parse_admin_status(out: &str) -> DeployState {
    let mut state = DeployState::default();

    for line in out.lines() {
        let booted = line.trim_start().starts_with('*');
        let trimmed = line.trim_start_matches([' ', '*']);

        let mut fields = trimmed.split_whitespace();
        let (Some(_osname), Some(commit)) = (fields.next(), fields.next()) else {
            continue;
        };
        let hash = commit.split('.').next().unwrap_or(commit).to_string();

        if booted {
            state.booted = hash;
        } else if line.contains("(pending)") {
            state.pending = hash;
        } else if line.contains("(rollback)") {
            state.rollback = hash;
        }
    }

    state
}

fn run_capture(cmd: &mut Command) -> Result<String> {
    let out = cmd.output().context(format!("failed to spawn {:?}", cmd.get_program()))?;

    if !out.status.success() {
        bail!("{:?} failed: {}", cmd.get_program(), String::from_utf8_lossy(&out.stderr).trim());
    }

    String::from_utf8(out.stdout).map_err(|_| anyhow!("{:?} produced non-utf8 output", cmd.get_program()))
}

pub struct OstreeCli {
    sysroot: PathBuf,
    state: RefCell<DeployState>,
}

impl OstreeCli {
    pub fn open(sysroot: &Path) -> Result<Self> {
        let this = Self {
            sysroot: sysroot.to_path_buf(),
            state: RefCell::new(DeployState::default()),
        };
        this.reload()?;
        Ok(this)
    }

    fn admin_status(&self) -> Result<DeployState> {
        #[rustfmt::skip]
        let out = run_capture(Command::new("ostree")
            .arg("admin")
            .arg("status")
            .arg("--sysroot")
            .arg(&self.sysroot))?;

        Ok(parse_admin_status(&out))
    }
}

impl Sysroot for OstreeCli {
    fn path(&self) -> &Path {
        &self.sysroot
    }

    fn repo_path(&self) -> PathBuf {
        self.sysroot.join("ostree/repo")
    }

    fn booted_hash(&self) -> String {
        self.state.borrow().booted.clone()
    }

    fn pending_hash(&self) -> String {
        self.state.borrow().pending.clone()
    }

    fn rollback_hash(&self) -> String {
        self.state.borrow().rollback.clone()
    }

    fn has_remote(&self, name: &str) -> bool {
        #[rustfmt::skip]
        let out = run_capture(Command::new("ostree")
            .arg("remote")
            .arg("list")
            .arg("--repo")
            .arg(self.repo_path()));

        match out {
            Ok(list) => list.lines().any(|l| l.trim() == name),
            Err(err) => {
                warn!("failed to list remotes: {err:#}");
                false
            }
        }
    }

    fn add_remote(&self, remote: &Remote) -> Result<()> {
        let mut cmd = Command::new("ostree");
        #[rustfmt::skip]
        let _ = cmd.arg("remote")
            .arg("add")
            .arg("--repo").arg(self.repo_path())
            .arg("--no-gpg-verify")
            .arg("--force");

        if let Some(keys) = &remote.keys {
            if let Some(ca) = &keys.ca_file {
                cmd.arg(format!("--set=tls-ca-path={}", ca.display()));
            }
            if let Some(cert) = &keys.cert_file {
                cmd.arg(format!("--set=tls-client-cert-path={}", cert.display()));
            }
            if let Some(pkey) = &keys.pkey_file {
                cmd.arg(format!("--set=tls-client-key-path={}", pkey.display()));
            }
        }

        cmd.arg(&remote.name).arg(&remote.base_url);

        run_capture(&mut cmd).map(|_| ())
    }

    fn pull(&self, remote: &Remote, hash: &str) -> Result<()> {
        let mut cmd = Command::new("ostree");
        #[rustfmt::skip]
        let _ = cmd.arg("pull")
            .arg("--repo").arg(self.repo_path());

        for (key, value) in &remote.headers {
            cmd.arg(format!("--http-header={key}={value}"));
        }

        cmd.arg(format!("{}:{}", remote.name, hash));

        run_capture(&mut cmd).map(|_| ())
    }

    fn deploy(&self, hash: &str) -> Result<()> {
        #[rustfmt::skip]
        let _ = run_capture(Command::new("ostree")
            .arg("admin")
            .arg("deploy")
            .arg("--sysroot").arg(&self.sysroot)
            .arg("--stage")
            .arg(hash))?;

        Ok(())
    }

    fn read_commit_file(&self, hash: &str, path: &str) -> Result<Option<String>> {
        #[rustfmt::skip]
        let out = run_capture(Command::new("ostree")
            .arg("cat")
            .arg("--repo").arg(self.repo_path())
            .arg(hash)
            .arg(path));

        match out {
            Ok(content) => Ok(Some(content)),
            Err(err) => {
                debug!("no {path} in commit {hash}: {err:#}");
                Ok(None)
            }
        }
    }

    fn reload(&self) -> Result<bool> {
        let fresh = self.admin_status()?;
        let changed = *self.state.borrow() != fresh;
        *self.state.borrow_mut() = fresh;
        Ok(changed)
    }
}
