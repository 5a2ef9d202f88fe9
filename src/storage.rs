use std::path::Path;

use anyhow::{bail, Context, Result};
use nix::sys::statvfs::statvfs;
use nix::unistd::Uid;

#[derive(Debug, Clone, Copy)]
pub struct StorageStat {
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub block_size: u64,
}

/// Filesystem statistics for the directory holding the ostree repo.
/// Unprivileged runs see `f_bavail` so the root reserve never counts as
/// available; uid 0 gets the full free-block count.
pub fn stat_path(path: &Path) -> Result<StorageStat> {
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }

    let stat = statvfs(path).context(format!("statvfs({:?}) failed", path.display()))?;

    let free_blocks = if Uid::effective().is_root() {
        stat.blocks_free()
    } else {
        stat.blocks_available()
    };

    Ok(StorageStat {
        total_blocks: stat.blocks() as u64,
        free_blocks: free_blocks as u64,
        block_size: stat.fragment_size() as u64,
    })
}
