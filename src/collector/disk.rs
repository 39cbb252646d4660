use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;

use super::SampleError;
use crate::types::clamp_percent;

/// Byte counts for one mounted filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub total: u64,
    pub free: u64,
    pub available: u64,
}

impl DiskSpace {
    /// Used share of the space visible to unprivileged users, as `df` reports it.
    pub fn used_percent(&self) -> f64 {
        let used = self.total.saturating_sub(self.free);
        let denom = used + self.available;
        if denom == 0 {
            return 0.0;
        }
        clamp_percent(100.0 * used as f64 / denom as f64)
    }
}

/// statvfs(2) on the mount point. Runs on the blocking pool since network
/// filesystems can stall.
pub async fn read_space(mount: &Path) -> Result<DiskSpace, SampleError> {
    let mount: PathBuf = mount.to_path_buf();
    let display = mount.display().to_string();

    let stat = tokio::task::spawn_blocking(move || statvfs(mount.as_path()))
        .await
        .map_err(|e| SampleError::Unavailable(format!("statvfs task for {}: {}", display, e)))?
        .map_err(|errno| SampleError::Io {
            path: display,
            source: std::io::Error::from(errno),
        })?;

    let frsize = stat.fragment_size() as u64;
    Ok(DiskSpace {
        total: stat.blocks() as u64 * frsize,
        free: stat.blocks_free() as u64 * frsize,
        available: stat.blocks_available() as u64 * frsize,
    })
}
