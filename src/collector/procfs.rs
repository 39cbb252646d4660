use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{cpu, disk, memory, network, SampleError, Sampler};
use crate::config::CollectorConfig;
use crate::types::Snapshot;

/// Samples the local host from procfs and statvfs(2).
///
/// CPU usage is measured over `cpu_window` by reading /proc/stat twice,
/// so every call takes at least that long unless cancelled.
#[derive(Debug, Clone)]
pub struct ProcfsSampler {
    proc_root: PathBuf,
    disk_mount: PathBuf,
    cpu_window: Duration,
    exclude_interfaces: Vec<String>,
}

impl ProcfsSampler {
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            proc_root: config.proc_root(),
            disk_mount: config.disk_mount(),
            cpu_window: config.cpu_window(),
            exclude_interfaces: config.exclude_interfaces.clone(),
        }
    }

    fn proc_path(&self, rel: &str) -> PathBuf {
        self.proc_root.join(rel)
    }

    async fn cpu_percent(&self, cancel: &CancellationToken) -> Result<f64, SampleError> {
        let stat = self.proc_path("stat");
        let first = cpu::read_times(&stat).await?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(SampleError::Cancelled),
            _ = tokio::time::sleep(self.cpu_window) => {}
        }

        let second = cpu::read_times(&stat).await?;
        Ok(cpu::usage_between(first, second))
    }
}

impl Default for ProcfsSampler {
    fn default() -> Self {
        Self::new(&CollectorConfig::default())
    }
}

#[async_trait]
impl Sampler for ProcfsSampler {
    fn name(&self) -> &str {
        "procfs"
    }

    async fn sample(&self, cancel: &CancellationToken) -> Result<Snapshot, SampleError> {
        let cpu_percent = self.cpu_percent(cancel).await?;
        let mem_percent = memory::read_usage(&self.proc_path("meminfo")).await?;
        let disk_percent = disk::read_space(&self.disk_mount).await?.used_percent();
        let net = network::read_totals(&self.proc_path("net/dev"), &self.exclude_interfaces).await?;

        Ok(Snapshot {
            timestamp: Utc::now(),
            cpu_percent,
            mem_percent,
            disk_percent,
            net_bytes_in: net.rx_bytes,
            net_bytes_out: net.tx_bytes,
        })
    }
}

pub(crate) async fn read_file(path: &Path) -> Result<String, SampleError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SampleError::Io {
            path: path.display().to_string(),
            source,
        })
}
