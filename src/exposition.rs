//! Prometheus side of the agent: the gauges the collector feeds and the
//! text encoding served on the scrape endpoint.

use anyhow::{Context, Result};
use prometheus::{Encoder, Gauge, Registry, TextEncoder};

use crate::types::Snapshot;

pub const CPU_GAUGE: &str = "metric_agent_cpu_percent";
pub const MEM_GAUGE: &str = "metric_agent_mem_percent";
pub const DISK_GAUGE: &str = "metric_agent_disk_percent";
pub const NET_IN_GAUGE: &str = "metric_agent_net_bytes_in";
pub const NET_OUT_GAUGE: &str = "metric_agent_net_bytes_out";

/// The five gauges mirroring the latest snapshot.
///
/// Registered on a caller-supplied registry; there is no process-wide
/// default, so two collectors in one process (or two tests) never collide
/// unless they share a registry.
#[derive(Clone)]
pub struct GaugeSet {
    cpu: Gauge,
    mem: Gauge,
    disk: Gauge,
    net_in: Gauge,
    net_out: Gauge,
}

impl GaugeSet {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let set = Self {
            cpu: Gauge::new(CPU_GAUGE, "CPU percent")?,
            mem: Gauge::new(MEM_GAUGE, "Memory percent")?,
            disk: Gauge::new(DISK_GAUGE, "Disk usage percent")?,
            net_in: Gauge::new(NET_IN_GAUGE, "Network bytes received (since boot)")?,
            net_out: Gauge::new(NET_OUT_GAUGE, "Network bytes sent (since boot)")?,
        };

        for gauge in [&set.cpu, &set.mem, &set.disk, &set.net_in, &set.net_out] {
            registry.register(Box::new(gauge.clone()))?;
        }

        Ok(set)
    }

    /// Set every gauge from the snapshot. Never fails.
    pub fn record(&self, snapshot: &Snapshot) {
        self.cpu.set(snapshot.cpu_percent);
        self.mem.set(snapshot.mem_percent);
        self.disk.set(snapshot.disk_percent);
        self.net_in.set(snapshot.net_bytes_in as f64);
        self.net_out.set(snapshot.net_bytes_out as f64);
    }
}

/// Render everything in the registry in the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buf)
        .context("Failed to encode metric families")?;
    String::from_utf8(buf).context("Metric encoding produced invalid UTF-8")
}

/// Content type served alongside [`encode_text`].
pub fn text_content_type() -> &'static str {
    prometheus::TEXT_FORMAT
}
