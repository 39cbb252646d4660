use std::path::Path;

use super::procfs::read_file;
use super::SampleError;

/// Cumulative byte counters summed across interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetTotals {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Sum rx/tx bytes from /proc/net/dev, skipping excluded interfaces.
pub fn parse_net_dev(content: &str, exclude: &[String]) -> Result<NetTotals, SampleError> {
    let mut totals = NetTotals::default();

    // Two header lines, then "iface: rx_bytes rx_packets ... tx_bytes ..."
    for line in content.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else { continue };
        let iface = iface.trim();
        if exclude.iter().any(|e| e == iface) { continue; }

        let parts: Vec<&str> = counters.split_whitespace().collect();
        if parts.len() < 16 {
            return Err(SampleError::Parse {
                what: "/proc/net/dev",
                reason: format!("interface {} has {} counters", iface, parts.len()),
            });
        }

        let rx: u64 = parse_counter(parts[0], iface)?;
        let tx: u64 = parse_counter(parts[8], iface)?;
        totals.rx_bytes = totals.rx_bytes.saturating_add(rx);
        totals.tx_bytes = totals.tx_bytes.saturating_add(tx);
    }

    Ok(totals)
}

fn parse_counter(raw: &str, iface: &str) -> Result<u64, SampleError> {
    raw.parse().map_err(|e| SampleError::Parse {
        what: "/proc/net/dev",
        reason: format!("interface {}: {}", iface, e),
    })
}

pub async fn read_totals(path: &Path, exclude: &[String]) -> Result<NetTotals, SampleError> {
    let content = read_file(path).await?;
    parse_net_dev(&content, exclude)
}
