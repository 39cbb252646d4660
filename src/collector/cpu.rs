use std::path::Path;

use super::procfs::read_file;
use super::SampleError;
use crate::types::clamp_percent;

/// Aggregate jiffy counters from the `cpu ` line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

/// Parse the aggregate CPU line of /proc/stat.
///
/// Only user..steal are summed; guest time is already folded into user.
pub fn parse_stat(content: &str) -> Result<CpuTimes, SampleError> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| SampleError::Parse {
            what: "/proc/stat",
            reason: "no aggregate cpu line".into(),
        })?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse())
        .collect::<Result<_, _>>()
        .map_err(|e: std::num::ParseIntError| SampleError::Parse {
            what: "/proc/stat",
            reason: e.to_string(),
        })?;

    if fields.len() < 4 {
        return Err(SampleError::Parse {
            what: "/proc/stat",
            reason: format!("expected at least 4 cpu fields, got {}", fields.len()),
        });
    }

    let total = fields.iter().sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0); // idle + iowait
    Ok(CpuTimes { total, idle })
}

/// Busy share of the jiffies elapsed between two readings, in percent.
pub fn usage_between(prev: CpuTimes, next: CpuTimes) -> f64 {
    let d_total = next.total.saturating_sub(prev.total);
    if d_total == 0 {
        return 0.0;
    }
    let d_idle = next.idle.saturating_sub(prev.idle);
    clamp_percent(100.0 * (1.0 - d_idle as f64 / d_total as f64))
}

pub async fn read_times(path: &Path) -> Result<CpuTimes, SampleError> {
    let content = read_file(path).await?;
    parse_stat(&content)
}
