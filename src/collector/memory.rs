use std::path::Path;

use super::procfs::read_file;
use super::SampleError;
use crate::types::clamp_percent;

/// Used-memory percentage from /proc/meminfo contents
pub fn parse_meminfo(content: &str) -> Result<f64, SampleError> {
    let mut total_kb = 0u64;
    let mut available_kb = None;
    let mut free_kb = 0u64;
    let mut buffers_kb = 0u64;
    let mut cached_kb = 0u64;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 { continue; }
        let val: u64 = parts[1].parse().unwrap_or(0);
        match parts[0] {
            "MemTotal:" => total_kb = val,
            "MemAvailable:" => available_kb = Some(val),
            "MemFree:" => free_kb = val,
            "Buffers:" => buffers_kb = val,
            "Cached:" => cached_kb = val,
            _ => {}
        }
    }

    if total_kb == 0 {
        return Err(SampleError::Parse {
            what: "/proc/meminfo",
            reason: "MemTotal missing or zero".into(),
        });
    }

    // Fallback for kernels without MemAvailable
    let available_kb = available_kb.unwrap_or(free_kb + buffers_kb + cached_kb);

    Ok(clamp_percent(100.0 * (1.0 - available_kb as f64 / total_kb as f64)))
}

pub async fn read_usage(path: &Path) -> Result<f64, SampleError> {
    let content = read_file(path).await?;
    parse_meminfo(&content)
}
