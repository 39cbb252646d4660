use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { hostname: default_hostname(), log_level: default_log_level() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen: default_listen() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_proc_root")]
    pub proc_root: String,
    #[serde(default = "default_disk_mount")]
    pub disk_mount: String,
    #[serde(default = "default_cpu_window_ms")]
    pub cpu_window_ms: u64,
    #[serde(default = "default_exclude_interfaces")]
    pub exclude_interfaces: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            proc_root: default_proc_root(),
            disk_mount: default_disk_mount(),
            cpu_window_ms: default_cpu_window_ms(),
            exclude_interfaces: default_exclude_interfaces(),
        }
    }
}

impl CollectorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// CPU measurement window, shrunk to half the interval when the
    /// configured window would not fit inside it.
    pub fn cpu_window(&self) -> Duration {
        let fit = (self.interval_ms / 2).max(1);
        Duration::from_millis(self.cpu_window_ms.min(fit))
    }

    pub fn proc_root(&self) -> PathBuf {
        PathBuf::from(&self.proc_root)
    }

    pub fn disk_mount(&self) -> PathBuf {
        PathBuf::from(&self.disk_mount)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        // Expand environment variables
        let expanded = expand_env_vars(&content)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| "Failed to parse configuration")?;

        Ok(config)
    }

    /// Load from `path` if given, else start from built-in defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Command-line flags win over the file.
    pub fn apply_overrides(&mut self, listen: Option<String>, interval: Option<Duration>) {
        if let Some(listen) = listen {
            self.server.listen = listen;
        }
        if let Some(interval) = interval {
            self.collector.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.collector.interval_ms == 0 {
            bail!("collector interval must be greater than zero");
        }
        if self.collector.cpu_window_ms == 0 {
            bail!("cpu_window_ms must be greater than zero");
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr(&self.server.listen)
    }
}

/// Resolve a listen address. A bare `:port` binds every interface.
pub fn parse_listen_addr(raw: &str) -> Result<SocketAddr> {
    let candidate = if raw.starts_with(':') {
        format!("0.0.0.0{}", raw)
    } else {
        raw.to_string()
    };

    candidate
        .to_socket_addrs()
        .with_context(|| format!("Invalid listen address: {}", raw))?
        .next()
        .with_context(|| format!("Listen address resolved to nothing: {}", raw))
}

/// Parse durations the way the agent's `--interval` flag always has:
/// one or more `<number><unit>` parts such as `250ms`, `1.5s` or `1h2m30s`,
/// with units `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. A bare integer is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        let secs: u64 = raw
            .parse()
            .map_err(|_| format!("duration out of range: {:?}", raw))?;
        return Ok(Duration::from_secs(secs));
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = raw;
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let unit_start = rest
            .find(|c: char| !is_number(c))
            .ok_or_else(|| format!("missing unit in duration {:?}", raw))?;
        let (number, tail) = rest.split_at(unit_start);
        let unit_end = tail.find(is_number).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        rest = tail;

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            other => {
                return Err(format!("unknown duration unit {:?} (use ns, us, ms, s, m or h)", other))
            }
        };

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(format!("missing number in duration {:?}", raw));
        }
        let invalid = || format!("invalid duration: {:?}", raw);
        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };

        // digits past 18 are below nanosecond resolution for every unit
        let frac = &frac[..frac.len().min(18)];
        let frac_nanos = if frac.is_empty() {
            0
        } else {
            let digits: u128 = frac.parse().map_err(|_| invalid())?;
            digits * unit_nanos / 10u128.pow(frac.len() as u32)
        };

        total = whole
            .checked_mul(unit_nanos)
            .and_then(|n| n.checked_add(frac_nanos))
            .and_then(|n| n.checked_add(total))
            .ok_or_else(|| format!("duration out of range: {:?}", raw))?;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC)
        .map_err(|_| format!("duration out of range: {:?}", raw))?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string())
}

// Default value functions
fn default_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_log_level() -> String { "info".to_string() }
fn default_listen() -> String { ":9100".to_string() }
fn default_interval_ms() -> u64 { 5_000 }
fn default_proc_root() -> String { "/proc".to_string() }
fn default_disk_mount() -> String { "/".to_string() }
fn default_cpu_window_ms() -> u64 { 200 }
fn default_exclude_interfaces() -> Vec<String> { vec!["lo".into()] }
