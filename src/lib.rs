pub mod agent;
pub mod collector;
pub mod config;
pub mod exposition;
pub mod server;

/// Common types used across modules
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    /// One point-in-time measurement of host resource usage.
    ///
    /// Produced whole by a [`Sampler`](crate::collector::Sampler); never
    /// patched field by field. `Snapshot::default()` is the zero value
    /// served before the first successful sample: all zeros, timestamped
    /// `0001-01-01T00:00:00Z` so consumers of the JSON endpoint see the
    /// same "never sampled" marker the agent has always served.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Snapshot {
        pub timestamp: DateTime<Utc>,
        pub cpu_percent: f64,
        pub mem_percent: f64,
        pub disk_percent: f64,
        pub net_bytes_in: u64,
        pub net_bytes_out: u64,
    }

    /// Seconds from the Unix epoch back to 0001-01-01T00:00:00Z.
    const ZERO_TIME_SECS: i64 = -62_135_596_800;

    /// Timestamp of the zero-value snapshot.
    pub fn zero_time() -> DateTime<Utc> {
        DateTime::from_timestamp(ZERO_TIME_SECS, 0).unwrap_or_default()
    }

    impl Default for Snapshot {
        fn default() -> Self {
            Self {
                timestamp: zero_time(),
                cpu_percent: 0.0,
                mem_percent: 0.0,
                disk_percent: 0.0,
                net_bytes_in: 0,
                net_bytes_out: 0,
            }
        }
    }

    impl Snapshot {
        /// True until the first successful sample has been stored.
        pub fn is_zero(&self) -> bool {
            *self == Snapshot::default()
        }
    }

    /// Lifecycle of a collector. `Stopped` is terminal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub enum CollectorState {
        Created,
        Running,
        Stopped,
    }

    impl std::fmt::Display for CollectorState {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                CollectorState::Created => "created",
                CollectorState::Running => "running",
                CollectorState::Stopped => "stopped",
            };
            write!(f, "{}", s)
        }
    }

    /// Clamp a computed utilisation into 0..=100, mapping NaN to 0.
    pub fn clamp_percent(value: f64) -> f64 {
        if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 100.0)
        }
    }

}
