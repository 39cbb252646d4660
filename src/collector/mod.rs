pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;
pub mod procfs;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use prometheus::Registry;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exposition::GaugeSet;
use crate::types::{CollectorState, Snapshot};

pub use procfs::ProcfsSampler;

/// A failed attempt to take one snapshot.
///
/// The variants only carry diagnostics. The collector treats all of them
/// the same way: skip this cycle and keep the previous snapshot.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("sampling cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collection interval must be greater than zero")]
    ZeroInterval,

    #[error("failed to register gauges: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("collector was already started")]
    AlreadyStarted,
}

/// Source of snapshots.
///
/// Implementations take exactly one full measurement per call and either
/// return a fully populated [`Snapshot`] or an error, never a partial one.
/// Any blocking wait inside `sample` must give up once `cancel` fires.
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Human-readable name for this sampler (e.g., "procfs")
    fn name(&self) -> &str;

    async fn sample(&self, cancel: &CancellationToken) -> Result<Snapshot, SampleError>;
}

/// Periodically samples the host and keeps the latest snapshot.
///
/// One background task writes the snapshot slot; any number of callers
/// read it through [`Collector::last`]. The slot lock is never held while
/// the sampler runs, so a slow measurement does not block readers.
pub struct Collector {
    sampler: Arc<dyn Sampler>,
    interval: Duration,
    last: Arc<RwLock<Snapshot>>,
    gauges: GaugeSet,
    state: Arc<Mutex<CollectorState>>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Collector {
    /// Build a collector and register its gauges on `registry`.
    ///
    /// Fails on a zero interval or when the gauges are already registered
    /// on this registry.
    pub fn new<S>(sampler: S, interval: Duration, registry: &Registry) -> Result<Self, CollectorError>
    where
        S: Sampler + 'static,
    {
        if interval.is_zero() {
            return Err(CollectorError::ZeroInterval);
        }
        let gauges = GaugeSet::register(registry)?;

        Ok(Self {
            sampler: Arc::new(sampler),
            interval,
            last: Arc::new(RwLock::new(Snapshot::default())),
            gauges,
            state: Arc::new(Mutex::new(CollectorState::Created)),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    /// Spawn the sampling loop on the current tokio runtime and return.
    ///
    /// The first sample is taken as soon as the task runs; later ones
    /// follow every `interval`. The loop ends when `cancel` fires or
    /// [`Collector::stop`] is called. Call at most once: a second call, or
    /// a call after `stop`, returns [`CollectorError::AlreadyStarted`].
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self, cancel: CancellationToken) -> Result<(), CollectorError> {
        let mut lifecycle = lock(&self.lifecycle);
        {
            let mut state = lock(&self.state);
            if *state != CollectorState::Created {
                return Err(CollectorError::AlreadyStarted);
            }
            *state = CollectorState::Running;
        }

        let token = cancel.child_token();
        let worker = SamplingLoop {
            sampler: Arc::clone(&self.sampler),
            interval: self.interval,
            last: Arc::clone(&self.last),
            gauges: self.gauges.clone(),
            state: Arc::clone(&self.state),
        };

        info!(
            sampler = self.sampler.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting collector"
        );
        lifecycle.handle = Some(tokio::spawn(worker.run(token.clone())));
        lifecycle.token = Some(token);
        Ok(())
    }

    /// Signal the loop to exit and wait until it has.
    ///
    /// When this returns no sample is in flight and the snapshot is frozen.
    /// Calling it on a collector that never started, or calling it again,
    /// returns immediately.
    pub async fn stop(&self) {
        let (token, handle) = {
            let mut lifecycle = lock(&self.lifecycle);
            (lifecycle.token.take(), lifecycle.handle.take())
        };

        if let Some(token) = token {
            token.cancel();
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sampling task ended abnormally");
            }
        }

        *lock(&self.state) = CollectorState::Stopped;
    }

    /// Copy of the most recent snapshot, or the zero value if no sample has
    /// succeeded yet.
    pub fn last(&self) -> Snapshot {
        self.last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> CollectorState {
        *lock(&self.state)
    }
}

/// State moved into the background task.
struct SamplingLoop {
    sampler: Arc<dyn Sampler>,
    interval: Duration,
    last: Arc<RwLock<Snapshot>>,
    gauges: GaugeSet,
    state: Arc<Mutex<CollectorState>>,
}

impl SamplingLoop {
    async fn run(self, token: CancellationToken) {
        let mut exit = ExitGuard {
            state: Arc::clone(&self.state),
            sampler: self.sampler.name().to_string(),
            clean: false,
        };

        // First tick completes immediately, so sampling starts at once.
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = self.sampler.sample(&token) => self.publish(result),
            }
        }

        exit.clean = true;
    }

    fn publish(&self, result: Result<Snapshot, SampleError>) {
        match result {
            Ok(snapshot) => {
                *self.last.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
                self.gauges.record(&snapshot);
                debug!(
                    cpu = snapshot.cpu_percent,
                    mem = snapshot.mem_percent,
                    disk = snapshot.disk_percent,
                    "Snapshot stored"
                );
            }
            Err(e) => {
                warn!(sampler = self.sampler.name(), error = %e, "Sampling failed, keeping previous snapshot");
            }
        }
    }
}

/// Marks the collector stopped however the sampling task ends, including
/// a panic inside the sampler.
struct ExitGuard {
    state: Arc<Mutex<CollectorState>>,
    sampler: String,
    clean: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        *lock(&self.state) = CollectorState::Stopped;
        if self.clean {
            info!(sampler = %self.sampler, "Collector stopped");
        } else {
            error!(sampler = %self.sampler, "Sampling task died, collector stopped");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
