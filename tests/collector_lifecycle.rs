use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metric_agent::collector::{Collector, SampleError, Sampler};
use metric_agent::exposition::encode_text;
use metric_agent::types::{CollectorState, Snapshot};
use prometheus::Registry;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Returns the same snapshot on every call.
struct FixedSampler(Snapshot);

#[async_trait]
impl Sampler for FixedSampler {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn sample(&self, _cancel: &CancellationToken) -> Result<Snapshot, SampleError> {
        Ok(self.0.clone())
    }
}

/// Every field of snapshot k equals k, so a torn read is detectable.
struct SentinelSampler(Arc<AtomicU64>);

fn sentinel(k: u64) -> Snapshot {
    Snapshot {
        timestamp: DateTime::from_timestamp(k as i64, 0).unwrap(),
        cpu_percent: k as f64,
        mem_percent: k as f64,
        disk_percent: k as f64,
        net_bytes_in: k,
        net_bytes_out: k,
    }
}

fn is_consistent(s: &Snapshot) -> bool {
    let k = s.net_bytes_in;
    s.is_zero() || *s == sentinel(k)
}

#[async_trait]
impl Sampler for SentinelSampler {
    fn name(&self) -> &str {
        "sentinel"
    }

    async fn sample(&self, _cancel: &CancellationToken) -> Result<Snapshot, SampleError> {
        let k = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(sentinel(k))
    }
}

/// Plays back outcomes pushed by the test, one per call.
struct ScriptedSampler {
    rx: Mutex<mpsc::UnboundedReceiver<Option<Snapshot>>>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Sampler for ScriptedSampler {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn sample(&self, cancel: &CancellationToken) -> Result<Snapshot, SampleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(SampleError::Cancelled),
            next = rx.recv() => match next {
                Some(Some(snapshot)) => Ok(snapshot),
                Some(None) => Err(SampleError::Unavailable("scripted failure".into())),
                None => {
                    cancel.cancelled().await;
                    Err(SampleError::Cancelled)
                }
            },
        }
    }
}

fn scripted() -> (ScriptedSampler, mpsc::UnboundedSender<Option<Snapshot>>, Arc<AtomicUsize>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let sampler = ScriptedSampler { rx: Mutex::new(rx), calls: Arc::clone(&calls) };
    (sampler, tx, calls)
}

fn example() -> Snapshot {
    Snapshot {
        timestamp: Utc::now(),
        cpu_percent: 12.3,
        mem_percent: 45.6,
        disk_percent: 78.9,
        net_bytes_in: 1000,
        net_bytes_out: 2000,
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn fixed_snapshot_is_served_and_frozen_after_stop() {
    let expected = example();
    let registry = Registry::new();
    let c = Collector::new(FixedSampler(expected.clone()), Duration::from_millis(10), &registry).unwrap();

    c.start(CancellationToken::new()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(c.last(), expected);

    c.stop().await;
    assert_eq!(c.state(), CollectorState::Stopped);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(c.last(), expected);
}

#[tokio::test]
async fn first_sample_does_not_wait_for_interval() {
    let registry = Registry::new();
    let c = Collector::new(FixedSampler(example()), Duration::from_secs(3600), &registry).unwrap();

    c.start(CancellationToken::new()).unwrap();
    wait_until(|| !c.last().is_zero()).await;
    c.stop().await;
}

#[tokio::test]
async fn last_tracks_each_successful_sample_exactly() {
    let (sampler, tx, calls) = scripted();
    let registry = Registry::new();
    let c = Collector::new(sampler, Duration::from_millis(1), &registry).unwrap();
    c.start(CancellationToken::new()).unwrap();

    for k in 1..=5u64 {
        tx.send(Some(sentinel(k))).unwrap();
        // the next call starting means sample k has been published
        let target = k as usize + 1;
        wait_until(|| calls.load(Ordering::SeqCst) >= target).await;
        assert_eq!(c.last(), sentinel(k));
    }

    c.stop().await;
}

#[tokio::test]
async fn failure_keeps_previous_snapshot() {
    let (sampler, tx, calls) = scripted();
    let registry = Registry::new();
    let c = Collector::new(sampler, Duration::from_millis(1), &registry).unwrap();
    c.start(CancellationToken::new()).unwrap();

    // failure before any success leaves the zero value
    tx.send(None).unwrap();
    wait_until(|| calls.load(Ordering::SeqCst) >= 2).await;
    assert!(c.last().is_zero());

    let first = example();
    tx.send(Some(first.clone())).unwrap();
    wait_until(|| calls.load(Ordering::SeqCst) >= 3).await;
    assert_eq!(c.last(), first);

    tx.send(None).unwrap();
    wait_until(|| calls.load(Ordering::SeqCst) >= 4).await;
    let after_failure = c.last();
    assert_eq!(after_failure, first);
    assert_eq!(after_failure.timestamp, first.timestamp);

    c.stop().await;
}

#[tokio::test]
async fn alternating_outcomes_never_regress() {
    let (sampler, tx, calls) = scripted();
    let registry = Registry::new();
    let c = Collector::new(sampler, Duration::from_millis(1), &registry).unwrap();
    c.start(CancellationToken::new()).unwrap();

    let mut expected = Snapshot::default();
    for k in 1..=6u64 {
        let outcome = if k % 2 == 1 { Some(sentinel(k)) } else { None };
        if let Some(s) = &outcome {
            expected = s.clone();
        }
        tx.send(outcome).unwrap();
        let target = k as usize + 1;
        wait_until(|| calls.load(Ordering::SeqCst) >= target).await;
        let last = c.last();
        assert!(!last.is_zero());
        assert_eq!(last, expected);
    }

    c.stop().await;
}

#[tokio::test]
async fn no_replacement_after_stop() {
    let counter = Arc::new(AtomicU64::new(0));
    let registry = Registry::new();
    let c = Collector::new(SentinelSampler(Arc::clone(&counter)), Duration::from_millis(1), &registry).unwrap();

    c.start(CancellationToken::new()).unwrap();
    wait_until(|| c.last().net_bytes_in >= 3).await;
    c.stop().await;

    let frozen = c.last();
    let calls = counter.load(Ordering::SeqCst);
    assert_eq!(frozen, sentinel(calls));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(c.last(), frozen);
    assert_eq!(counter.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn caller_cancellation_stops_the_loop() {
    let counter = Arc::new(AtomicU64::new(0));
    let registry = Registry::new();
    let c = Collector::new(SentinelSampler(Arc::clone(&counter)), Duration::from_millis(1), &registry).unwrap();

    let cancel = CancellationToken::new();
    c.start(cancel.clone()).unwrap();
    wait_until(|| c.last().net_bytes_in >= 2).await;

    cancel.cancel();
    wait_until(|| c.state() == CollectorState::Stopped).await;
    let calls = counter.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(counter.load(Ordering::SeqCst), calls);

    // stop after the loop already exited must still return
    tokio::time::timeout(Duration::from_secs(1), c.stop()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_never_see_torn_snapshots() {
    let registry = Registry::new();
    let c = Arc::new(
        Collector::new(SentinelSampler(Arc::new(AtomicU64::new(0))), Duration::from_millis(1), &registry)
            .unwrap(),
    );
    c.start(CancellationToken::new()).unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let c = Arc::clone(&c);
            std::thread::spawn(move || {
                let mut seen_max = 0;
                for _ in 0..20_000 {
                    let s = c.last();
                    assert!(is_consistent(&s), "torn snapshot: {:?}", s);
                    // snapshots are only ever replaced by newer ones
                    assert!(s.net_bytes_in >= seen_max);
                    seen_max = s.net_bytes_in;
                }
            })
        })
        .collect();

    for r in readers {
        r.join().unwrap();
    }
    c.stop().await;
}

#[tokio::test]
async fn gauges_mirror_last_snapshot() {
    let registry = Registry::new();
    let c = Collector::new(FixedSampler(example()), Duration::from_millis(10), &registry).unwrap();
    c.start(CancellationToken::new()).unwrap();
    wait_until(|| !c.last().is_zero()).await;
    c.stop().await;

    let text = encode_text(&registry).unwrap();
    assert!(text.contains("metric_agent_cpu_percent 12.3"));
    assert!(text.contains("metric_agent_mem_percent 45.6"));
    assert!(text.contains("metric_agent_disk_percent 78.9"));
    assert!(text.contains("metric_agent_net_bytes_in 1000"));
    assert!(text.contains("metric_agent_net_bytes_out 2000"));
}
