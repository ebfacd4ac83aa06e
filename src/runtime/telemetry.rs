use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

const NO_VERSION: u64 = u64::MAX;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing ingestion progress.
#[derive(Debug)]
pub struct Telemetry {
    batches: AtomicU64,
    fetched_transactions: AtomicU64,
    processed_transactions: AtomicU64,
    processor_failures: AtomicU64,
    fetch_failures: AtomicU64,
    last_retired_version: AtomicU64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            batches: AtomicU64::new(0),
            fetched_transactions: AtomicU64::new(0),
            processed_transactions: AtomicU64::new(0),
            processor_failures: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            last_retired_version: AtomicU64::new(NO_VERSION),
        }
    }
}

impl Telemetry {
    pub fn record_fetched(&self, count: u64) {
        self.fetched_transactions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch was retired by every processor.
    pub fn record_batch(&self, processed: u64, end_version: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.processed_transactions
            .fetch_add(processed, Ordering::Relaxed);
        self.last_retired_version
            .store(end_version, Ordering::Relaxed);
    }

    pub fn record_processor_failure(&self) {
        self.processor_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let last = self.last_retired_version.load(Ordering::Relaxed);
        TelemetrySnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            fetched_transactions: self.fetched_transactions.load(Ordering::Relaxed),
            processed_transactions: self.processed_transactions.load(Ordering::Relaxed),
            processor_failures: self.processor_failures.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            last_retired_version: (last != NO_VERSION).then_some(last),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub batches: u64,
    pub fetched_transactions: u64,
    pub processed_transactions: u64,
    pub processor_failures: u64,
    pub fetch_failures: u64,
    pub last_retired_version: Option<u64>,
}

/// Spawns a background task that periodically logs throughput and failure counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "ledgerscan::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let delta = current
                        .processed_transactions
                        .saturating_sub(last_snapshot.processed_transactions);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "ledgerscan::metrics",
                        throughput = format!("{throughput:.2}"),
                        batches = current.batches,
                        processed = current.processed_transactions,
                        fetched = current.fetched_transactions,
                        last_version = ?current.last_retired_version,
                        processor_failures = current.processor_failures,
                        fetch_failures = current.fetch_failures,
                        "indexer metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
