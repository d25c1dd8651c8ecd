use super::DataSource;
use crate::error::SourceError;
use crate::types::{FetchBatch, SourceKind, TierTimeouts, TimeoutTier};
use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub name: String,
    pub kind: SourceKind,
    pub tier: TimeoutTier,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceManagerStatus {
    pub source_count: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub dropped_batches: u64,
    pub sources: Vec<SourceSummary>,
}

#[derive(Debug, Default)]
struct QueueCounters {
    depth: AtomicUsize,
    dropped: AtomicU64,
}

struct PendingFetch {
    name: String,
    budget: Duration,
    deadline: tokio::time::Instant,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Fans a fetch out to every configured source and collects the batches
/// in a bounded result queue.
pub struct SourceManager {
    sources: RwLock<Vec<Arc<dyn DataSource>>>,
    tiers: TierTimeouts,
    capacity: usize,
    result_tx: mpsc::Sender<FetchBatch>,
    result_rx: Mutex<mpsc::Receiver<FetchBatch>>,
    counters: Arc<QueueCounters>,
    root: CancellationToken,
}

impl SourceManager {
    pub fn new(sources: Vec<Arc<dyn DataSource>>, tiers: TierTimeouts, queue_capacity: usize) -> Self {
        let capacity = queue_capacity.max(1);
        let (result_tx, result_rx) = mpsc::channel(capacity);
        info!("SourceManager initialized with {} sources", sources.len());
        Self {
            sources: RwLock::new(sources),
            tiers,
            capacity,
            result_tx,
            result_rx: Mutex::new(result_rx),
            counters: Arc::new(QueueCounters::default()),
            root: CancellationToken::new(),
        }
    }

    pub fn add_source(&self, source: Arc<dyn DataSource>) {
        info!("Added data source: {} ({}, {} tier)", source.name(), source.kind(), source.tier());
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn DataSource>> {
        self.sources.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Fetch from every source concurrently.
    ///
    /// Each task is awaited until `start + tier timeout`; past that it is
    /// cancelled and abandoned, so total wall time is bounded by the slowest
    /// tier rather than the sum of budgets.
    pub async fn fetch_all(&self) {
        let sources = self.snapshot();
        if sources.is_empty() {
            warn!("No data sources configured");
            return;
        }

        let started = Instant::now();
        info!("Starting concurrent fetch from {} sources", sources.len());

        let pending: Vec<PendingFetch> = sources
            .into_iter()
            .map(|source| {
                let budget = self.tiers.for_tier(source.tier());
                let token = self.root.child_token();
                let name = source.name().to_string();
                let handle = tokio::spawn(fetch_one(
                    source,
                    self.result_tx.clone(),
                    self.counters.clone(),
                    token.clone(),
                ));
                PendingFetch {
                    name,
                    budget,
                    deadline: tokio::time::Instant::now() + budget,
                    token,
                    handle,
                }
            })
            .collect();

        for fetch in pending {
            match tokio::time::timeout_at(fetch.deadline, fetch.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    error!("Fetch task for {} ended abnormally: {}", fetch.name, join_err);
                    counter!("hazard_fetch_error_total", "source" => fetch.name.clone()).increment(1);
                }
                Err(_) => {
                    warn!("Fetch {} timed out after {}s", fetch.name, fetch.budget.as_secs());
                    counter!("hazard_fetch_timeout_total", "source" => fetch.name.clone()).increment(1);
                    fetch.token.cancel();
                }
            }
        }

        info!("All fetch operations completed in {:.2}s", started.elapsed().as_secs_f64());
    }

    /// Drain every queued batch, first waiting up to `wait` for one to arrive.
    pub async fn get_events(&self, wait: Duration) -> Vec<FetchBatch> {
        let mut rx = self.result_rx.lock().await;
        let mut batches = Vec::new();

        if !wait.is_zero() {
            if let Ok(Some(batch)) = tokio::time::timeout(wait, rx.recv()).await {
                batches.push(batch);
            }
        }
        while let Ok(batch) = rx.try_recv() {
            batches.push(batch);
        }

        self.counters.depth.fetch_sub(batches.len(), Ordering::SeqCst);
        batches
    }

    pub fn get_status(&self) -> SourceManagerStatus {
        let sources = self.snapshot();
        SourceManagerStatus {
            source_count: sources.len(),
            queue_depth: self.counters.depth.load(Ordering::SeqCst),
            queue_capacity: self.capacity,
            dropped_batches: self.counters.dropped.load(Ordering::SeqCst),
            sources: sources
                .iter()
                .map(|s| SourceSummary {
                    name: s.name().to_string(),
                    kind: s.kind(),
                    tier: s.tier(),
                })
                .collect(),
        }
    }
}

impl Drop for SourceManager {
    fn drop(&mut self) {
        // stop anything still running from an abandoned fetch
        self.root.cancel();
    }
}

async fn fetch_one(
    source: Arc<dyn DataSource>,
    tx: mpsc::Sender<FetchBatch>,
    counters: Arc<QueueCounters>,
    token: CancellationToken,
) {
    let name = source.name().to_string();
    let started = Instant::now();
    debug!("Fetching data from {}", name);

    let result = tokio::select! {
        _ = token.cancelled() => Err(SourceError::Cancelled),
        r = source.fetch_and_parse() => r,
    };
    let elapsed = started.elapsed().as_secs_f64();
    histogram!("hazard_fetch_duration_seconds", "source" => name.clone()).record(elapsed);

    let events = match result {
        Ok(events) => events,
        Err(SourceError::Cancelled) => {
            debug!("Fetch from {} cancelled after {:.2}s", name, elapsed);
            return;
        }
        Err(e) => {
            error!("✗ {} failed after {:.2}s: {}", name, elapsed, e);
            counter!("hazard_fetch_error_total", "source" => name).increment(1);
            return;
        }
    };

    if events.is_empty() {
        warn!("No data from {} (took {:.2}s)", name, elapsed);
        return;
    }
    if token.is_cancelled() {
        debug!("Discarding late result from {}", name);
        return;
    }

    let count = events.len();
    counters.depth.fetch_add(1, Ordering::SeqCst);
    match tx.try_send(FetchBatch::new(name.clone(), source.kind(), events)) {
        Ok(()) => {
            counter!("hazard_fetch_success_total", "source" => name.clone()).increment(1);
            info!("✓ {}: {} items in {:.2}s", name, count, elapsed);
        }
        Err(TrySendError::Full(_)) => {
            counters.depth.fetch_sub(1, Ordering::SeqCst);
            counters.dropped.fetch_add(1, Ordering::SeqCst);
            warn!("Result queue full, batch from {} dropped", name);
        }
        Err(TrySendError::Closed(_)) => {
            counters.depth.fetch_sub(1, Ordering::SeqCst);
            warn!("Result queue closed, batch from {} discarded", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceResult;
    use crate::sources::RawPayload;
    use crate::types::{Event, EventKind};
    use serde_json::json;

    struct Fixed {
        name: String,
        delay: Duration,
        fail: bool,
        tier: TimeoutTier,
    }

    impl Fixed {
        fn healthy(name: &str) -> Arc<dyn DataSource> {
            Arc::new(Self { name: name.into(), delay: Duration::ZERO, fail: false, tier: TimeoutTier::Fast })
        }
    }

    #[async_trait::async_trait]
    impl DataSource for Fixed {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> SourceKind {
            SourceKind::Generic
        }
        fn tier(&self) -> TimeoutTier {
            self.tier
        }
        async fn fetch_raw(&self) -> SourceResult<RawPayload> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(SourceError::Parse("boom".into()));
            }
            Ok(json!([{"n": 1}]))
        }
        fn parse(&self, raw: RawPayload) -> SourceResult<Vec<Event>> {
            Ok(raw
                .as_array()
                .map(|a| a.iter().map(|_| Event::new(EventKind::Generic, self.name.clone())).collect())
                .unwrap_or_default())
        }
    }

    fn short_tiers() -> TierTimeouts {
        TierTimeouts {
            slow: Duration::from_millis(300),
            medium: Duration::from_millis(200),
            fast: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn empty_manager_returns_immediately() {
        let manager = SourceManager::new(vec![], short_tiers(), 4);
        manager.fetch_all().await;
        assert!(manager.get_events(Duration::ZERO).await.is_empty());
    }

    #[tokio::test]
    async fn full_result_queue_drops_and_counts() {
        let sources = (0..3).map(|i| Fixed::healthy(&format!("s{i}"))).collect();
        let manager = SourceManager::new(sources, short_tiers(), 1);
        manager.fetch_all().await;

        let status = manager.get_status();
        assert_eq!(status.queue_depth, 1);
        assert_eq!(status.dropped_batches, 2);
        assert_eq!(manager.get_events(Duration::ZERO).await.len(), 1);
        assert_eq!(manager.get_status().queue_depth, 0);
    }

    #[tokio::test]
    async fn add_source_shows_in_status() {
        let manager = SourceManager::new(vec![], short_tiers(), 4);
        manager.add_source(Arc::new(Fixed {
            name: "late".into(),
            delay: Duration::ZERO,
            fail: false,
            tier: TimeoutTier::Slow,
        }));
        let status = manager.get_status();
        assert_eq!(status.source_count, 1);
        assert_eq!(status.sources[0].tier, TimeoutTier::Slow);
    }

    #[tokio::test]
    async fn timed_out_source_is_cancelled_and_never_enqueues() {
        let sources = vec![
            Fixed::healthy("fast"),
            Arc::new(Fixed {
                name: "stuck".into(),
                delay: Duration::from_secs(5),
                fail: false,
                tier: TimeoutTier::Fast,
            }) as Arc<dyn DataSource>,
        ];
        let manager = SourceManager::new(sources, short_tiers(), 8);
        manager.fetch_all().await;

        // give a leaked task time to write if cancellation failed
        tokio::time::sleep(Duration::from_millis(200)).await;
        let batches = manager.get_events(Duration::ZERO).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].source_name, "fast");
    }
}
