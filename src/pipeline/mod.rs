//! Event pipeline: a bounded input queue drained by a fixed pool of workers
//! that route each batch to its normalizer and collect the outcomes.

pub mod geo;
pub mod normalize;
pub mod storage;

pub use normalize::{normalizer_for, Normalizer};
pub use storage::ArtifactStore;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::types::{FetchBatch, ProcessingOutcome};
use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters reported to the orchestrator. Reset by every `start_consumers`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStatistics {
    pub running: bool,
    pub processed_count: u64,
    pub error_count: u64,
    pub input_queue_depth: usize,
    pub output_queue_depth: usize,
    pub num_consumers: usize,
}

/// State shared by every worker and normalizer.
///
/// `stats` is the pipeline's single lock. Normalizers that read-modify-write
/// a shared artifact hold it for the duration of the update.
#[derive(Debug)]
pub struct PipelineContext {
    pub store: ArtifactStore,
    pub stats: Mutex<PipelineStatistics>,
}

impl PipelineContext {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            stats: Mutex::new(PipelineStatistics::default()),
        }
    }
}

/// Work item on the input queue. `Shutdown` carries the consumer generation
/// it was sent to, so sentinels left over from an earlier stop are ignored.
#[derive(Debug)]
pub enum QueueItem {
    Batch(FetchBatch),
    Shutdown(u64),
}

#[derive(Clone)]
struct WorkerShared {
    ctx: Arc<PipelineContext>,
    input_rx: Arc<Mutex<mpsc::Receiver<QueueItem>>>,
    output_tx: mpsc::UnboundedSender<ProcessingOutcome>,
    running: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    poll_interval: Duration,
}

pub struct EventPipeline {
    shared: WorkerShared,
    config: PipelineConfig,
    input_tx: mpsc::Sender<QueueItem>,
    output_rx: Mutex<mpsc::UnboundedReceiver<ProcessingOutcome>>,
    generation: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventPipeline {
    pub fn new(store: ArtifactStore, config: PipelineConfig) -> Self {
        let (input_tx, input_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let shared = WorkerShared {
            ctx: Arc::new(PipelineContext::new(store)),
            input_rx: Arc::new(Mutex::new(input_rx)),
            output_tx,
            running: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            poll_interval: config.poll_interval(),
        };
        Self {
            shared,
            config,
            input_tx,
            output_rx: Mutex::new(output_rx),
            generation: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.shared.ctx
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub async fn start_consumers(&self, n: usize) {
        // held throughout so a concurrent stop_consumers sees every handle
        let mut workers = self.workers.lock().await;
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Event pipeline consumers already running");
            return;
        }
        let n = n.max(1);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut stats = self.shared.ctx.stats.lock().await;
            let output_queue_depth = stats.output_queue_depth;
            *stats = PipelineStatistics {
                running: true,
                num_consumers: n,
                output_queue_depth,
                ..Default::default()
            };
        }

        for id in 0..n {
            workers.push(tokio::spawn(worker_loop(id, generation, self.shared.clone())));
        }
        info!("Started {} event pipeline consumers", n);
    }

    /// Signal every worker to exit and wait for each one up to the shutdown
    /// timeout. A worker in the middle of a batch finishes it first.
    pub async fn stop_consumers(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            warn!("Event pipeline consumers are not running");
            return;
        }
        info!("Stopping event pipeline consumers...");

        let generation = self.generation.load(Ordering::SeqCst);
        let timeout = self.config.shutdown_timeout();
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();

        for _ in 0..handles.len() {
            // workers also observe the running flag, so a full queue is not fatal here
            if self.input_tx.send_timeout(QueueItem::Shutdown(generation), timeout).await.is_err() {
                debug!("Could not enqueue shutdown sentinel");
                break;
            }
        }

        for (id, handle) in handles.into_iter().enumerate() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Consumer {} ended abnormally: {}", id, e),
                Err(_) => {
                    warn!("Consumer {} did not stop within {}s, aborting", id, timeout.as_secs());
                    abort.abort();
                }
            }
        }

        self.shared.ctx.stats.lock().await.running = false;
        info!("Event pipeline consumers stopped");
    }

    /// Enqueue one batch.
    ///
    /// Non-blocking mode never waits: a full queue drops the batch and
    /// returns [`PipelineError::QueueFull`]. Blocking mode waits for room,
    /// bounded by `timeout` when one is given.
    pub async fn add_events(&self, batch: FetchBatch, blocking: bool, timeout: Option<Duration>) -> Result<()> {
        let source_name = batch.source_name.clone();
        let count = batch.events.len();
        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        let sent = if blocking {
            match timeout {
                Some(t) => self
                    .input_tx
                    .send_timeout(QueueItem::Batch(batch), t)
                    .await
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(_) => PipelineError::QueueFull {
                            source_name: source_name.clone(),
                        },
                        SendTimeoutError::Closed(_) => PipelineError::QueueClosed,
                    }),
                None => self
                    .input_tx
                    .send(QueueItem::Batch(batch))
                    .await
                    .map_err(|_| PipelineError::QueueClosed),
            }
        } else {
            self.input_tx.try_send(QueueItem::Batch(batch)).map_err(|e| match e {
                TrySendError::Full(_) => PipelineError::QueueFull {
                    source_name: source_name.clone(),
                },
                TrySendError::Closed(_) => PipelineError::QueueClosed,
            })
        };

        if let Err(e) = sent {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("{}", e);
            return Err(e);
        }

        debug!("Queued {} events from {}", count, source_name);
        Ok(())
    }

    /// Drain collected outcomes, first waiting up to `wait` for one to arrive.
    pub async fn get_results(&self, wait: Duration) -> Vec<ProcessingOutcome> {
        let mut rx = self.output_rx.lock().await;
        let mut results = Vec::new();
        if !wait.is_zero() {
            if let Ok(Some(outcome)) = tokio::time::timeout(wait, rx.recv()).await {
                results.push(outcome);
            }
        }
        while let Ok(outcome) = rx.try_recv() {
            results.push(outcome);
        }
        drop(rx);

        if !results.is_empty() {
            let mut stats = self.shared.ctx.stats.lock().await;
            stats.output_queue_depth = stats.output_queue_depth.saturating_sub(results.len());
        }
        results
    }

    pub async fn get_statistics(&self) -> PipelineStatistics {
        let mut stats = self.shared.ctx.stats.lock().await;
        stats.input_queue_depth = self.input_tx.max_capacity() - self.input_tx.capacity();
        stats.clone()
    }

    /// Number of accepted batches that have no outcome yet.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until every accepted batch has produced an outcome. Returns
    /// `false` if `timeout` expires first.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pending() == 0;
            }
        }
    }
}

async fn worker_loop(id: usize, generation: u64, shared: WorkerShared) {
    debug!("Consumer {} started", id);

    while shared.running.load(Ordering::SeqCst) {
        let polled = tokio::time::timeout(shared.poll_interval, async {
            shared.input_rx.lock().await.recv().await
        })
        .await;

        let batch = match polled {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(QueueItem::Shutdown(g))) if g == generation => break,
            Ok(Some(QueueItem::Shutdown(_))) => continue,
            Ok(Some(QueueItem::Batch(batch))) => batch,
        };

        let kind = batch.source_kind;
        let outcome = process_batch(shared.ctx.clone(), batch).await;

        {
            let mut stats = shared.ctx.stats.lock().await;
            if outcome.success {
                stats.processed_count += 1;
            } else {
                stats.error_count += 1;
            }
            stats.output_queue_depth += 1;
        }
        if outcome.success {
            counter!("hazard_batches_processed_total", "kind" => kind.as_str()).increment(1);
        } else {
            counter!("hazard_batches_failed_total", "kind" => kind.as_str()).increment(1);
        }

        if shared.output_tx.send(outcome).is_err() {
            debug!("Outcome receiver dropped");
        }
        if shared.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            shared.drained.notify_waiters();
        }
    }

    debug!("Consumer {} exiting", id);
}

/// Run the batch's normalizer in its own task so a panic becomes a failed
/// outcome instead of taking the worker down.
async fn process_batch(ctx: Arc<PipelineContext>, batch: FetchBatch) -> ProcessingOutcome {
    let source_name = batch.source_name.clone();
    debug!("Processing {} events from {}", batch.events.len(), source_name);

    let task = tokio::spawn(async move { normalizer_for(batch.source_kind).normalize(&batch, &ctx).await });

    let message = match task.await {
        Ok(Ok(outcome)) => return outcome,
        Ok(Err(e)) => e.to_string(),
        Err(join_err) if join_err.is_panic() => "normalizer panicked".to_string(),
        Err(join_err) => join_err.to_string(),
    };

    let err = PipelineError::Worker {
        source_name: source_name.clone(),
        message,
    };
    error!("{}", err);
    ProcessingOutcome::failure(source_name, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, EventKind, SourceKind};

    fn config(capacity: usize) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: capacity,
            poll_interval_ms: 50,
            shutdown_timeout_secs: 2,
        }
    }

    fn volcano_batch(name: &str) -> FetchBatch {
        FetchBatch::new(
            name,
            SourceKind::Volcano,
            vec![Event::new(EventKind::Volcano, name).with("title", "Etna")],
        )
    }

    #[tokio::test]
    async fn non_blocking_add_on_full_queue_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = EventPipeline::new(ArtifactStore::new(dir.path()).unwrap(), config(1));

        pipeline.add_events(volcano_batch("a"), false, None).await.unwrap();
        let err = pipeline.add_events(volcano_batch("b"), false, None).await.unwrap_err();

        assert!(matches!(err, PipelineError::QueueFull { ref source_name } if source_name == "b"));
        assert_eq!(pipeline.pending(), 1);
        assert_eq!(pipeline.get_statistics().await.input_queue_depth, 1);
    }

    #[tokio::test]
    async fn blocking_add_with_timeout_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = EventPipeline::new(ArtifactStore::new(dir.path()).unwrap(), config(1));

        pipeline.add_events(volcano_batch("a"), true, None).await.unwrap();
        let res = pipeline
            .add_events(volcano_batch("b"), true, Some(Duration::from_millis(50)))
            .await;
        assert!(matches!(res, Err(PipelineError::QueueFull { .. })));
    }

    #[tokio::test]
    async fn processes_batches_and_counts_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = EventPipeline::new(ArtifactStore::new(dir.path()).unwrap(), config(16));
        pipeline.start_consumers(2).await;

        pipeline.add_events(volcano_batch("eonet"), true, None).await.unwrap();
        pipeline
            .add_events(FetchBatch::new("empty", SourceKind::Storm, vec![]), true, None)
            .await
            .unwrap();

        assert!(pipeline.wait_for_completion(Duration::from_secs(5)).await);
        let stats = pipeline.get_statistics().await;
        assert_eq!(stats.processed_count, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.output_queue_depth, 2);

        let results = pipeline.get_results(Duration::ZERO).await;
        assert_eq!(results.len(), 2);
        let failed = results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.error.as_deref(), Some("No storm events"));
        assert!(dir.path().join("volcanoes.json").exists());

        pipeline.stop_consumers().await;
        assert!(!pipeline.get_statistics().await.running);
    }

    #[tokio::test]
    async fn wait_for_completion_times_out_without_consumers() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = EventPipeline::new(ArtifactStore::new(dir.path()).unwrap(), config(4));
        pipeline.add_events(volcano_batch("x"), false, None).await.unwrap();
        assert!(!pipeline.wait_for_completion(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn restart_ignores_stale_shutdown_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = EventPipeline::new(ArtifactStore::new(dir.path()).unwrap(), config(8));

        pipeline.start_consumers(3).await;
        pipeline.stop_consumers().await;
        pipeline.stop_consumers().await;

        pipeline.start_consumers(1).await;
        pipeline.add_events(volcano_batch("again"), true, None).await.unwrap();
        assert!(pipeline.wait_for_completion(Duration::from_secs(5)).await);
        assert_eq!(pipeline.get_statistics().await.processed_count, 1);
        pipeline.stop_consumers().await;
    }
}
