use crate::config::{Config, RuntimeConfig};
use crate::error::{PipelineError, RuntimeError};
use crate::pipeline::{ArtifactStore, EventPipeline, PipelineStatistics};
use crate::sources::{DataSource, SourceManager, SourceManagerStatus};
use crate::types::{OutcomeDetail, ProcessingOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub state: RuntimeState,
    pub uptime_secs: u64,
    pub cycle_count: u64,
    pub sources: SourceManagerStatus,
    pub pipeline: PipelineStatistics,
}

/// Drives fetch → enqueue → process cycles, either once or on an interval.
pub struct Runtime {
    sources: SourceManager,
    pipeline: EventPipeline,
    settings: RuntimeConfig,
    events_wait: Duration,
    state: std::sync::Mutex<RuntimeState>,
    shutdown: std::sync::Mutex<CancellationToken>,
    stop_lock: tokio::sync::Mutex<()>,
    started_at: std::sync::Mutex<Option<Instant>>,
    cycle_count: AtomicU64,
}

fn banner(title: &str) {
    info!("{}", "=".repeat(60));
    info!("{}", title);
    info!("{}", "=".repeat(60));
}

impl Runtime {
    pub fn new(config: &Config, sources: Vec<Arc<dyn DataSource>>) -> Result<Self, RuntimeError> {
        let manager = SourceManager::new(sources, config.tiers.timeouts(), config.sources.result_queue_capacity);
        let store = ArtifactStore::new(&config.storage.data_dir)?;
        let pipeline = EventPipeline::new(store, config.pipeline.clone());
        let runtime = Self::from_parts(
            manager,
            pipeline,
            config.runtime.clone(),
            Duration::from_millis(config.sources.get_events_wait_ms),
        );
        info!("Runtime initialized");
        Ok(runtime)
    }

    pub fn from_parts(
        sources: SourceManager,
        pipeline: EventPipeline,
        settings: RuntimeConfig,
        events_wait: Duration,
    ) -> Self {
        Self {
            sources,
            pipeline,
            settings,
            events_wait,
            state: std::sync::Mutex::new(RuntimeState::Stopped),
            shutdown: std::sync::Mutex::new(CancellationToken::new()),
            stop_lock: tokio::sync::Mutex::new(()),
            started_at: std::sync::Mutex::new(None),
            cycle_count: AtomicU64::new(0),
        }
    }

    pub fn add_data_source(&self, source: Arc<dyn DataSource>) {
        self.sources.add_source(source);
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: RuntimeState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    pub fn pipeline(&self) -> &EventPipeline {
        &self.pipeline
    }

    /// Run until finished (single-run) or until [`Runtime::stop`] is called
    /// (continuous). Fails only when there is nothing to fetch from.
    pub async fn start(&self, continuous: bool) -> Result<(), RuntimeError> {
        let token = CancellationToken::new();
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != RuntimeState::Stopped {
                warn!("Runtime already running");
                return Ok(());
            }
            if self.sources.source_count() == 0 {
                error!("Cannot start runtime: no data sources configured");
                return Err(RuntimeError::NoSources);
            }
            // The token must be in place before anyone can observe Starting,
            // otherwise a concurrent stop() cancels the previous one.
            *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
            *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
            *state = RuntimeState::Starting;
        }

        banner("Hazard ingest runtime starting");
        self.pipeline.start_consumers(self.settings.num_consumers).await;

        let stopped_while_starting = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == RuntimeState::Starting {
                *state = RuntimeState::Running;
                false
            } else {
                true
            }
        };
        if stopped_while_starting {
            // stop() may have checked the pipeline before our consumers came up.
            let _serial = self.stop_lock.lock().await;
            if self.pipeline.is_running() {
                self.pipeline.stop_consumers().await;
            }
            info!("Runtime stopped during startup");
            return Ok(());
        }

        if continuous {
            self.run_continuous(&token).await;
        } else {
            tokio::select! {
                _ = token.cancelled() => info!("Single run interrupted"),
                _ = self.run_once() => {}
            }
        }

        self.stop().await;
        Ok(())
    }

    async fn run_once(&self) {
        info!("Running single fetch-process cycle");
        match self.fetch_and_enqueue(true).await {
            Ok(0) => info!("No events fetched this cycle"),
            Ok(queued) => {
                info!("Added {} event batches to pipeline", queued);
                let timeout = Duration::from_secs(self.settings.completion_timeout_secs);
                if !self.pipeline.wait_for_completion(timeout).await {
                    warn!(
                        "Pipeline did not drain within {}s, {} batches still pending",
                        timeout.as_secs(),
                        self.pipeline.pending()
                    );
                }
                display_results(&self.pipeline.get_results(Duration::ZERO).await);
            }
            Err(e) => error!("Error in fetch-process cycle: {}", e),
        }
        self.cycle_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn run_continuous(&self, token: &CancellationToken) {
        info!("Starting continuous operation mode");
        let interval = Duration::from_secs(self.settings.fetch_interval_secs);
        let backoff = Duration::from_secs(self.settings.error_backoff_secs);
        let every = self.settings.status_every_cycles.max(1);

        while !token.is_cancelled() {
            let cycle = self.cycle_count();
            match self.fetch_and_enqueue(false).await {
                Ok(queued) => {
                    if queued > 0 {
                        info!("Cycle {}: added {} event batches", cycle, queued);
                    }
                }
                Err(e) => {
                    error!("Error in main loop: {}", e);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => continue,
                    }
                }
            }

            let results = self.pipeline.get_results(Duration::ZERO).await;
            if !results.is_empty() {
                display_results(&results);
            }
            if cycle % every == 0 {
                self.display_status().await;
            }
            self.cycle_count.fetch_add(1, Ordering::SeqCst);

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One fan-out plus enqueue. Returns how many batches the pipeline accepted.
    /// A full queue only drops that batch; any other enqueue failure aborts the cycle.
    async fn fetch_and_enqueue(&self, blocking: bool) -> Result<usize, PipelineError> {
        self.sources.fetch_all().await;
        let batches = self.sources.get_events(self.events_wait).await;

        let mut accepted = 0;
        for batch in batches {
            match self.pipeline.add_events(batch, blocking, None).await {
                Ok(()) => accepted += 1,
                Err(PipelineError::QueueFull { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(accepted)
    }

    /// Idempotent. Cancels the cycle loop, stops the consumers and logs a
    /// final status snapshot.
    pub async fn stop(&self) {
        let _serial = self.stop_lock.lock().await;
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, RuntimeState::Stopped | RuntimeState::Stopping) {
                return;
            }
            *state = RuntimeState::Stopping;
        }

        info!("Stopping runtime...");
        self.shutdown.lock().unwrap_or_else(PoisonError::into_inner).cancel();
        if self.pipeline.is_running() {
            self.pipeline.stop_consumers().await;
        }
        self.display_status().await;
        banner("Hazard ingest runtime stopped");

        self.set_state(RuntimeState::Stopped);
    }

    pub async fn get_status(&self) -> RuntimeStatus {
        let uptime_secs = self
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        RuntimeStatus {
            state: self.state(),
            uptime_secs,
            cycle_count: self.cycle_count(),
            sources: self.sources.get_status(),
            pipeline: self.pipeline.get_statistics().await,
        }
    }

    async fn display_status(&self) {
        let status = self.get_status().await;
        banner("SYSTEM STATUS");
        info!("Uptime: {} seconds", status.uptime_secs);
        info!("Cycles completed: {}", status.cycle_count);
        info!("Data sources: {}", status.sources.source_count);
        info!(
            "Result queue: {}/{} ({} dropped)",
            status.sources.queue_depth, status.sources.queue_capacity, status.sources.dropped_batches
        );
        info!("Processed batches: {}", status.pipeline.processed_count);
        info!("Errors: {}", status.pipeline.error_count);
        info!("{}", "=".repeat(60));
    }
}

fn display_results(results: &[ProcessingOutcome]) {
    banner("PROCESSING RESULTS");
    for (i, result) in results.iter().enumerate() {
        let n = i + 1;
        if !result.success {
            error!(
                "Result #{} - {}: FAILED - {}",
                n,
                result.source_name,
                result.error.as_deref().unwrap_or("unknown error")
            );
            info!("{}", "-".repeat(60));
            continue;
        }

        info!("Result #{} - {}: SUCCESS", n, result.source_name);
        info!("  Events processed: {}", result.event_count);
        match &result.detail {
            Some(OutcomeDetail::Magnitude(stats)) => {
                info!("  Total events: {}", stats.total_events);
                info!("  Max magnitude: {:.2}", stats.max_magnitude);
                info!("  Avg magnitude: {:.2}", stats.avg_magnitude);
            }
            Some(OutcomeDetail::Filtered { dropped }) => info!("  Filtered out: {}", dropped),
            Some(OutcomeDetail::MergedLocations { total_locations }) => {
                info!("  Locations on file: {}", total_locations)
            }
            Some(OutcomeDetail::HighRisk { high_risk_count }) => info!("  High risk: {}", high_risk_count),
            None => {}
        }
        if let Some(artifact) = &result.artifact_ref {
            info!("  Saved to: {}", artifact);
        }
        info!("{}", "-".repeat(60));
    }
}
