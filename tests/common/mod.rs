#![allow(dead_code)]

use hazard_ingest::config::Config;
use hazard_ingest::error::{SourceError, SourceResult};
use hazard_ingest::sources::{DataSource, RawPayload};
use hazard_ingest::types::{Event, EventKind, EventTime, SourceKind, TimeoutTier};
use serde_json::json;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory source with a configurable delay and failure mode.
pub struct FakeSource {
    pub name: String,
    pub kind: SourceKind,
    pub tier: TimeoutTier,
    pub delay: Duration,
    pub fail: bool,
    pub events: Vec<Event>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn healthy(name: &str, kind: SourceKind, events: Vec<Event>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            tier: TimeoutTier::Fast,
            delay: Duration::ZERO,
            fail: false,
            events,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::healthy(name, SourceKind::Generic, vec![])
        }
    }

    pub fn hanging(name: &str, tier: TimeoutTier) -> Self {
        Self {
            tier,
            delay: Duration::from_secs(30),
            ..Self::healthy(name, SourceKind::Generic, vec![generic_event(name)])
        }
    }

    pub fn shared(self) -> Arc<dyn DataSource> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl DataSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn tier(&self) -> TimeoutTier {
        self.tier
    }

    async fn fetch_raw(&self) -> SourceResult<RawPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(SourceError::Parse(format!("{} is down", self.name)));
        }
        Ok(serde_json::to_value(&self.events)?)
    }

    fn parse(&self, raw: RawPayload) -> SourceResult<Vec<Event>> {
        Ok(serde_json::from_value(raw)?)
    }
}

pub fn generic_event(source: &str) -> Event {
    Event::new(EventKind::Generic, source).with("title", "test")
}

pub fn quake(source: &str, magnitude: serde_json::Value, location: &str) -> Event {
    Event::new(EventKind::Earthquake, source)
        .with("magnitude", magnitude)
        .with("location", location)
        .at(EventTime::EpochMillis(1_719_792_000_000))
}

pub fn current_weather(source: &str, city: &str, temp: f64) -> Event {
    Event::new(EventKind::Weather, source)
        .with("location", city)
        .with("temperature", json!(temp))
}

/// Config with short timings and artifacts under `data_dir`.
pub fn fast_config(data_dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.storage.data_dir = data_dir.to_path_buf();
    cfg.runtime.num_consumers = 3;
    cfg.runtime.completion_timeout_secs = 10;
    cfg.runtime.fetch_interval_secs = 1;
    cfg.pipeline.poll_interval_ms = 50;
    cfg.pipeline.shutdown_timeout_secs = 2;
    cfg.sources.get_events_wait_ms = 0;
    cfg.tiers.slow_secs = 2;
    cfg.tiers.medium_secs = 1;
    cfg.tiers.fast_secs = 1;
    cfg
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collects formatted log lines emitted on the current thread while the
/// returned guard is alive. Pair with the current-thread test runtime.
pub struct LogCapture {
    buf: SharedBuf,
}

impl LogCapture {
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (Self { buf }, guard)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.buf.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn count_matching(&self, level: &str, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|l| l.contains(level) && l.contains(needle))
            .count()
    }
}
