use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Discriminator carried by every normalized observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Earthquake,
    Weather,
    WeatherForecast,
    NaturalEvent,
    Wildfire,
    Storm,
    Volcano,
    FloodRisk,
    NewsRisk,
    Generic,
}

/// Declared kind of a source; selects the normalizer its batches are routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Earthquake,
    Weather,
    NaturalEvent,
    Wildfire,
    Storm,
    Volcano,
    Flood,
    News,
    Generic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Earthquake => "earthquake",
            SourceKind::Weather => "weather",
            SourceKind::NaturalEvent => "natural_event",
            SourceKind::Wildfire => "wildfire",
            SourceKind::Storm => "storm",
            SourceKind::Volcano => "volcano",
            SourceKind::Flood => "flood",
            SourceKind::News => "news",
            SourceKind::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join budget class of a source during fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutTier {
    Slow,
    Medium,
    Fast,
}

impl fmt::Display for TimeoutTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeoutTier::Slow => "slow",
            TimeoutTier::Medium => "medium",
            TimeoutTier::Fast => "fast",
        };
        f.write_str(s)
    }
}

/// Concrete durations behind each [`TimeoutTier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTimeouts {
    pub slow: Duration,
    pub medium: Duration,
    pub fast: Duration,
}

impl Default for TierTimeouts {
    fn default() -> Self {
        Self {
            slow: Duration::from_secs(20),
            medium: Duration::from_secs(15),
            fast: Duration::from_secs(10),
        }
    }
}

impl TierTimeouts {
    pub fn for_tier(&self, tier: TimeoutTier) -> Duration {
        match tier {
            TimeoutTier::Slow => self.slow,
            TimeoutTier::Medium => self.medium,
            TimeoutTier::Fast => self.fast,
        }
    }

    pub fn longest(&self) -> Duration {
        self.slow.max(self.medium).max(self.fast)
    }
}

/// Feed timestamps arrive either as epoch milliseconds or as text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    EpochMillis(i64),
    Text(String),
}

impl EventTime {
    /// Render as an ISO-8601 string; epoch values are interpreted as UTC milliseconds.
    pub fn to_iso(&self) -> Option<String> {
        match self {
            EventTime::EpochMillis(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .map(|dt| dt.to_rfc3339()),
            EventTime::Text(s) if s.trim().is_empty() => None,
            EventTime::Text(s) => Some(s.trim().to_string()),
        }
    }
}

/// One observation produced by a source's parse step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "source")]
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<EventTime>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind, source_name: impl Into<String>) -> Self {
        Self {
            kind,
            source_name: source_name.into(),
            time: None,
            payload: Map::new(),
        }
    }

    pub fn at(mut self, time: EventTime) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Serialize into the flat JSON object shape written to artifacts.
    pub fn to_record(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => self.payload.clone(),
        }
    }
}

/// Unit handed from the source manager to the event pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchBatch {
    pub source_name: String,
    pub source_kind: SourceKind,
    pub events: Vec<Event>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchBatch {
    pub fn new(source_name: impl Into<String>, source_kind: SourceKind, events: Vec<Event>) -> Self {
        Self {
            source_name: source_name.into(),
            source_kind,
            events,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeStats {
    pub total_events: usize,
    pub max_magnitude: f64,
    pub min_magnitude: f64,
    pub avg_magnitude: f64,
}

/// Kind-specific summary attached to a successful outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum OutcomeDetail {
    Magnitude(MagnitudeStats),
    Filtered { dropped: usize },
    MergedLocations { total_locations: usize },
    HighRisk { high_risk_count: usize },
}

/// Result of routing one batch through its normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub source_name: String,
    pub success: bool,
    pub event_count: usize,
    pub error: Option<String>,
    pub artifact_ref: Option<String>,
    pub detail: Option<OutcomeDetail>,
}

impl ProcessingOutcome {
    pub fn success(source_name: impl Into<String>, event_count: usize, artifact_ref: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            success: true,
            event_count,
            error: None,
            artifact_ref: Some(artifact_ref.into()),
            detail: None,
        }
    }

    pub fn failure(source_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            success: false,
            event_count: 0,
            error: Some(error.into()),
            artifact_ref: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: OutcomeDetail) -> Self {
        self.detail = Some(detail);
        self
    }
}
