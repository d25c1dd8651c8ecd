use super::{coerce_f64, empty_batch, Normalizer};
use crate::constants::EARTHQUAKE_ARTIFACT;
use crate::error::{Result, ValidationError};
use crate::pipeline::PipelineContext;
use crate::types::{Event, EventTime, FetchBatch, MagnitudeStats, OutcomeDetail, ProcessingOutcome};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Cleaned earthquake as written to `earthquakes.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarthquakeRecord {
    pub id: usize,
    pub event_type: String,
    pub source: String,
    pub timestamp: String,
    pub magnitude: f64,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

pub struct EarthquakeNormalizer;

/// Validate one raw event. Time, magnitude and location are required.
pub fn clean_event(event: &Event) -> std::result::Result<EarthquakeRecord, ValidationError> {
    let location = event
        .get("location")
        .map(|v| match v {
            serde_json::Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingField("location"))?;

    let raw_mag = event.get("magnitude").ok_or(ValidationError::MissingField("magnitude"))?;
    let magnitude = coerce_f64(raw_mag).ok_or_else(|| ValidationError::InvalidField {
        field: "magnitude",
        value: raw_mag.to_string(),
    })?;

    let timestamp = event
        .time
        .clone()
        .or_else(|| event.get("timestamp").cloned().and_then(|v| serde_json::from_value(v).ok()))
        .and_then(|t: EventTime| t.to_iso())
        .ok_or(ValidationError::MissingField("time"))?;

    let coordinate = |field: &'static str| -> Option<f64> {
        let raw = event.get(field)?;
        let parsed = coerce_f64(raw);
        if parsed.is_none() {
            warn!("Invalid {} {} on event from {}, coordinate skipped", field, raw, event.source_name);
        }
        parsed
    };
    let latitude = coordinate("latitude");
    let longitude = coordinate("longitude");

    Ok(EarthquakeRecord {
        id: 0,
        event_type: "earthquake".to_string(),
        source: event.source_name.clone(),
        timestamp,
        magnitude,
        location,
        latitude,
        longitude,
    })
}

/// Clean a whole batch, numbering survivors from 1 in feed order.
pub fn clean_batch(batch: &FetchBatch) -> (Vec<EarthquakeRecord>, Vec<ValidationError>) {
    let mut cleaned = Vec::with_capacity(batch.events.len());
    let mut rejected = Vec::new();

    for event in &batch.events {
        match clean_event(event) {
            Ok(mut record) => {
                record.id = cleaned.len() + 1;
                cleaned.push(record);
            }
            Err(e) => rejected.push(e),
        }
    }
    (cleaned, rejected)
}

pub fn magnitude_stats(records: &[EarthquakeRecord]) -> Option<MagnitudeStats> {
    if records.is_empty() {
        return None;
    }
    let mags = records.iter().map(|r| r.magnitude);
    let max = mags.clone().fold(f64::MIN, f64::max);
    let min = mags.clone().fold(f64::MAX, f64::min);
    let avg = mags.sum::<f64>() / records.len() as f64;
    Some(MagnitudeStats {
        total_events: records.len(),
        max_magnitude: max,
        min_magnitude: min,
        avg_magnitude: (avg * 100.0).round() / 100.0,
    })
}

#[async_trait::async_trait]
impl Normalizer for EarthquakeNormalizer {
    fn artifact(&self) -> &'static str {
        EARTHQUAKE_ARTIFACT
    }

    async fn normalize(&self, batch: &FetchBatch, ctx: &PipelineContext) -> Result<ProcessingOutcome> {
        if batch.events.is_empty() {
            return Ok(empty_batch(batch, "earthquake"));
        }

        let (cleaned, rejected) = clean_batch(batch);
        for err in &rejected {
            warn!("Earthquake event from {} dropped: {}", batch.source_name, err);
        }
        if !rejected.is_empty() {
            counter!("hazard_events_dropped_total", "source" => batch.source_name.clone())
                .increment(rejected.len() as u64);
        }

        let Some(stats) = magnitude_stats(&cleaned) else {
            return Ok(ProcessingOutcome::failure(batch.source_name.clone(), "No valid events"));
        };

        ctx.store.write_json(self.artifact(), &cleaned)?;
        info!("Cleaned {} earthquake events from {}", cleaned.len(), batch.source_name);

        Ok(ProcessingOutcome::success(batch.source_name.clone(), cleaned.len(), self.artifact())
            .with_detail(OutcomeDetail::Magnitude(stats)))
    }
}
