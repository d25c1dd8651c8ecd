use super::{empty_batch, normalized_record, Normalizer};
use crate::constants::WEATHER_ARTIFACT;
use crate::error::Result;
use crate::pipeline::PipelineContext;
use crate::types::{FetchBatch, OutcomeDetail, ProcessingOutcome};
use serde_json::{Map, Value};
use metrics::counter;
use std::collections::BTreeMap;
use tracing::{info, warn};

type Record = Map<String, Value>;

/// Folds every weather batch into one shared `weather_all.json`.
///
/// Current conditions are keyed by location, so a newer observation for the
/// same city replaces the older one. Forecast entries accumulate, keyed by
/// `(location, time)` so re-fetching the same forecast window overwrites
/// instead of duplicating.
pub struct WeatherNormalizer;

fn is_forecast(record: &Record) -> bool {
    record.get("type").and_then(Value::as_str) == Some("weather_forecast")
}

fn location_of(record: &Record) -> Option<String> {
    record
        .get("location")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Forecasts always merge; current conditions need a location to key on.
pub fn is_mergeable(record: &Record) -> bool {
    is_forecast(record) || location_of(record).is_some()
}

fn forecast_key(record: &Record) -> (String, String) {
    let time = match record.get("time") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    (location_of(record).unwrap_or_default(), time)
}

/// Merge `incoming` over `existing`. Returns the merged document and the
/// number of distinct current-weather locations in it.
pub fn merge_weather(existing: Vec<Record>, incoming: Vec<Record>) -> (Vec<Record>, usize) {
    let mut current: BTreeMap<String, Record> = BTreeMap::new();
    let mut forecast_order: Vec<(String, String)> = Vec::new();
    let mut forecasts: BTreeMap<(String, String), Record> = BTreeMap::new();

    for record in existing.into_iter().chain(incoming) {
        if is_forecast(&record) {
            let key = forecast_key(&record);
            if forecasts.insert(key.clone(), record).is_none() {
                forecast_order.push(key);
            }
        } else if let Some(location) = location_of(&record) {
            current.insert(location, record);
        }
    }

    let locations = current.len();
    let mut merged: Vec<Record> = current.into_values().collect();
    merged.extend(forecast_order.iter().filter_map(|k| forecasts.remove(k)));
    (merged, locations)
}

#[async_trait::async_trait]
impl Normalizer for WeatherNormalizer {
    fn artifact(&self) -> &'static str {
        WEATHER_ARTIFACT
    }

    async fn normalize(&self, batch: &FetchBatch, ctx: &PipelineContext) -> Result<ProcessingOutcome> {
        if batch.events.is_empty() {
            return Ok(empty_batch(batch, "weather"));
        }

        let (incoming, discarded): (Vec<Record>, Vec<Record>) =
            batch.events.iter().map(normalized_record).partition(is_mergeable);
        if !discarded.is_empty() {
            warn!(
                "{} weather events from {} have no location, discarded",
                discarded.len(),
                batch.source_name
            );
            counter!("hazard_events_dropped_total", "source" => batch.source_name.clone())
                .increment(discarded.len() as u64);
        }
        if incoming.is_empty() {
            return Ok(ProcessingOutcome::failure(batch.source_name.clone(), "No valid events"));
        }
        let accepted = incoming.len();

        // Concurrent weather batches would otherwise lose each other's cities.
        let _guard = ctx.stats.lock().await;

        let existing = match ctx.store.read_json_async::<Vec<Record>>(self.artifact()).await {
            Ok(Some(records)) => records,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Existing {} unreadable, starting fresh: {}", self.artifact(), e);
                Vec::new()
            }
        };

        let (merged, locations) = merge_weather(existing, incoming);
        ctx.store.write_json_async(self.artifact(), &merged).await?;
        info!(
            "Merged {} weather events from {} ({} locations on file)",
            accepted,
            batch.source_name,
            locations
        );

        Ok(
            ProcessingOutcome::success(batch.source_name.clone(), accepted, self.artifact())
                .with_detail(OutcomeDetail::MergedLocations {
                    total_locations: locations,
                }),
        )
    }
}
