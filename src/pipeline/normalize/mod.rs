//! Kind-specific normalizers.
//!
//! Every [`SourceKind`] maps to exactly one [`Normalizer`] through an
//! exhaustive match, so adding a kind without a normalizer fails to compile.

pub mod earthquake;
pub mod flood;
pub mod located;
pub mod natural_event;
pub mod passthrough;
pub mod weather;

pub use earthquake::{EarthquakeNormalizer, EarthquakeRecord};
pub use flood::{FloodDocument, FloodNormalizer};
pub use located::CityTaggedNormalizer;
pub use natural_event::NaturalEventNormalizer;
pub use passthrough::PassthroughNormalizer;
pub use weather::WeatherNormalizer;

use super::PipelineContext;
use crate::constants::{GENERIC_ARTIFACT, NEWS_ARTIFACT, STORM_ARTIFACT, VOLCANO_ARTIFACT, WILDFIRE_ARTIFACT};
use crate::error::Result;
use crate::types::{Event, FetchBatch, ProcessingOutcome, SourceKind};
use serde_json::{Map, Value};

/// Validates, cleans and persists one batch.
#[async_trait::async_trait]
pub trait Normalizer: Send + Sync {
    /// Artifact file this normalizer writes
    fn artifact(&self) -> &'static str;

    async fn normalize(&self, batch: &FetchBatch, ctx: &PipelineContext) -> Result<ProcessingOutcome>;
}

pub fn normalizer_for(kind: SourceKind) -> &'static dyn Normalizer {
    match kind {
        SourceKind::Earthquake => &EarthquakeNormalizer,
        SourceKind::Weather => &WeatherNormalizer,
        SourceKind::NaturalEvent => &NaturalEventNormalizer,
        SourceKind::Wildfire => &CityTaggedNormalizer {
            artifact: WILDFIRE_ARTIFACT,
            label: "wildfire",
        },
        SourceKind::Storm => &CityTaggedNormalizer {
            artifact: STORM_ARTIFACT,
            label: "storm",
        },
        SourceKind::Volcano => &PassthroughNormalizer {
            artifact: VOLCANO_ARTIFACT,
            label: "volcano",
        },
        SourceKind::Flood => &FloodNormalizer,
        SourceKind::News => &PassthroughNormalizer {
            artifact: NEWS_ARTIFACT,
            label: "news",
        },
        SourceKind::Generic => &PassthroughNormalizer {
            artifact: GENERIC_ARTIFACT,
            label: "generic",
        },
    }
}

/// Accept JSON numbers and numeric strings; reject NaN and infinities.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Flat artifact record with the timestamp rendered as ISO-8601.
pub fn normalized_record(event: &Event) -> Map<String, Value> {
    let mut record = event.to_record();
    if let Some(iso) = event.time.as_ref().and_then(|t| t.to_iso()) {
        record.insert("time".to_string(), Value::String(iso));
    }
    record
}

pub(crate) fn empty_batch(batch: &FetchBatch, label: &str) -> ProcessingOutcome {
    ProcessingOutcome::failure(batch.source_name.clone(), format!("No {label} events"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, EventTime};
    use serde_json::json;

    #[test]
    fn coerces_numbers_and_numeric_strings() {
        assert_eq!(coerce_f64(&json!(6.1)), Some(6.1));
        assert_eq!(coerce_f64(&json!(" 6.1 ")), Some(6.1));
        assert_eq!(coerce_f64(&json!("bad")), None);
        assert_eq!(coerce_f64(&json!("NaN")), None);
        assert_eq!(coerce_f64(&json!(null)), None);
    }

    #[test]
    fn every_kind_has_a_distinct_artifact() {
        let kinds = [
            SourceKind::Earthquake,
            SourceKind::Weather,
            SourceKind::NaturalEvent,
            SourceKind::Wildfire,
            SourceKind::Storm,
            SourceKind::Volcano,
            SourceKind::Flood,
            SourceKind::News,
            SourceKind::Generic,
        ];
        let mut names: Vec<_> = kinds.iter().map(|k| normalizer_for(*k).artifact()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), kinds.len());
    }

    #[test]
    fn normalized_record_renders_epoch_time() {
        let ev = Event::new(EventKind::Volcano, "eonet").at(EventTime::EpochMillis(0));
        let rec = normalized_record(&ev);
        assert_eq!(rec["time"], "1970-01-01T00:00:00+00:00");
        assert_eq!(rec["type"], "volcano");
    }
}
