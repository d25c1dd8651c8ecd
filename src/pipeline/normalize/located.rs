use super::{coerce_f64, empty_batch, normalized_record, Normalizer};
use crate::error::Result;
use crate::pipeline::geo::nearest_city;
use crate::pipeline::PipelineContext;
use crate::types::{Event, FetchBatch, ProcessingOutcome};
use serde_json::{Map, Value};
use tracing::info;

/// Attributes each event to the nearest monitored city. Used for wildfires and storms.
pub struct CityTaggedNormalizer {
    pub artifact: &'static str,
    pub label: &'static str,
}

pub fn tag_city(event: &Event) -> Map<String, Value> {
    let mut record = normalized_record(event);
    let lat = event.get("latitude").and_then(coerce_f64);
    let lon = event.get("longitude").and_then(coerce_f64);
    let city = match (lat, lon) {
        (Some(lat), Some(lon)) => nearest_city(lat, lon).map(|c| Value::String(c.to_string())),
        _ => None,
    };
    record.insert("city".to_string(), city.unwrap_or(Value::Null));
    record
}

#[async_trait::async_trait]
impl Normalizer for CityTaggedNormalizer {
    fn artifact(&self) -> &'static str {
        self.artifact
    }

    async fn normalize(&self, batch: &FetchBatch, ctx: &PipelineContext) -> Result<ProcessingOutcome> {
        if batch.events.is_empty() {
            return Ok(empty_batch(batch, self.label));
        }

        let records: Vec<_> = batch.events.iter().map(tag_city).collect();
        let attributed = records.iter().filter(|r| !r["city"].is_null()).count();
        ctx.store.write_json(self.artifact, &records)?;
        info!(
            "Saved {} {} events from {} ({} near a monitored city)",
            records.len(),
            self.label,
            batch.source_name,
            attributed
        );

        Ok(ProcessingOutcome::success(batch.source_name.clone(), records.len(), self.artifact))
    }
}
