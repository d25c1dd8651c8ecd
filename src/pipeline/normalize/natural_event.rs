use super::{empty_batch, normalized_record, Normalizer};
use crate::constants::NATURAL_EVENT_ARTIFACT;
use crate::error::Result;
use crate::pipeline::PipelineContext;
use crate::types::{Event, FetchBatch, OutcomeDetail, ProcessingOutcome};
use serde_json::Value;
use tracing::{debug, info};

/// Drops sea/lake ice and iceberg tracking, which is not a land hazard.
pub struct NaturalEventNormalizer;

fn category_titles(event: &Event) -> Vec<String> {
    let Some(Value::Array(categories)) = event.get("categories") else {
        return Vec::new();
    };
    categories
        .iter()
        .filter_map(|c| match c {
            Value::String(s) => Some(s.to_lowercase()),
            Value::Object(o) => o.get("title").and_then(Value::as_str).map(str::to_lowercase),
            _ => None,
        })
        .collect()
}

pub fn is_ice_event(event: &Event) -> bool {
    category_titles(event).iter().any(|title| {
        title.contains("sea and lake ice")
            || title
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| matches!(word, "ice" | "iceberg" | "icebergs"))
    })
}

#[async_trait::async_trait]
impl Normalizer for NaturalEventNormalizer {
    fn artifact(&self) -> &'static str {
        NATURAL_EVENT_ARTIFACT
    }

    async fn normalize(&self, batch: &FetchBatch, ctx: &PipelineContext) -> Result<ProcessingOutcome> {
        if batch.events.is_empty() {
            return Ok(empty_batch(batch, "natural"));
        }

        let kept: Vec<_> = batch
            .events
            .iter()
            .filter(|e| !is_ice_event(e))
            .map(normalized_record)
            .collect();
        let dropped = batch.events.len() - kept.len();
        debug!("Filtered {} ice events from {}", dropped, batch.source_name);

        if kept.is_empty() {
            return Ok(ProcessingOutcome::failure(
                batch.source_name.clone(),
                "No valid events after filtering",
            ));
        }

        ctx.store.write_json(self.artifact(), &kept)?;
        info!("Saved {} natural events from {}", kept.len(), batch.source_name);

        Ok(ProcessingOutcome::success(batch.source_name.clone(), kept.len(), self.artifact())
            .with_detail(OutcomeDetail::Filtered { dropped }))
    }
}
