use super::{empty_batch, normalized_record, Normalizer};
use crate::constants::FLOOD_ARTIFACT;
use crate::error::Result;
use crate::pipeline::PipelineContext;
use crate::types::{FetchBatch, OutcomeDetail, ProcessingOutcome};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

/// Shape of `flood_risk.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodDocument {
    pub generated_at: String,
    pub total_events: usize,
    pub total_high_risk_events: usize,
    pub events: Vec<Map<String, Value>>,
    pub high_risk_events: Vec<Map<String, Value>>,
}

impl FloodDocument {
    pub fn from_records(events: Vec<Map<String, Value>>) -> Self {
        let high_risk_events: Vec<_> = events
            .iter()
            .filter(|r| r.get("risk_level").and_then(Value::as_str) == Some("high"))
            .cloned()
            .collect();
        Self {
            generated_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            total_events: events.len(),
            total_high_risk_events: high_risk_events.len(),
            events,
            high_risk_events,
        }
    }
}

pub struct FloodNormalizer;

#[async_trait::async_trait]
impl Normalizer for FloodNormalizer {
    fn artifact(&self) -> &'static str {
        FLOOD_ARTIFACT
    }

    async fn normalize(&self, batch: &FetchBatch, ctx: &PipelineContext) -> Result<ProcessingOutcome> {
        if batch.events.is_empty() {
            return Ok(empty_batch(batch, "flood"));
        }

        let doc = FloodDocument::from_records(batch.events.iter().map(normalized_record).collect());
        ctx.store.write_json(self.artifact(), &doc)?;
        info!(
            "Saved {} flood events from {} ({} high risk)",
            doc.total_events, batch.source_name, doc.total_high_risk_events
        );

        Ok(ProcessingOutcome::success(batch.source_name.clone(), doc.total_events, self.artifact())
            .with_detail(OutcomeDetail::HighRisk {
                high_risk_count: doc.total_high_risk_events,
            }))
    }
}
