use super::{empty_batch, normalized_record, Normalizer};
use crate::error::Result;
use crate::pipeline::PipelineContext;
use crate::types::{FetchBatch, ProcessingOutcome};
use tracing::info;

/// Stores the batch as-is apart from timestamp rendering.
pub struct PassthroughNormalizer {
    pub artifact: &'static str,
    pub label: &'static str,
}

#[async_trait::async_trait]
impl Normalizer for PassthroughNormalizer {
    fn artifact(&self) -> &'static str {
        self.artifact
    }

    async fn normalize(&self, batch: &FetchBatch, ctx: &PipelineContext) -> Result<ProcessingOutcome> {
        if batch.events.is_empty() {
            return Ok(empty_batch(batch, self.label));
        }

        let records: Vec<_> = batch.events.iter().map(normalized_record).collect();
        ctx.store.write_json(self.artifact, &records)?;
        info!("Saved {} {} events from {}", records.len(), self.label, batch.source_name);

        Ok(ProcessingOutcome::success(batch.source_name.clone(), records.len(), self.artifact))
    }
}
