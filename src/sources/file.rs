use super::{DataSource, RawPayload, SourceIdentity};
use crate::error::{SourceError, SourceResult};
use crate::types::{Event, SourceKind, TimeoutTier};
use serde_json::Value;
use std::path::PathBuf;

/// Reads a JSON array of event objects from disk. Used for fixtures and
/// offline runs; each element must carry `type` and may omit `source`.
pub struct FileSource {
    id: SourceIdentity,
    path: PathBuf,
}

impl FileSource {
    pub fn new(id: SourceIdentity, path: PathBuf) -> Self {
        Self { id, path }
    }
}

#[async_trait::async_trait]
impl DataSource for FileSource {
    fn name(&self) -> &str {
        &self.id.name
    }

    fn kind(&self) -> SourceKind {
        self.id.kind
    }

    fn tier(&self) -> TimeoutTier {
        self.id.tier
    }

    async fn fetch_raw(&self) -> SourceResult<RawPayload> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    fn parse(&self, raw: RawPayload) -> SourceResult<Vec<Event>> {
        let items = match raw {
            Value::Array(items) => items,
            _ => return Err(SourceError::Parse(format!("{} is not a JSON array", self.path.display()))),
        };

        items
            .into_iter()
            .map(|mut item| -> SourceResult<Event> {
                if let Value::Object(map) = &mut item {
                    map.entry("source")
                        .or_insert_with(|| Value::String(self.id.name.clone()));
                }
                Ok(serde_json::from_value(item)?)
            })
            .collect()
    }
}
