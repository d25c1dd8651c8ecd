pub mod file;
pub mod manager;
pub mod open_meteo;
pub mod usgs;

pub use manager::{SourceManager, SourceManagerStatus};

use crate::config::{DriverSpec, SourceSpec};
use crate::error::SourceResult;
use crate::types::{Event, SourceKind, TimeoutTier};
use std::sync::Arc;
use std::time::Duration;

/// Undecoded body returned by a feed
pub type RawPayload = serde_json::Value;

/// Core trait that every hazard feed adapter implements.
///
/// Implementations are built once from configuration and must not keep
/// mutable state between calls.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Unique name of this source, used in logs and outcomes
    fn name(&self) -> &str;

    /// Kind of events this source produces; selects the normalizer
    fn kind(&self) -> SourceKind;

    /// Join budget during fan-out
    fn tier(&self) -> TimeoutTier;

    /// Retrieve the raw body from the feed
    async fn fetch_raw(&self) -> SourceResult<RawPayload>;

    /// Turn the raw body into events, preserving feed order
    fn parse(&self, raw: RawPayload) -> SourceResult<Vec<Event>>;

    async fn fetch_and_parse(&self) -> SourceResult<Vec<Event>> {
        let raw = self.fetch_raw().await?;
        self.parse(raw)
    }
}

/// Identity shared by the bundled sources
#[derive(Debug, Clone)]
pub struct SourceIdentity {
    pub name: String,
    pub kind: SourceKind,
    pub tier: TimeoutTier,
}

impl From<&SourceSpec> for SourceIdentity {
    fn from(spec: &SourceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            kind: spec.kind,
            tier: spec.tier,
        }
    }
}

/// Build one source per `[[source]]` entry.
pub fn build_sources(specs: &[SourceSpec]) -> SourceResult<Vec<Arc<dyn DataSource>>> {
    let client = reqwest::Client::builder().user_agent("hazard_ingest/0.1").build()?;

    let sources = specs
        .iter()
        .map(|spec| -> Arc<dyn DataSource> {
            let id = SourceIdentity::from(spec);
            match &spec.driver {
                DriverSpec::Usgs { url, bbox, request_timeout_secs } => Arc::new(usgs::UsgsEarthquakeSource::new(
                    id,
                    client.clone(),
                    url.clone(),
                    *bbox,
                    Duration::from_secs(*request_timeout_secs),
                )),
                DriverSpec::OpenMeteoFlood {
                    latitude,
                    longitude,
                    location_name,
                    past_days,
                    forecast_days,
                    url,
                    request_timeout_secs,
                } => Arc::new(open_meteo::OpenMeteoFloodSource::new(
                    id,
                    client.clone(),
                    open_meteo::FloodPoint {
                        latitude: *latitude,
                        longitude: *longitude,
                        location_name: location_name.clone(),
                        past_days: *past_days,
                        forecast_days: *forecast_days,
                    },
                    url.clone(),
                    Duration::from_secs(*request_timeout_secs),
                )),
                DriverSpec::File { path } => Arc::new(file::FileSource::new(id, path.clone())),
            }
        })
        .collect();

    Ok(sources)
}
