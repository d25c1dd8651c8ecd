use super::{DataSource, RawPayload, SourceIdentity};
use crate::error::{SourceError, SourceResult};
use crate::types::{Event, EventKind, EventTime, SourceKind, TimeoutTier};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// USGS GeoJSON summary feed
pub struct UsgsEarthquakeSource {
    id: SourceIdentity,
    client: reqwest::Client,
    url: String,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    bbox: Option<[f64; 4]>,
    request_timeout: Duration,
}

impl UsgsEarthquakeSource {
    pub fn new(
        id: SourceIdentity,
        client: reqwest::Client,
        url: String,
        bbox: Option<[f64; 4]>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            id,
            client,
            url,
            bbox,
            request_timeout,
        }
    }

    fn in_bbox(&self, lon: f64, lat: f64) -> bool {
        match self.bbox {
            Some([min_lon, min_lat, max_lon, max_lat]) => {
                (min_lat..=max_lat).contains(&lat) && (min_lon..=max_lon).contains(&lon)
            }
            None => true,
        }
    }
}

#[async_trait::async_trait]
impl DataSource for UsgsEarthquakeSource {
    fn name(&self) -> &str {
        &self.id.name
    }

    fn kind(&self) -> SourceKind {
        self.id.kind
    }

    fn tier(&self) -> TimeoutTier {
        self.id.tier
    }

    #[instrument(skip(self), fields(source = %self.id.name))]
    async fn fetch_raw(&self) -> SourceResult<RawPayload> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<Value>().await?)
    }

    fn parse(&self, raw: RawPayload) -> SourceResult<Vec<Event>> {
        let features = raw
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::Parse("GeoJSON body has no features array".into()))?;

        let mut events = Vec::with_capacity(features.len());
        for feature in features {
            let props = feature.get("properties").cloned().unwrap_or(Value::Null);
            let coords = feature
                .get("geometry")
                .and_then(|g| g.get("coordinates"))
                .and_then(Value::as_array);

            let lon = coords.and_then(|c| c.first()).and_then(Value::as_f64);
            let lat = coords.and_then(|c| c.get(1)).and_then(Value::as_f64);

            if self.bbox.is_some() {
                match (lon, lat) {
                    (Some(lon), Some(lat)) if self.in_bbox(lon, lat) => {}
                    _ => continue,
                }
            }

            let mut ev = Event::new(EventKind::Earthquake, self.id.name.clone())
                .with("location", props.get("place").cloned().unwrap_or(Value::Null))
                .with("magnitude", props.get("mag").cloned().unwrap_or(Value::Null))
                .with("latitude", lat)
                .with("longitude", lon);
            if let Some(ms) = props.get("time").and_then(Value::as_i64) {
                ev = ev.at(EventTime::EpochMillis(ms));
            }
            events.push(ev);
        }

        debug!("Parsed {} earthquake features from {}", events.len(), self.id.name);
        Ok(events)
    }
}
