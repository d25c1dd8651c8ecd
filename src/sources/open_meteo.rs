use super::{DataSource, RawPayload, SourceIdentity};
use crate::constants::{FLOOD_HIGH_DISCHARGE, FLOOD_MEDIUM_DISCHARGE};
use crate::error::{SourceError, SourceResult};
use crate::types::{Event, EventKind, EventTime, SourceKind, TimeoutTier};
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct FloodPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: Option<String>,
    pub past_days: u32,
    pub forecast_days: u32,
}

/// Daily river-discharge forecast for a single point
pub struct OpenMeteoFloodSource {
    id: SourceIdentity,
    client: reqwest::Client,
    point: FloodPoint,
    url: String,
    request_timeout: Duration,
}

/// Coarse discharge banding; not a hydrological forecast.
pub fn classify_discharge(discharge: Option<f64>) -> &'static str {
    match discharge {
        None => "unknown",
        Some(d) if d < FLOOD_MEDIUM_DISCHARGE => "low",
        Some(d) if d < FLOOD_HIGH_DISCHARGE => "medium",
        Some(_) => "high",
    }
}

impl OpenMeteoFloodSource {
    pub fn new(
        id: SourceIdentity,
        client: reqwest::Client,
        point: FloodPoint,
        url: String,
        request_timeout: Duration,
    ) -> Self {
        Self {
            id,
            client,
            point,
            url,
            request_timeout,
        }
    }

    fn location_label(&self) -> String {
        self.point
            .location_name
            .clone()
            .unwrap_or_else(|| format!("{:.3},{:.3}", self.point.latitude, self.point.longitude))
    }
}

#[async_trait::async_trait]
impl DataSource for OpenMeteoFloodSource {
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
        let query = [
            ("latitude", self.point.latitude.to_string()),
            ("longitude", self.point.longitude.to_string()),
            ("daily", "river_discharge".to_string()),
            ("past_days", self.point.past_days.to_string()),
            ("forecast_days", self.point.forecast_days.to_string()),
        ];
        let resp = self
            .client
            .get(&self.url)
            .query(&query)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<Value>().await?)
    }

    fn parse(&self, raw: RawPayload) -> SourceResult<Vec<Event>> {
        let daily = raw
            .get("daily")
            .ok_or_else(|| SourceError::Parse("flood body has no daily block".into()))?;
        let times = daily.get("time").and_then(Value::as_array).cloned().unwrap_or_default();
        let discharges = daily
            .get("river_discharge")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let location = self.location_label();
        let latitude = raw.get("latitude").cloned().unwrap_or(Value::from(self.point.latitude));
        let longitude = raw.get("longitude").cloned().unwrap_or(Value::from(self.point.longitude));

        let events = times
            .iter()
            .zip(discharges.iter())
            .map(|(t, d)| {
                let discharge = d.as_f64();
                let mut ev = Event::new(EventKind::FloodRisk, self.id.name.clone())
                    .with("location", location.clone())
                    .with("latitude", latitude.clone())
                    .with("longitude", longitude.clone())
                    .with("river_discharge", discharge)
                    .with("risk_level", classify_discharge(discharge));
                if let Some(day) = t.as_str() {
                    ev = ev.at(EventTime::Text(day.to_string()));
                }
                ev
            })
            .collect();

        Ok(events)
    }
}
