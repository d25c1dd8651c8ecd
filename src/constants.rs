/// Shared names and defaults used across the ingest pipeline

// Environment
pub const CONFIG_PATH_ENV: &str = "HAZARD_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

// Artifact file names (one per source kind, read by the dashboard)
pub const EARTHQUAKE_ARTIFACT: &str = "earthquakes.json";
pub const WEATHER_ARTIFACT: &str = "weather_all.json";
pub const NATURAL_EVENT_ARTIFACT: &str = "eonet_events.json";
pub const WILDFIRE_ARTIFACT: &str = "wildfires.json";
pub const STORM_ARTIFACT: &str = "storms.json";
pub const VOLCANO_ARTIFACT: &str = "volcanoes.json";
pub const FLOOD_ARTIFACT: &str = "flood_risk.json";
pub const NEWS_ARTIFACT: &str = "news_risk.json";
pub const GENERIC_ARTIFACT: &str = "generic_events.json";

// Feed endpoints for the bundled sources
pub const USGS_SUMMARY_URL: &str =
    "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/2.5_day.geojson";
pub const OPEN_METEO_FLOOD_URL: &str = "https://flood-api.open-meteo.com/v1/flood";

// Flood classification thresholds on river discharge (m^3/s)
pub const FLOOD_MEDIUM_DISCHARGE: f64 = 200.0;
pub const FLOOD_HIGH_DISCHARGE: f64 = 800.0;

// Maximum distance for assigning an event to a monitored city
pub const CITY_MATCH_THRESHOLD_KM: f64 = 1000.0;
