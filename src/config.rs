use crate::constants::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, OPEN_METEO_FLOOD_URL, USGS_SUMMARY_URL};
use crate::error::ConfigError;
use crate::types::{SourceKind, TierTimeouts, TimeoutTier};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub pipeline: PipelineConfig,
    pub sources: SourcesConfig,
    pub tiers: TierConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    #[serde(rename = "source")]
    pub source_specs: Vec<SourceSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub fetch_interval_secs: u64,
    pub num_consumers: usize,
    pub error_backoff_secs: u64,
    pub completion_timeout_secs: u64,
    pub status_every_cycles: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fetch_interval_secs: 120,
            num_consumers: 5,
            error_backoff_secs: 5,
            completion_timeout_secs: 60,
            status_every_cycles: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            poll_interval_ms: 1000,
            shutdown_timeout_secs: 5,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub result_queue_capacity: usize,
    pub get_events_wait_ms: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            result_queue_capacity: 256,
            get_events_wait_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub slow_secs: u64,
    pub medium_secs: u64,
    pub fast_secs: u64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            slow_secs: 20,
            medium_secs: 15,
            fast_secs: 10,
        }
    }
}

impl TierConfig {
    pub fn timeouts(&self) -> TierTimeouts {
        TierTimeouts {
            slow: Duration::from_secs(self.slow_secs),
            medium: Duration::from_secs(self.medium_secs),
            fast: Duration::from_secs(self.fast_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file: "app.log".to_string(),
        }
    }
}

/// One `[[source]]` entry. The tier is mandatory so a new source never
/// silently inherits a budget.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub kind: SourceKind,
    pub tier: TimeoutTier,
    #[serde(flatten)]
    pub driver: DriverSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DriverSpec {
    Usgs {
        #[serde(default = "default_usgs_url")]
        url: String,
        /// `[min_lon, min_lat, max_lon, max_lat]`
        #[serde(default)]
        bbox: Option<[f64; 4]>,
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
    },
    OpenMeteoFlood {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        location_name: Option<String>,
        #[serde(default = "default_past_days")]
        past_days: u32,
        #[serde(default = "default_forecast_days")]
        forecast_days: u32,
        #[serde(default = "default_open_meteo_url")]
        url: String,
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
    },
    File {
        path: PathBuf,
    },
}

fn default_usgs_url() -> String {
    USGS_SUMMARY_URL.to_string()
}

fn default_open_meteo_url() -> String {
    OPEN_METEO_FLOOD_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_past_days() -> u32 {
    3
}

fn default_forecast_days() -> u32 {
    7
}

impl Config {
    /// Load configuration from an explicit path, `$HAZARD_CONFIG`, or `config.toml`.
    ///
    /// A missing default file yields the built-in defaults; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let config = match explicit {
            Some(p) => Self::from_file(&p)?,
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_PATH);
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    warn!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.num_consumers == 0 {
            return Err(ConfigError::Invalid("runtime.num_consumers must be at least 1".into()));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Invalid("pipeline.queue_capacity must be at least 1".into()));
        }
        if self.sources.result_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "sources.result_queue_capacity must be at least 1".into(),
            ));
        }
        if self.tiers.slow_secs == 0 || self.tiers.medium_secs == 0 || self.tiers.fast_secs == 0 {
            return Err(ConfigError::Invalid("tier timeouts must be non-zero".into()));
        }

        let mut seen = HashSet::new();
        for spec in &self.source_specs {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::Invalid("source name must not be empty".into()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate source name '{}'", spec.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [runtime]
        fetch_interval_secs = 30
        num_consumers = 3

        [tiers]
        slow_secs = 25

        [[source]]
        name = "usgs_americas"
        kind = "earthquake"
        tier = "fast"
        driver = "usgs"
        bbox = [-180.0, -60.0, -30.0, 85.0]

        [[source]]
        name = "flood_houston"
        kind = "flood"
        tier = "slow"
        driver = "open_meteo_flood"
        latitude = 29.7604
        longitude = -95.3698
        location_name = "Houston"

        [[source]]
        name = "fixture_weather"
        kind = "weather"
        tier = "medium"
        driver = "file"
        path = "fixtures/weather.json"
    "#;

    #[test]
    fn parses_sections_and_sources() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.runtime.fetch_interval_secs, 30);
        assert_eq!(cfg.runtime.num_consumers, 3);
        assert_eq!(cfg.runtime.error_backoff_secs, 5);
        assert_eq!(cfg.pipeline.queue_capacity, 100);
        assert_eq!(cfg.tiers.timeouts().slow, Duration::from_secs(25));
        assert_eq!(cfg.tiers.timeouts().fast, Duration::from_secs(10));
        assert_eq!(cfg.source_specs.len(), 3);

        let usgs = &cfg.source_specs[0];
        assert_eq!(usgs.kind, SourceKind::Earthquake);
        assert_eq!(usgs.tier, TimeoutTier::Fast);
        match &usgs.driver {
            DriverSpec::Usgs { url, bbox, .. } => {
                assert_eq!(url, USGS_SUMMARY_URL);
                assert_eq!(bbox.unwrap()[0], -180.0);
            }
            other => panic!("unexpected driver {other:?}"),
        }

        match &cfg.source_specs[1].driver {
            DriverSpec::OpenMeteoFlood { past_days, forecast_days, location_name, .. } => {
                assert_eq!(*past_days, 3);
                assert_eq!(*forecast_days, 7);
                assert_eq!(location_name.as_deref(), Some("Houston"));
            }
            other => panic!("unexpected driver {other:?}"),
        }
    }

    #[test]
    fn source_without_tier_is_rejected() {
        let toml = r#"
            [[source]]
            name = "x"
            kind = "generic"
            driver = "file"
            path = "x.json"
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn duplicate_names_fail_validation() {
        let toml = r#"
            [[source]]
            name = "dup"
            kind = "generic"
            tier = "fast"
            driver = "file"
            path = "a.json"

            [[source]]
            name = "dup"
            kind = "generic"
            tier = "fast"
            driver = "file"
            path = "b.json"
        "#;
        let cfg = Config::from_toml_str(toml).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_consumers_fail_validation() {
        let cfg = Config::from_toml_str("[runtime]\nnum_consumers = 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
