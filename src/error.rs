use thiserror::Error;

/// Failure fetching or parsing one feed; isolated to that source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected payload: {0}")]
    Parse(String),

    #[error("fetch cancelled")]
    Cancelled,
}

/// A single malformed event rejected by a normalizer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("processing queue is full, batch from {source_name} dropped")]
    QueueFull { source_name: String },

    #[error("processing queue is closed")]
    QueueClosed,

    #[error("worker failed while processing {source_name}: {message}")]
    Worker { source_name: String, message: String },

    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("no data sources configured")]
    NoSources,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;
pub type Result<T> = std::result::Result<T, PipelineError>;
