pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod runtime;
pub mod sources;
pub mod types;
