use std::time::Duration;

use forge_harness::{HarnessError, ProviderId, RunFailure};

/// Configuration could not be loaded or failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("backend setup failed: {0}")]
    Backend(#[from] HarnessError),
}

/// Failure to obtain a stream for a model id.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("no route matches model {model_id}")]
    NoRule { model_id: String },
    #[error("route for {model_id} names backend {backend}, which is not registered")]
    BackendNotRegistered {
        model_id: String,
        backend: ProviderId,
    },
    #[error("backend {backend} still failing after {attempts} attempts: {source}")]
    Exhausted {
        backend: ProviderId,
        attempts: u32,
        #[source]
        source: HarnessError,
    },
    #[error("backend {backend} failed: {source}")]
    Fatal {
        backend: ProviderId,
        #[source]
        source: HarnessError,
    },
    /// A retry or fallback event could not be delivered.
    #[error("event receiver dropped")]
    OutputClosed,
}

/// Terminal failure of a generation run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Backend(RouteError),
    #[error("backend {backend} stream failed: {failure}")]
    Stream {
        backend: ProviderId,
        failure: RunFailure,
    },
    #[error("run exceeded its {}ms budget", .budget.as_millis())]
    RunTimeout { budget: Duration },
    #[error("event receiver dropped")]
    OutputClosed,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<RouteError> for PipelineError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::OutputClosed => PipelineError::OutputClosed,
            other => PipelineError::Backend(other),
        }
    }
}
