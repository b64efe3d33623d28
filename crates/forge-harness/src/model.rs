use std::fmt;
use std::time::Duration;

/// Stable identifier for a registered backend (for example `qiniu` or `anthropic`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Creates a provider id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the provider id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Backend plus the backend-specific model name for a run.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelRef {
    /// Backend that serves the model.
    pub provider: ProviderId,
    /// Name the backend expects (for example `claude-sonnet-4-20250514`).
    pub model: String,
}

impl ModelRef {
    /// Creates a model reference.
    pub fn new(provider: impl Into<ProviderId>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Generic run behavior options.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunOptions {
    /// Optional per-call timeout applied to the backend request.
    pub timeout: Option<Duration>,
    /// Bounded event buffer size used by the streaming channel.
    pub stream_buffer_capacity: usize,
    /// Upper bound on generated tokens, when the backend accepts one.
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature. `None` leaves the backend default (reasoning models).
    pub temperature: Option<f32>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            stream_buffer_capacity: 128,
            max_output_tokens: None,
            temperature: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_options_default_buffer_capacity() {
        let options = RunOptions::default();
        assert_eq!(options.stream_buffer_capacity, 128);
        assert!(options.max_output_tokens.is_none());
    }

    #[test]
    fn model_ref_display_joins_provider_and_model() {
        assert_eq!(
            ModelRef::new("groq", "moonshotai/kimi-k2-instruct-0905").to_string(),
            "groq:moonshotai/kimi-k2-instruct-0905"
        );
    }
}
