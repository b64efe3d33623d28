use std::time::Duration;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for the Anthropic Messages API client.
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    /// Value of the `x-api-key` header.
    pub api_key: String,
    /// Endpoint root including the version segment.
    pub base_url: String,
    /// Value of the `anthropic-version` header.
    pub api_version: String,
    pub timeout: Duration,
    /// Sent when the run does not set `max_output_tokens`; the API requires one.
    pub default_max_tokens: u32,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            api_version: ANTHROPIC_VERSION.to_string(),
            timeout: Duration::from_secs(120),
            default_max_tokens: 8000,
        }
    }

    /// Overrides the API base URL (for gateways or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }
}
