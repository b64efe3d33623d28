use std::time::Duration;

use crate::ProviderId;

pub const QINIU_BASE_URL: &str = "https://api.qnaigc.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GOOGLE_OPENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const GEMINI_GCA_BASE_URL: &str = "https://cs.imds.ai/api/v1";
pub const AI_GATEWAY_BASE_URL: &str = "https://ai-gateway.vercel.sh/v1";

/// Configuration for one OpenAI-compatible chat completions backend.
///
/// The same adapter serves every compatible vendor; they differ only by id,
/// endpoint and key.
#[derive(Clone, Debug)]
pub struct OpenAiCompatConfig {
    /// Id the adapter registers under (for example `groq`).
    pub provider_id: ProviderId,
    /// API key used for bearer auth.
    pub api_key: String,
    /// Endpoint root including the version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Default HTTP timeout for requests.
    pub timeout: Duration,
    /// Folds the system prompt into the first user message for backends that
    /// reject `system` roles.
    pub merge_system_into_user: bool,
}

impl OpenAiCompatConfig {
    pub fn new(
        provider_id: impl Into<ProviderId>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(120),
            merge_system_into_user: false,
        }
    }

    pub fn qiniu(api_key: impl Into<String>) -> Self {
        Self::new("qiniu", api_key, QINIU_BASE_URL)
    }

    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::new("groq", api_key, GROQ_BASE_URL)
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", api_key, OPENAI_BASE_URL)
    }

    pub fn google(api_key: impl Into<String>) -> Self {
        Self::new("google", api_key, GOOGLE_OPENAI_BASE_URL)
    }

    /// Gemini Code Assist proxy. Authenticates with an access token and needs
    /// the system prompt merged into the user turn.
    pub fn gemini_gca(access_token: impl Into<String>) -> Self {
        let mut config = Self::new("gemini-gca", access_token, GEMINI_GCA_BASE_URL);
        config.merge_system_into_user = true;
        config
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn merge_system_into_user(mut self, merge: bool) -> Self {
        self.merge_system_into_user = merge;
        self
    }

    pub(crate) fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
