//! Backend registration from credentials in the environment.

use std::sync::Arc;
use std::time::Duration;

use forge_harness::vendors::anthropic::{AnthropicConfig, AnthropicProvider};
use forge_harness::vendors::openai::{AI_GATEWAY_BASE_URL, OpenAiCompatConfig, OpenAiCompatProvider};
use forge_harness::{Harness, ProviderAdapter, ProviderId};
use tracing::info;

use crate::error::ConfigError;

/// The registered harness plus what the route table needs to know about it.
#[derive(Clone)]
pub struct Backends {
    pub harness: Harness,
    /// The Gemini Code Assist proxy is registered, so `gemini-` ids route to it.
    pub gemini_configured: bool,
}

pub fn harness_from_env(http_timeout: Duration) -> Result<Backends, ConfigError> {
    harness_from_env_with(|key| std::env::var(key).ok(), http_timeout)
}

/// Registers one adapter per backend whose credentials `lookup` provides.
///
/// `AI_GATEWAY_API_KEY` routes groq, anthropic and google through the gateway
/// and replaces their own keys.
pub fn harness_from_env_with<F>(lookup: F, http_timeout: Duration) -> Result<Backends, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let gateway = var("AI_GATEWAY_API_KEY");
    let mut providers: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    let mut openai_compat = |config: OpenAiCompatConfig| -> Result<(), ConfigError> {
        providers.push(Arc::new(OpenAiCompatProvider::new(config.timeout(http_timeout))?));
        Ok(())
    };

    if let Some(key) = var("OPENAI_API_KEY") {
        let mut config = OpenAiCompatConfig::qiniu(key);
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            config = config.base_url(base_url);
        }
        openai_compat(config)?;
    }
    if let Some(key) = var("OPENAI_OFFICIAL_API_KEY") {
        openai_compat(OpenAiCompatConfig::openai(key))?;
    }
    match (gateway.as_ref(), var("GROQ_API_KEY")) {
        (Some(gateway), _) => openai_compat(OpenAiCompatConfig::groq(gateway).base_url(AI_GATEWAY_BASE_URL))?,
        (None, Some(key)) => openai_compat(OpenAiCompatConfig::groq(key))?,
        (None, None) => {}
    }
    match (gateway.as_ref(), var("GEMINI_API_KEY")) {
        (Some(gateway), _) => {
            openai_compat(OpenAiCompatConfig::google(gateway).base_url(AI_GATEWAY_BASE_URL))?
        }
        (None, Some(key)) => openai_compat(OpenAiCompatConfig::google(key))?,
        (None, None) => {}
    }
    let gemini_configured = match (var("CODE_ASSIST_ENDPOINT"), var("GOOGLE_CLOUD_ACCESS_TOKEN")) {
        (Some(endpoint), Some(token)) => {
            openai_compat(OpenAiCompatConfig::gemini_gca(token).base_url(endpoint))?;
            true
        }
        _ => false,
    };

    let anthropic = match (gateway.as_ref(), var("ANTHROPIC_API_KEY")) {
        (Some(gateway), _) => Some(AnthropicConfig::new(gateway).base_url(AI_GATEWAY_BASE_URL)),
        (None, Some(key)) => {
            let config = AnthropicConfig::new(key);
            Some(match var("ANTHROPIC_BASE_URL") {
                Some(base_url) => config.base_url(base_url),
                None => config,
            })
        }
        (None, None) => None,
    };
    if let Some(config) = anthropic {
        providers.push(Arc::new(AnthropicProvider::new(config.timeout(http_timeout))?));
    }

    if providers.is_empty() {
        return Err(ConfigError::Invalid(
            "no backend credentials found (set OPENAI_API_KEY or another backend key)".into(),
        ));
    }
    let ids: Vec<ProviderId> = providers.iter().map(|p| p.id()).collect();
    info!(backends = ?ids, gemini_configured, "backends registered");
    let harness = providers
        .into_iter()
        .fold(Harness::builder(), |builder, provider| builder.register_provider(provider))
        .build()?;
    Ok(Backends {
        harness,
        gemini_configured,
    })
}
