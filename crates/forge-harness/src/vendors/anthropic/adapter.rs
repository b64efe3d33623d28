use tracing::debug;

use crate::ProviderId;
use crate::errors::{HarnessError, ProviderError};
use crate::provider::{
    ProviderAdapter, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle,
    request_id_from_headers,
};
use crate::vendors::sse::{ByteStream, sse_event_stream};

use super::config::AnthropicConfig;
use super::transport::MessagesMapper;

const ANTHROPIC_PROVIDER: &str = "anthropic";

/// Provider adapter for the Anthropic Messages API (streaming).
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, HarnessError> {
        if config.api_key.trim().is_empty() {
            return Err(HarnessError::Config(
                "Anthropic client config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build Anthropic client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(ANTHROPIC_PROVIDER)
    }

    async fn start_stream(
        &self,
        req: ProviderRequest,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        let provider_id = ProviderId::new(ANTHROPIC_PROVIDER);
        let body = build_request_body(&req, self.config.default_max_tokens);
        debug!(run_id = %req.run_id, model = %req.model.model, "starting Anthropic messages stream");

        let mut http_req = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body);
        if let Some(timeout) = req.options.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(provider_id.clone(), "request failed", &e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::provider(
                provider_id,
                format!("messages request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let metadata = ProviderResponseMeta {
            request_id: request_id_from_headers(response.headers()),
        };
        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        let stream = sse_event_stream(provider_id, bytes_stream, MessagesMapper::default());

        Ok(ProviderStreamHandle {
            stream: Box::pin(stream),
            metadata,
        })
    }
}

pub(crate) fn build_request_body(req: &ProviderRequest, default_max_tokens: u32) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let mut body = serde_json::json!({
        "model": req.model.model,
        "max_tokens": req.options.max_output_tokens.unwrap_or(default_max_tokens),
        "messages": messages,
        "stream": true,
    });
    if let Some(system) = req
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        body["system"] = serde_json::json!(system);
    }
    if let Some(temperature) = req.options.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Message;
    use crate::model::{ModelRef, RunOptions};
    use std::collections::HashMap;

    #[test]
    fn body_puts_system_at_top_level_and_defaults_max_tokens() {
        let req = ProviderRequest {
            run_id: uuid::Uuid::new_v4(),
            session_id: uuid::Uuid::new_v4(),
            model: ModelRef::new("anthropic", "claude-sonnet-4-20250514"),
            system_prompt: Some("be terse".into()),
            messages: vec![Message::user("hi"), Message::assistant("<file path=\"a\">")],
            options: RunOptions::default(),
            vendor_options: HashMap::new(),
        };
        let body = build_request_body(&req, 4096);
        assert_eq!(body["system"], serde_json::json!("be terse"));
        assert_eq!(body["max_tokens"], serde_json::json!(4096));
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["messages"][1]["role"], serde_json::json!("assistant"));
        assert!(body.get("temperature").is_none());
    }

    #[tokio::test]
    async fn env_gated_smoke_collect_text_if_key_present() {
        let key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        if key.trim().is_empty() {
            eprintln!("skipping Anthropic smoke test (ANTHROPIC_API_KEY missing)");
            return;
        }
        let harness = crate::Harness::builder()
            .register_provider(std::sync::Arc::new(
                AnthropicProvider::new(AnthropicConfig::new(key)).expect("provider"),
            ))
            .build()
            .expect("harness");

        let result = harness
            .session(crate::SessionConfig::named("smoke"))
            .run(crate::ModelRef::new("anthropic", "claude-sonnet-4-20250514"))
            .max_output_tokens(32)
            .user_text("Reply with: ok")
            .collect_text()
            .await;
        assert!(result.is_ok(), "Anthropic smoke failed: {result:?}");
    }
}
