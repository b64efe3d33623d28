use tracing::debug;

use crate::ProviderId;
use crate::content::Role;
use crate::errors::{HarnessError, ProviderError};
use crate::provider::{
    ProviderAdapter, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle,
    request_id_from_headers,
};
use crate::vendors::sse::{ByteStream, sse_event_stream};

use super::config::OpenAiCompatConfig;
use super::options::OpenAiRequestOptions;
use super::transport::ChatCompletionsMapper;

/// Provider adapter for OpenAI-compatible chat completions (streaming).
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, HarnessError> {
        if config.api_key.trim().is_empty() {
            return Err(HarnessError::Config(format!(
                "{} api_key must not be empty",
                config.provider_id
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                HarnessError::Config(format!(
                    "failed to build {} client: {e}",
                    config.provider_id
                ))
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompatProvider {
    fn id(&self) -> ProviderId {
        self.config.provider_id.clone()
    }

    async fn start_stream(
        &self,
        req: ProviderRequest,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        let provider_id = self.config.provider_id.clone();
        let request_options = read_openai_options(&req, &provider_id)?;
        let body = build_request_body(&req, &request_options, self.config.merge_system_into_user);
        debug!(
            run_id = %req.run_id,
            provider = %provider_id,
            model = %req.model.model,
            "starting chat completions stream"
        );

        let mut http_req = self
            .client
            .post(self.config.chat_completions_url())
            .bearer_auth(&self.config.api_key)
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
                format!("chat completions request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let metadata = ProviderResponseMeta {
            request_id: request_id_from_headers(response.headers()),
        };
        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        let stream = sse_event_stream(provider_id, bytes_stream, ChatCompletionsMapper::default());

        Ok(ProviderStreamHandle {
            stream: Box::pin(stream),
            metadata,
        })
    }
}

fn read_openai_options(
    req: &ProviderRequest,
    provider_id: &ProviderId,
) -> Result<OpenAiRequestOptions, ProviderError> {
    match req.vendor_options.get(provider_id) {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            ProviderError::protocol(provider_id.clone(), format!("invalid OpenAI options: {e}"))
        }),
        None => Ok(OpenAiRequestOptions::default()),
    }
}

pub(crate) fn build_request_body(
    req: &ProviderRequest,
    options: &OpenAiRequestOptions,
    merge_system_into_user: bool,
) -> serde_json::Value {
    let system_prompt = req
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    let mut pending_system = None;
    match (system_prompt, merge_system_into_user) {
        (Some(system), false) => messages.push(serde_json::json!({
            "role": "system",
            "content": system,
        })),
        (Some(system), true) => pending_system = Some(system),
        (None, _) => {}
    }
    for message in &req.messages {
        let content = match (message.role, pending_system.take()) {
            (Role::User, Some(system)) => format!("{system}\n\n{}", message.content),
            (_, leftover) => {
                pending_system = leftover;
                message.content.clone()
            }
        };
        messages.push(serde_json::json!({
            "role": message.role.as_str(),
            "content": content,
        }));
    }

    let mut body = serde_json::json!({
        "model": req.model.model,
        "messages": messages,
        "stream": true,
    });
    if let Some(max_tokens) = req.options.max_output_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temperature) = req.options.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    if let Some(store) = options.store {
        body["store"] = serde_json::json!(store);
    }
    if let Some(effort) = options.reasoning_effort.as_ref() {
        body["reasoning_effort"] = serde_json::json!(effort);
    }
    body
}
