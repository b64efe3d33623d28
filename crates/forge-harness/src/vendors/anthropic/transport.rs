use crate::content::FinishReason;
use crate::errors::ProviderError;
use crate::provider::ProviderEvent;
use crate::vendors::sse::{FrameMapper, SseFrame};

/// Maps Messages API stream events. `message_delta` carries the stop reason,
/// `message_stop` ends the stream.
#[derive(Default)]
pub(crate) struct MessagesMapper {
    stop_reason: Option<FinishReason>,
}

impl FrameMapper for MessagesMapper {
    fn map_frame(
        &mut self,
        provider: &crate::ProviderId,
        frame: &SseFrame,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        if frame.data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: serde_json::Value = serde_json::from_str(&frame.data).map_err(|e| {
            ProviderError::protocol(provider.clone(), format!("invalid SSE JSON frame: {e}"))
        })?;
        self.map_event(provider, &value)
    }

    fn finish(&mut self, provider: &crate::ProviderId) -> Result<Vec<ProviderEvent>, ProviderError> {
        match self.stop_reason.take() {
            Some(reason) => Ok(vec![ProviderEvent::Completed {
                output: None,
                finish_reason: Some(reason),
            }]),
            None => Err(ProviderError::transport(
                provider.clone(),
                "stream ended before message_stop",
            )),
        }
    }
}

impl MessagesMapper {
    pub(crate) fn map_event(
        &mut self,
        provider: &crate::ProviderId,
        value: &serde_json::Value,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        match value.get("type").and_then(|v| v.as_str()) {
            Some("content_block_delta") => {
                let text = value
                    .get("delta")
                    .filter(|d| d.get("type").and_then(|t| t.as_str()) == Some("text_delta"))
                    .and_then(|d| d.get("text"))
                    .and_then(|v| v.as_str())
                    .filter(|t| !t.is_empty());
                Ok(text
                    .map(|text| {
                        vec![ProviderEvent::TextDelta {
                            text: text.to_string(),
                        }]
                    })
                    .unwrap_or_default())
            }
            Some("message_delta") => {
                if let Some(reason) = value
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|v| v.as_str())
                {
                    self.stop_reason = Some(FinishReason::from_vendor(reason));
                }
                Ok(Vec::new())
            }
            Some("message_stop") => Ok(vec![ProviderEvent::Completed {
                output: None,
                finish_reason: self.stop_reason.take(),
            }]),
            Some("error") => {
                let error = value.get("error");
                let kind = error
                    .and_then(|e| e.get("type"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("error");
                let message = error
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("stream error");
                let status = match kind {
                    "overloaded_error" => Some(529),
                    "rate_limit_error" => Some(429),
                    "api_error" => Some(500),
                    _ => None,
                };
                Err(ProviderError::provider(
                    provider.clone(),
                    format!("{kind}: {message}"),
                    status,
                ))
            }
            _ => Ok(Vec::new()),
        }
    }
}
