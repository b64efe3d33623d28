use crate::content::FinishReason;
use crate::errors::ProviderError;
use crate::provider::ProviderEvent;
use crate::vendors::sse::{FrameMapper, SseFrame};

/// Maps `chat.completion.chunk` frames.
///
/// The finish reason arrives on the last content chunk; `[DONE]` (or the end
/// of the body, for servers that omit it) produces the terminal event.
#[derive(Default)]
pub(crate) struct ChatCompletionsMapper {
    finish_reason: Option<FinishReason>,
}

impl FrameMapper for ChatCompletionsMapper {
    fn map_frame(
        &mut self,
        provider: &crate::ProviderId,
        frame: &SseFrame,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        let data = frame.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            return Ok(vec![ProviderEvent::Completed {
                output: None,
                finish_reason: self.finish_reason.take(),
            }]);
        }
        let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
            ProviderError::protocol(provider.clone(), format!("invalid SSE JSON frame: {e}"))
        })?;
        self.map_chunk(provider, &value)
    }

    fn finish(&mut self, provider: &crate::ProviderId) -> Result<Vec<ProviderEvent>, ProviderError> {
        match self.finish_reason.take() {
            Some(reason) => Ok(vec![ProviderEvent::Completed {
                output: None,
                finish_reason: Some(reason),
            }]),
            None => Err(ProviderError::transport(
                provider.clone(),
                "stream ended before a finish reason was reported",
            )),
        }
    }
}

impl ChatCompletionsMapper {
    pub(crate) fn map_chunk(
        &mut self,
        provider: &crate::ProviderId,
        value: &serde_json::Value,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .or_else(|| error.as_str())
                .unwrap_or("stream error");
            let status = error
                .get("code")
                .and_then(|v| v.as_u64())
                .and_then(|code| u16::try_from(code).ok());
            return Err(ProviderError::provider(provider.clone(), message, status));
        }

        let Some(choice) = value
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|choices| choices.first())
        else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        if let Some(text) = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(|v| v.as_str())
            .filter(|text| !text.is_empty())
        {
            events.push(ProviderEvent::TextDelta {
                text: text.to_string(),
            });
        }
        if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
            self.finish_reason = Some(FinishReason::from_vendor(reason));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> SseFrame {
        SseFrame {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn maps_content_delta_and_done() {
        let provider = crate::ProviderId::new("qiniu");
        let mut mapper = ChatCompletionsMapper::default();
        let delta = mapper
            .map_frame(
                &provider,
                &frame(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#),
            )
            .expect("delta");
        assert_eq!(delta, vec![ProviderEvent::TextDelta { text: "Hi".into() }]);

        let last = mapper
            .map_frame(
                &provider,
                &frame(r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#),
            )
            .expect("finish chunk");
        assert!(last.is_empty());

        let done = mapper.map_frame(&provider, &frame("[DONE]")).expect("done");
        assert_eq!(
            done,
            vec![ProviderEvent::Completed {
                output: None,
                finish_reason: Some(FinishReason::Length),
            }]
        );
    }

    #[test]
    fn end_of_body_without_done_still_completes() {
        let provider = crate::ProviderId::new("groq");
        let mut mapper = ChatCompletionsMapper::default();
        mapper
            .map_frame(
                &provider,
                &frame(r#"{"choices":[{"delta":{"content":"x"},"finish_reason":"stop"}]}"#),
            )
            .expect("chunk");
        let events = mapper.finish(&provider).expect("finish");
        assert!(matches!(
            events.as_slice(),
            [ProviderEvent::Completed {
                finish_reason: Some(FinishReason::Stop),
                ..
            }]
        ));
    }

    #[test]
    fn cut_body_is_transport_error() {
        let provider = crate::ProviderId::new("groq");
        let err = ChatCompletionsMapper::default()
            .finish(&provider)
            .expect_err("no finish reason");
        assert!(matches!(err, ProviderError::Transport { .. }));
    }

    #[test]
    fn inline_error_frame_becomes_provider_error() {
        let provider = crate::ProviderId::new("qiniu");
        let err = ChatCompletionsMapper::default()
            .map_frame(
                &provider,
                &frame(r#"{"error":{"message":"Rate limit reached","code":429}}"#),
            )
            .expect_err("error frame");
        assert_eq!(err.status_code(), Some(429));
        assert!(err.message().contains("Rate limit"));
    }
}
