use std::fmt;

/// Author of a conversation message sent to a model run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user (or pipeline-authored) request text.
    User,
    /// Prior model output replayed as context.
    Assistant,
}

impl Role {
    /// Wire name used by chat-style vendor APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of the ordered conversation sent to a model run.
///
/// The system prompt is carried separately on the request because vendors
/// disagree on where it goes.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Output content produced by a model run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum OutputPart {
    /// Plain text output.
    Text(String),
}

/// Normalized reason a provider stopped producing output.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the response.
    Stop,
    /// Output was cut off by the provider's token limit.
    Length,
    /// Any other vendor-specific reason, kept verbatim.
    Other(String),
}

impl FinishReason {
    /// Maps a vendor's raw finish/stop reason onto the normalized set.
    pub fn from_vendor(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "completed" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" | "max_output_tokens" | "incomplete" => FinishReason::Length,
            _ => FinishReason::Other(raw.to_string()),
        }
    }

    /// True when the provider reported a token-limit cutoff.
    pub fn is_length(&self) -> bool {
        matches!(self, FinishReason::Length)
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => f.write_str("stop"),
            FinishReason::Length => f.write_str("length"),
            FinishReason::Other(raw) => f.write_str(raw),
        }
    }
}

/// Final aggregated output for a completed run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, Default)]
pub struct RunOutput {
    /// Output parts in the order they were produced.
    pub parts: Vec<OutputPart>,
    /// Normalized finish reason when the provider reported one.
    pub finish_reason: Option<FinishReason>,
}

impl RunOutput {
    /// Concatenates all text parts in order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                OutputPart::Text(text) => out.push_str(text),
            }
        }
        out
    }

    /// True when the run ended because of a token-limit cutoff.
    pub fn was_length_limited(&self) -> bool {
        self.finish_reason
            .as_ref()
            .is_some_and(FinishReason::is_length)
    }
}
