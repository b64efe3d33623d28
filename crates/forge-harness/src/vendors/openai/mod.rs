//! OpenAI-compatible chat completions integration and request options.
//!
//! One adapter type serves every compatible backend (qiniu, groq, openai,
//! google, the Gemini Code Assist proxy); each instance registers under the
//! provider id in its config.
mod adapter;
mod config;
mod options;
pub(crate) mod transport;

pub use adapter::OpenAiCompatProvider;
pub use config::{
    AI_GATEWAY_BASE_URL, GEMINI_GCA_BASE_URL, GOOGLE_OPENAI_BASE_URL, GROQ_BASE_URL,
    OPENAI_BASE_URL, OpenAiCompatConfig, QINIU_BASE_URL,
};
pub use options::{OpenAiReasoningEffort, OpenAiRequestOptions};

use crate::ProviderId;
use crate::run::RunBuilder;

/// Extension trait for attaching OpenAI-compatible options to a `RunBuilder`.
pub trait OpenAiRunBuilderExt {
    /// Adds request options read only by the adapter registered as `provider`.
    fn openai_options(self, provider: impl Into<ProviderId>, options: OpenAiRequestOptions)
    -> Self;
}

impl OpenAiRunBuilderExt for RunBuilder {
    fn openai_options(
        self,
        provider: impl Into<ProviderId>,
        options: OpenAiRequestOptions,
    ) -> Self {
        match serde_json::to_value(options) {
            Ok(value) => self.set_vendor_options_json(provider.into(), value),
            Err(_) => self,
        }
    }
}
