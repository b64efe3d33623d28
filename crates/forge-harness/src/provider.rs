use std::collections::HashMap;
use std::pin::Pin;

use crate::content::{FinishReason, Message, RunOutput};
use crate::errors::ProviderError;
use crate::model::{ModelRef, ProviderId, RunOptions};

/// Event produced by a provider adapter's stream.
///
/// A well-behaved adapter yields any number of `TextDelta`s followed by exactly
/// one `Completed`.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    /// Incremental text produced by the model.
    TextDelta { text: String },
    /// Terminal event. `output` holds the vendor's own aggregate when it sends one.
    Completed {
        output: Option<RunOutput>,
        finish_reason: Option<FinishReason>,
    },
}

/// Fully validated request handed to a provider adapter.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub run_id: uuid::Uuid,
    pub session_id: uuid::Uuid,
    pub model: ModelRef,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub options: RunOptions,
    /// Opaque vendor options keyed by the provider that reads them.
    pub vendor_options: HashMap<ProviderId, serde_json::Value>,
}

/// Response metadata captured when the stream is established.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderResponseMeta {
    /// Vendor request id (for example `x-request-id`), when exposed.
    pub request_id: Option<String>,
}

pub type ProviderEventStream =
    Pin<Box<dyn futures::Stream<Item = Result<ProviderEvent, ProviderError>> + Send + 'static>>;

/// Established provider stream.
pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub metadata: ProviderResponseMeta,
}

/// Contract implemented by every backend integration.
///
/// `start_stream` is the invocation: it returns once the backend accepted the
/// request (or failed to). Reading the returned stream is separate, so callers
/// can retry invocation failures without replaying partially consumed output.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id this adapter is registered under.
    fn id(&self) -> ProviderId;

    /// Sends the request and returns the event stream.
    async fn start_stream(&self, req: ProviderRequest)
    -> Result<ProviderStreamHandle, ProviderError>;
}

pub(crate) fn request_id_from_headers(headers: &reqwest::header::HeaderMap) -> Option<String> {
    ["x-request-id", "request-id"]
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}
