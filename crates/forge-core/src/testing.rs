//! In-process backends that replay scripted events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use forge_harness::{
    FinishReason, Harness, ProviderAdapter, ProviderError, ProviderEvent, ProviderEventStream,
    ProviderId, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle,
};
use futures::StreamExt as _;

#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Invocation fails before a stream exists.
    StartError(ProviderError),
    Events(Vec<Result<ProviderEvent, ProviderError>>),
    /// Yields the events, then never completes.
    EventsThenStall(Vec<ProviderEvent>),
}

impl Script {
    /// One round of text deltas ending with `finish`.
    pub(crate) fn text(chunks: &[&str], finish: FinishReason) -> Self {
        let mut events: Vec<_> = chunks
            .iter()
            .map(|chunk| {
                Ok(ProviderEvent::TextDelta {
                    text: chunk.to_string(),
                })
            })
            .collect();
        events.push(Ok(ProviderEvent::Completed {
            output: None,
            finish_reason: Some(finish),
        }));
        Script::Events(events)
    }

    pub(crate) fn stop(text: &str) -> Self {
        Self::text(&[text], FinishReason::Stop)
    }

    pub(crate) fn length(text: &str) -> Self {
        Self::text(&[text], FinishReason::Length)
    }

    pub(crate) fn unavailable(provider: &str) -> Self {
        Script::StartError(ProviderError::provider(
            provider,
            "Service unavailable",
            Some(503),
        ))
    }
}

pub(crate) struct ScriptedProvider {
    id: ProviderId,
    scripts: Mutex<VecDeque<Script>>,
    /// Replayed once the queue is empty.
    repeat: Option<Script>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(id: &str, scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::new(id),
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn repeating(id: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::new(id),
            scripts: Mutex::new(VecDeque::new()),
            repeat: Some(script),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    fn next_script(&self) -> Script {
        let next = self.scripts.lock().expect("scripts lock").pop_front();
        next.or_else(|| self.repeat.clone())
            .unwrap_or_else(|| panic!("{} ran out of scripts", self.id))
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn start_stream(
        &self,
        req: ProviderRequest,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        self.requests.lock().expect("requests lock").push(req);
        let stream: ProviderEventStream = match self.next_script() {
            Script::StartError(err) => return Err(err),
            Script::Events(events) => Box::pin(futures::stream::iter(events)),
            Script::EventsThenStall(events) => Box::pin(
                futures::stream::iter(events.into_iter().map(Ok)).chain(futures::stream::pending()),
            ),
        };
        Ok(ProviderStreamHandle {
            stream,
            metadata: ProviderResponseMeta::default(),
        })
    }
}

pub(crate) fn harness_with(providers: &[Arc<ScriptedProvider>]) -> Harness {
    providers
        .iter()
        .fold(Harness::builder(), |builder, provider| {
            builder.register_provider(provider.clone())
        })
        .build()
        .expect("harness")
}
