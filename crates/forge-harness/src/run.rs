use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::content::{FinishReason, Message, OutputPart, Role, RunOutput};
use crate::errors::{HarnessError, RunFailure, run_failure_from_provider_error};
use crate::harness::HarnessInner;
use crate::model::{ModelRef, ProviderId, RunOptions};
use crate::provider::{ProviderEvent, ProviderRequest, ProviderStreamHandle};
use crate::stream::StreamEvent;

/// Handle used to request cancellation of a running stream.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Cancellation is best-effort and becomes visible as a terminal
    /// `StreamEvent::Error` with `RunFailure::Cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Builder for configuring and starting a single backend call.
pub struct RunBuilder {
    harness: Arc<HarnessInner>,
    session_id: uuid::Uuid,
    session_name: String,
    model: ModelRef,
    system_prompt: Option<String>,
    messages: Vec<Message>,
    options: RunOptions,
    vendor_options: HashMap<ProviderId, serde_json::Value>,
}

impl RunBuilder {
    pub(crate) fn new(
        harness: Arc<HarnessInner>,
        session_id: uuid::Uuid,
        session_name: String,
        model: ModelRef,
    ) -> Self {
        Self {
            harness,
            session_id,
            session_name,
            model,
            system_prompt: None,
            messages: Vec::new(),
            options: RunOptions::default(),
            vendor_options: HashMap::new(),
        }
    }

    /// Sets the system prompt for the run.
    pub fn system_prompt(mut self, text: impl Into<String>) -> Self {
        self.system_prompt = Some(text.into());
        self
    }

    /// Appends a user message.
    pub fn user_text(mut self, text: impl Into<String>) -> Self {
        self.messages.push(Message::user(text));
        self
    }

    /// Appends an assistant message (prior output replayed as context).
    pub fn assistant_text(mut self, text: impl Into<String>) -> Self {
        self.messages.push(Message::assistant(text));
        self
    }

    /// Replaces the conversation with the provided messages.
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Sets the per-call timeout. It bounds both the request and the stream read.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Caps the number of generated tokens.
    pub fn max_output_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_output_tokens = Some(max_tokens);
        self
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    /// Sets the bounded stream buffer size used between the runtime task and
    /// the consumer.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.options.stream_buffer_capacity = capacity;
        self
    }

    /// Stores vendor options read only by the adapter registered under `provider`.
    pub fn set_vendor_options_json(
        mut self,
        provider: ProviderId,
        value: serde_json::Value,
    ) -> Self {
        self.vendor_options.insert(provider, value);
        self
    }

    #[cfg(test)]
    pub(crate) fn vendor_options_value(&self, provider: &ProviderId) -> Option<&serde_json::Value> {
        self.vendor_options.get(provider)
    }

    /// Validates the request, invokes the backend and returns the live stream.
    ///
    /// Invocation failures (HTTP status, connection refused, auth) come back as
    /// `Err(HarnessError::Provider)` here; failures after the backend accepted
    /// the request arrive as a terminal `StreamEvent::Error`.
    pub async fn start_stream(self) -> Result<RunStream, HarnessError> {
        let harness = self.harness.clone();
        let session_name = self.session_name.clone();
        let request = self.validate_and_build_request()?;
        let provider = harness
            .provider(&request.model.provider)
            .ok_or_else(|| HarnessError::ProviderNotFound {
                provider: request.model.provider.clone(),
            })?;

        debug!(
            run_id = %request.run_id,
            session = %session_name,
            model = %request.model,
            messages = request.messages.len(),
            "invoking backend"
        );
        let deadline = request
            .options
            .timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let handle = provider.start_stream(request.clone()).await?;

        let (tx, rx) = mpsc::channel(request.options.stream_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        let abort_handle = AbortHandle { tx: abort_tx };
        let run_id = request.run_id;
        let session_id = request.session_id;
        let model = request.model.clone();
        tokio::spawn(run_task(
            RunTaskContext {
                run_id,
                session_id,
                provider_id: model.provider.clone(),
                model_name: model.model.clone(),
                deadline,
            },
            handle,
            tx,
            final_tx,
            abort_rx,
        ));

        Ok(RunStream {
            run_id,
            session_id,
            model,
            rx,
            final_rx,
            abort_handle,
            saw_terminal: false,
        })
    }

    /// Runs to completion and returns the final aggregated output.
    pub async fn collect_output(self) -> Result<RunOutput, HarnessError> {
        let stream = self.start_stream().await?;
        stream.finish().await
    }

    /// Runs to completion and returns the concatenated text output.
    pub async fn collect_text(self) -> Result<String, HarnessError> {
        Ok(self.collect_output().await?.text())
    }

    fn validate_and_build_request(self) -> Result<ProviderRequest, HarnessError> {
        if self.model.provider.as_str().trim().is_empty() {
            return Err(HarnessError::Validation(
                "model provider must not be empty".into(),
            ));
        }
        if self.model.model.trim().is_empty() {
            return Err(HarnessError::Validation("model must not be empty".into()));
        }
        if self.options.stream_buffer_capacity == 0 {
            return Err(HarnessError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.messages.is_empty() {
            return Err(HarnessError::Validation(
                "at least one message is required".into(),
            ));
        }
        if self.messages.first().map(|m| m.role) != Some(Role::User) {
            return Err(HarnessError::Validation(
                "conversation must start with a user message".into(),
            ));
        }
        if self
            .messages
            .iter()
            .any(|m| m.role == Role::User && m.content.trim().is_empty())
        {
            return Err(HarnessError::Validation(
                "user message must not be empty".into(),
            ));
        }

        Ok(ProviderRequest {
            run_id: uuid::Uuid::new_v4(),
            session_id: self.session_id,
            model: self.model,
            system_prompt: self.system_prompt.filter(|s| !s.trim().is_empty()),
            messages: self.messages,
            options: self.options,
            vendor_options: self.vendor_options,
        })
    }
}

/// Streaming handle returned by `RunBuilder::start_stream`.
///
/// Use `next_event()` to consume events as they arrive and `finish()` to obtain
/// the final result after the terminal event.
pub struct RunStream {
    run_id: uuid::Uuid,
    session_id: uuid::Uuid,
    model: ModelRef,
    rx: mpsc::Receiver<StreamEvent>,
    final_rx: oneshot::Receiver<Result<RunOutput, HarnessError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl RunStream {
    /// Returns the run id for this stream.
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// Returns the session id that owns this run.
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Backend and model actually serving this stream.
    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    /// Returns a handle that can cancel the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for and returns the next normalized stream event.
    ///
    /// Returns `None` after the stream channel is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(StreamEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains the stream (if needed) and returns the terminal run result.
    ///
    /// This is safe to call after consuming events manually with `next_event()`.
    pub async fn finish(mut self) -> Result<RunOutput, HarnessError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::protocol_msg(format!(
                "run task ended without final result ({})",
                self.model
            ))),
        }
    }
}

struct RunTaskContext {
    run_id: uuid::Uuid,
    session_id: uuid::Uuid,
    provider_id: ProviderId,
    model_name: String,
    deadline: Option<tokio::time::Instant>,
}

async fn run_task(
    ctx: RunTaskContext,
    mut handle: ProviderStreamHandle,
    tx: mpsc::Sender<StreamEvent>,
    final_tx: oneshot::Sender<Result<RunOutput, HarnessError>>,
    mut abort_rx: watch::Receiver<bool>,
) {
    let RunTaskContext {
        run_id,
        session_id,
        provider_id,
        model_name,
        deadline,
    } = ctx;

    if !send_event(
        &tx,
        StreamEvent::RunStarted {
            run_id,
            session_id,
            provider: provider_id.clone(),
            model: model_name.clone(),
        },
    )
    .await
    {
        let _ = final_tx.send(Err(HarnessError::protocol_msg(
            "run stream receiver dropped before RunStarted",
        )));
        return;
    }

    let stall = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(stall);

    let mut seq = 0_u64;
    let mut aggregated_parts: Vec<OutputPart> = Vec::new();
    loop {
        tokio::select! {
            changed = abort_rx.changed() => {
                if changed.is_ok() && *abort_rx.borrow() {
                    let failure = send_failure(&tx, run_id, RunFailure::Cancelled).await;
                    let _ = final_tx.send(Err(HarnessError::run_failed(failure)));
                    return;
                }
            }
            _ = &mut stall => {
                let failure = send_failure(&tx, run_id, RunFailure::Timeout {
                    provider: provider_id.to_string(),
                    message: format!("no completion from {model_name} before the call deadline"),
                })
                .await;
                let _ = final_tx.send(Err(HarnessError::run_failed(failure)));
                return;
            }
            next = handle.stream.next() => {
                match next {
                    Some(Ok(ProviderEvent::TextDelta { text })) => {
                        if text.is_empty() {
                            continue;
                        }
                        debug!(run_id = %run_id, provider = %provider_id, model = %model_name, seq, "provider text delta");
                        aggregated_parts.push(OutputPart::Text(text.clone()));
                        let sent = send_event(&tx, StreamEvent::OutputDelta { run_id, seq, text }).await;
                        seq = seq.saturating_add(1);
                        if !sent {
                            let _ = final_tx.send(Err(HarnessError::protocol_msg("run stream receiver dropped during output")));
                            return;
                        }
                    }
                    Some(Ok(ProviderEvent::Completed { output, finish_reason })) => {
                        let output = finalize_output(aggregated_parts, output, finish_reason);
                        let sent = send_event(&tx, StreamEvent::Completed { run_id, output: output.clone() }).await;
                        let _ = final_tx.send(if sent { Ok(output) } else { Err(HarnessError::protocol_msg("run stream receiver dropped before completion")) });
                        return;
                    }
                    Some(Err(err)) => {
                        let failure = send_failure(&tx, run_id, run_failure_from_provider_error(&err)).await;
                        let _ = final_tx.send(Err(HarnessError::run_failed(failure)));
                        return;
                    }
                    None => {
                        let failure = send_failure(&tx, run_id, RunFailure::Protocol {
                            message: format!("provider stream ended without completion ({provider_id})"),
                        })
                        .await;
                        let _ = final_tx.send(Err(HarnessError::run_failed(failure)));
                        return;
                    }
                }
            }
        }
    }
}

/// Streamed deltas win over the vendor's own aggregate; the aggregate is only
/// used when nothing was streamed.
fn finalize_output(
    aggregated_parts: Vec<OutputPart>,
    output: Option<RunOutput>,
    finish_reason: Option<FinishReason>,
) -> RunOutput {
    let provider_reason = output.as_ref().and_then(|o| o.finish_reason.clone());
    let parts = if aggregated_parts.is_empty() {
        output.map(|o| o.parts).unwrap_or_default()
    } else {
        aggregated_parts
    };
    RunOutput {
        parts,
        finish_reason: finish_reason.or(provider_reason),
    }
}

async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

async fn send_failure(
    tx: &mpsc::Sender<StreamEvent>,
    run_id: uuid::Uuid,
    failure: RunFailure,
) -> RunFailure {
    let _ = send_event(
        tx,
        StreamEvent::Error {
            run_id,
            error: failure.clone(),
        },
    )
    .await;
    failure
}
