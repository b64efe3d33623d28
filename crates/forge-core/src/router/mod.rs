//! Model id → backend resolution with retry and fallback around invocation.

mod retry;
mod rules;

use std::sync::Arc;
use std::time::Duration;

use forge_harness::{Harness, HarnessError, Message, ModelRef, RunStream, Session};
use tracing::{info, warn};

use crate::error::RouteError;
use crate::events::{EventSink, PipelineEvent};

pub use retry::{FailureClass, RetryPolicy};
pub use rules::{ModelMatcher, NameTransform, ProviderRoute, RouteRule, RouteTable};

/// Everything one backend call needs apart from the model.
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub timeout: Duration,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
}

/// A live stream plus how it was obtained.
pub struct RoutedStream {
    pub stream: RunStream,
    pub route: ProviderRoute,
    pub served_by: ModelRef,
    pub retries: u32,
    pub fallback_used: bool,
}

/// Shared, read-only router. Clones share the harness and rule table.
#[derive(Clone)]
pub struct ProviderRouter {
    harness: Harness,
    table: Arc<RouteTable>,
    policy: RetryPolicy,
}

impl ProviderRouter {
    pub fn new(harness: Harness, table: RouteTable, policy: RetryPolicy) -> Self {
        Self {
            harness,
            table: Arc::new(table),
            policy,
        }
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn resolve(&self, model_id: &str) -> Result<ProviderRoute, RouteError> {
        let route = self
            .table
            .resolve(model_id)
            .ok_or_else(|| RouteError::NoRule {
                model_id: model_id.to_string(),
            })?;
        if !self.harness.has_provider(&route.backend) {
            return Err(RouteError::BackendNotRegistered {
                model_id: route.model_id,
                backend: route.backend,
            });
        }
        Ok(route)
    }

    /// Invokes the backend for `model_id`, retrying transient invocation
    /// failures. Only the invocation is retried; reading the returned stream
    /// is the caller's business.
    pub async fn open_stream(
        &self,
        session: &Session,
        model_id: &str,
        spec: &CallSpec,
        sink: &EventSink,
    ) -> Result<RoutedStream, RouteError> {
        let route = self.resolve(model_id)?;
        let mut retries = 0_u32;
        loop {
            let (target, fallback_used) = match route.fallback.as_ref() {
                Some(fallback)
                    if self.policy.is_final_retry(retries)
                        && self.harness.has_provider(&fallback.provider) =>
                {
                    (fallback.clone(), true)
                }
                _ => (route.model_ref(), false),
            };
            if fallback_used {
                warn!(from = %route.backend, to = %target, "final retry goes to fallback");
                sink.send(PipelineEvent::Fallback {
                    from: route.model_ref().to_string(),
                    backend: target.provider.to_string(),
                    model: target.model.clone(),
                })
                .await
                .map_err(|_| RouteError::OutputClosed)?;
            }

            let err = match self.start(session, &target, spec).await {
                Ok(stream) => {
                    info!(model = %target, retries, fallback_used, "backend stream opened");
                    return Ok(RoutedStream {
                        stream,
                        route,
                        served_by: target,
                        retries,
                        fallback_used,
                    });
                }
                Err(err) => err,
            };

            let class = FailureClass::of_harness_error(&err);
            if !class.is_transient() {
                warn!(model = %target, error = %err, "backend invocation failed");
                return Err(RouteError::Fatal {
                    backend: target.provider,
                    source: err,
                });
            }
            if !self.policy.can_retry(retries) {
                warn!(model = %target, error = %err, "retries exhausted");
                return Err(RouteError::Exhausted {
                    backend: target.provider,
                    attempts: retries + 1,
                    source: err,
                });
            }

            let delay = self.policy.backoff_duration(retries);
            retries += 1;
            warn!(
                model = %target,
                ?class,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient backend failure; retrying"
            );
            sink.send(PipelineEvent::Retry {
                backend: target.provider.to_string(),
                attempt: retries,
                class,
                delay_ms: delay.as_millis() as u64,
                message: err.to_string(),
            })
            .await
            .map_err(|_| RouteError::OutputClosed)?;
            tokio::time::sleep(delay).await;
        }
    }

    async fn start(
        &self,
        session: &Session,
        target: &ModelRef,
        spec: &CallSpec,
    ) -> Result<RunStream, HarnessError> {
        let mut run = session
            .run(target.clone())
            .messages(spec.messages.clone())
            .timeout(spec.timeout)
            .max_output_tokens(spec.max_output_tokens);
        if let Some(system) = spec.system_prompt.as_deref() {
            run = run.system_prompt(system);
        }
        if let Some(temperature) = spec.temperature
            && !is_reasoning_model(&target.model)
        {
            run = run.temperature(temperature);
        }
        run.start_stream().await
    }
}

/// Reasoning models reject a sampling temperature.
fn is_reasoning_model(model: &str) -> bool {
    ["gpt-5", "o1", "o3", "o4"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use forge_harness::{ProviderError, SessionConfig};

    use super::*;
    use crate::error::PipelineError;
    use crate::testing::{Script, ScriptedProvider, harness_with};

    fn spec() -> CallSpec {
        CallSpec {
            system_prompt: Some("sys".into()),
            messages: vec![Message::user("build a todo app")],
            timeout: Duration::from_secs(5),
            max_output_tokens: 100,
            temperature: Some(0.7),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::exponential(3, 1, 1.0)
    }

    fn retry_events(rx: &mut tokio::sync::mpsc::Receiver<PipelineEvent>) -> (usize, usize) {
        let mut retries = 0;
        let mut fallbacks = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                PipelineEvent::Retry { .. } => retries += 1,
                PipelineEvent::Fallback { .. } => fallbacks += 1,
                _ => {}
            }
        }
        (retries, fallbacks)
    }

    #[tokio::test]
    async fn two_transient_failures_then_success() {
        let groq = ScriptedProvider::new(
            "groq",
            vec![
                Script::unavailable("groq"),
                Script::StartError(ProviderError::provider("groq", "slow down", Some(429))),
                Script::stop("hello"),
            ],
        );
        let openai = ScriptedProvider::new("openai", vec![]);
        let router = ProviderRouter::new(
            harness_with(&[groq.clone(), openai.clone()]),
            RouteTable::default_table(false),
            fast_policy(),
        );
        let session = router.harness().session(SessionConfig::named("t"));
        let (sink, mut rx) = EventSink::channel(32);

        let routed = router
            .open_stream(&session, "moonshotai/kimi-k2-instruct-0905", &spec(), &sink)
            .await
            .expect("stream");
        assert_eq!(routed.retries, 2);
        assert!(!routed.fallback_used);
        assert_eq!(routed.served_by.provider.as_str(), "groq");
        assert_eq!(routed.stream.finish().await.expect("output").text(), "hello");
        assert_eq!(retry_events(&mut rx), (2, 0));
        assert_eq!(groq.calls(), 3);
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn final_retry_goes_to_fallback() {
        let groq = ScriptedProvider::repeating("groq", Script::unavailable("groq"));
        let openai = ScriptedProvider::new("openai", vec![Script::stop("from fallback")]);
        let router = ProviderRouter::new(
            harness_with(&[groq.clone(), openai.clone()]),
            RouteTable::default_table(false),
            fast_policy(),
        );
        let session = router.harness().session(SessionConfig::named("t"));
        let (sink, mut rx) = EventSink::channel(32);

        let routed = router
            .open_stream(&session, "kimi-k2", &spec(), &sink)
            .await
            .expect("stream");
        assert!(routed.fallback_used);
        assert_eq!(routed.retries, 3);
        assert_eq!(routed.served_by, ModelRef::new("openai", "gpt-4-turbo"));
        assert_eq!(groq.calls(), 3);
        assert_eq!(openai.requests()[0].model.model, "gpt-4-turbo");
        assert_eq!(retry_events(&mut rx), (3, 1));
    }

    #[tokio::test]
    async fn dropped_receiver_stops_retrying() {
        let qiniu = ScriptedProvider::repeating("qiniu", Script::unavailable("qiniu"));
        let router = ProviderRouter::new(
            harness_with(&[qiniu.clone()]),
            RouteTable::default_table(false),
            fast_policy(),
        );
        let session = router.harness().session(SessionConfig::named("t"));
        let (sink, rx) = EventSink::channel(32);
        drop(rx);

        let err = router
            .open_stream(&session, "qwen3-coder", &spec(), &sink)
            .await
            .err()
            .expect("closed");
        assert!(matches!(err, RouteError::OutputClosed));
        assert_eq!(qiniu.calls(), 1);
        assert!(matches!(PipelineError::from(err), PipelineError::OutputClosed));
    }

    #[tokio::test]
    async fn exhausted_retries_without_fallback() {
        let qiniu = ScriptedProvider::repeating("qiniu", Script::unavailable("qiniu"));
        let router = ProviderRouter::new(
            harness_with(&[qiniu.clone()]),
            RouteTable::default_table(false),
            fast_policy(),
        );
        let session = router.harness().session(SessionConfig::named("t"));
        let (sink, _rx) = EventSink::channel(32);

        let err = router
            .open_stream(&session, "qwen3-coder", &spec(), &sink)
            .await
            .err()
            .expect("exhausted");
        assert!(matches!(err, RouteError::Exhausted { attempts: 4, .. }));
        assert_eq!(qiniu.calls(), 4);
    }

    #[tokio::test]
    async fn authentication_failure_is_not_retried() {
        let anthropic = ScriptedProvider::new(
            "anthropic",
            vec![Script::StartError(ProviderError::provider(
                "anthropic",
                "invalid x-api-key",
                Some(401),
            ))],
        );
        let router = ProviderRouter::new(
            harness_with(&[anthropic.clone()]),
            RouteTable::default_table(false),
            fast_policy(),
        );
        let session = router.harness().session(SessionConfig::named("t"));
        let (sink, _rx) = EventSink::channel(8);

        let err = router
            .open_stream(&session, "anthropic/claude-sonnet-4-20250514", &spec(), &sink)
            .await
            .err()
            .expect("fatal");
        assert!(matches!(err, RouteError::Fatal { .. }));
        assert_eq!(anthropic.calls(), 1);
    }

    #[tokio::test]
    async fn unregistered_backend_is_a_route_error() {
        let router = ProviderRouter::new(
            harness_with(&[ScriptedProvider::new("qiniu", vec![])]),
            RouteTable::default_table(false),
            fast_policy(),
        );
        assert!(matches!(
            router.resolve("openai/gpt-4o"),
            Err(RouteError::BackendNotRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn reasoning_models_get_no_temperature() {
        let openai = ScriptedProvider::new(
            "openai",
            vec![Script::stop("a"), Script::stop("b")],
        );
        let router = ProviderRouter::new(
            harness_with(&[openai.clone()]),
            RouteTable::default_table(false),
            fast_policy(),
        );
        let session = router.harness().session(SessionConfig::named("t"));
        let (sink, _rx) = EventSink::channel(8);

        for model in ["openai/gpt-5", "openai/gpt-4o"] {
            let routed = router
                .open_stream(&session, model, &spec(), &sink)
                .await
                .expect("stream");
            routed.stream.finish().await.expect("output");
        }
        let requests = openai.requests();
        assert_eq!(requests[0].options.temperature, None);
        assert_eq!(requests[1].options.temperature, Some(0.7));
        assert_eq!(requests[0].system_prompt.as_deref(), Some("sys"));
    }
}
