//! Progress events and the single output channel they travel on.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::artifact::{Artifact, ArtifactKind};
use crate::assembler::AssemblyEvent;
use crate::error::PipelineError;
use crate::issue::Issue;
use crate::router::FailureClass;

/// What a Repair step asked the backend for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairTarget {
    MissingFiles,
    TruncatedFile,
}

/// Final payload of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub run_id: uuid::Uuid,
    pub artifacts: Vec<Artifact>,
    pub issues: Vec<Issue>,
    pub packages: Vec<String>,
    pub rounds_used: u32,
    pub fix_iterations: u32,
}

impl GenerationResult {
    pub fn error_count(&self) -> usize {
        crate::issue::error_count(&self.issues)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Status {
        message: String,
    },
    /// Raw model text, forwarded as it arrives.
    Stream {
        text: String,
    },
    /// Narration between artifacts.
    Conversation {
        text: String,
    },
    Artifact {
        kind: ArtifactKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Package {
        name: String,
    },
    Retry {
        backend: String,
        attempt: u32,
        class: FailureClass,
        delay_ms: u64,
        message: String,
    },
    Fallback {
        from: String,
        backend: String,
        model: String,
    },
    Repair {
        iteration: u32,
        target: RepairTarget,
        paths: Vec<String>,
    },
    Heartbeat {
        elapsed_ms: u64,
    },
    Complete(GenerationResult),
    Fatal {
        message: String,
    },
}

impl PipelineEvent {
    pub fn status(message: impl Into<String>) -> Self {
        PipelineEvent::Status {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Complete(_) | PipelineEvent::Fatal { .. })
    }
}

impl From<AssemblyEvent> for PipelineEvent {
    fn from(event: AssemblyEvent) -> Self {
        match event {
            AssemblyEvent::Narration(text) => PipelineEvent::Conversation { text },
            AssemblyEvent::Opened { kind, path } => PipelineEvent::status(match path {
                Some(path) => format!("generating {path}"),
                None => format!("generating {kind:?}"),
            }),
            AssemblyEvent::Completed { kind, path, .. } => PipelineEvent::Artifact { kind, path },
            AssemblyEvent::Package(name) => PipelineEvent::Package { name },
        }
    }
}

/// Cloneable sending half of the run's output channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink and the receiver that consumes it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: PipelineEvent) -> Result<(), PipelineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| PipelineError::OutputClosed)
    }

    pub async fn status(&self, message: impl Into<String>) -> Result<(), PipelineError> {
        self.send(PipelineEvent::status(message)).await
    }
}

/// Keep-alive task sharing the run's output channel.
///
/// Events from the task and the pipeline are serialized by the channel, so
/// the receiver is the only writer of the output stream.
pub struct Heartbeat {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Heartbeat {
    pub fn spawn(sink: EventSink, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval_at(started + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        if sink.send(PipelineEvent::Heartbeat { elapsed_ms }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            stop: Some(stop_tx),
            task,
        }
    }

    /// Stops the task and waits for it, so no heartbeat follows.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}
