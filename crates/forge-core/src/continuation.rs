//! Continuation Controller: re-invokes the backend while output is cut off.
//!
//! `Idle → Streaming → {Done | LengthCut}`, and `LengthCut → Resuming →
//! Streaming` until a round ends normally or the round cap is reached. Every
//! round feeds the same [`StreamState`], so an artifact left open at a cutoff
//! keeps accumulating and closed artifacts are never reopened.

use forge_harness::{Message, RunStream, Session, StreamEvent};
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactKind};
use crate::assembler::StreamState;
use crate::error::PipelineError;
use crate::events::{EventSink, PipelineEvent};
use crate::issue::{Issue, IssueType};
use crate::prompts::continuation_note;
use crate::router::{CallSpec, FailureClass, ProviderRouter};
use crate::scanner::BlockTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    LengthCut,
    Resuming,
    Done,
}

/// Why a round ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutReason {
    /// Provider reported a token-limit stop.
    Length,
    /// The per-call deadline passed while reading.
    Timeout,
    /// Transient transport failure while reading.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEnd {
    Done,
    Cut(CutReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationOutcome {
    pub rounds: u32,
    /// The cap was reached while the last round was still cut off.
    pub exhausted: bool,
}

pub struct ContinuationController<'a> {
    router: &'a ProviderRouter,
    session: &'a Session,
    sink: &'a EventSink,
    model_id: &'a str,
    template: CallSpec,
    max_rounds: u32,
    phase: Phase,
}

impl<'a> ContinuationController<'a> {
    pub fn new(
        router: &'a ProviderRouter,
        session: &'a Session,
        sink: &'a EventSink,
        model_id: &'a str,
        template: CallSpec,
        max_rounds: u32,
    ) -> Self {
        Self {
            router,
            session,
            sink,
            model_id,
            template,
            max_rounds: max_rounds.max(1),
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "continuation phase");
        self.phase = phase;
    }

    /// Runs rounds for `prompt` until one ends normally or the cap is hit.
    pub async fn run(
        &mut self,
        prompt: &str,
        state: &mut StreamState,
    ) -> Result<ContinuationOutcome, PipelineError> {
        let first_round = state.rounds;
        while state.rounds - first_round < self.max_rounds {
            let messages = if self.phase == Phase::LengthCut {
                self.enter(Phase::Resuming);
                state.begin_resume();
                self.sink
                    .status(format!(
                        "output was cut off; continuing (round {} of {})",
                        state.rounds - first_round + 1,
                        self.max_rounds
                    ))
                    .await?;
                build_continuation_messages(prompt, state)
            } else {
                vec![Message::user(prompt)]
            };

            let spec = CallSpec {
                messages,
                ..self.template.clone()
            };
            let routed = self
                .router
                .open_stream(self.session, self.model_id, &spec, self.sink)
                .await?;
            state.retries += routed.retries;
            self.enter(Phase::Streaming);

            let end = stream_round(routed.stream, state, self.sink).await?;
            state.rounds += 1;
            info!(
                round = state.rounds,
                model = %routed.served_by,
                ?end,
                artifacts = state.artifacts.len(),
                "round finished"
            );
            match end {
                RoundEnd::Done => {
                    self.enter(Phase::Done);
                    return Ok(ContinuationOutcome {
                        rounds: state.rounds - first_round,
                        exhausted: false,
                    });
                }
                RoundEnd::Cut(_) => self.enter(Phase::LengthCut),
            }
        }

        warn!(
            rounds = self.max_rounds,
            "continuation cap reached with output still cut off"
        );
        let mut issue = Issue::error(
            IssueType::ContinuationExhausted,
            format!(
                "output was still cut off after {} rounds",
                self.max_rounds
            ),
        );
        if let Some(path) = state.open_artifact().and_then(Artifact::path) {
            issue = issue.at(path);
        }
        state.issues.push(issue);
        self.enter(Phase::Done);
        Ok(ContinuationOutcome {
            rounds: state.rounds - first_round,
            exhausted: true,
        })
    }
}

/// Reads one round's stream into `state`, forwarding progress to `sink`.
pub async fn stream_round(
    mut stream: RunStream,
    state: &mut StreamState,
    sink: &EventSink,
) -> Result<RoundEnd, PipelineError> {
    let backend = stream.model().provider.clone();
    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::RunStarted { .. } => {}
            StreamEvent::OutputDelta { text, .. } => {
                sink.send(PipelineEvent::Stream { text: text.clone() })
                    .await?;
                for assembled in state.push_delta(&text) {
                    sink.send(assembled.into()).await?;
                }
            }
            StreamEvent::Completed { output, .. } => {
                return Ok(if output.was_length_limited() {
                    RoundEnd::Cut(CutReason::Length)
                } else {
                    RoundEnd::Done
                });
            }
            StreamEvent::Error { error, .. } => {
                return match FailureClass::of_run_failure(&error) {
                    FailureClass::Fatal => Err(PipelineError::Stream {
                        backend,
                        failure: error,
                    }),
                    FailureClass::Timeout => {
                        warn!(%backend, error = %error, "round timed out; treating as cut off");
                        Ok(RoundEnd::Cut(CutReason::Timeout))
                    }
                    _ => {
                        warn!(%backend, error = %error, "round interrupted; treating as cut off");
                        Ok(RoundEnd::Cut(CutReason::Interrupted))
                    }
                };
            }
        }
    }
    Err(PipelineError::Stream {
        backend,
        failure: forge_harness::RunFailure::Protocol {
            message: "stream closed without a terminal event".into(),
        },
    })
}

/// `[user original, assistant output so far, user progress note]`.
pub fn build_continuation_messages(prompt: &str, state: &StreamState) -> Vec<Message> {
    let rendered = render_progress(state);
    let names: Vec<&str> = state
        .artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::File)
        .filter_map(Artifact::path)
        .collect();
    let note = continuation_note(&names);
    if rendered.trim().is_empty() {
        return vec![Message::user(format!("{prompt}\n\n{note}"))];
    }
    vec![
        Message::user(prompt),
        Message::assistant(rendered),
        Message::user(note),
    ]
}

/// Compacted re-rendering of the output so far. The open artifact is left
/// without its closing marker so the model resumes inside it. Narration not
/// yet flushed and text the scanner is holding back are included verbatim.
pub fn render_progress(state: &StreamState) -> String {
    let open_index = state.open_index();
    let mut out = String::new();
    for (index, artifact) in state.artifacts.iter().enumerate() {
        if Some(index) == open_index {
            render_open(state, artifact, &mut out);
            out.push_str(state.held_back());
        } else {
            render_closed(artifact, &mut out);
        }
    }
    if open_index.is_none() {
        out.push_str(state.pending_narration());
        out.push_str(state.held_back());
    }
    out
}

fn open_marker(tag: BlockTag, path: Option<&str>) -> String {
    match (tag, path) {
        (BlockTag::File, Some(path)) => format!("<file path=\"{path}\">"),
        (BlockTag::Edit, Some(path)) => format!("<edit target_file=\"{path}\">"),
        (tag, _) => format!("<{}>", tag.name()),
    }
}

fn render_closed(artifact: &Artifact, out: &mut String) {
    let path = artifact.path();
    match artifact.kind {
        ArtifactKind::Explanation => {
            out.push_str(&artifact.body);
        }
        ArtifactKind::File => {
            out.push_str(&open_marker(BlockTag::File, path));
            out.push('\n');
            out.push_str(&artifact.body);
            out.push_str("\n</file>");
        }
        ArtifactKind::Edit => {
            out.push_str(&open_marker(BlockTag::Edit, path));
            if let Some(instructions) = artifact.instructions.as_deref() {
                out.push_str(&format!("\n<instructions>{instructions}</instructions>"));
            }
            out.push_str(&format!("\n<update>\n{}\n</update>\n</edit>", artifact.body));
        }
        ArtifactKind::PackageDeclaration => {
            let tag = if artifact.body.contains(['\n', ',']) {
                BlockTag::Packages
            } else {
                BlockTag::Package
            };
            out.push_str(&open_marker(tag, None));
            out.push_str(&artifact.body);
            out.push_str(&tag.close_marker());
        }
        ArtifactKind::Command => {
            out.push_str(&open_marker(BlockTag::Command, None));
            out.push_str(&artifact.body);
            out.push_str(&BlockTag::Command.close_marker());
        }
    }
    out.push('\n');
}

fn render_open(state: &StreamState, artifact: &Artifact, out: &mut String) {
    let Some(tag) = state.open_tag() else {
        return;
    };
    out.push_str(&open_marker(tag, artifact.path()));
    out.push_str(&artifact.body);
    if tag != BlockTag::Edit {
        return;
    }
    let sub = state.open_sub_block();
    if artifact.instructions.is_some() || sub == Some(BlockTag::Instructions) {
        out.push_str("<instructions>");
        out.push_str(artifact.instructions.as_deref().unwrap_or_default());
        if sub == Some(BlockTag::Instructions) {
            return;
        }
        out.push_str("</instructions>");
    }
    if let Some(update) = state.open_update() {
        out.push_str("<update>");
        out.push_str(update);
        if sub != Some(BlockTag::Update) {
            out.push_str("</update>");
        }
    }
}
