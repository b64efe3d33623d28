//! Entry point: one generation request in, progress events and exactly one
//! terminal event out.

use std::sync::Arc;

use forge_harness::{Harness, ProviderId, SessionConfig};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info, info_span, warn};

use crate::assembler::StreamState;
use crate::auditor::{AuditContext, Auditor};
use crate::autofix::AutoFixLoop;
use crate::config::PipelineConfig;
use crate::continuation::ContinuationController;
use crate::edit_scope::{EditIntentAnalyzer, EditScope, FileManifestProvider};
use crate::error::{ConfigError, PipelineError};
use crate::events::{EventSink, GenerationResult, Heartbeat, PipelineEvent};
use crate::issue::{Issue, IssueType};
use crate::judge::CompletenessJudge;
use crate::packages::bare_imports;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, generation_prompt};
use crate::router::{CallSpec, ProviderRouter, RouteTable};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub instructions: String,
    #[serde(default)]
    pub is_edit: bool,
    #[serde(default)]
    pub edit_scope: Option<EditScope>,
    /// Pre-formatted conversation context, clipped before it is sent.
    #[serde(default)]
    pub conversation_summary: Option<String>,
    pub model_id: String,
    /// Replaces the built-in system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl GenerationRequest {
    pub fn new(model_id: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            instructions: instructions.into(),
            ..Self::default()
        }
    }
}

/// What a run ended with. Mirrors the terminal event sent on the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Complete(GenerationResult),
    Fatal { message: String },
}

impl GenerationOutcome {
    fn to_event(&self) -> PipelineEvent {
        match self {
            GenerationOutcome::Complete(result) => PipelineEvent::Complete(result.clone()),
            GenerationOutcome::Fatal { message } => PipelineEvent::Fatal {
                message: message.clone(),
            },
        }
    }
}

#[derive(Clone)]
pub struct GenerationPipeline {
    router: ProviderRouter,
    auditor: Auditor,
    config: PipelineConfig,
    intent_analyzer: Option<Arc<dyn EditIntentAnalyzer>>,
    file_manifest: Option<Arc<dyn FileManifestProvider>>,
}

#[derive(Default)]
pub struct GenerationPipelineBuilder {
    harness: Option<Harness>,
    config: PipelineConfig,
    route_table: Option<RouteTable>,
    intent_analyzer: Option<Arc<dyn EditIntentAnalyzer>>,
    file_manifest: Option<Arc<dyn FileManifestProvider>>,
}

impl GenerationPipelineBuilder {
    pub fn harness(mut self, harness: Harness) -> Self {
        self.harness = Some(harness);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the default route table.
    pub fn route_table(mut self, table: RouteTable) -> Self {
        self.route_table = Some(table);
        self
    }

    pub fn intent_analyzer(mut self, analyzer: Arc<dyn EditIntentAnalyzer>) -> Self {
        self.intent_analyzer = Some(analyzer);
        self
    }

    pub fn file_manifest(mut self, provider: Arc<dyn FileManifestProvider>) -> Self {
        self.file_manifest = Some(provider);
        self
    }

    pub fn build(self) -> Result<GenerationPipeline, ConfigError> {
        self.config.validate()?;
        let harness = self
            .harness
            .ok_or_else(|| ConfigError::Invalid("a harness with at least one backend is required".into()))?;
        let table = self.route_table.unwrap_or_else(|| {
            RouteTable::default_table(harness.has_provider(&ProviderId::new("gemini-gca")))
        });
        let router = ProviderRouter::new(harness, table, self.config.retry.clone());
        Ok(GenerationPipeline {
            router,
            auditor: Auditor::new(CompletenessJudge::new(self.config.judge.clone())),
            config: self.config,
            intent_analyzer: self.intent_analyzer,
            file_manifest: self.file_manifest,
        })
    }
}

impl GenerationPipeline {
    pub fn builder() -> GenerationPipelineBuilder {
        GenerationPipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Runs one request to its terminal event.
    ///
    /// Progress goes to `sink` while the run is live; the terminal
    /// `Complete`/`Fatal` event is sent last, after the heartbeat stopped, and
    /// is also returned.
    pub async fn run(&self, request: GenerationRequest, sink: EventSink) -> GenerationOutcome {
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!(
            "generation",
            %run_id,
            model = %request.model_id,
            is_edit = request.is_edit
        );
        self.run_inner(run_id, request, sink).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: uuid::Uuid,
        request: GenerationRequest,
        sink: EventSink,
    ) -> GenerationOutcome {
        let heartbeat = Heartbeat::spawn(sink.clone(), self.config.timeouts.heartbeat());
        let budget = self.config.timeouts.run_budget();
        let mut state = StreamState::new(self.config.scanner.lookback_window);
        let mut ctx = AuditContext::default();

        let driven = tokio::time::timeout(
            budget,
            self.drive(run_id, &request, &mut state, &mut ctx, &sink),
        )
        .await;
        let outcome = match driven {
            Ok(Ok(audit)) => {
                let result = into_result(run_id, state, audit);
                info!(
                    artifacts = result.artifacts.len(),
                    errors = result.error_count(),
                    rounds = result.rounds_used,
                    fix_iterations = result.fix_iterations,
                    "generation complete"
                );
                GenerationOutcome::Complete(result)
            }
            Ok(Err(err)) => {
                error!(error = %err, "generation failed");
                GenerationOutcome::Fatal {
                    message: err.to_string(),
                }
            }
            Err(_) => self.timed_out(run_id, state, &ctx),
        };

        heartbeat.stop().await;
        if sink.send(outcome.to_event()).await.is_err() {
            warn!("event receiver dropped before the terminal event");
        }
        outcome
    }

    /// Budget exceeded: whatever was finalized, plus a Timeout issue.
    fn timed_out(&self, run_id: uuid::Uuid, mut state: StreamState, ctx: &AuditContext) -> GenerationOutcome {
        let err = PipelineError::RunTimeout {
            budget: self.config.timeouts.run_budget(),
        };
        state.finish();
        if state.artifacts.source_units().next().is_none() {
            error!(error = %err, "generation timed out before producing any file");
            return GenerationOutcome::Fatal {
                message: err.to_string(),
            };
        }
        warn!(error = %err, artifacts = state.artifacts.len(), "generation timed out; returning partial output");
        let mut audit = self.auditor.audit(&state.artifacts, ctx);
        audit.push(Issue::error(IssueType::Timeout, err.to_string()));
        GenerationOutcome::Complete(into_result(run_id, state, audit))
    }

    async fn drive(
        &self,
        run_id: uuid::Uuid,
        request: &GenerationRequest,
        state: &mut StreamState,
        ctx: &mut AuditContext,
        sink: &EventSink,
    ) -> Result<Vec<Issue>, PipelineError> {
        let scope = self.resolve_scope(request, sink).await?;
        ctx.is_edit = request.is_edit;
        if let Some(scope) = scope.as_ref() {
            ctx.prior_paths = scope.known_paths();
        }
        let prompt = generation_prompt(
            &request.instructions,
            request.is_edit,
            request.conversation_summary.as_deref(),
            scope.as_ref().map(|s| &s.prior_artifacts),
        );

        let session = self
            .router
            .harness()
            .session(SessionConfig::named(format!("generation-{run_id}")));
        let template = CallSpec {
            system_prompt: Some(
                request
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            ),
            messages: Vec::new(),
            timeout: self.config.timeouts.per_call(),
            max_output_tokens: self.config.generation.max_output_tokens,
            temperature: Some(self.config.generation.temperature),
        };

        sink.status(format!("generating with {}", request.model_id))
            .await?;
        ContinuationController::new(
            &self.router,
            &session,
            sink,
            &request.model_id,
            template.clone(),
            self.config.continuation.max_rounds,
        )
        .run(&prompt, state)
        .await?;
        for event in state.finish() {
            sink.send(event.into()).await?;
        }
        if request.is_edit {
            declare_imported_packages(state, sink).await?;
        }

        if !self.config.auto_fix.enabled {
            return Ok(self.auditor.audit(&state.artifacts, ctx));
        }
        sink.status("checking generated files").await?;
        AutoFixLoop::new(
            &self.router,
            &session,
            sink,
            &request.model_id,
            template,
            &self.auditor,
            self.config.auto_fix.max_iterations,
            self.config.scanner.lookback_window,
        )
        .run(&request.instructions, state, ctx)
        .await
    }

    /// Scope for an edit: the caller's, or one built from the collaborators.
    /// Collaborator failures degrade the scope and never end the run.
    async fn resolve_scope(
        &self,
        request: &GenerationRequest,
        sink: &EventSink,
    ) -> Result<Option<EditScope>, PipelineError> {
        if !request.is_edit {
            return Ok(None);
        }
        if let Some(scope) = request.edit_scope.clone() {
            return Ok(Some(scope));
        }
        let (Some(analyzer), Some(files)) = (self.intent_analyzer.as_ref(), self.file_manifest.as_ref())
        else {
            return Ok(None);
        };

        let manifest = match files.manifest().await {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(error = %err, "file manifest unavailable; editing without file context");
                sink.status(format!("file manifest unavailable: {err}")).await?;
                return Ok(None);
            }
        };
        sink.status("analyzing edit intent").await?;
        let target_paths = match analyzer.analyze(&request.instructions, &manifest).await {
            Ok(intent) if !intent.target_paths.is_empty() => {
                info!(
                    edit_type = %intent.edit_type,
                    targets = intent.target_paths.len(),
                    "edit intent analyzed"
                );
                intent.target_paths
            }
            Ok(_) => {
                sink.status("edit intent named no files; using the whole manifest")
                    .await?;
                manifest.paths.clone()
            }
            Err(err) => {
                warn!(error = %err, "edit intent analysis failed");
                sink.status(format!("edit intent analysis failed ({err}); using the whole manifest"))
                    .await?;
                manifest.paths.clone()
            }
        };
        let prior_artifacts = match files.get_contents(&target_paths).await {
            Ok(contents) => contents,
            Err(err) => {
                warn!(error = %err, "could not fetch scoped file contents");
                sink.status(format!("could not fetch file contents: {err}")).await?;
                Default::default()
            }
        };
        Ok(Some(EditScope {
            target_paths,
            prior_artifacts,
            project_paths: manifest.paths,
        }))
    }
}

/// Bare imports in edited code count as package declarations.
async fn declare_imported_packages(
    state: &mut StreamState,
    sink: &EventSink,
) -> Result<(), PipelineError> {
    let names: Vec<String> = state
        .artifacts
        .source_units()
        .flat_map(|artifact| bare_imports(&artifact.body))
        .collect();
    for name in names {
        if state.declare_package(&name) {
            sink.send(PipelineEvent::Package { name }).await?;
        }
    }
    Ok(())
}

fn into_result(run_id: uuid::Uuid, state: StreamState, audit: Vec<Issue>) -> GenerationResult {
    let packages = state.packages().to_vec();
    let mut issues = state.issues;
    issues.extend(audit);
    GenerationResult {
        run_id,
        artifacts: state.artifacts.into_vec(),
        issues,
        packages,
        rounds_used: state.rounds,
        fix_iterations: state.fix_iterations,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use forge_harness::{FinishReason, ProviderError};

    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::edit_scope::{CollaboratorError, EditIntent, FileManifest, PathIndexedContent};
    use crate::router::RetryPolicy;
    use crate::testing::{Script, ScriptedProvider, harness_with};

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.retry = RetryPolicy::none();
        config
    }

    fn pipeline(provider: &Arc<ScriptedProvider>, config: PipelineConfig) -> GenerationPipeline {
        GenerationPipeline::builder()
            .harness(harness_with(&[provider.clone()]))
            .config(config)
            .build()
            .expect("pipeline")
    }

    async fn run(
        pipeline: &GenerationPipeline,
        request: GenerationRequest,
    ) -> (GenerationOutcome, Vec<PipelineEvent>) {
        let (sink, mut rx) = EventSink::channel(1024);
        let outcome = pipeline.run(request, sink).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    fn assert_single_terminal(events: &[PipelineEvent]) {
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().is_some_and(PipelineEvent::is_terminal));
    }

    #[tokio::test]
    async fn cut_off_generation_is_continued_to_completion() {
        let qiniu = ScriptedProvider::new(
            "qiniu",
            vec![
                Script::text(
                    &[
                        "Building it.\n<file path=\"src/App.jsx\">import Header from './components/Header';\n",
                        "export default function App() {\n",
                    ],
                    FinishReason::Length,
                ),
                Script::stop(
                    "  return <Header />;\n}\n</file>\n<file path=\"src/components/Header.jsx\">export default function Header() { return <h1>Hi</h1>; }</file>\n<file path=\"src/index.css\">body { margin: 0; }</file>\n<package>react-icons</package>",
                ),
            ],
        );
        let (outcome, events) = run(
            &pipeline(&qiniu, config()),
            GenerationRequest::new("qwen3-coder", "a landing page"),
        )
        .await;

        let GenerationOutcome::Complete(result) = outcome else {
            panic!("expected a complete result");
        };
        assert_eq!(result.rounds_used, 2);
        assert_eq!(result.fix_iterations, 0);
        assert!(result.issues.is_empty(), "{:?}", result.issues);
        assert_eq!(result.packages, vec!["react-icons".to_string()]);
        let kinds: Vec<_> = result.artifacts.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ArtifactKind::Explanation,
                ArtifactKind::File,
                ArtifactKind::File,
                ArtifactKind::File,
                ArtifactKind::PackageDeclaration,
            ]
        );
        assert_eq!(qiniu.calls(), 2);
        assert_single_terminal(&events);
        assert!(events.contains(&PipelineEvent::Conversation {
            text: "Building it.".into()
        }));
        let first = &qiniu.requests()[0];
        assert_eq!(first.messages.len(), 1);
    }

    #[tokio::test]
    async fn authentication_failure_is_fatal() {
        let qiniu = ScriptedProvider::repeating(
            "qiniu",
            Script::StartError(ProviderError::provider("qiniu", "invalid api key", Some(401))),
        );
        let (outcome, events) = run(
            &pipeline(&qiniu, config()),
            GenerationRequest::new("qwen3-coder", "x"),
        )
        .await;
        assert!(matches!(outcome, GenerationOutcome::Fatal { .. }));
        assert_eq!(qiniu.calls(), 1);
        assert_single_terminal(&events);
    }

    #[tokio::test]
    async fn run_budget_returns_partial_output_with_timeout_issue() {
        let qiniu = ScriptedProvider::new(
            "qiniu",
            vec![Script::EventsThenStall(vec![forge_harness::ProviderEvent::TextDelta {
                text: "<file path=\"src/App.jsx\">export default function App() {".into(),
            }])],
        );
        let mut config = config();
        config.timeouts.run_budget_ms = 100;
        let (outcome, events) = run(
            &pipeline(&qiniu, config),
            GenerationRequest::new("qwen3-coder", "x"),
        )
        .await;
        let GenerationOutcome::Complete(result) = outcome else {
            panic!("expected partial output");
        };
        let types: Vec<_> = result.issues.iter().map(|i| i.issue_type).collect();
        assert!(types.contains(&IssueType::Timeout));
        assert!(types.contains(&IssueType::TruncatedFile));
        assert_eq!(result.artifacts.len(), 1);
        assert!(!result.artifacts[0].closed);
        assert_single_terminal(&events);
    }

    #[tokio::test]
    async fn run_budget_without_output_is_fatal() {
        let qiniu = ScriptedProvider::new("qiniu", vec![Script::EventsThenStall(Vec::new())]);
        let mut config = config();
        config.timeouts.run_budget_ms = 50;
        let (outcome, events) = run(
            &pipeline(&qiniu, config),
            GenerationRequest::new("qwen3-coder", "x"),
        )
        .await;
        assert!(
            matches!(outcome, GenerationOutcome::Fatal { ref message } if message.contains("budget"))
        );
        assert_single_terminal(&events);
    }

    #[tokio::test]
    async fn disabled_auto_fix_reports_issues_without_follow_ups() {
        let qiniu = ScriptedProvider::new(
            "qiniu",
            vec![Script::stop(
                "<file path=\"src/App.jsx\">import Header from './components/Header';\nexport default function App() { return <Header />; }</file>",
            )],
        );
        let mut config = config();
        config.auto_fix.enabled = false;
        let (outcome, _) = run(
            &pipeline(&qiniu, config),
            GenerationRequest::new("qwen3-coder", "x"),
        )
        .await;
        let GenerationOutcome::Complete(result) = outcome else {
            panic!("expected a complete result");
        };
        assert_eq!(qiniu.calls(), 1);
        assert_eq!(result.error_count(), 1);
        assert!(result.issues.iter().any(|i| {
            i.issue_type == IssueType::MissingImport
                && i.suggestion.as_deref() == Some("src/components/Header.jsx")
        }));
    }

    struct FailingAnalyzer;

    #[async_trait::async_trait]
    impl EditIntentAnalyzer for FailingAnalyzer {
        async fn analyze(
            &self,
            _instructions: &str,
            _manifest: &FileManifest,
        ) -> Result<EditIntent, CollaboratorError> {
            Err(CollaboratorError {
                collaborator: "intent analyzer",
                message: "upstream returned 500".into(),
            })
        }
    }

    struct StaticFiles(BTreeMap<String, String>);

    #[async_trait::async_trait]
    impl FileManifestProvider for StaticFiles {
        async fn manifest(&self) -> Result<FileManifest, CollaboratorError> {
            Ok(FileManifest {
                paths: self.0.keys().cloned().collect(),
            })
        }

        async fn get_contents(&self, paths: &[String]) -> Result<PathIndexedContent, CollaboratorError> {
            Ok(self
                .0
                .iter()
                .filter(|(path, _)| paths.contains(*path))
                .map(|(path, body)| (path.clone(), body.clone()))
                .collect())
        }
    }

    #[tokio::test]
    async fn edit_falls_back_to_whole_manifest_when_analysis_fails() {
        let qiniu = ScriptedProvider::new(
            "qiniu",
            vec![Script::stop(
                "<edit target_file=\"src/App.jsx\"><instructions>fetch data</instructions><update>import axios from 'axios';\nimport Header from './components/Header';</update></edit>",
            )],
        );
        let files = BTreeMap::from([
            (
                "src/App.jsx".to_string(),
                "export default function App() { return null; }".to_string(),
            ),
            (
                "src/components/Header.jsx".to_string(),
                "export default function Header() { return <h1 />; }".to_string(),
            ),
        ]);
        let pipeline = GenerationPipeline::builder()
            .harness(harness_with(&[qiniu.clone()]))
            .config(config())
            .intent_analyzer(Arc::new(FailingAnalyzer))
            .file_manifest(Arc::new(StaticFiles(files)))
            .build()
            .expect("pipeline");
        let mut request = GenerationRequest::new("qwen3-coder", "load data with axios");
        request.is_edit = true;

        let (outcome, events) = run(&pipeline, request).await;
        let GenerationOutcome::Complete(result) = outcome else {
            panic!("expected a complete result");
        };
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Status { message } if message.contains("using the whole manifest")
        )));
        let prompt = &qiniu.requests()[0].messages[0].content;
        assert!(prompt.contains("<file path=\"src/components/Header.jsx\">"));
        assert_eq!(result.packages, vec!["axios".to_string()]);
        assert_eq!(result.error_count(), 0, "{:?}", result.issues);
        let edit = &result.artifacts[0];
        assert_eq!(edit.kind, ArtifactKind::Edit);
        assert_eq!(edit.instructions.as_deref(), Some("fetch data"));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.continuation.max_rounds = 0;
        let built = GenerationPipeline::builder()
            .harness(harness_with(&[ScriptedProvider::new("qiniu", Vec::new())]))
            .config(config)
            .build();
        assert!(built.is_err());
        assert!(GenerationPipeline::builder().build().is_err());
    }
}
