//! Auto-Fix Loop: `Check → (no errors: Done) | (errors: Repair → Check)`.
//!
//! A Repair step issues at most two narrowly scoped follow-ups: one for every
//! missing import target, one for the highest-priority truncated file. Each
//! goes through the router on its own, so a failing follow-up only costs its
//! own repair. A Repair that merges nothing ends the loop.

use forge_harness::{Message, Session};
use tracing::{info, warn};

use crate::artifact::{Artifact, ArtifactKind, ArtifactSet, Upsert};
use crate::assembler::{StreamState, assemble_text};
use crate::auditor::{AuditContext, Auditor};
use crate::error::{PipelineError, RouteError};
use crate::events::{EventSink, PipelineEvent, RepairTarget};
use crate::issue::{Issue, IssueType, error_count};
use crate::prompts::{FIX_SYSTEM_PROMPT, complete_file_prompt, missing_files_prompt};
use crate::router::{CallSpec, ProviderRouter};

/// What one Repair step asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairPlan {
    /// Inferred paths of unresolved imports, deduplicated, in issue order.
    pub missing: Vec<String>,
    pub truncated: Option<String>,
}

impl RepairPlan {
    pub fn from_issues(issues: &[Issue], artifacts: &ArtifactSet) -> Self {
        let mut missing: Vec<String> = Vec::new();
        for issue in issues
            .iter()
            .filter(|i| i.is_error() && i.issue_type == IssueType::MissingImport)
        {
            if let Some(path) = issue.suggestion.as_deref()
                && !artifacts.contains_path(path)
                && !missing.iter().any(|m| m == path)
            {
                missing.push(path.to_string());
            }
        }

        let truncated_files: Vec<&Artifact> = artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::File)
            .filter(|a| {
                issues.iter().any(|i| {
                    i.is_error()
                        && i.issue_type == IssueType::TruncatedFile
                        && i.artifact_path.as_deref() == a.path()
                })
            })
            .collect();
        let truncated = truncated_files
            .iter()
            .find(|a| !a.closed)
            .or_else(|| truncated_files.first())
            .and_then(|a| a.path())
            .map(str::to_string);

        Self { missing, truncated }
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.truncated.is_none()
    }
}

pub struct AutoFixLoop<'a> {
    router: &'a ProviderRouter,
    session: &'a Session,
    sink: &'a EventSink,
    model_id: &'a str,
    template: CallSpec,
    auditor: &'a Auditor,
    max_iterations: u32,
    lookback_window: usize,
}

impl<'a> AutoFixLoop<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: &'a ProviderRouter,
        session: &'a Session,
        sink: &'a EventSink,
        model_id: &'a str,
        template: CallSpec,
        auditor: &'a Auditor,
        max_iterations: u32,
        lookback_window: usize,
    ) -> Self {
        Self {
            router,
            session,
            sink,
            model_id,
            template,
            auditor,
            max_iterations,
            lookback_window,
        }
    }

    /// Audits `state`, repairing until no errors remain, the bound is hit or
    /// a Repair makes no progress. Returns the final audit.
    pub async fn run(
        &self,
        original: &str,
        state: &mut StreamState,
        ctx: &AuditContext,
    ) -> Result<Vec<Issue>, PipelineError> {
        let mut issues = self.auditor.audit(&state.artifacts, ctx);
        let mut repairs = 0;
        while repairs < self.max_iterations && error_count(&issues) > 0 {
            let plan = RepairPlan::from_issues(&issues, &state.artifacts);
            if plan.is_empty() {
                info!(errors = error_count(&issues), "remaining errors have no repair");
                break;
            }
            repairs += 1;
            state.fix_iterations += 1;
            let merged = self.repair(state.fix_iterations, &plan, original, state).await?;
            issues = self.auditor.audit(&state.artifacts, ctx);
            info!(
                iteration = state.fix_iterations,
                merged,
                errors = error_count(&issues),
                "repair step finished"
            );
            if merged == 0 {
                break;
            }
        }
        Ok(issues)
    }

    /// Runs both follow-ups of `plan`. Returns how many artifacts were merged.
    async fn repair(
        &self,
        iteration: u32,
        plan: &RepairPlan,
        original: &str,
        state: &mut StreamState,
    ) -> Result<usize, PipelineError> {
        let mut merged = 0;
        if !plan.missing.is_empty() {
            self.sink
                .send(PipelineEvent::Repair {
                    iteration,
                    target: RepairTarget::MissingFiles,
                    paths: plan.missing.clone(),
                })
                .await?;
            let prompt = missing_files_prompt(original, &plan.missing, &state.artifacts);
            if let Some(text) = self.follow_up(prompt, state).await? {
                merged += self.merge_files(&text, state).await?;
            }
        }

        if let Some(path) = plan.truncated.as_deref() {
            self.sink
                .send(PipelineEvent::Repair {
                    iteration,
                    target: RepairTarget::TruncatedFile,
                    paths: vec![path.to_string()],
                })
                .await?;
            let partial = state
                .artifacts
                .by_path(path)
                .map(|a| a.body.clone())
                .unwrap_or_default();
            let prompt = complete_file_prompt(original, path, &partial);
            if let Some(text) = self.follow_up(prompt, state).await?
                && let Some(body) = completed_body(&text, path, self.lookback_window)
            {
                state.artifacts.upsert(Artifact::file(path, body));
                self.sink
                    .send(PipelineEvent::Artifact {
                        kind: ArtifactKind::File,
                        path: Some(path.to_string()),
                    })
                    .await?;
                merged += 1;
            }
        }
        Ok(merged)
    }

    /// Collects one follow-up to completion. Backend failures are logged and
    /// reported as `None`; only a closed output channel is an error.
    async fn follow_up(
        &self,
        prompt: String,
        state: &mut StreamState,
    ) -> Result<Option<String>, PipelineError> {
        let spec = CallSpec {
            system_prompt: Some(FIX_SYSTEM_PROMPT.to_string()),
            messages: vec![Message::user(prompt)],
            ..self.template.clone()
        };
        let routed = match self
            .router
            .open_stream(self.session, self.model_id, &spec, self.sink)
            .await
        {
            Ok(routed) => routed,
            Err(RouteError::OutputClosed) => return Err(PipelineError::OutputClosed),
            Err(err) => {
                warn!(error = %err, "fix follow-up could not start");
                self.sink.status(format!("fix attempt skipped: {err}")).await?;
                return Ok(None);
            }
        };
        state.retries += routed.retries;
        match routed.stream.finish().await {
            Ok(output) => Ok(Some(output.text())),
            Err(err) => {
                warn!(error = %err, "fix follow-up failed");
                self.sink.status(format!("fix attempt failed: {err}")).await?;
                Ok(None)
            }
        }
    }

    /// Merges every closed file of a follow-up, plus its package declarations.
    async fn merge_files(&self, text: &str, state: &mut StreamState) -> Result<usize, PipelineError> {
        let parsed = assemble_text(text, self.lookback_window);
        let mut merged = 0;
        for artifact in parsed.artifacts.iter() {
            if artifact.kind != ArtifactKind::File || !artifact.closed {
                continue;
            }
            let path = artifact.path.clone();
            match state.artifacts.upsert(artifact.clone()) {
                Upsert::Replaced(_) => info!(path = path.as_deref().unwrap_or("-"), "fix replaced file"),
                Upsert::Appended(_) => info!(path = path.as_deref().unwrap_or("-"), "fix added file"),
            }
            self.sink
                .send(PipelineEvent::Artifact {
                    kind: ArtifactKind::File,
                    path,
                })
                .await?;
            merged += 1;
        }
        for name in parsed.packages() {
            if state.declare_package(name) {
                self.sink
                    .send(PipelineEvent::Package { name: name.clone() })
                    .await?;
            }
        }
        Ok(merged)
    }
}

/// Full content for `path` out of a truncated-file follow-up. Prefers the
/// block for `path`, then any closed file, then a fenced code block. Bare
/// prose is never taken as file content.
fn completed_body(text: &str, path: &str, lookback_window: usize) -> Option<String> {
    let parsed = assemble_text(text, lookback_window);
    let closed_file = |a: &&Artifact| a.kind == ArtifactKind::File && a.closed;
    if let Some(artifact) = parsed
        .artifacts
        .by_path(path)
        .filter(closed_file)
        .or_else(|| parsed.artifacts.iter().find(closed_file))
    {
        return Some(artifact.body.clone());
    }
    if parsed.artifacts.iter().any(|a| a.kind == ArtifactKind::File) {
        // A file block that never closed: truncated again.
        return None;
    }
    let body = fenced_code(text)?.trim();
    (!body.is_empty()).then(|| body.to_string())
}

fn fenced_code(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use forge_harness::SessionConfig;

    use super::*;
    use crate::router::{RetryPolicy, RouteTable};
    use crate::testing::{Script, ScriptedProvider, harness_with};

    const APP: &str = "<file path=\"src/App.jsx\">import Header from './components/Header';\nimport Footer from './components/Footer';\nimport './index.css';\nexport default function App() {\n  return <div><Header /><Footer /></div>;\n}\n</file>\n<file path=\"src/index.css\">body { margin: 0; }</file>";

    fn template() -> CallSpec {
        CallSpec {
            system_prompt: None,
            messages: Vec::new(),
            timeout: Duration::from_secs(5),
            max_output_tokens: 64,
            temperature: None,
        }
    }

    async fn fix(
        provider: &Arc<ScriptedProvider>,
        state: &mut StreamState,
        max_iterations: u32,
    ) -> (Vec<Issue>, Vec<PipelineEvent>) {
        let router = ProviderRouter::new(
            harness_with(&[provider.clone()]),
            RouteTable::default_table(false),
            RetryPolicy::none(),
        );
        let session = router.harness().session(SessionConfig::named("fix"));
        let (sink, mut rx) = EventSink::channel(256);
        let auditor = Auditor::default();
        let fixer = AutoFixLoop::new(
            &router,
            &session,
            &sink,
            "qwen3-coder",
            template(),
            &auditor,
            max_iterations,
            256,
        );
        let issues = fixer
            .run("landing page", state, &AuditContext::default())
            .await
            .expect("fix loop");
        drop(fixer);
        drop(sink);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (issues, events)
    }

    fn repairs(events: &[PipelineEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Repair { .. }))
            .count()
    }

    #[tokio::test]
    async fn supplying_missing_files_converges() {
        let mut state = assemble_text(APP, 256);
        let qiniu = ScriptedProvider::new(
            "qiniu",
            vec![Script::stop(
                "<file path=\"src/components/Header.jsx\">export default function Header() { return <h1>Hi</h1>; }</file>\n<file path=\"src/components/Footer.jsx\">export default function Footer() { return <footer />; }</file>\n<package>react-icons</package>",
            )],
        );
        let (issues, events) = fix(&qiniu, &mut state, 2).await;
        assert_eq!(error_count(&issues), 0, "{issues:?}");
        assert_eq!(state.fix_iterations, 1);
        assert_eq!(qiniu.calls(), 1);
        assert!(state.artifacts.contains_path("src/components/Header.jsx"));
        assert_eq!(state.packages(), &["react-icons"]);
        assert!(events.contains(&PipelineEvent::Repair {
            iteration: 1,
            target: RepairTarget::MissingFiles,
            paths: vec![
                "src/components/Header.jsx".into(),
                "src/components/Footer.jsx".into()
            ],
        }));
        let prompt = &qiniu.requests()[0].messages[0].content;
        assert!(prompt.contains("- src/components/Footer.jsx"));
        assert!(prompt.contains("<file path=\"src/App.jsx\">"));
    }

    #[tokio::test]
    async fn backend_without_files_stops_after_one_repair() {
        let mut state = assemble_text(APP, 256);
        let qiniu = ScriptedProvider::repeating("qiniu", Script::stop("I cannot help with that."));
        let (issues, events) = fix(&qiniu, &mut state, 3).await;
        assert_eq!(repairs(&events), 1);
        assert_eq!(state.fix_iterations, 1);
        assert_eq!(qiniu.calls(), 1);
        assert_eq!(error_count(&issues), 2);
    }

    #[tokio::test]
    async fn truncated_file_is_replaced_in_place() {
        let mut state = StreamState::new(256);
        state.push_delta("<file path=\"src/index.css\">body { margin: 0; }</file><file path=\"src/App.jsx\">export default function App() {\n  return <div>");
        state.finish();
        let qiniu = ScriptedProvider::new(
            "qiniu",
            vec![Script::stop(
                "<file path=\"App.jsx\">export default function App() {\n  return <div>Hello</div>;\n}</file>",
            )],
        );
        let (issues, events) = fix(&qiniu, &mut state, 2).await;
        assert_eq!(error_count(&issues), 0, "{issues:?}");
        let app = state.artifacts.get(1).expect("app slot");
        assert_eq!(app.path(), Some("src/App.jsx"));
        assert!(app.closed);
        assert!(app.body.ends_with("</div>;\n}"));
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Repair { target: RepairTarget::TruncatedFile, .. }
        )));
    }

    #[tokio::test]
    async fn prose_reply_leaves_truncated_file_untouched() {
        let mut state = StreamState::new(256);
        state.push_delta("<file path=\"src/index.css\">body { margin: 0; }</file><file path=\"src/App.jsx\">export default function App() {\n  return <div>");
        state.finish();
        let qiniu = ScriptedProvider::repeating(
            "qiniu",
            Script::stop("Sorry, I cannot complete that file."),
        );
        let (issues, events) = fix(&qiniu, &mut state, 2).await;
        let app = state.artifacts.by_path("src/App.jsx").expect("app");
        assert!(!app.closed);
        assert_eq!(app.body, "export default function App() {\n  return <div>");
        assert!(issues.iter().any(|i| i.issue_type == IssueType::TruncatedFile
            && i.artifact_path.as_deref() == Some("src/App.jsx")));
        assert_eq!(repairs(&events), 1);
        assert_eq!(qiniu.calls(), 1);
    }

    #[tokio::test]
    async fn failing_follow_up_is_not_fatal() {
        let mut state = assemble_text(APP, 256);
        let qiniu = ScriptedProvider::repeating("qiniu", Script::unavailable("qiniu"));
        let (issues, events) = fix(&qiniu, &mut state, 2).await;
        assert_eq!(error_count(&issues), 2);
        assert_eq!(repairs(&events), 1);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Status { message } if message.starts_with("fix attempt skipped")
        )));
    }

    #[test]
    fn plan_prefers_unclosed_files() {
        let mut state = StreamState::new(256);
        state.push_delta("<file path=\"a.js\">function a() {{{ </file><file path=\"b.js\">const b = (");
        state.finish();
        let issues = Auditor::default().audit(&state.artifacts, &AuditContext::default());
        let plan = RepairPlan::from_issues(&issues, &state.artifacts);
        assert_eq!(plan.truncated.as_deref(), Some("b.js"));
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn completed_body_falls_back_to_fenced_code() {
        let reply = "Here it is:\n```jsx\nexport const x = 1;\n```\n";
        assert_eq!(
            completed_body(reply, "x.jsx", 256).as_deref(),
            Some("export const x = 1;")
        );
        assert_eq!(completed_body("<file path=\"x.jsx\">export const", "x.jsx", 256), None);
        assert_eq!(completed_body("  ", "x.jsx", 256), None);
        assert_eq!(completed_body("Sorry, I cannot complete that file.", "x.jsx", 256), None);
    }
}
