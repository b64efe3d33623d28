//! Post-stream audit of the assembled artifact set.
//!
//! Runs once after every continuation round finished, and again after each
//! auto-fix Repair step. Produces issues only; it never edits artifacts.

pub mod imports;
mod typos;

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::artifact::{Artifact, ArtifactKind, ArtifactSet};
use crate::issue::{Issue, IssueType, Severity};
use crate::judge::{BracketKind, CompletenessJudge, SourceKind, TruncationReason};

use self::imports::{
    SCRIPT_EXTENSIONS, expand_known, extension, find_imports, join_relative, parent_dir,
    resolution_candidates,
};

const ENTRY_FILES: [&str; 4] = ["src/App.jsx", "src/App.tsx", "App.jsx", "App.tsx"];
const BASE_STYLESHEETS: [&str; 2] = ["src/index.css", "index.css"];

#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub is_edit: bool,
    /// Paths that exist outside this run (the edit scope's prior files).
    pub prior_paths: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Auditor {
    judge: CompletenessJudge,
}

impl Auditor {
    pub fn new(judge: CompletenessJudge) -> Self {
        Self { judge }
    }

    pub fn judge(&self) -> &CompletenessJudge {
        &self.judge
    }

    pub fn audit(&self, artifacts: &ArtifactSet, ctx: &AuditContext) -> Vec<Issue> {
        let mut issues = Vec::new();
        let known = expand_known(
            artifacts
                .paths()
                .chain(ctx.prior_paths.iter().map(String::as_str)),
        );
        let uses_typescript = artifacts
            .paths()
            .any(|p| p.ends_with(".ts") || p.ends_with(".tsx"));

        for artifact in artifacts.source_units() {
            let Some(path) = artifact.path() else {
                continue;
            };
            if let Some(issue) = self.truncation_issue(artifact, path) {
                issues.push(issue);
            }
            if matches!(artifact.kind, ArtifactKind::File | ArtifactKind::Edit) && is_script(path) {
                issues.extend(missing_imports(artifact, path, &known, uses_typescript));
                issues.extend(typos::find_typos(path, &artifact.body));
            }
        }

        if let Some(cycle) = first_cycle(artifacts) {
            issues.push(
                Issue::warning(
                    IssueType::CircularDependency,
                    format!("circular import: {}", cycle.join(" -> ")),
                )
                .at(cycle[0].clone()),
            );
        }

        if !ctx.is_edit {
            issues.extend(required_files(artifacts, &ctx.prior_paths, uses_typescript));
        }

        debug!(
            artifacts = artifacts.len(),
            issues = issues.len(),
            errors = crate::issue::error_count(&issues),
            "audit finished"
        );
        issues
    }

    fn truncation_issue(&self, artifact: &Artifact, path: &str) -> Option<Issue> {
        // Edit bodies are replacement snippets, not whole files; only the
        // boundary rule applies to them.
        let findings = match artifact.kind {
            ArtifactKind::Edit => {
                self.judge
                    .findings_for(SourceKind::Other, &artifact.body, artifact.closed)
            }
            _ => self.judge.findings(artifact),
        };
        let first = findings.first()?;
        let severity = if findings == [TruncationReason::Unbalanced(BracketKind::Square)] {
            Severity::Warning
        } else {
            Severity::Error
        };
        let reasons = findings
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let issue = Issue::new(
            IssueType::TruncatedFile,
            severity,
            format!("{path} appears truncated: {reasons}"),
        )
        .at(path);
        Some(match first {
            TruncationReason::MissingClosingBoundary => {
                issue.with_suggestion(format!("regenerate {path} completely"))
            }
            _ => issue,
        })
    }
}

fn is_script(path: &str) -> bool {
    matches!(
        SourceKind::from_path(path),
        SourceKind::Script | SourceKind::MarkupScript
    )
}

fn missing_imports(
    artifact: &Artifact,
    path: &str,
    known: &HashSet<String>,
    uses_typescript: bool,
) -> Vec<Issue> {
    let dir = parent_dir(path);
    let mut seen = HashSet::new();
    let mut issues = Vec::new();
    for import in find_imports(&artifact.body) {
        if !import.is_relative() || import.is_asset() {
            continue;
        }
        let base = join_relative(dir, &import.specifier);
        if resolution_candidates(&base).iter().any(|c| known.contains(c)) {
            continue;
        }
        let suggestion = suggested_path(&base, path, uses_typescript);
        if !seen.insert(suggestion.clone()) {
            continue;
        }
        issues.push(
            Issue::error(
                IssueType::MissingImport,
                format!(
                    "{path} imports '{}' but no generated file provides it",
                    import.specifier
                ),
            )
            .at(path)
            .with_suggestion(suggestion)
            .on_line(import.line),
        );
    }
    issues
}

/// Best-guess path for an unresolved import of `base` made from `importer`.
fn suggested_path(base: &str, importer: &str, uses_typescript: bool) -> String {
    if extension(base).is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext)) {
        return base.to_string();
    }
    let ext = match extension(importer).filter(|ext| SCRIPT_EXTENSIONS.contains(ext)) {
        Some(ext) => ext,
        None if uses_typescript => ".tsx",
        None => ".jsx",
    };
    format!("{base}{ext}")
}

/// Actual artifact path an import of `base` lands on, if any.
fn resolve_in_set(artifacts: &ArtifactSet, base: &str) -> Option<String> {
    resolution_candidates(base).into_iter().find_map(|candidate| {
        if artifacts.contains_path(&candidate) {
            return Some(candidate);
        }
        let toggled = match candidate.strip_prefix("src/") {
            Some(rest) => rest.to_string(),
            None => format!("src/{candidate}"),
        };
        artifacts.contains_path(&toggled).then_some(toggled)
    })
}

/// First import cycle among script files, in artifact order.
fn first_cycle(artifacts: &ArtifactSet) -> Option<Vec<String>> {
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    let mut order = Vec::new();
    for artifact in artifacts.source_units() {
        let Some(path) = artifact.path().filter(|p| is_script(p)) else {
            continue;
        };
        let dir = parent_dir(path);
        let edges = find_imports(&artifact.body)
            .into_iter()
            .filter(|i| i.is_relative() && !i.is_asset())
            .filter_map(|i| resolve_in_set(artifacts, &join_relative(dir, &i.specifier)))
            .filter(|target| target != path)
            .collect();
        graph.insert(path.to_string(), edges);
        order.push(path.to_string());
    }

    let mut done = HashSet::new();
    for start in &order {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(start, &graph, &mut stack, &mut done) {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    node: &str,
    graph: &HashMap<String, Vec<String>>,
    stack: &mut Vec<String>,
    done: &mut HashSet<String>,
) -> Option<Vec<String>> {
    if let Some(at) = stack.iter().position(|n| n == node) {
        let mut cycle = stack[at..].to_vec();
        cycle.push(node.to_string());
        return Some(cycle);
    }
    if done.contains(node) {
        return None;
    }
    stack.push(node.to_string());
    for next in graph.get(node).into_iter().flatten() {
        if let Some(cycle) = visit(next, graph, stack, done) {
            return Some(cycle);
        }
    }
    stack.pop();
    done.insert(node.to_string());
    None
}

fn required_files(
    artifacts: &ArtifactSet,
    prior_paths: &[String],
    uses_typescript: bool,
) -> Vec<Issue> {
    let component_like = artifacts
        .paths()
        .any(|p| p.contains("/components/") || p.ends_with(".jsx") || p.ends_with(".tsx"));
    if !component_like {
        return Vec::new();
    }
    let exists = |candidates: &[&str]| {
        candidates.iter().any(|c| {
            artifacts.contains_path(c) || prior_paths.iter().any(|p| p == c)
        })
    };

    let mut issues = Vec::new();
    if !exists(&ENTRY_FILES[..]) {
        let entry = if uses_typescript { "src/App.tsx" } else { "src/App.jsx" };
        issues.push(
            Issue::warning(
                IssueType::MissingRequiredFile,
                "critical: components were generated but the application entry file is missing",
            )
            .with_suggestion(entry),
        );
    }
    if !exists(&BASE_STYLESHEETS[..]) {
        issues.push(
            Issue::warning(
                IssueType::MissingRequiredFile,
                "base stylesheet is missing; styling may be incomplete",
            )
            .with_suggestion("src/index.css"),
        );
    }
    issues
}
