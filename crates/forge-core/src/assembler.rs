use tracing::{debug, warn};

use crate::artifact::{Artifact, ArtifactKind, ArtifactSet};
use crate::issue::{Issue, IssueType};
use crate::packages::{PackageLedger, parse_package_list};
use crate::scanner::{BlockTag, BoundaryScanner, Segment};

/// Notification raised while assembling, for the caller's progress output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyEvent {
    /// Narration flushed as an Explanation artifact.
    Narration(String),
    Opened {
        kind: ArtifactKind,
        path: Option<String>,
    },
    Completed {
        index: usize,
        kind: ArtifactKind,
        path: Option<String>,
    },
    /// Newly declared package (deduplicated across the run).
    Package(String),
}

#[derive(Debug, Clone)]
struct OpenBlock {
    index: usize,
    tag: BlockTag,
    sub: Option<BlockTag>,
    update: Option<String>,
}

/// Per-run record of everything derived from the model output.
///
/// Created at the start of one generation request, carried through every
/// continuation and auto-fix round, and dropped when the result is returned.
#[derive(Debug, Clone)]
pub struct StreamState {
    pub artifacts: ArtifactSet,
    /// Issues raised while assembling (unmatched boundaries).
    pub issues: Vec<Issue>,
    /// Completed backend rounds, continuation rounds included.
    pub rounds: u32,
    /// Invocation retries across all rounds.
    pub retries: u32,
    /// Auto-fix Repair steps taken.
    pub fix_iterations: u32,
    scanner: BoundaryScanner,
    narration: String,
    open: Option<OpenBlock>,
    packages: PackageLedger,
    /// Set between a cutoff and the next opening marker.
    resuming: bool,
}

impl StreamState {
    pub fn new(lookback_window: usize) -> Self {
        Self {
            artifacts: ArtifactSet::new(),
            issues: Vec::new(),
            rounds: 0,
            retries: 0,
            fix_iterations: 0,
            scanner: BoundaryScanner::new(lookback_window),
            narration: String::new(),
            open: None,
            packages: PackageLedger::default(),
            resuming: false,
        }
    }

    /// Feeds one raw delta through the scanner and assembles the segments.
    pub fn push_delta(&mut self, delta: &str) -> Vec<AssemblyEvent> {
        let mut events = Vec::new();
        for segment in self.scanner.push(delta) {
            self.apply(segment, &mut events);
        }
        events
    }

    /// Ends the stream: releases held-back text and flushes narration. An
    /// artifact still open stays in the set with `closed == false`.
    pub fn finish(&mut self) -> Vec<AssemblyEvent> {
        let mut events = Vec::new();
        for segment in self.scanner.finish() {
            self.apply(segment, &mut events);
        }
        if let Some(open) = self.open.as_ref() {
            let index = open.index;
            let update = open.update.clone();
            if let Some(artifact) = self.artifacts.get_mut(index) {
                if let Some(update) = update {
                    artifact.body = update;
                }
                warn!(
                    path = artifact.path().unwrap_or("-"),
                    "stream ended inside an open block"
                );
            }
        }
        self.flush_narration(&mut events);
        events
    }

    /// The artifact currently receiving text, if any.
    pub fn open_artifact(&self) -> Option<&Artifact> {
        self.open
            .as_ref()
            .and_then(|open| self.artifacts.get(open.index))
    }

    pub(crate) fn open_index(&self) -> Option<usize> {
        self.open.as_ref().map(|open| open.index)
    }

    pub(crate) fn open_tag(&self) -> Option<BlockTag> {
        self.open.as_ref().map(|open| open.tag)
    }

    pub(crate) fn open_sub_block(&self) -> Option<BlockTag> {
        self.open.as_ref().and_then(|open| open.sub)
    }

    pub(crate) fn open_update(&self) -> Option<&str> {
        self.open.as_ref().and_then(|open| open.update.as_deref())
    }

    /// Marks a cutoff. If the next opening marker re-opens the artifact that
    /// is still open, its body restarts instead of being force-closed.
    pub(crate) fn begin_resume(&mut self) {
        self.resuming = true;
    }

    /// Narration received since the last artifact, not yet flushed.
    pub(crate) fn pending_narration(&self) -> &str {
        &self.narration
    }

    /// Text the scanner holds back as a possible partial marker.
    pub(crate) fn held_back(&self) -> &str {
        self.scanner.lookback()
    }

    pub fn packages(&self) -> &[String] {
        self.packages.names()
    }

    pub(crate) fn declare_package(&mut self, name: &str) -> bool {
        self.packages.insert(name)
    }

    fn apply(&mut self, segment: Segment, events: &mut Vec<AssemblyEvent>) {
        match segment {
            Segment::Text(text) => self.append_text(&text),
            Segment::Open { tag, path, raw } => self.on_open(tag, path, raw, events),
            Segment::Close { tag, raw } => self.on_close(tag, raw, events),
        }
    }

    fn append_text(&mut self, text: &str) {
        let Some(open) = self.open.as_mut() else {
            self.narration.push_str(text);
            return;
        };
        match open.sub {
            Some(BlockTag::Update) => open.update.get_or_insert_with(String::new).push_str(text),
            Some(_) => {
                if let Some(artifact) = self.artifacts.get_mut(open.index) {
                    artifact
                        .instructions
                        .get_or_insert_with(String::new)
                        .push_str(text);
                }
            }
            None => {
                if let Some(artifact) = self.artifacts.get_mut(open.index) {
                    artifact.body.push_str(text);
                }
            }
        }
    }

    fn on_open(
        &mut self,
        tag: BlockTag,
        path: Option<String>,
        raw: String,
        events: &mut Vec<AssemblyEvent>,
    ) {
        let Some(kind) = tag.artifact_kind() else {
            self.on_sub_block_open(tag, raw);
            return;
        };

        let resuming = std::mem::take(&mut self.resuming);
        if let Some(open) = self.open.as_ref() {
            let current_path = self.artifacts.get(open.index).and_then(Artifact::path);
            if resuming && open.tag == tag && path.is_some() && current_path == path.as_deref() {
                // A continuation restarting the file it was cut off in.
                let index = open.index;
                if let Some(artifact) = self.artifacts.get_mut(index) {
                    artifact.body.clear();
                    artifact.instructions = None;
                }
                self.open = Some(OpenBlock {
                    index,
                    tag,
                    sub: None,
                    update: None,
                });
                debug!(path = path.as_deref().unwrap_or("-"), "block restarted");
                return;
            }
            self.force_close(events);
        }

        self.flush_narration(events);
        let artifact = Artifact::opened(kind, path.clone());
        let index = match path.as_deref().and_then(|p| self.artifacts.index_of(p)) {
            Some(existing) => {
                warn!(path = path.as_deref().unwrap_or("-"), "path emitted twice; replacing in place");
                if let Some(slot) = self.artifacts.get_mut(existing) {
                    *slot = artifact;
                }
                existing
            }
            None => self.artifacts.push(artifact),
        };
        self.open = Some(OpenBlock {
            index,
            tag,
            sub: None,
            update: None,
        });
        events.push(AssemblyEvent::Opened { kind, path });
    }

    fn on_sub_block_open(&mut self, tag: BlockTag, raw: String) {
        let in_edit = matches!(
            self.open.as_ref(),
            Some(open) if open.tag == BlockTag::Edit && open.sub.is_none()
        );
        if !in_edit {
            self.record_unmatched(format!("{raw} outside an edit block"));
            self.append_text(&raw);
            return;
        }
        if let Some(open) = self.open.as_mut() {
            open.sub = Some(tag);
            if tag == BlockTag::Update {
                open.update.get_or_insert_with(String::new);
            }
        }
    }

    fn on_close(&mut self, tag: BlockTag, raw: String, events: &mut Vec<AssemblyEvent>) {
        let Some((open_tag, open_sub)) = self.open.as_ref().map(|open| (open.tag, open.sub)) else {
            self.record_unmatched(format!("{raw} with no open block"));
            self.append_text(&raw);
            return;
        };

        if tag.is_sub_block() {
            if open_sub == Some(tag) {
                if let Some(open) = self.open.as_mut() {
                    open.sub = None;
                }
            } else {
                self.record_unmatched(format!("{raw} does not close the current block"));
                self.append_text(&raw);
            }
            return;
        }

        if open_tag != tag || open_sub.is_some() {
            self.record_unmatched(format!("{raw} does not close <{}>", open_tag.name()));
            self.append_text(&raw);
            return;
        }

        self.close_open(false, events);
    }

    fn force_close(&mut self, events: &mut Vec<AssemblyEvent>) {
        let path = self
            .open_artifact()
            .and_then(Artifact::path)
            .map(str::to_string);
        let tag = self.open.as_ref().map(|open| open.tag.name()).unwrap_or("block");
        let mut issue = Issue::warning(
            IssueType::UnmatchedBoundary,
            format!("<{tag}> was still open when the next block began"),
        );
        if let Some(path) = path.as_deref() {
            issue = issue.at(path);
        }
        warn!(path = path.as_deref().unwrap_or("-"), "block force-closed by a new opening marker");
        self.issues.push(issue);
        self.close_open(true, events);
    }

    fn close_open(&mut self, forced: bool, events: &mut Vec<AssemblyEvent>) {
        let Some(open) = self.open.take() else {
            return;
        };
        let Some(artifact) = self.artifacts.get_mut(open.index) else {
            return;
        };
        if let Some(update) = open.update {
            artifact.body = update;
        }
        artifact.body = artifact.body.trim().to_string();
        if let Some(instructions) = artifact.instructions.take() {
            let trimmed = instructions.trim();
            artifact.instructions = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        artifact.closed = true;
        artifact.forced_close = forced;

        let kind = artifact.kind;
        let path = artifact.path.clone();
        let names = if kind == ArtifactKind::PackageDeclaration {
            parse_package_list(&artifact.body)
        } else {
            Vec::new()
        };
        debug!(index = open.index, path = path.as_deref().unwrap_or("-"), ?kind, "block closed");
        events.push(AssemblyEvent::Completed {
            index: open.index,
            kind,
            path,
        });
        for name in names {
            if self.packages.insert(&name) {
                events.push(AssemblyEvent::Package(name));
            }
        }
    }

    fn flush_narration(&mut self, events: &mut Vec<AssemblyEvent>) {
        let text = std::mem::take(&mut self.narration);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.artifacts.push(Artifact::explanation(trimmed));
        events.push(AssemblyEvent::Narration(trimmed.to_string()));
    }

    fn record_unmatched(&mut self, message: String) {
        let mut issue = Issue::warning(IssueType::UnmatchedBoundary, message);
        if let Some(path) = self.open_artifact().and_then(Artifact::path) {
            issue = issue.at(path);
        }
        self.issues.push(issue);
    }
}

/// Parses a complete text in one go. Used for follow-up generations.
pub fn assemble_text(text: &str, lookback_window: usize) -> StreamState {
    let mut state = StreamState::new(lookback_window);
    state.push_delta(text);
    state.finish();
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Severity;

    const SAMPLE: &str = "Building your app.\n<file path=\"src/App.jsx\">\nimport Header from './components/Header';\nexport default function App() {\n  return <div><Header /></div>;\n}\n</file>\n<package>react-icons</package>\nNow the header.\n<file path=\"src/components/Header.jsx\">export default function Header(){return <h1>Hi</h1>;}</file>\n<packages>\nframer-motion, react-icons\nzustand\n</packages>\nDone!";

    fn artifacts_of(state: &StreamState) -> Vec<Artifact> {
        state.artifacts.iter().cloned().collect()
    }

    #[test]
    fn assembles_files_narration_and_packages_in_order() {
        let state = assemble_text(SAMPLE, 256);
        let kinds: Vec<_> = state.artifacts.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ArtifactKind::Explanation,
                ArtifactKind::File,
                ArtifactKind::PackageDeclaration,
                ArtifactKind::Explanation,
                ArtifactKind::File,
                ArtifactKind::PackageDeclaration,
                ArtifactKind::Explanation,
            ]
        );
        let app = state.artifacts.by_path("src/App.jsx").expect("app");
        assert!(app.closed);
        assert!(app.body.starts_with("import Header"));
        assert!(app.body.ends_with('}'));
        assert_eq!(
            state.packages(),
            &["react-icons", "framer-motion", "zustand"]
        );
        assert!(state.issues.is_empty());
    }

    #[test]
    fn any_partition_yields_identical_artifacts() {
        let whole = artifacts_of(&assemble_text(SAMPLE, 256));

        let mut by_char = StreamState::new(256);
        for ch in SAMPLE.chars() {
            by_char.push_delta(&ch.to_string());
        }
        by_char.finish();
        assert_eq!(artifacts_of(&by_char), whole);

        let boundaries: Vec<usize> = SAMPLE.char_indices().map(|(i, _)| i).collect();
        for &split in boundaries.iter().step_by(3) {
            for &second in boundaries.iter().filter(|&&b| b > split).step_by(41) {
                let mut state = StreamState::new(256);
                state.push_delta(&SAMPLE[..split]);
                state.push_delta(&SAMPLE[split..second]);
                state.push_delta(&SAMPLE[second..]);
                state.finish();
                assert_eq!(artifacts_of(&state), whole, "split at {split}/{second}");
            }
        }
    }

    #[test]
    fn open_while_open_force_closes_previous() {
        let state = assemble_text(
            "<file path=\"a.js\">const a = 1;\n<file path=\"b.js\">const b = 2;</file>",
            256,
        );
        let a = state.artifacts.by_path("a.js").expect("a");
        assert!(a.closed && a.forced_close);
        assert_eq!(a.body, "const a = 1;");
        assert_eq!(state.issues.len(), 1);
        assert_eq!(state.issues[0].issue_type, IssueType::UnmatchedBoundary);
        assert_eq!(state.issues[0].artifact_path.as_deref(), Some("a.js"));
    }

    #[test]
    fn stream_end_leaves_artifact_open() {
        let state = assemble_text(
            "<file path=\"src/App.jsx\">export default function App(){return <div>",
            256,
        );
        let app = state.artifacts.by_path("src/App.jsx").expect("app");
        assert!(!app.closed);
        assert_eq!(app.body, "export default function App(){return <div>");
        assert!(state.open_artifact().is_some());
    }

    #[test]
    fn edit_body_is_update_snippet() {
        let state = assemble_text(
            "<edit target_file=\"src/components/Header.jsx\">\n<instructions>\nMake the title blue\n</instructions>\n<update>\n<h1 className=\"text-blue-500\">Hi</h1>\n</update>\n</edit>",
            256,
        );
        let edit = state
            .artifacts
            .by_path("src/components/Header.jsx")
            .expect("edit");
        assert_eq!(edit.kind, ArtifactKind::Edit);
        assert_eq!(edit.instructions.as_deref(), Some("Make the title blue"));
        assert_eq!(edit.body, "<h1 className=\"text-blue-500\">Hi</h1>");
    }

    #[test]
    fn stray_markers_become_text_with_warning() {
        let state = assemble_text(
            "<file path=\"a.js\">x</edit> y</file><update>z",
            256,
        );
        let a = state.artifacts.by_path("a.js").expect("a");
        assert_eq!(a.body, "x</edit> y");
        assert_eq!(state.issues.len(), 2);
        assert!(state.issues.iter().all(|i| i.severity == Severity::Warning));
        let narration = state
            .artifacts
            .iter()
            .find(|a| a.kind == ArtifactKind::Explanation)
            .expect("narration");
        assert_eq!(narration.body, "<update>z");
    }

    #[test]
    fn continuation_text_extends_open_artifact() {
        let mut state = StreamState::new(256);
        state.push_delta("<file path=\"a.js\">function a() {\n");
        assert!(state.open_artifact().is_some());
        state.push_delta("  return 1;\n}\n</file>");
        state.finish();
        let a = state.artifacts.by_path("a.js").expect("a");
        assert!(a.closed);
        assert_eq!(a.body, "function a() {\n  return 1;\n}");
    }

    #[test]
    fn reopening_the_open_path_after_a_cutoff_restarts_its_body() {
        let mut state = StreamState::new(256);
        state.push_delta("<file path=\"a.js\">partial");
        state.begin_resume();
        state.push_delta("\n<file path=\"a.js\">complete</file>");
        state.finish();
        assert_eq!(state.artifacts.len(), 1);
        assert_eq!(state.artifacts.get(0).map(|a| a.body.as_str()), Some("complete"));
        assert!(state.issues.is_empty());
    }

    #[test]
    fn reopening_the_open_path_mid_stream_is_unmatched() {
        let state = assemble_text(
            "<file path=\"a.js\">const a = 1;\n<file path=\"a.js\">const b = 2;</file>",
            256,
        );
        assert_eq!(state.artifacts.len(), 1);
        let a = state.artifacts.by_path("a.js").expect("a");
        assert!(a.closed);
        assert_eq!(a.body, "const b = 2;");
        assert_eq!(state.issues.len(), 1);
        assert_eq!(state.issues[0].issue_type, IssueType::UnmatchedBoundary);
        assert_eq!(state.issues[0].artifact_path.as_deref(), Some("a.js"));
    }

    #[test]
    fn whitespace_narration_is_dropped() {
        let state = assemble_text("  \n<file path=\"a.css\">a{}</file>\n\n", 256);
        assert_eq!(state.artifacts.len(), 1);
    }
}
