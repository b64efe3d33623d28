//! Structural truncation heuristics for generated source files.
//!
//! Nothing here parses the target language. Bracket balance, markup tag
//! balance and dangling trailing tokens are enough to catch a provider
//! cutting a file short; false positives only cost an extra repair.

use std::fmt;

use serde::Serialize;

use crate::artifact::Artifact;
use crate::auditor::imports::extension;
use crate::config::JudgeConfig;

/// Family of a file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Script,
    MarkupScript,
    Markup,
    Stylesheet,
    Other,
}

impl SourceKind {
    pub fn from_path(path: &str) -> Self {
        let Some(ext) = extension(path) else {
            return SourceKind::Other;
        };
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "js" | "mjs" | "cjs" | "ts" | "mts" | "cts" => SourceKind::Script,
            "jsx" | "tsx" => SourceKind::MarkupScript,
            "html" | "htm" | "vue" | "svelte" => SourceKind::Markup,
            "css" | "scss" | "sass" | "less" => SourceKind::Stylesheet,
            _ => SourceKind::Other,
        }
    }

    pub fn is_source(self) -> bool {
        self != SourceKind::Other
    }

    fn has_markup(self) -> bool {
        matches!(self, SourceKind::MarkupScript | SourceKind::Markup)
    }

    fn checks_dangling(self) -> bool {
        matches!(
            self,
            SourceKind::Script | SourceKind::MarkupScript | SourceKind::Stylesheet
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketKind {
    Brace,
    Paren,
    Square,
}

impl BracketKind {
    fn pair(self) -> (char, char) {
        match self {
            BracketKind::Brace => ('{', '}'),
            BracketKind::Paren => ('(', ')'),
            BracketKind::Square => ('[', ']'),
        }
    }

    fn plural(self) -> &'static str {
        match self {
            BracketKind::Brace => "braces",
            BracketKind::Paren => "parentheses",
            BracketKind::Square => "brackets",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationReason {
    MissingClosingBoundary,
    Unbalanced(BracketKind),
    UnbalancedTags,
    DanglingSyntax,
    SeverelyTruncated,
}

impl fmt::Display for TruncationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TruncationReason::MissingClosingBoundary => f.write_str("missing closing boundary"),
            TruncationReason::Unbalanced(kind) => write!(f, "unbalanced {}", kind.plural()),
            TruncationReason::UnbalancedTags => f.write_str("unbalanced tags"),
            TruncationReason::DanglingSyntax => f.write_str("dangling syntax"),
            TruncationReason::SeverelyTruncated => f.write_str("severely truncated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Complete,
    Truncated(TruncationReason),
}

impl Verdict {
    pub fn is_truncated(&self) -> bool {
        matches!(self, Verdict::Truncated(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletenessJudge {
    config: JudgeConfig,
}

impl CompletenessJudge {
    pub fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// Verdict for a File or Edit artifact; the first finding wins.
    pub fn judge(&self, artifact: &Artifact) -> Verdict {
        match self.findings(artifact).first() {
            Some(reason) => Verdict::Truncated(*reason),
            None => Verdict::Complete,
        }
    }

    /// Every rule that fires, in precedence order.
    pub fn findings(&self, artifact: &Artifact) -> Vec<TruncationReason> {
        let kind = artifact
            .path()
            .map(SourceKind::from_path)
            .unwrap_or(SourceKind::Other);
        self.findings_for(kind, &artifact.body, artifact.closed)
    }

    pub fn findings_for(&self, kind: SourceKind, body: &str, closed: bool) -> Vec<TruncationReason> {
        let mut findings = Vec::new();
        if !closed {
            findings.push(TruncationReason::MissingClosingBoundary);
        }
        if !kind.is_source() {
            return findings;
        }

        for bracket in [BracketKind::Brace, BracketKind::Paren, BracketKind::Square] {
            let (open, close) = bracket.pair();
            let opened = body.matches(open).count();
            let closed = body.matches(close).count();
            if opened.abs_diff(closed) > self.config.bracket_tolerance {
                findings.push(TruncationReason::Unbalanced(bracket));
            }
        }

        if kind.has_markup() {
            let (opened, closed) = count_tags(body);
            if opened.abs_diff(closed) > self.config.tag_tolerance {
                findings.push(TruncationReason::UnbalancedTags);
            }
        }

        if kind.checks_dangling() && ends_dangling(body, kind) {
            findings.push(TruncationReason::DanglingSyntax);
        }

        if body.chars().count() < self.config.min_plausible_size
            && ["function", "class", "=>"].iter().any(|kw| body.contains(kw))
            && !body.contains('}')
        {
            findings.push(TruncationReason::SeverelyTruncated);
        }
        findings
    }
}

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Counts opening (non-self-closing) and closing element tags.
///
/// `</` followed by a letter or `>` always closes a tag. An opening `<` must
/// be followed by a letter or `>` and not preceded by an identifier, `)` or
/// `]`, which rules out generics and comparisons.
fn count_tags(body: &str) -> (usize, usize) {
    let chars: Vec<char> = body.chars().collect();
    let mut opened = 0;
    let mut closed = 0;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '<' {
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'/') {
            if chars.get(i + 2).is_some_and(|c| c.is_alphabetic() || *c == '>') {
                closed += 1;
            }
            i += 2;
            continue;
        }
        let prev = i.checked_sub(1).map(|p| chars[p]);
        if prev.is_some_and(|p| is_ident_char(p) || p == ')' || p == ']') {
            i += 1;
            continue;
        }
        match chars.get(i + 1) {
            Some('>') => {
                opened += 1;
                i += 2;
            }
            Some(c) if c.is_alphabetic() => {
                let name: String = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | ':'))
                    .collect();
                let (end, self_closing) = tag_end(&chars, i + 1);
                let void = VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str());
                if !self_closing && !void {
                    opened += 1;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    (opened, closed)
}

/// Finds the `>` ending a tag head, skipping quoted values and `{…}`
/// expressions. Returns the index after it and whether it was `/>`.
fn tag_end(chars: &[char], start: usize) -> (usize, bool) {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' | '`' => quote = Some(c),
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                '>' if depth == 0 => {
                    let self_closing = i > start && chars[i - 1] == '/';
                    return (i + 1, self_closing);
                }
                _ => {}
            },
        }
        i += 1;
    }
    (chars.len(), false)
}

fn ends_dangling(body: &str, kind: SourceKind) -> bool {
    let trimmed = body.trim_end();
    if trimmed.is_empty() {
        return false;
    }
    const TRAILING: [&str; 9] = [",", "{", "(", "[", "...", "/*", "//", "<", "</"];
    if TRAILING.iter().any(|t| trimmed.ends_with(t)) {
        return true;
    }
    // `name =` with nothing assigned; `==` and compound operators are not.
    if let Some(before_eq) = trimmed.strip_suffix('=')
        && before_eq.trim_end().chars().last().is_some_and(is_ident_char)
        && !before_eq.ends_with(['=', '!', '<', '>', '+', '-', '*', '/', '&', '|'])
    {
        return true;
    }
    kind == SourceKind::MarkupScript && ends_in_open_tag_head(trimmed)
}

/// `… <div className="x"` with no `>` after the last tag start.
fn ends_in_open_tag_head(text: &str) -> bool {
    let Some(at) = text.rfind('<') else {
        return false;
    };
    let prev = text[..at].chars().last();
    if prev.is_some_and(|p| is_ident_char(p) || p == ')' || p == ']') {
        return false;
    }
    let head = &text[at + 1..];
    head.chars().next().is_some_and(char::is_alphabetic) && !head.contains('>')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judge() -> CompletenessJudge {
        CompletenessJudge::default()
    }

    fn verdict(path: &str, body: &str) -> Verdict {
        judge().judge(&Artifact::file(path, body))
    }

    #[test]
    fn unclosed_artifact_is_missing_boundary_first() {
        let mut app = Artifact::file("src/App.jsx", "export default function App(){return <div>");
        app.closed = false;
        assert_eq!(
            judge().judge(&app),
            Verdict::Truncated(TruncationReason::MissingClosingBoundary)
        );
    }

    #[test]
    fn complete_component_passes() {
        let body = "import Header from './Header';\n\nexport default function App() {\n  const items = [1, 2].map((n) => <li key={n}>{n}</li>);\n  return (\n    <div className=\"app\">\n      <Header />\n      <ul>{items}</ul>\n      <br>\n    </div>\n  );\n}";
        assert_eq!(verdict("src/App.jsx", body), Verdict::Complete);
    }

    #[test]
    fn braces_beyond_tolerance_are_reported_by_kind() {
        let body = "function a() {\n  if (x) {\n    while (y) {\n      z();\n";
        assert_eq!(
            verdict("src/a.js", body),
            Verdict::Truncated(TruncationReason::Unbalanced(BracketKind::Brace))
        );
        assert_eq!(
            TruncationReason::Unbalanced(BracketKind::Brace).to_string(),
            "unbalanced braces"
        );
    }

    #[test]
    fn small_imbalance_is_tolerated() {
        assert_eq!(verdict("src/a.js", "const a = { b: { c: 1 };"), Verdict::Complete);
    }

    #[test]
    fn tag_mismatch_counts_only_markup_kinds() {
        let body = "const A = () => (\n  <div>\n    <section>\n      <p>hi";
        assert!(judge()
            .findings(&Artifact::file("src/A.jsx", body))
            .contains(&TruncationReason::UnbalancedTags));
        assert!(!judge()
            .findings(&Artifact::file("src/A.js", body))
            .contains(&TruncationReason::UnbalancedTags));
    }

    #[test]
    fn generics_and_comparisons_are_not_tags() {
        let body = "function f(a: Array<string>, n: number) {\n  return a.length<n && n < 3 ? <A/> : null;\n}";
        assert_eq!(count_tags(body), (0, 0));
    }

    #[test]
    fn arrow_inside_jsx_attribute_does_not_end_tag() {
        assert_eq!(count_tags("<button onClick={() => go()}>Go</button>"), (1, 1));
        assert_eq!(count_tags("<><Item /></>"), (1, 1));
    }

    #[test]
    fn text_inside_elements_does_not_hide_closing_tags() {
        let body = "export default function Card() {\n  return (\n    <div><h1>Title</h1><p>Some text</p><span>More</span></div>\n  );\n}";
        assert_eq!(count_tags(body), (4, 4));
        assert_eq!(verdict("src/Card.jsx", body), Verdict::Complete);
        assert_eq!(count_tags("<p>a <b>bold</b> c</p>"), (2, 2));
    }

    #[test]
    fn dangling_endings() {
        for body in [
            "const a = [1,\n  2,",
            "export const x = {",
            "const total =",
            "render(",
            "import { a, b } from './x';\n/*",
            "return (\n  <div className=\"card\"",
        ] {
            assert_eq!(
                verdict("src/x.jsx", body),
                Verdict::Truncated(TruncationReason::DanglingSyntax),
                "{body}"
            );
        }
        for body in ["const ok = a == b;", "if (a >= b) x();", "const same = a =="] {
            assert!(
                !judge()
                    .findings(&Artifact::file("src/x.js", body))
                    .contains(&TruncationReason::DanglingSyntax),
                "{body}"
            );
        }
    }

    #[test]
    fn tiny_definition_without_closing_brace_is_severe() {
        assert_eq!(
            verdict("src/h.js", "function h() "),
            Verdict::Truncated(TruncationReason::SeverelyTruncated)
        );
        assert_eq!(verdict("src/h.js", "const x = 1;"), Verdict::Complete);
    }

    #[test]
    fn non_source_files_only_check_boundary() {
        assert_eq!(verdict("package.json", "{ \"a\": {{{{"), Verdict::Complete);
        assert_eq!(verdict("README.md", "see (("), Verdict::Complete);
    }

    #[test]
    fn growing_an_open_artifact_never_completes_it() {
        let complete = [
            ("src/App.jsx", "export default function App() {\n  return <div><h1>Hi</h1></div>;\n}"),
            ("src/util.js", "export const sum = (a, b) => a + b;"),
            ("src/index.css", "body { margin: 0; }"),
            ("index.html", "<html><body><div id=\"root\"></div></body></html>"),
            ("README.md", "# Demo"),
        ];
        for (path, body) in complete {
            let streamed = crate::assembler::assemble_text(
                &format!("<file path=\"{path}\">{body}</file>"),
                256,
            );
            let artifact = streamed.artifacts.by_path(path).expect("artifact");
            assert_eq!(judge().judge(artifact), Verdict::Complete, "{path}");

            for suffix in ["\n", "}", "\n// more", "\n<footer>"] {
                let mut state = crate::assembler::StreamState::new(256);
                state.push_delta(&format!("<file path=\"{path}\">{body}"));
                state.push_delta(suffix);
                state.finish();
                let open = state.artifacts.by_path(path).expect("artifact");
                assert!(
                    judge().judge(open).is_truncated(),
                    "{path} + {suffix:?} judged complete"
                );
            }
        }
    }

    #[test]
    fn appending_before_close_marker_is_truncated() {
        let mut artifact = Artifact::file("src/a.css", "body { margin: 0; }");
        assert_eq!(judge().judge(&artifact), Verdict::Complete);
        artifact.body.push_str("\n.card");
        artifact.closed = false;
        assert!(judge().judge(&artifact).is_truncated());
    }
}
