//! Incremental recognizer for the block markers the model wraps its output in.
//!
//! The scanner is a small hand-written state machine over a closed marker
//! vocabulary. It never looks further back than its lookback window: a `<`
//! that might still grow into a marker is held back until the next delta
//! decides it, and a candidate longer than the window is plain text. Feeding
//! a string in one piece or split at arbitrary points yields the same segment
//! stream modulo how text runs are chunked.

use crate::artifact::ArtifactKind;

/// Marker names understood by the scanner. Matching is case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    File,
    Edit,
    Package,
    Packages,
    Explanation,
    Command,
    /// Sub-block of an edit.
    Instructions,
    /// Sub-block of an edit holding the replacement snippet.
    Update,
}

impl BlockTag {
    const ALL: [BlockTag; 8] = [
        BlockTag::File,
        BlockTag::Edit,
        BlockTag::Package,
        BlockTag::Packages,
        BlockTag::Explanation,
        BlockTag::Command,
        BlockTag::Instructions,
        BlockTag::Update,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BlockTag::File => "file",
            BlockTag::Edit => "edit",
            BlockTag::Package => "package",
            BlockTag::Packages => "packages",
            BlockTag::Explanation => "explanation",
            BlockTag::Command => "command",
            BlockTag::Instructions => "instructions",
            BlockTag::Update => "update",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.name() == name)
    }

    fn is_name_prefix(prefix: &str) -> bool {
        Self::ALL.iter().any(|tag| tag.name().starts_with(prefix))
    }

    /// Artifact kind opened by this marker; `None` for edit sub-blocks.
    pub fn artifact_kind(self) -> Option<ArtifactKind> {
        match self {
            BlockTag::File => Some(ArtifactKind::File),
            BlockTag::Edit => Some(ArtifactKind::Edit),
            BlockTag::Package | BlockTag::Packages => Some(ArtifactKind::PackageDeclaration),
            BlockTag::Explanation => Some(ArtifactKind::Explanation),
            BlockTag::Command => Some(ArtifactKind::Command),
            BlockTag::Instructions | BlockTag::Update => None,
        }
    }

    pub fn is_sub_block(self) -> bool {
        self.artifact_kind().is_none()
    }

    pub fn close_marker(self) -> String {
        format!("</{}>", self.name())
    }
}

/// Boundary event or text run, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Open {
        tag: BlockTag,
        path: Option<String>,
        /// Marker exactly as it appeared, for re-emitting it as literal text.
        raw: String,
    },
    Close {
        tag: BlockTag,
        raw: String,
    },
}

/// Segments recognized in `lookback + delta`, plus the new lookback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutput {
    pub segments: Vec<Segment>,
    pub lookback: String,
}

/// Scans `lookback` followed by `delta`.
///
/// Pure: the only carried state is the returned lookback, which is always
/// shorter than `window` and starts with `<` when non-empty.
pub fn scan(lookback: &str, delta: &str, window: usize) -> ScanOutput {
    let mut buf = String::with_capacity(lookback.len() + delta.len());
    buf.push_str(lookback);
    buf.push_str(delta);

    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut search = 0;
    while let Some(offset) = buf[search..].find('<') {
        let at = search + offset;
        match match_marker(&buf[at..], window) {
            Candidate::Marker { len, segment } => {
                push_text(&mut segments, &buf[text_start..at]);
                segments.push(segment);
                search = at + len;
                text_start = search;
            }
            Candidate::Partial => {
                push_text(&mut segments, &buf[text_start..at]);
                return ScanOutput {
                    segments,
                    lookback: buf[at..].to_string(),
                };
            }
            Candidate::NotMarker => search = at + 1,
        }
    }
    push_text(&mut segments, &buf[text_start..]);
    ScanOutput {
        segments,
        lookback: String::new(),
    }
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(last)) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(Segment::Text(text.to_string()));
    }
}

/// Stateful wrapper that carries the lookback between deltas of one run.
#[derive(Debug, Clone)]
pub struct BoundaryScanner {
    window: usize,
    lookback: String,
}

impl BoundaryScanner {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            lookback: String::new(),
        }
    }

    pub fn push(&mut self, delta: &str) -> Vec<Segment> {
        let out = scan(&self.lookback, delta, self.window);
        self.lookback = out.lookback;
        out.segments
    }

    /// Releases a held-back partial marker as text. Call once the stream ended.
    pub fn finish(&mut self) -> Vec<Segment> {
        let rest = std::mem::take(&mut self.lookback);
        let mut segments = Vec::new();
        push_text(&mut segments, &rest);
        segments
    }

    pub fn lookback(&self) -> &str {
        &self.lookback
    }
}

enum Candidate {
    Marker { len: usize, segment: Segment },
    Partial,
    NotMarker,
}

fn match_marker(input: &str, window: usize) -> Candidate {
    match parse_marker(input) {
        Candidate::Marker { len, .. } if len > window => Candidate::NotMarker,
        // Completing the marker needs at least one more byte.
        Candidate::Partial if input.len() >= window => Candidate::NotMarker,
        other => other,
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        let input: &'a str = self.input;
        &input[start..self.pos]
    }
}

fn parse_marker(input: &str) -> Candidate {
    let mut cur = Cursor { input, pos: 1 };
    let closing = cur.peek() == Some(b'/');
    if closing {
        cur.pos += 1;
    }
    let name = cur.take_while(|b| b.is_ascii_lowercase() || b == b'_');
    let Some(next) = cur.peek() else {
        return if BlockTag::is_name_prefix(name) {
            Candidate::Partial
        } else {
            Candidate::NotMarker
        };
    };
    let Some(tag) = BlockTag::from_name(name) else {
        return Candidate::NotMarker;
    };
    if !(next == b'>' || next.is_ascii_whitespace()) {
        return Candidate::NotMarker;
    }

    if closing {
        cur.skip_ws();
        return match cur.peek() {
            None => Candidate::Partial,
            Some(b'>') => Candidate::Marker {
                len: cur.pos + 1,
                segment: Segment::Close {
                    tag,
                    raw: input[..cur.pos + 1].to_string(),
                },
            },
            Some(_) => Candidate::NotMarker,
        };
    }

    let mut attrs: Vec<(&str, &str)> = Vec::new();
    loop {
        let had_ws = cur.skip_ws();
        match cur.peek() {
            None => return Candidate::Partial,
            Some(b'>') => break,
            Some(_) if !had_ws => return Candidate::NotMarker,
            Some(_) => {}
        }
        let key = cur.take_while(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if cur.peek().is_none() {
            return Candidate::Partial;
        }
        if key.is_empty() {
            return Candidate::NotMarker;
        }
        cur.skip_ws();
        match cur.peek() {
            None => return Candidate::Partial,
            Some(b'=') => cur.pos += 1,
            Some(_) => return Candidate::NotMarker,
        }
        cur.skip_ws();
        let quote = match cur.peek() {
            None => return Candidate::Partial,
            Some(q @ (b'"' | b'\'')) => q,
            Some(_) => return Candidate::NotMarker,
        };
        cur.pos += 1;
        let value = cur.take_while(|b| b != quote && b != b'<' && b != b'>' && b != b'\n');
        match cur.peek() {
            None => return Candidate::Partial,
            Some(b) if b == quote => cur.pos += 1,
            Some(_) => return Candidate::NotMarker,
        }
        attrs.push((key, value));
    }

    let attr = |name: &str| {
        attrs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    };
    let path = match tag {
        BlockTag::File => attr("path"),
        BlockTag::Edit => attr("target_file").or_else(|| attr("path")),
        _ => None,
    }
    .map(normalize_path)
    .filter(|p| !p.is_empty());
    if tag.artifact_kind().is_some_and(ArtifactKind::has_path) && path.is_none() {
        return Candidate::NotMarker;
    }

    let len = cur.pos + 1;
    Candidate::Marker {
        len,
        segment: Segment::Open {
            tag,
            path,
            raw: input[..len].to_string(),
        },
    }
}

/// Trims whitespace and leading `./` or `/` so paths index consistently.
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.trim();
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest;
        } else {
            break;
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(tag: BlockTag, path: Option<&str>, raw: &str) -> Segment {
        Segment::Open {
            tag,
            path: path.map(str::to_string),
            raw: raw.to_string(),
        }
    }

    fn close(tag: BlockTag) -> Segment {
        Segment::Close {
            tag,
            raw: tag.close_marker(),
        }
    }

    fn text(t: &str) -> Segment {
        Segment::Text(t.to_string())
    }

    #[test]
    fn open_and_close_in_one_delta_keep_document_order() {
        let out = scan("", "hi <file path=\"src/a.js\">x</file> bye", 256);
        assert_eq!(
            out.segments,
            vec![
                text("hi "),
                open(BlockTag::File, Some("src/a.js"), "<file path=\"src/a.js\">"),
                text("x"),
                close(BlockTag::File),
                text(" bye"),
            ]
        );
        assert!(out.lookback.is_empty());
    }

    #[test]
    fn split_marker_is_held_in_lookback() {
        let first = scan("", "abc <fi", 256);
        assert_eq!(first.segments, vec![text("abc ")]);
        assert_eq!(first.lookback, "<fi");

        let second = scan(&first.lookback, "le path='b.css'>body", 256);
        assert_eq!(
            second.segments,
            vec![
                open(BlockTag::File, Some("b.css"), "<file path='b.css'>"),
                text("body"),
            ]
        );
    }

    #[test]
    fn several_attributes_with_spacing_parse() {
        let raw = "<file lang=\"jsx\" path = './src/Nav.jsx' >";
        let out = scan("", &format!("{raw}x"), 256);
        assert_eq!(
            out.segments,
            vec![open(BlockTag::File, Some("src/Nav.jsx"), raw), text("x")]
        );
    }

    #[test]
    fn jsx_and_comparisons_are_text() {
        let input = "<div className=\"x\">{a < b}</div><filex><Package>";
        let out = scan("", input, 256);
        assert_eq!(out.segments, vec![text(input)]);
    }

    #[test]
    fn file_without_path_is_text() {
        let out = scan("", "<file>oops</file>", 256);
        assert_eq!(
            out.segments,
            vec![text("<file>oops"), close(BlockTag::File)]
        );
    }

    #[test]
    fn edit_accepts_target_file_or_path() {
        let a = scan("", "<edit target_file=\"src/App.jsx\">", 256);
        let b = scan("", "<edit path=\"./src/App.jsx\">", 256);
        for out in [a, b] {
            assert!(matches!(
                out.segments.as_slice(),
                [Segment::Open { tag: BlockTag::Edit, path: Some(p), .. }] if p == "src/App.jsx"
            ));
        }
    }

    #[test]
    fn package_and_packages_are_distinct() {
        let out = scan("", "<package>a</package><packages>b,c</packages >", 256);
        assert_eq!(
            out.segments,
            vec![
                open(BlockTag::Package, None, "<package>"),
                text("a"),
                close(BlockTag::Package),
                open(BlockTag::Packages, None, "<packages>"),
                text("b,c"),
                Segment::Close {
                    tag: BlockTag::Packages,
                    raw: "</packages >".into()
                },
            ]
        );
    }

    #[test]
    fn candidate_longer_than_window_is_text() {
        let long = format!("<file path=\"{}\">", "a".repeat(40));
        let out = scan("", &long, 16);
        assert_eq!(out.segments, vec![text(&long)]);

        let held = scan("", "<file path=\"aaaaaaa", 16);
        assert!(held.lookback.is_empty());
    }

    #[test]
    fn lookback_stays_under_window() {
        let mut scanner = BoundaryScanner::new(32);
        for chunk in ["<file path=\"", "src/components/", "Header.jsx", "\">"] {
            scanner.push(chunk);
            assert!(scanner.lookback().len() < 32);
        }
    }

    #[test]
    fn finish_releases_partial_marker_as_text() {
        let mut scanner = BoundaryScanner::new(256);
        assert_eq!(scanner.push("end </fil"), vec![text("end ")]);
        assert_eq!(scanner.finish(), vec![text("</fil")]);
        assert!(scanner.finish().is_empty());
    }

    #[test]
    fn multibyte_text_around_markers() {
        let input = "héllo <file path=\"src/ü.js\">ünïcode</file>";
        let whole = scan("", input, 256).segments;
        let mut scanner = BoundaryScanner::new(256);
        let mut split = Vec::new();
        for ch in input.chars() {
            let mut buf = [0u8; 4];
            for seg in scanner.push(ch.encode_utf8(&mut buf)) {
                match (split.last_mut(), seg) {
                    (Some(Segment::Text(last)), Segment::Text(t)) => last.push_str(&t),
                    (_, seg) => split.push(seg),
                }
            }
        }
        assert_eq!(split, whole);
    }

    #[test]
    fn normalize_path_strips_leading_dot_slash() {
        assert_eq!(normalize_path(" ./src/App.jsx "), "src/App.jsx");
        assert_eq!(normalize_path("/index.css"), "index.css");
    }
}
