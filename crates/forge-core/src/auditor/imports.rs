//! Import specifier extraction and relative path resolution.

use std::collections::HashSet;

pub const SCRIPT_EXTENSIONS: [&str; 4] = [".jsx", ".js", ".tsx", ".ts"];
const SKIPPED_EXTENSIONS: [&str; 11] = [
    ".css", ".scss", ".sass", ".less", ".svg", ".png", ".jpg", ".jpeg", ".gif", ".webp", ".ico",
];

/// One module specifier found in a source body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub specifier: String,
    /// 1-based line of the specifier.
    pub line: usize,
}

impl ImportRef {
    pub fn is_relative(&self) -> bool {
        self.specifier.starts_with('.')
    }

    /// Style sheets and static assets, which are never resolved as modules.
    pub fn is_asset(&self) -> bool {
        let lower = self.specifier.to_ascii_lowercase();
        SKIPPED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
    }
}

/// Finds `import … from '…'`, `export … from '…'`, bare `import '…'`,
/// dynamic `import('…')` and `require('…')` specifiers, in source order.
pub fn find_imports(body: &str) -> Vec<ImportRef> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for keyword in ["from", "import", "require"] {
        for at in keyword_positions(body, keyword) {
            let rest = &body[at + keyword.len()..];
            let allow_paren = keyword != "from";
            if let Some(spec) = quoted_after(rest, allow_paren, keyword == "require") {
                found.push((at, spec));
            }
        }
    }
    found.sort_by_key(|(at, _)| *at);
    found
        .into_iter()
        .map(|(at, specifier)| ImportRef {
            line: body[..at].matches('\n').count() + 1,
            specifier,
        })
        .collect()
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn keyword_positions<'a>(body: &'a str, keyword: &'a str) -> impl Iterator<Item = usize> + 'a {
    let bytes = body.as_bytes();
    body.match_indices(keyword).filter_map(move |(at, _)| {
        let before_ok = at == 0 || !(is_ident_byte(bytes[at - 1]) || bytes[at - 1] == b'.');
        let end = at + keyword.len();
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        (before_ok && after_ok).then_some(at)
    })
}

/// Reads `ws* ['(' ws*] quote spec quote`. `require` needs the parenthesis.
fn quoted_after(rest: &str, allow_paren: bool, require_paren: bool) -> Option<String> {
    let mut s = rest.trim_start();
    let mut had_paren = false;
    if allow_paren && let Some(after) = s.strip_prefix('(') {
        s = after.trim_start();
        had_paren = true;
    }
    if require_paren && !had_paren {
        return None;
    }
    let quote = s.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;
    let inner = &s[quote.len_utf8()..];
    let end = inner.find(|c| c == quote || c == '\n')?;
    if !inner[end..].starts_with(quote) {
        return None;
    }
    let spec = inner[..end].trim();
    (!spec.is_empty() && !spec.contains("${")).then(|| spec.to_string())
}

/// Directory part of a slash-separated path (empty for top-level files).
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

/// Extension including the dot, if the last segment has one.
pub fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.').filter(|&i| i > 0).map(|i| &name[i..])
}

/// Joins a relative specifier onto a directory and folds `.` and `..`.
pub fn join_relative(dir: &str, specifier: &str) -> String {
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Paths that would satisfy an import of `base` (already joined).
pub fn resolution_candidates(base: &str) -> Vec<String> {
    let mut candidates = vec![base.to_string()];
    if extension(base).is_none_or(|ext| !SCRIPT_EXTENSIONS.contains(&ext)) {
        candidates.extend(SCRIPT_EXTENSIONS.iter().map(|ext| format!("{base}{ext}")));
        candidates.extend(
            SCRIPT_EXTENSIONS
                .iter()
                .map(|ext| format!("{base}/index{ext}")),
        );
    }
    candidates
}

/// Expands known paths with `.jsx`/`.js` and `.tsx`/`.ts` swaps and with and
/// without the `src/` prefix.
pub fn expand_known<'a>(paths: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
    let mut known = HashSet::new();
    for path in paths {
        let mut variants = vec![path.to_string()];
        for (a, b) in [(".jsx", ".js"), (".js", ".jsx"), (".tsx", ".ts"), (".ts", ".tsx")] {
            if let Some(stem) = path.strip_suffix(a) {
                variants.push(format!("{stem}{b}"));
            }
        }
        for variant in variants {
            match variant.strip_prefix("src/") {
                Some(rest) => {
                    known.insert(rest.to_string());
                }
                None => {
                    known.insert(format!("src/{variant}"));
                }
            }
            known.insert(variant);
        }
    }
    known
}
