//! Prompt text sent to the backend. The wording is opaque to the pipeline;
//! only the boundary vocabulary it asks for matters.

use std::collections::BTreeMap;

use crate::artifact::ArtifactSet;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert React developer. Generate complete, working files.\n\
Wrap every file in <file path=\"relative/path\">…</file> and write each file from its first line to its last.\n\
Declare every npm package you use with <package>name</package>.\n\
For changes to existing files use <edit target_file=\"path\"><instructions>…</instructions><update>…</update></edit>.\n\
Never truncate a file. Generate fewer complete files rather than many incomplete ones.";

pub const FIX_SYSTEM_PROMPT: &str =
    "You are completing a generated application. Reply only with <file path=\"…\"> blocks containing complete file contents.";

/// Longest conversation summary forwarded to the backend, in characters.
pub const SUMMARY_LIMIT: usize = 2_000;

/// Number of file names listed in a continuation note.
const LISTED_FILES: usize = 5;

/// Initial user message: conversation summary, scoped files, then the request.
pub fn generation_prompt(
    instructions: &str,
    is_edit: bool,
    conversation_summary: Option<&str>,
    scoped_files: Option<&BTreeMap<String, String>>,
) -> String {
    let mut prompt = String::new();
    if let Some(summary) = conversation_summary.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(&clip_chars(summary, SUMMARY_LIMIT));
        prompt.push_str("\n\n");
    }
    if let Some(files) = scoped_files.filter(|files| !files.is_empty()) {
        prompt.push_str("Current contents of the files in scope:\n");
        for (path, body) in files {
            prompt.push_str(&format!("<file path=\"{path}\">\n{body}\n</file>\n"));
        }
        prompt.push('\n');
    }
    if is_edit {
        prompt.push_str("Edit the existing application. Change only what the request needs.\n\n");
    }
    prompt.push_str(instructions.trim());
    prompt
}

/// Progress note appended after the replayed output of a cut-off round.
pub fn continuation_note(file_names: &[&str]) -> String {
    let listed = file_names
        .iter()
        .take(LISTED_FILES)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    let more = if file_names.len() > LISTED_FILES { "..." } else { "" };

    let has_components = file_names.iter().any(|f| f.contains("/components/"));
    let has_entry = file_names
        .iter()
        .any(|f| f.contains("App.jsx") || f.contains("App.tsx"));
    let has_stylesheet = file_names.iter().any(|f| f.contains("index.css"));
    let mut reminders = String::new();
    if has_components && !has_entry {
        reminders.push_str("\nCRITICAL: App.jsx/App.tsx has not been generated yet. You must generate it.");
    }
    if has_components && !has_stylesheet {
        reminders.push_str("\nWARNING: index.css has not been generated yet. Generate it for styling.");
    }

    format!(
        "[SYSTEM: The previous response was truncated. Continue exactly where you left off.\n\n\
Progress: {count} files generated so far: {listed}{more}{reminders}\n\n\
Rules:\n\
1. Do not repeat output that was already generated.\n\
2. Continue from the exact character where you stopped.\n\
3. If you were inside a file, finish that file first.\n\
4. Then generate any missing required files.\n\
5. Start immediately, with no explanation.]",
        count = file_names.len(),
    )
}

/// Follow-up asking for exactly the listed missing files.
pub fn missing_files_prompt(original: &str, missing: &[String], existing: &ArtifactSet) -> String {
    let mut prompt = String::from("The application imports files that were never generated.\n\nMissing files:\n");
    for path in missing {
        prompt.push_str(&format!("- {path}\n"));
    }
    prompt.push_str("\nExisting files (keep their names and conventions, do not regenerate them):\n");
    for artifact in existing.source_units() {
        if let Some(path) = artifact.path() {
            prompt.push_str(&format!("<file path=\"{path}\">\n{}\n</file>\n", artifact.body));
        }
    }
    prompt.push_str(&format!(
        "\nOriginal request: {}\n\nGenerate only the missing files, each complete, each in its own <file path=\"…\"> block.",
        original.trim()
    ));
    prompt
}

/// Follow-up asking for the full content of one truncated file.
pub fn complete_file_prompt(original: &str, path: &str, partial: &str) -> String {
    format!(
        "Complete the following file that was truncated. Provide the FULL file content.\n\n\
File: {path}\nOriginal request: {}\n\nTruncated content:\n{partial}\n\n\
Reply with one <file path=\"{path}\"> block. Include all imports, complete all functions and close all tags.",
        original.trim()
    )
}

fn clip_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((at, _)) => format!("{}…", &text[..at]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_lists_five_names_then_ellipsis() {
        let names = ["a.js", "b.js", "c.js", "d.js", "e.js", "f.js"];
        let note = continuation_note(&names);
        assert!(note.contains("6 files generated so far: a.js, b.js, c.js, d.js, e.js..."));
        assert!(!note.contains("f.js"));
    }

    #[test]
    fn note_calls_out_missing_entry_and_stylesheet() {
        let note = continuation_note(&["src/components/Header.jsx"]);
        assert!(note.contains("App.jsx/App.tsx has not been generated"));
        assert!(note.contains("index.css has not been generated"));

        let note = continuation_note(&["src/components/Header.jsx", "src/App.jsx", "src/index.css"]);
        assert!(!note.contains("CRITICAL"));
    }

    #[test]
    fn summary_is_clipped_and_scope_rendered() {
        let summary = "x".repeat(SUMMARY_LIMIT + 50);
        let mut files = BTreeMap::new();
        files.insert("src/App.jsx".to_string(), "export default 1;".to_string());
        let prompt = generation_prompt("make it blue", true, Some(&summary), Some(&files));
        assert!(prompt.contains(&format!("{}…", "x".repeat(SUMMARY_LIMIT))));
        assert!(!prompt.contains(&"x".repeat(SUMMARY_LIMIT + 1)));
        assert!(prompt.contains("<file path=\"src/App.jsx\">\nexport default 1;\n</file>"));
        assert!(prompt.ends_with("make it blue"));
    }
}
