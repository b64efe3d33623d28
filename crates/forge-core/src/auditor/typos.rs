use crate::issue::{Issue, IssueType};

/// Misspelled keyword → corrected form. Matched as whole words.
const TYPOS: [(&str, &str); 14] = [
    ("export defaum", "export default"),
    ("export defaut", "export default"),
    ("export defualt", "export default"),
    ("export defalut", "export default"),
    ("improt", "import"),
    ("imoprt", "import"),
    ("ipmort", "import"),
    ("fucntion", "function"),
    ("funciton", "function"),
    ("functoin", "function"),
    ("cosnt", "const"),
    ("cnst", "const"),
    ("lte", "let"),
    ("retrun", "return"),
];

/// Short typos that are only flagged when they start a statement.
const STATEMENT_ONLY: [&str; 3] = ["lte", "cnst", "cosnt"];

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn contains_word(line: &str, word: &str) -> bool {
    let bytes = line.as_bytes();
    line.match_indices(word).any(|(at, _)| {
        let end = at + word.len();
        (at == 0 || !is_word_byte(bytes[at - 1])) && (end >= bytes.len() || !is_word_byte(bytes[end]))
    })
}

/// `import x form './x'`: `form` where `from` belongs.
fn has_form_for_from(line: &str) -> bool {
    let trimmed = line.trim_start();
    if !trimmed.starts_with("import ") {
        return false;
    }
    trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .windows(2)
        .any(|pair| pair[0] == "form" && pair[1].starts_with(['\'', '"']))
}

/// Line-level keyword typos, as warnings.
pub(crate) fn find_typos(path: &str, body: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (number, line) in body.lines().enumerate() {
        let line_no = number + 1;
        let head = line.trim_start();
        let found = TYPOS.iter().find(|(typo, _)| {
            if STATEMENT_ONLY.contains(typo) {
                head.split_whitespace().next() == Some(*typo)
            } else {
                contains_word(head, typo)
            }
        });
        if let Some((typo, fix)) = found {
            issues.push(
                Issue::warning(
                    IssueType::SuspectedTypo,
                    format!("possible typo `{typo}` on line {line_no}"),
                )
                .at(path)
                .with_suggestion(*fix)
                .on_line(line_no),
            );
        } else if has_form_for_from(line) {
            issues.push(
                Issue::warning(
                    IssueType::SuspectedTypo,
                    format!("possible typo `form` on line {line_no}"),
                )
                .at(path)
                .with_suggestion("from")
                .on_line(line_no),
            );
        }
    }
    issues
}
