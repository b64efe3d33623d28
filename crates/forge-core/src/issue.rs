use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingImport,
    TruncatedFile,
    UnmatchedBoundary,
    MissingRequiredFile,
    CircularDependency,
    SuspectedTypo,
    ContinuationExhausted,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Problem derived from an artifact set. Never stored apart from the set that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// 1-based line for line-scoped findings such as typos.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Issue {
    pub fn new(issue_type: IssueType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            severity,
            artifact_path: None,
            message: message.into(),
            suggestion: None,
            line: None,
        }
    }

    pub fn error(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self::new(issue_type, Severity::Error, message)
    }

    pub fn warning(issue_type: IssueType, message: impl Into<String>) -> Self {
        Self::new(issue_type, Severity::Warning, message)
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn on_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Number of error-severity issues.
pub fn error_count(issues: &[Issue]) -> usize {
    issues.iter().filter(|i| i.is_error()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let issue = Issue::error(IssueType::MissingImport, "missing")
            .at("src/App.jsx")
            .with_suggestion("src/components/Header.jsx");
        let value = serde_json::to_value(&issue).expect("json");
        assert_eq!(value["type"], serde_json::json!("missing_import"));
        assert_eq!(value["severity"], serde_json::json!("error"));
        assert!(value.get("line").is_none());
    }
}
