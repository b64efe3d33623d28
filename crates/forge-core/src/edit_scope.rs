//! Collaborators that narrow an edit request to the files it touches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// File contents keyed by path.
pub type PathIndexedContent = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditIntent {
    pub search_terms: Vec<String>,
    pub edit_type: String,
    pub target_paths: Vec<String>,
    pub reasoning: String,
}

/// Files an edit is allowed to see and change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditScope {
    pub target_paths: Vec<String>,
    pub prior_artifacts: PathIndexedContent,
    /// Every path of the existing project, for import resolution.
    #[serde(default)]
    pub project_paths: Vec<String>,
}

impl EditScope {
    /// Paths that already exist outside this run, deduplicated.
    pub fn known_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        let all = self
            .target_paths
            .iter()
            .chain(self.prior_artifacts.keys())
            .chain(self.project_paths.iter());
        for path in all {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

#[async_trait::async_trait]
pub trait EditIntentAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        instructions: &str,
        manifest: &FileManifest,
    ) -> Result<EditIntent, CollaboratorError>;
}

#[async_trait::async_trait]
pub trait FileManifestProvider: Send + Sync {
    async fn manifest(&self) -> Result<FileManifest, CollaboratorError>;

    async fn get_contents(&self, paths: &[String]) -> Result<PathIndexedContent, CollaboratorError>;
}
