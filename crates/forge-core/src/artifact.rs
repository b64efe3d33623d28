use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Kind of output unit carved out of the model stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    File,
    Edit,
    PackageDeclaration,
    Explanation,
    /// Shell command the caller may run in its sandbox.
    Command,
}

impl ArtifactKind {
    /// File and Edit artifacts carry a path; the rest do not.
    pub fn has_path(self) -> bool {
        matches!(self, ArtifactKind::File | ArtifactKind::Edit)
    }
}

/// One atomic unit of generated output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub body: String,
    /// A matching closing boundary was observed (or the artifact was force-closed).
    pub closed: bool,
    /// Closed because another block opened before its own closing marker.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced_close: bool,
    /// Edit only: the short description of the intended change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl Artifact {
    pub fn file(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::File,
            path: Some(path.into()),
            body: body.into(),
            closed: true,
            forced_close: false,
            instructions: None,
        }
    }

    pub(crate) fn opened(kind: ArtifactKind, path: Option<String>) -> Self {
        Self {
            kind,
            path,
            body: String::new(),
            closed: false,
            forced_close: false,
            instructions: None,
        }
    }

    pub(crate) fn explanation(body: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Explanation,
            path: None,
            body: body.into(),
            closed: true,
            forced_close: false,
            instructions: None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// File or Edit artifact with a path.
    pub fn is_source_unit(&self) -> bool {
        self.kind.has_path() && self.path.is_some()
    }
}

/// Result of merging an artifact into a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Replaced(usize),
    Appended(usize),
}

/// Ordered artifact list with a path index.
///
/// Insertion order is emission order. Replacing an artifact keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    items: Vec<Artifact>,
    by_path: HashMap<String, usize>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Artifact> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Artifact> {
        self.items.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Artifact> {
        self.items.get_mut(index)
    }

    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.by_path.get(path).copied()
    }

    pub fn by_path(&self, path: &str) -> Option<&Artifact> {
        self.index_of(path).and_then(|i| self.items.get(i))
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    /// Appends without consulting the path index. Returns the new position.
    pub(crate) fn push(&mut self, artifact: Artifact) -> usize {
        let index = self.items.len();
        if let Some(path) = artifact.path.clone() {
            self.by_path.entry(path).or_insert(index);
        }
        self.items.push(artifact);
        index
    }

    /// Replaces the artifact at `path` in place, or appends when the path is new.
    pub fn upsert(&mut self, artifact: Artifact) -> Upsert {
        if let Some(index) = artifact.path.as_deref().and_then(|p| self.index_of(p)) {
            self.items[index] = artifact;
            Upsert::Replaced(index)
        } else {
            Upsert::Appended(self.push(artifact))
        }
    }

    /// Paths of File and Edit artifacts in emission order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .filter(|a| a.kind.has_path())
            .filter_map(Artifact::path)
    }

    /// File and Edit artifacts in emission order.
    pub fn source_units(&self) -> impl Iterator<Item = &Artifact> {
        self.items.iter().filter(|a| a.is_source_unit())
    }

    pub fn into_vec(self) -> Vec<Artifact> {
        self.items
    }
}

impl<'a> IntoIterator for &'a ArtifactSet {
    type Item = &'a Artifact;
    type IntoIter = std::slice::Iter<'a, Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Artifact> for ArtifactSet {
    fn from_iter<T: IntoIterator<Item = Artifact>>(iter: T) -> Self {
        let mut set = ArtifactSet::new();
        for artifact in iter {
            set.upsert(artifact);
        }
        set
    }
}
