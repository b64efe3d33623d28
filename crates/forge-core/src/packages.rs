use crate::auditor::imports::find_imports;

/// Packages the scaffold provides; never declared.
const PROVIDED: [&str; 2] = ["react", "react-dom"];

/// Splits a `<package>`/`<packages>` body on newlines and commas.
pub fn parse_package_list(body: &str) -> Vec<String> {
    body.split(['\n', ','])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Package names imported by bare specifier, normalized to the installable
/// name (`@scope/name` keeps two segments, deep imports keep one).
pub fn bare_imports(body: &str) -> Vec<String> {
    let mut names = Vec::new();
    for import in find_imports(body) {
        let spec = import.specifier.as_str();
        if spec.starts_with('.') || spec.starts_with('/') || spec.starts_with("@/") {
            continue;
        }
        let name = if spec.starts_with('@') {
            spec.split('/').take(2).collect::<Vec<_>>().join("/")
        } else {
            spec.split('/').next().unwrap_or(spec).to_string()
        };
        if name.is_empty() || PROVIDED.contains(&name.as_str()) || names.contains(&name) {
            continue;
        }
        names.push(name);
    }
    names
}

/// Declared packages in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct PackageLedger {
    names: Vec<String>,
}

impl PackageLedger {
    /// Returns false when the package was already declared.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.names.iter().any(|n| n == name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}
