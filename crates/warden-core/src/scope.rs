//! Scope descriptors: the declared blast radius of a session.

use serde::{Deserialize, Serialize};

/// Set of path patterns a session is permitted to touch.
///
/// Pinned once at the isolate stage and read-only afterward. Patterns:
///
/// - `path/to/file.rs` matches exactly that path
/// - `src/` or `src/**` matches the whole subtree
/// - `src/parser*` matches any path with that prefix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    patterns: Vec<String>,
}

impl ScopeDescriptor {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether `path` falls inside the declared scope.
    pub fn allows(&self, path: &str) -> bool {
        let path = normalize(path);
        self.patterns
            .iter()
            .any(|pattern| pattern_matches(&normalize(pattern), path))
    }

    /// Whether every path in `paths` falls inside the declared scope.
    pub fn allows_all<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> bool {
        paths.into_iter().all(|path| self.allows(path))
    }
}

fn normalize(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return path == prefix || path.starts_with(&format!("{prefix}/"));
    }
    if let Some(prefix) = pattern.strip_suffix('/') {
        return path == prefix || path.starts_with(&format!("{prefix}/"));
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    path == pattern
}
