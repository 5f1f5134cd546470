//! Editor for ordered search-path-style environment values.
//!
//! A value is a sequence of non-empty directory strings joined by the
//! platform list separator. Edits are idempotent: prepending moves an
//! existing occurrence to the front instead of duplicating it, and empty or
//! whitespace-only entries are always filtered out.

use std::collections::HashSet;
use std::env;
use std::fmt;

/// Name of the process-wide search-path variable.
pub const PATH_VAR: &str = "PATH";

fn separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPath {
    parts: Vec<String>,
}

impl EnvPath {
    /// Parse a joined search-path string.
    pub fn new(joined: &str) -> Self {
        let mut path = Self::default();
        path.position_first(joined);
        path
    }

    /// The current value of the process-wide `PATH`.
    pub fn from_current() -> Self {
        Self::new(&env::var(PATH_VAR).unwrap_or_default())
    }

    /// Put the entries of `joined` first, removing any later duplicate of
    /// them (and among them), trimming whitespace throughout.
    pub fn position_first(&mut self, joined: &str) -> &mut Self {
        let mut seen: HashSet<String> = HashSet::new();
        let mut parts = Vec::with_capacity(self.parts.len() + 1);
        for part in joined.trim().split(separator()).chain(self.parts.iter().map(String::as_str)) {
            let part = part.trim();
            if part.is_empty() || seen.contains(part) {
                continue;
            }
            seen.insert(part.to_string());
            parts.push(part.to_string());
        }
        self.parts = parts;
        self
    }

    /// Remove every entry equal to one of the entries of `joined`.
    pub fn remove_parts(&mut self, joined: &str) -> &mut Self {
        let doomed: HashSet<&str> = joined.trim().split(separator()).collect();
        self.parts.retain(|part| {
            let part = part.trim();
            !part.is_empty() && !doomed.contains(part)
        });
        self
    }

    /// Whether `dir` is one of the entries.
    pub fn contains(&self, dir: &str) -> bool {
        self.parts.iter().any(|p| p == dir.trim())
    }
}

impl fmt::Display for EnvPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join(&separator().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sep() -> String {
        separator().to_string()
    }

    fn joined(parts: &[&str]) -> String {
        parts.join(&sep())
    }

    #[test]
    fn test_new_filters_empty_and_whitespace_entries() {
        let raw = joined(&["/usr/bin", "", "  ", "/bin"]);
        let path = EnvPath::new(&raw);
        assert_eq!(path.to_string(), joined(&["/usr/bin", "/bin"]));
    }

    #[test]
    fn test_position_first_moves_existing_entry() {
        let mut path = EnvPath::new(&joined(&["/usr/bin", "/stub", "/bin"]));
        path.position_first("/stub");
        assert_eq!(path.to_string(), joined(&["/stub", "/usr/bin", "/bin"]));
    }

    #[test]
    fn test_position_first_is_idempotent() {
        let mut once = EnvPath::new(&joined(&["/usr/bin", "/bin"]));
        once.position_first("/stub");
        let mut twice = once.clone();
        twice.position_first("/stub");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_position_first_trims_duplicates_with_whitespace() {
        let mut path = EnvPath::new(&joined(&["/usr/bin", " /stub ", "/bin"]));
        path.position_first("/stub");
        assert_eq!(path.to_string(), joined(&["/stub", "/usr/bin", "/bin"]));
    }

    #[test]
    fn test_prepend_then_remove_restores_original() {
        let original = joined(&["/usr/bin", "/bin"]);
        let mut path = EnvPath::new(&original);
        path.position_first("/stub");
        path.remove_parts("/stub");
        assert_eq!(path.to_string(), original);
    }

    #[test]
    fn test_remove_parts_removes_every_occurrence() {
        let mut path = EnvPath::new(&joined(&["/stub", "/usr/bin"]));
        // parsing already deduplicated, removing still yields none of it
        path.remove_parts(&joined(&["/stub", "/usr/bin"]));
        assert_eq!(path.to_string(), "");
    }

    #[test]
    fn test_contains() {
        let path = EnvPath::new(&joined(&["/usr/bin", "/bin"]));
        assert!(path.contains("/bin"));
        assert!(!path.contains("/stub"));
    }
}
