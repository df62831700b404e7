//! Reference monitor over a client's declared roots
//!
//! A [`Guard`] is built once from a [`Snapshot`] and answers whether a
//! candidate path lies inside one of the roots. It fails closed: a client
//! that declared no roots grants access to nothing.
//!
//! # Residual risk
//!
//! The check is made against paths canonicalized at the time of the call.
//! It is not a transactional boundary: if a path component is replaced
//! (for example a directory swapped for a symlink) between the check and
//! the later filesystem operation, the operation may reach outside the
//! roots. Callers that need stronger guarantees must open files relative to
//! a held directory handle or re-check after opening.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{RootsError, RootsResult};
use crate::path::{resolve_candidate, root_uri_to_path};
use crate::snapshot::Snapshot;

/// Path containment check derived from one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Guard {
    allowed: Vec<PathBuf>,
}

impl Guard {
    /// Build a guard from a snapshot; never fails
    pub fn new(snapshot: &Snapshot) -> Self {
        let allowed = snapshot
            .uris()
            .map(root_uri_to_path)
            .collect::<Vec<_>>();
        debug!(roots = allowed.len(), "Built roots guard");
        Self { allowed }
    }

    /// Guard that denies everything
    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolved root paths, in snapshot order
    pub fn roots(&self) -> &[PathBuf] {
        &self.allowed
    }

    /// Whether no roots are allowed
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Whether `candidate` equals a root or lies beneath one
    ///
    /// Comparison is by path component, so `/a/bc` is not inside `/a/b`.
    /// A filesystem path is canonicalized against the current directory
    /// first. A candidate spelled as a URI (`memory://workspace/notes`,
    /// `file:///a/b`) is resolved like a root URI instead, which is the only
    /// way a non-`file` root can match.
    pub fn within(&self, candidate: impl AsRef<Path>) -> bool {
        if self.allowed.is_empty() {
            return false;
        }
        let canonical = resolve_candidate(candidate.as_ref());
        self.contains_canonical(&canonical)
    }

    /// Like [`Guard::within`] for a candidate given as a URI
    pub fn within_uri(&self, uri: &str) -> bool {
        if self.allowed.is_empty() {
            return false;
        }
        self.contains_canonical(&root_uri_to_path(uri))
    }

    /// Check `candidate` and return its canonical form if allowed
    pub fn check(&self, candidate: impl AsRef<Path>) -> RootsResult<PathBuf> {
        let candidate = candidate.as_ref();
        let canonical = resolve_candidate(candidate);
        if !self.allowed.is_empty() && self.contains_canonical(&canonical) {
            return Ok(canonical);
        }
        warn!(
            path = %candidate.display(),
            resolved = %canonical.display(),
            "Access outside client roots denied"
        );
        Err(RootsError::OutsideRoots(candidate.display().to_string()))
    }

    fn contains_canonical(&self, canonical: &Path) -> bool {
        self.allowed.iter().any(|root| canonical.starts_with(root))
    }
}

impl From<&Snapshot> for Guard {
    fn from(snapshot: &Snapshot) -> Self {
        Self::new(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Root;
    use tempfile::TempDir;

    fn guard_for(uris: &[&str]) -> Guard {
        Guard::new(&Snapshot::new(uris.iter().map(|uri| Root::new(*uri))))
    }

    #[test]
    fn test_empty_guard_fails_closed() {
        let guard = Guard::empty();
        assert!(!guard.within("/"));
        assert!(!guard.within("/a/b"));
        assert!(!guard.within_uri("file:///a/b"));
        assert!(guard.check("/a/b").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_containment() {
        let guard = guard_for(&["file:///nonexistent-root/a/b"]);

        assert!(guard.within("/nonexistent-root/a/b/c.txt"));
        assert!(guard.within("/nonexistent-root/a/b"));
        assert!(!guard.within("/nonexistent-root/a/other"));
        assert!(!guard.within("/nonexistent-root/a/bc"));
        assert!(!guard.within("/nonexistent-root/a"));
    }

    #[cfg(unix)]
    #[test]
    fn test_parent_references_are_resolved_before_comparison() {
        let guard = guard_for(&["file:///nonexistent-root/a/b"]);

        assert!(!guard.within("/nonexistent-root/a/b/../secret"));
        assert!(guard.within("/nonexistent-root/a/b/c/../d"));
    }

    #[cfg(unix)]
    #[test]
    fn test_within_uri() {
        let guard = guard_for(&["file:///nonexistent-root/a"]);
        assert!(guard.within_uri("file:///nonexistent-root/a/x%20y.txt"));
        assert!(!guard.within_uri("file:///nonexistent-root/b"));
    }

    #[test]
    fn test_opaque_roots_compare_literally() {
        let guard = guard_for(&["memory://workspace"]);
        assert_eq!(guard.roots(), [PathBuf::from("memory://workspace")]);
        assert!(!guard.within("/workspace"));
        assert!(!guard.within("memory"));
    }

    #[test]
    fn test_opaque_root_matches_uri_candidates() {
        let guard = guard_for(&["memory://workspace"]);

        assert!(guard.within("memory://workspace"));
        assert!(guard.within("memory://workspace/notes/today.md"));
        assert!(guard.within_uri("memory://workspace/notes"));
        assert!(!guard.within("memory://workspace/../other"));
        assert!(!guard.within("memory://workspace-2/notes"));
        assert!(!guard.within("other://workspace/notes"));
        assert_eq!(
            guard.check("memory://workspace/notes").unwrap(),
            PathBuf::from("memory://workspace/notes")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_file_uri_candidate_is_resolved() {
        let guard = guard_for(&["file:///nonexistent-root/a"]);
        assert!(guard.within("file:///nonexistent-root/a/b.txt"));
        assert!(!guard.within("file:///nonexistent-root/b"));
    }

    #[cfg(unix)]
    #[test]
    fn test_check_returns_canonical_path() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let uri = format!("file://{}", root.display());
        let guard = guard_for(&[uri.as_str()]);

        let file = temp_dir.path().join("notes.txt");
        std::fs::write(&file, "x").unwrap();
        assert_eq!(guard.check(&file).unwrap(), file.canonicalize().unwrap());

        let outside = guard.check(std::env::temp_dir().join("elsewhere.txt"));
        assert!(matches!(outside, Err(RootsError::OutsideRoots(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_denied() {
        let temp_dir = TempDir::new().unwrap();
        let allowed = temp_dir.path().join("allowed");
        let secret = temp_dir.path().join("secret");
        std::fs::create_dir(&allowed).unwrap();
        std::fs::create_dir(&secret).unwrap();
        std::os::unix::fs::symlink(&secret, allowed.join("escape")).unwrap();

        let uri = format!("file://{}", allowed.canonicalize().unwrap().display());
        let guard = guard_for(&[uri.as_str()]);

        assert!(guard.within(allowed.join("inside.txt")));
        assert!(!guard.within(allowed.join("escape").join("key.pem")));
    }
}
