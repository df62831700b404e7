//! Immutable, deduplicated root snapshots

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::Root;

/// Roots declared by one client at one point in time
///
/// Unique by URI and sorted by URI, so two snapshots built from the same
/// set of roots compare equal regardless of the order the client sent them.
/// Cloning is cheap; the roots are shared.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    roots: Arc<[Root]>,
}

impl Snapshot {
    /// Build a snapshot; when a URI repeats, the last occurrence wins
    pub fn new(roots: impl IntoIterator<Item = Root>) -> Self {
        let by_uri: BTreeMap<String, Root> = roots
            .into_iter()
            .map(|root| (root.uri.clone(), root))
            .collect();
        Self {
            roots: by_uri.into_values().collect(),
        }
    }

    /// Snapshot with no roots
    pub fn empty() -> Self {
        Self::default()
    }

    /// Roots in URI order
    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    /// Iterate over the roots in URI order
    pub fn iter(&self) -> std::slice::Iter<'_, Root> {
        self.roots.iter()
    }

    /// Iterate over the URIs in order
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(|root| root.uri.as_str())
    }

    /// Number of roots
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether the client declared no roots
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Whether both snapshots name the same set of URIs
    ///
    /// Display names are ignored; only a change in the URI set counts as a
    /// content change for versioning.
    pub fn same_uris(&self, other: &Snapshot) -> bool {
        self.uris().eq(other.uris())
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Root;
    type IntoIter = std::slice::Iter<'a, Root>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
