//! Positional node addresses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Path of child positions from the root to a node.
///
/// Split masks and type errors address nodes by this path rather than by
/// identity, so an index stays valid across clones of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHierarchyIndex(Vec<usize>);

impl NodeHierarchyIndex {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn child(&self, position: usize) -> Self {
        let mut path = self.0.clone();
        path.push(position);
        Self(path)
    }

    pub fn parent(&self) -> Option<Self> {
        match self.0.split_last() {
            Some((_, rest)) => Some(Self(rest.to_vec())),
            None => None,
        }
    }

    pub fn last(&self) -> Option<usize> {
        self.0.last().copied()
    }

    pub fn positions(&self) -> &[usize] {
        &self.0
    }

    /// Whether `self` addresses `other` or one of its descendants.
    pub fn starts_with(&self, other: &NodeHierarchyIndex) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl From<Vec<usize>> for NodeHierarchyIndex {
    fn from(path: Vec<usize>) -> Self {
        Self(path)
    }
}

impl fmt::Display for NodeHierarchyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
