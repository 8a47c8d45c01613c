use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use super::{TaggingError, TaggingResult};
use crate::formula::inspect::outer_children;
use crate::formula::{Expr, LevelTag, NodeHierarchyIndex, Tagged};
use crate::registry::Registry;

type BfbKey = BTreeSet<String>;

/// Longest chains of already-tagged nodes below a subtree, per BFB name set.
#[derive(Debug, Default)]
struct Nesting {
    /// Windows and tagged aggregates, not counting fork interiors.
    windows: BTreeMap<BfbKey, i32>,
    /// Forks, interiors included.
    forks: BTreeMap<BfbKey, i32>,
}

impl Nesting {
    fn absorb(&mut self, other: Nesting, outer: bool) {
        if outer {
            for (key, depth) in other.windows {
                bump(&mut self.windows, key, depth);
            }
        }
        for (key, depth) in other.forks {
            bump(&mut self.forks, key, depth);
        }
    }

    fn window_depth(&self, key: &BfbKey) -> i32 {
        self.windows.get(key).copied().unwrap_or(0)
    }

    fn fork_depth(&self, key: &BfbKey) -> i32 {
        self.forks.get(key).copied().unwrap_or(0)
    }
}

fn bump(map: &mut BTreeMap<BfbKey, i32>, key: BfbKey, depth: i32) {
    let slot = map.entry(key).or_insert(0);
    *slot = (*slot).max(depth);
}

/// Stamps a [`LevelTag`] on every window, every fork and, when enabled, every
/// aggregate call.
///
/// A node's tag counts the nodes with the same BFB names nested below it:
/// `(names, -windows_below, -forks_below)`. The outermost node of a chain gets
/// the most negative nesting and is therefore computed last. Tags already
/// present are kept, which makes the pass idempotent.
pub struct LevelTagMutator<'r> {
    registry: &'r Registry,
    tag_aggregates: bool,
}

impl<'r> LevelTagMutator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            tag_aggregates: false,
        }
    }

    pub fn with_aggregates(mut self, tag_aggregates: bool) -> Self {
        self.tag_aggregates = tag_aggregates;
        self
    }

    pub fn tag(&self, expr: Expr) -> TaggingResult<Expr> {
        self.visit(expr, &NodeHierarchyIndex::root())
            .map(|(tagged, _)| tagged)
    }

    fn visit(&self, expr: Expr, index: &NodeHierarchyIndex) -> TaggingResult<(Expr, Nesting)> {
        match expr {
            Expr::Tagged(Tagged { tag, expr: inner }) => {
                let already = match inner.as_ref() {
                    Expr::Tagged(_) => true,
                    Expr::Fork(f) => f.tag.is_some(),
                    _ => false,
                };
                if already {
                    return Err(TaggingError::DoubleTagged {
                        index: index.clone(),
                    });
                }
                let (inner, mut nesting) = self.visit_children(*inner, &index.child(0))?;
                bump(&mut nesting.windows, tag.bfb_names.clone(), 1 - tag.func_nesting);
                Ok((Expr::tagged(tag, inner), nesting))
            }
            other => {
                let (node, nesting) = self.visit_children(other, index)?;
                Ok(self.tag_node(node, nesting))
            }
        }
    }

    fn visit_children(
        &self,
        mut node: Expr,
        index: &NodeHierarchyIndex,
    ) -> TaggingResult<(Expr, Nesting)> {
        let outer: BTreeSet<usize> = outer_children(&node).into_iter().map(|(pos, _)| pos).collect();
        let mut nesting = Nesting::default();
        for (pos, child) in node.children_mut().into_iter().enumerate() {
            let taken = std::mem::replace(child, Expr::null());
            let (visited, below) = self.visit(taken, &index.child(pos))?;
            *child = visited;
            nesting.absorb(below, outer.contains(&pos));
        }
        Ok((node, nesting))
    }

    fn tag_node(&self, node: Expr, mut nesting: Nesting) -> (Expr, Nesting) {
        match node {
            Expr::Fork(mut fork) => {
                let key = fork.before_filter_by.clone();
                let depth = match &fork.tag {
                    Some(tag) => 1 - tag.qfork_nesting,
                    None => {
                        let tag = LevelTag {
                            bfb_names: key.clone(),
                            func_nesting: -nesting.window_depth(&key),
                            qfork_nesting: -nesting.fork_depth(&key),
                        };
                        trace!(%tag, "tagging fork");
                        let depth = 1 - tag.qfork_nesting;
                        fork.tag = Some(tag);
                        depth
                    }
                };
                bump(&mut nesting.forks, key, depth);
                (Expr::Fork(fork), nesting)
            }
            Expr::Window(ref w) => {
                let key = w.before_filter_by.clone();
                self.wrap(node, key, nesting)
            }
            Expr::Call(ref c) if self.tag_aggregates && self.registry.is_aggregate(&c.name) => {
                let key = c.before_filter_by.clone();
                self.wrap(node, key, nesting)
            }
            other => (other, nesting),
        }
    }

    fn wrap(&self, node: Expr, key: BfbKey, mut nesting: Nesting) -> (Expr, Nesting) {
        let tag = LevelTag {
            bfb_names: key.clone(),
            func_nesting: -nesting.window_depth(&key),
            qfork_nesting: -nesting.fork_depth(&key),
        };
        trace!(%tag, kind = node.node_kind(), "tagging node");
        bump(&mut nesting.windows, key, 1 - tag.func_nesting);
        (Expr::tagged(tag, node), nesting)
    }
}
