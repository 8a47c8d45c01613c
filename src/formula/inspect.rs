//! Read-only queries over formula trees.
//!
//! Fork interiors (the result expression, the fork side of joining conditions
//! and LOD dimensions) run in their own subquery. Helpers suffixed with
//! `_outer` do not look inside them.

use std::collections::BTreeSet;

use super::{Expr, JoinCondition, LevelTag, NodeHierarchyIndex};

/// Children evaluated in the same query as `expr`.
pub fn outer_children(expr: &Expr) -> Vec<(usize, &Expr)> {
    match expr {
        Expr::Fork(fork) => {
            let mut out = Vec::new();
            let mut pos = 1;
            for cond in &fork.joining {
                match cond {
                    JoinCondition::SelfEquality(e) => {
                        out.push((pos, e));
                        pos += 1;
                    }
                    JoinCondition::Binary { expr, .. } => {
                        out.push((pos, expr));
                        pos += 2;
                    }
                }
            }
            out
        }
        other => other.children().into_iter().enumerate().collect(),
    }
}

/// Pre-order walk that does not enter fork interiors.
pub fn walk_outer<F>(expr: &Expr, visit: &mut F)
where
    F: FnMut(&NodeHierarchyIndex, &Expr) -> bool,
{
    walk_outer_at(expr, &NodeHierarchyIndex::root(), visit);
}

fn walk_outer_at<F>(expr: &Expr, index: &NodeHierarchyIndex, visit: &mut F)
where
    F: FnMut(&NodeHierarchyIndex, &Expr) -> bool,
{
    if !visit(index, expr) {
        return;
    }
    for (pos, child) in outer_children(expr) {
        walk_outer_at(child, &index.child(pos), visit);
    }
}

pub fn any_outer<F>(expr: &Expr, mut pred: F) -> bool
where
    F: FnMut(&Expr) -> bool,
{
    let mut found = false;
    walk_outer(expr, &mut |_, node| {
        if found {
            return false;
        }
        if pred(node) {
            found = true;
            return false;
        }
        true
    });
    found
}

pub fn contains_window(expr: &Expr) -> bool {
    any_outer(expr, |e| matches!(e, Expr::Window(_)))
}

pub fn contains_fork(expr: &Expr) -> bool {
    any_outer(expr, |e| matches!(e, Expr::Fork(_)))
}

/// Whether any level tag appears outside fork interiors.
pub fn contains_tags(expr: &Expr) -> bool {
    any_outer(expr, |e| own_tag(e).is_some())
}

/// Tag carried by the node itself (a tag wrapper or a tagged fork).
pub fn own_tag(expr: &Expr) -> Option<&LevelTag> {
    match expr {
        Expr::Tagged(t) => Some(&t.tag),
        Expr::Fork(f) => f.tag.as_ref(),
        Expr::Paren(inner) => own_tag(inner),
        _ => None,
    }
}

/// Tags outside fork interiors in pre-order.
pub fn collect_tags(expr: &Expr) -> Vec<LevelTag> {
    let mut tags = Vec::new();
    walk_outer(expr, &mut |_, node| {
        match node {
            Expr::Tagged(t) => tags.push(t.tag.clone()),
            Expr::Fork(f) => tags.extend(f.tag.clone()),
            _ => {}
        }
        true
    });
    tags
}

/// Literal-only subtree; such nodes never need a level of their own.
pub fn is_constant(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) => true,
        Expr::Paren(inner) => is_constant(inner),
        Expr::Call(c) => c.lod.is_none() && !c.args.is_empty() && c.args.iter().all(is_constant),
        _ => false,
    }
}

/// Field names referenced anywhere, fork interiors included.
pub fn collect_fields(expr: &Expr) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    expr.walk(&mut |_, node| {
        if let Expr::Field(f) = node {
            names.insert(f.name.clone());
        }
        true
    });
    names
}

pub fn collect_fields_outer(expr: &Expr) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    walk_outer(expr, &mut |_, node| {
        if let Expr::Field(f) = node {
            names.insert(f.name.clone());
        }
        true
    });
    names
}

/// Indices of the outermost forks, not nested in other forks.
pub fn outer_fork_indices(expr: &Expr) -> Vec<NodeHierarchyIndex> {
    let mut out = Vec::new();
    walk_outer(expr, &mut |idx, node| {
        if matches!(node, Expr::Fork(_)) {
            out.push(idx.clone());
            return false;
        }
        true
    });
    out
}
