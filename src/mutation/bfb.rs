use std::collections::BTreeSet;

use crate::formula::Expr;
use crate::registry::{Registry, Scopes};

/// Push BEFORE FILTER BY names down the tree.
///
/// Every window, fork and BFB-capable aggregate ends up with the union of its
/// own names and those of its ancestors, restricted to `available`, the field
/// ids of the filters actually present in the query.
pub fn normalize_before_filter_by(
    expr: &mut Expr,
    available: &BTreeSet<String>,
    registry: &Registry,
) {
    normalize_at(expr, &BTreeSet::new(), available, registry);
}

fn normalize_at(
    expr: &mut Expr,
    outer: &BTreeSet<String>,
    available: &BTreeSet<String>,
    registry: &Registry,
) {
    let names = match expr {
        Expr::Window(w) => Some(&mut w.before_filter_by),
        Expr::Fork(f) => Some(&mut f.before_filter_by),
        Expr::Call(c)
            if registry
                .scopes(&c.name, false)
                .is_some_and(|s| s.contains(Scopes::SUPPORTS_BFB)) =>
        {
            Some(&mut c.before_filter_by)
        }
        _ => None,
    };

    let scope = match names {
        Some(names) => {
            let merged: BTreeSet<String> = names
                .union(outer)
                .filter(|name| available.contains(*name))
                .cloned()
                .collect();
            *names = merged.clone();
            merged
        }
        None => outer.clone(),
    };

    for child in expr.children_mut() {
        normalize_at(child, &scope, available, registry);
    }
}
