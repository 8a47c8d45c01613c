use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{AliasGenerator, LevelBoundary, SliceSchema};
use crate::formula::inspect::{is_constant, outer_children};
use crate::formula::{Expr, Tagged};

/// One level of a sliced formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlicedLevel {
    pub name: String,
    pub boundary: LevelBoundary,
    /// Sub-expressions computed here and read by the next level by alias.
    pub aliased: Vec<(String, Expr)>,
    /// The formula itself, on the top level only.
    pub top: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlicedFormula {
    pub alias: String,
    pub levels: Vec<SlicedLevel>,
}

impl SlicedFormula {
    pub fn top_index(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    pub fn top_expr(&self) -> Option<&Expr> {
        self.levels.last().and_then(|level| level.top.as_ref())
    }

    /// Substitute every alias back, giving the formula before slicing.
    pub fn reassemble(&self) -> Expr {
        let Some(top) = self.top_expr() else {
            return Expr::null();
        };
        let maps: Vec<HashMap<&str, &Expr>> = self
            .levels
            .iter()
            .map(|level| level.aliased.iter().map(|(a, e)| (a.as_str(), e)).collect())
            .collect();
        expand(top, self.top_index(), &maps)
    }
}

fn expand(expr: &Expr, level: usize, maps: &[HashMap<&str, &Expr>]) -> Expr {
    if level > 0 {
        if let Some(inner) = expr.as_field().and_then(|name| maps[level - 1].get(name)) {
            return expand(inner, level - 1, maps);
        }
    }
    let mut out = expr.clone();
    for child in out.children_mut() {
        *child = expand(child, level, maps);
    }
    out
}

/// Splits formulas along a [`SliceSchema`].
///
/// Every sub-expression lands on the lowest level whose boundary accepts it.
/// Constants stay where they are used. Fork interiors are never cut: only the
/// fields they read are brought up from lower levels.
pub struct FormulaSlicer<'s> {
    schema: &'s SliceSchema,
}

impl<'s> FormulaSlicer<'s> {
    pub fn new(schema: &'s SliceSchema) -> Self {
        Self { schema }
    }

    pub fn slice(&self, expr: &Expr, alias: &str, gen: &mut AliasGenerator) -> SlicedFormula {
        let mut run = SliceRun {
            schema: self.schema,
            gen,
            aliased: vec![Vec::new(); self.schema.len()],
        };
        let top = run.place(expr, self.schema.top_index());
        let SliceRun { aliased, .. } = run;

        let top_index = self.schema.top_index();
        let levels = self
            .schema
            .levels()
            .iter()
            .zip(aliased)
            .enumerate()
            .map(|(i, (boundary, aliased))| SlicedLevel {
                name: boundary.name(),
                boundary: boundary.clone(),
                aliased,
                top: (i == top_index).then(|| top.clone()),
            })
            .collect();
        trace!(alias, levels = self.schema.len(), "sliced formula");
        SlicedFormula {
            alias: alias.to_string(),
            levels,
        }
    }
}

struct SliceRun<'s, 'g> {
    schema: &'s SliceSchema,
    gen: &'g mut AliasGenerator,
    aliased: Vec<Vec<(String, Expr)>>,
}

impl SliceRun<'_, '_> {
    fn place(&mut self, node: &Expr, level: usize) -> Expr {
        if level == 0 || is_constant(node) {
            return node.clone();
        }
        let below = level - 1;
        if self.schema.levels()[below].accepts(node) {
            let inner = self.place(node, below);
            let alias = self.gen.register(below, &inner);
            let slot = &mut self.aliased[below];
            if !slot.iter().any(|(a, _)| *a == alias) {
                slot.push((alias.clone(), inner));
            }
            return Expr::field(alias);
        }
        self.rebuild(node, level)
    }

    fn rebuild(&mut self, node: &Expr, level: usize) -> Expr {
        // The wrapper was rejected, so its node stays on this level too.
        if let Expr::Tagged(t) = node {
            return Expr::Tagged(Tagged {
                tag: t.tag.clone(),
                expr: Box::new(self.rebuild(&t.expr, level)),
            });
        }
        let outer: BTreeSet<usize> = outer_children(node).into_iter().map(|(p, _)| p).collect();
        let mut out = node.clone();
        for (pos, child) in out.children_mut().into_iter().enumerate() {
            *child = if outer.contains(&pos) {
                self.place(child, level)
            } else {
                self.lift_fields(child, level)
            };
        }
        out
    }

    fn lift_fields(&mut self, node: &Expr, level: usize) -> Expr {
        if matches!(node, Expr::Field(_)) {
            return self.place(node, level);
        }
        let mut out = node.clone();
        for child in out.children_mut() {
            *child = self.lift_fields(child, level);
        }
        out
    }
}
