use tracing::trace;

use super::mask::{AddFormula, AliasedFormulaSplitMask, QueryPart, QuerySplitMask, SplitIds, SubqueryType};
use super::splitter::{is_aggregate_expr, is_dimension, join_index, same_expr, MultiQuerySplitter};
use super::AssemblyResult;
use crate::formula::inspect::{contains_window, is_constant, walk_outer};
use crate::formula::{Expr, NodeHierarchyIndex};
use crate::query::CompiledQuery;
use crate::registry::Registry;

/// Moves aggregates out from under window functions.
///
/// A query like `RSUM(SUM(x))` grouped by `day` becomes a subquery computing
/// `SUM(x)` per `day` and a cropped query running the window over its
/// result without grouping. Only used when window splitting is enabled.
pub struct WinFuncQuerySplitter<'r> {
    registry: &'r Registry,
}

impl<'r> WinFuncQuerySplitter<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    fn wraps_aggregation(&self, window: &Expr) -> bool {
        window
            .children()
            .into_iter()
            .any(|c| contains_window(c) || is_aggregate_expr(self.registry, c))
    }

    fn needs_split(&self, query: &CompiledQuery) -> bool {
        QueryPart::SPLITTABLE.iter().any(|part| {
            part.formulas(query).iter().any(|f| {
                outermost_windows(&f.expr)
                    .iter()
                    .filter_map(|idx| f.expr.get(idx))
                    .any(|w| self.wraps_aggregation(w))
            })
        })
    }

    fn window_depth(&self, expr: &Expr) -> usize {
        let inner = expr
            .children()
            .into_iter()
            .map(|c| self.window_depth(c))
            .max()
            .unwrap_or(0);
        match expr {
            Expr::Window(_) if self.wraps_aggregation(expr) => inner + 1,
            _ => inner,
        }
    }
}

/// Indices of windows not nested in other windows.
fn outermost_windows(expr: &Expr) -> Vec<NodeHierarchyIndex> {
    let mut out = Vec::new();
    walk_outer(expr, &mut |idx, node| {
        if matches!(node, Expr::Window(_)) {
            out.push(idx.clone());
            return false;
        }
        true
    });
    out
}

impl MultiQuerySplitter for WinFuncQuerySplitter<'_> {
    fn name(&self) -> &'static str {
        "window_function"
    }

    fn get_split_masks(
        &self,
        query: &CompiledQuery,
        ids: &mut SplitIds,
    ) -> AssemblyResult<Vec<QuerySplitMask>> {
        if !self.needs_split(query) {
            return Ok(Vec::new());
        }

        let mut mask = QuerySplitMask::new(SubqueryType::WindowFunc, ids.queries.next_id());
        let mut aliases: Vec<(Expr, String)> = Vec::new();
        let mut alias_for = |node: &Expr, ids: &mut SplitIds| -> String {
            if let Some((_, alias)) = aliases.iter().find(|(e, _)| same_expr(e, node)) {
                return alias.clone();
            }
            let alias = ids.exprs.next_id();
            aliases.push((node.clone(), alias.clone()));
            alias
        };

        for part in QueryPart::SPLITTABLE {
            for (i, formula) in part.formulas(query).iter().enumerate() {
                let expr = &formula.expr;
                if is_constant(expr) || (part != QueryPart::Filters && is_dimension(query, formula)) {
                    continue;
                }
                if !contains_window(expr) {
                    if part == QueryPart::Filters {
                        mask.filter_indices.insert(i);
                    } else {
                        let alias = alias_for(expr, ids);
                        mask.formula_split_masks.push(AliasedFormulaSplitMask::new(
                            part,
                            i,
                            NodeHierarchyIndex::root(),
                            alias,
                        ));
                    }
                    continue;
                }
                for window_idx in outermost_windows(expr) {
                    let Some(window) = expr.get(&window_idx) else {
                        continue;
                    };
                    for relative in window.autonomous_children() {
                        let Some(child) = window.get(&relative) else {
                            continue;
                        };
                        if is_constant(child) {
                            continue;
                        }
                        let idx = join_index(&window_idx, &relative);
                        trace!(%idx, formula = %formula.alias, "window split point");
                        let alias = alias_for(child, ids);
                        mask.formula_split_masks
                            .push(AliasedFormulaSplitMask::new(part, i, idx, alias));
                    }
                }
            }
        }

        // A dimension the windows already order or partition by keeps its alias.
        for gb in &query.group_by {
            if mask.add_formulas.iter().any(|a| same_expr(&a.expr, &gb.expr)) {
                continue;
            }
            let is_group_by = !is_constant(&gb.expr);
            let alias = if is_group_by {
                alias_for(&gb.expr, ids)
            } else {
                ids.exprs.next_id()
            };
            mask.add_formulas.push(AddFormula {
                alias,
                expr: gb.expr.clone(),
                from_ids: gb.from_ids.clone(),
                is_group_by,
            });
        }
        Ok(vec![mask])
    }

    fn depth(&self, query: &CompiledQuery) -> usize {
        query
            .all_exprs()
            .map(|e| self.window_depth(e))
            .max()
            .unwrap_or(0)
    }

    /// The windows now run over already grouped rows.
    fn mutate_cropped_query(&self, mut query: CompiledQuery) -> CompiledQuery {
        query.group_by.clear();
        query
    }
}
