//! Turning a planned and sliced query into one compiled query per level.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::{
    CompiledFormula, CompiledJoinOn, CompiledLevel, CompiledMultiLevelQuery, CompiledQuery,
    ExecutionPlan, FromObject, JoinedFrom, PlannedFormula,
};
use crate::slicing::{AliasGenerator, FormulaSlicer, SlicedFormula};

/// Sliced formulas of a plan, in plan order.
#[derive(Debug, Clone, Default)]
pub struct SlicedQuery {
    pub select: Vec<SlicedFormula>,
    pub group_by: Vec<SlicedFormula>,
    pub order_by: Vec<SlicedFormula>,
    pub filters: Vec<SlicedFormula>,
    pub join_on: Vec<SlicedFormula>,
}

impl SlicedQuery {
    /// Slice every planned formula with one shared alias generator.
    pub fn from_plan(plan: &ExecutionPlan, gen: &mut AliasGenerator) -> Self {
        let mut slice_all = |planned: &[PlannedFormula]| -> Vec<SlicedFormula> {
            planned
                .iter()
                .map(|p| FormulaSlicer::new(&p.schema).slice(&p.formula.expr, &p.formula.alias, gen))
                .collect()
        };
        let select = slice_all(&plan.select);
        let group_by = slice_all(&plan.group_by);
        let order_by = slice_all(&plan.order_by);
        let filters = slice_all(&plan.filters);
        let join_on = plan
            .join_on
            .iter()
            .map(|j| FormulaSlicer::new(&j.schema).slice(&j.join_on.expr, "join_on", gen))
            .collect();
        Self {
            select,
            group_by,
            order_by,
            filters,
            join_on,
        }
    }
}

/// Builds the level queries.
///
/// The top level keeps the original query id, select order, ordering and
/// pagination. Lower levels get ids `{top}_{iteration}_{level}_0`, select
/// their slices sorted by alias and read the level below as a subquery.
pub struct QuerySeparator {
    iteration_id: u32,
}

impl QuerySeparator {
    pub fn new(iteration_id: u32) -> Self {
        Self { iteration_id }
    }

    pub fn separate(
        &self,
        plan: &ExecutionPlan,
        query: &CompiledQuery,
        sliced: &SlicedQuery,
    ) -> CompiledMultiLevelQuery {
        let level_count = plan.level_count().max(1);
        let mut levels: Vec<CompiledLevel> = Vec::with_capacity(level_count);
        let mut below: Option<(String, Vec<String>)> = None;

        for level in 0..level_count {
            let is_top = level + 1 == level_count;
            let id = if is_top {
                query.id.clone()
            } else {
                format!("{}_{}_{}_0", query.id, self.iteration_id, level)
            };
            let joined_from = match &below {
                None => query.joined_from.clone(),
                Some((below_id, columns)) => JoinedFrom::single(FromObject::Subquery {
                    id: below_id.clone(),
                    query_id: below_id.clone(),
                    columns: columns.clone(),
                }),
            };
            let from_ids = |f: &CompiledFormula| -> BTreeSet<String> {
                match &below {
                    None => f.from_ids.clone(),
                    Some((below_id, _)) => BTreeSet::from([below_id.clone()]),
                }
            };

            let mut q = CompiledQuery::new(id, joined_from);
            q.level_type = plan.level_types.get(level).copied().unwrap_or_default();

            let roles = plan
                .select
                .iter()
                .zip(&sliced.select)
                .chain(plan.group_by.iter().zip(&sliced.group_by))
                .chain(plan.order_by.iter().zip(&sliced.order_by))
                .chain(plan.filters.iter().zip(&sliced.filters));

            let mut passed: Vec<CompiledFormula> = Vec::new();
            let mut seen: BTreeSet<String> = BTreeSet::new();
            for (planned, sf) in roles {
                if level >= sf.top_index() {
                    continue;
                }
                for (alias, expr) in &sf.levels[level].aliased {
                    if seen.insert(alias.clone()) {
                        passed.push(
                            CompiledFormula::new(alias.clone(), expr.clone())
                                .with_from_ids(from_ids(&planned.formula)),
                        );
                    }
                }
            }
            for sf in &sliced.join_on {
                if level < sf.top_index() {
                    for (alias, expr) in &sf.levels[level].aliased {
                        if seen.insert(alias.clone()) {
                            passed.push(CompiledFormula::new(alias.clone(), expr.clone()));
                        }
                    }
                }
            }
            passed.sort_by(|a, b| a.alias.cmp(&b.alias));

            if is_top {
                q.select = top_select(plan, sliced, &from_ids);
                q.order_by = plan
                    .order_by
                    .iter()
                    .zip(&sliced.order_by)
                    .filter_map(|(p, sf)| top_formula(&p.formula, sf, &from_ids))
                    .collect();
                q.limit = query.limit;
                q.offset = query.offset;
            } else {
                q.select = passed;
            }

            for (p, sf) in plan.group_by.iter().zip(&sliced.group_by) {
                if sf.top_index() == level {
                    q.group_by.extend(top_formula(&p.formula, sf, &from_ids));
                }
            }
            for (p, sf) in plan.filters.iter().zip(&sliced.filters) {
                if sf.top_index() == level {
                    q.filters.extend(top_formula(&p.formula, sf, &from_ids));
                }
            }
            for (p, sf) in plan.join_on.iter().zip(&sliced.join_on) {
                if let (true, Some(expr)) = (sf.top_index() == level, sf.top_expr()) {
                    q.join_on.push(CompiledJoinOn {
                        expr: expr.clone(),
                        ..p.join_on.clone()
                    });
                }
            }

            debug!(
                id = %q.id,
                level,
                select = q.select.len(),
                filters = q.filters.len(),
                "separated level query"
            );
            below = Some((q.id.clone(), q.column_names()));
            levels.push(CompiledLevel {
                level_type: q.level_type,
                queries: vec![q],
            });
        }

        CompiledMultiLevelQuery { levels }
    }
}

fn top_formula<F>(original: &CompiledFormula, sliced: &SlicedFormula, from_ids: &F) -> Option<CompiledFormula>
where
    F: Fn(&CompiledFormula) -> BTreeSet<String>,
{
    let expr = sliced.top_expr()?;
    Some(CompiledFormula {
        expr: expr.clone(),
        from_ids: from_ids(original),
        ..original.clone()
    })
}

/// Top select in original order; repeated aliases get a `_cp{n}` suffix.
fn top_select<F>(plan: &ExecutionPlan, sliced: &SlicedQuery, from_ids: &F) -> Vec<CompiledFormula>
where
    F: Fn(&CompiledFormula) -> BTreeSet<String>,
{
    let mut used: HashMap<String, usize> = HashMap::new();
    plan.select
        .iter()
        .zip(&sliced.select)
        .filter_map(|(p, sf)| {
            let mut formula = top_formula(&p.formula, sf, from_ids)?;
            let count = used.entry(formula.alias.clone()).or_insert(0);
            if *count > 0 {
                formula.alias = format!("{}_cp{}", formula.alias, count);
            }
            *count += 1;
            Some(formula)
        })
        .collect()
}
