use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::mask::{AddFormula, AliasedFormulaSplitMask, QueryPart, QuerySplitMask, SplitIds, SubqueryType};
use super::splitter::{is_aggregate_expr, is_dimension, replace_subtrees, same_expr, MultiQuerySplitter};
use super::{AssemblyError, AssemblyResult};
use crate::formula::inspect::{is_constant, outer_fork_indices};
use crate::formula::{Expr, ForkJoinType, JoinCondition, LodSpec, QueryFork};
use crate::query::CompiledQuery;
use crate::registry::Registry;

/// Turns query forks into joined subqueries.
///
/// Forks with the same dimensions, join type, effective BFB names and
/// joining conditions share one subquery. The fork's result becomes a column
/// of that subquery; the subquery is joined back to the base on the joining
/// conditions.
pub struct QueryForkQuerySplitter<'r> {
    registry: &'r Registry,
}

struct ForkGroup<'q> {
    dims: Vec<Expr>,
    join_type: ForkJoinType,
    bfb: BTreeSet<String>,
    joining: Vec<JoinCondition>,
    add_formulas: Vec<AddFormula>,
    results: Vec<(&'q Expr, String)>,
    split_masks: Vec<AliasedFormulaSplitMask>,
}

impl ForkGroup<'_> {
    fn matches(&self, dims: &[Expr], fork: &QueryFork, bfb: &BTreeSet<String>, joining: &[JoinCondition]) -> bool {
        self.join_type == fork.join_type
            && &self.bfb == bfb
            && self.joining == joining
            && self.dims.len() == dims.len()
            && dims.iter().all(|d| self.dims.iter().any(|s| same_expr(s, d)))
    }
}

impl<'r> QueryForkQuerySplitter<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Dimensions the fork aggregates by, given the query's own dimensions.
    fn fork_dimensions(&self, fork: &QueryFork, query: &CompiledQuery) -> AssemblyResult<Vec<Expr>> {
        let query_dims = query.group_by.iter().map(|f| &f.expr);
        match &fork.lod {
            LodSpec::Fixed(dims) => Ok(dims.clone()),
            LodSpec::Inherited => Ok(query_dims.cloned().collect()),
            LodSpec::Exclude(excluded) => Ok(query_dims
                .filter(|d| !excluded.iter().any(|e| same_expr(e, d)))
                .cloned()
                .collect()),
            LodSpec::Include(_) => Err(AssemblyError::UnsupportedLod { kind: "INCLUDE" }),
        }
    }

    fn fork_depth(expr: &Expr) -> usize {
        let inner = expr
            .children()
            .into_iter()
            .map(Self::fork_depth)
            .max()
            .unwrap_or(0);
        match expr {
            Expr::Fork(_) => inner + 1,
            _ => inner,
        }
    }
}

impl MultiQuerySplitter for QueryForkQuerySplitter<'_> {
    fn name(&self) -> &'static str {
        "query_fork"
    }

    fn get_split_masks(
        &self,
        query: &CompiledQuery,
        ids: &mut SplitIds,
    ) -> AssemblyResult<Vec<QuerySplitMask>> {
        let available_filters: BTreeSet<&str> = query
            .filters
            .iter()
            .filter_map(|f| f.original_field_id.as_deref())
            .collect();
        let all_from_ids: BTreeSet<String> = query.joined_from.ids().map(str::to_string).collect();

        let mut groups: Vec<ForkGroup<'_>> = Vec::new();
        for part in QueryPart::SPLITTABLE {
            for (i, formula) in part.formulas(query).iter().enumerate() {
                for idx in outer_fork_indices(&formula.expr) {
                    let Some(Expr::Fork(fork)) = formula.expr.get(&idx) else {
                        continue;
                    };
                    let bfb: BTreeSet<String> = fork
                        .before_filter_by
                        .iter()
                        .filter(|name| available_filters.contains(name.as_str()))
                        .cloned()
                        .collect();
                    let mut dims = self.fork_dimensions(fork, query)?;
                    let mut joining = fork.joining.clone();
                    if dims.is_empty() {
                        // Total aggregation still needs something to join on.
                        dims.push(Expr::int(1));
                        joining = vec![JoinCondition::SelfEquality(Expr::int(1))];
                    } else if joining.is_empty() {
                        return Err(AssemblyError::IncompatibleLodDimensions {
                            query: query.id.clone(),
                        });
                    }

                    let position = match groups
                        .iter()
                        .position(|g| g.matches(&dims, fork, &bfb, &joining))
                    {
                        Some(pos) => pos,
                        None => {
                            let mut add_formulas: Vec<AddFormula> = dims
                                .iter()
                                .map(|dim| AddFormula {
                                    alias: ids.exprs.next_id(),
                                    expr: dim.clone(),
                                    from_ids: all_from_ids.clone(),
                                    is_group_by: !is_constant(dim),
                                })
                                .collect();
                            // Measures in join conditions must be selected to join on them.
                            for condition in &joining {
                                let exprs = match condition {
                                    JoinCondition::SelfEquality(e) => vec![e],
                                    JoinCondition::Binary { expr, fork_expr } => vec![expr, fork_expr],
                                };
                                for expr in exprs {
                                    if is_aggregate_expr(self.registry, expr) {
                                        add_formulas.push(AddFormula {
                                            alias: ids.exprs.next_id(),
                                            expr: expr.clone(),
                                            from_ids: all_from_ids.clone(),
                                            is_group_by: false,
                                        });
                                    }
                                }
                            }
                            groups.push(ForkGroup {
                                dims,
                                join_type: fork.join_type,
                                bfb,
                                joining,
                                add_formulas,
                                results: Vec::new(),
                                split_masks: Vec::new(),
                            });
                            groups.len() - 1
                        }
                    };

                    let group = &mut groups[position];
                    let result = fork.result_expr.as_ref();
                    let alias = match group.results.iter().find(|(e, _)| *e == result) {
                        Some((_, alias)) => alias.clone(),
                        None => {
                            let alias = ids.exprs.next_id();
                            group.results.push((result, alias.clone()));
                            alias
                        }
                    };
                    group.split_masks.push(
                        AliasedFormulaSplitMask::new(part, i, idx.clone(), alias).with_inner(idx.child(0)),
                    );
                }
            }
        }

        // Filters cut at this level can only apply above it.
        let split_filters: BTreeSet<usize> = groups
            .iter()
            .flat_map(|g| &g.split_masks)
            .filter(|m| m.query_part == QueryPart::Filters)
            .map(|m| m.formula_list_idx)
            .collect();

        let masks = groups
            .into_iter()
            .map(|group| {
                let aliases: Vec<(Expr, String)> = group
                    .add_formulas
                    .iter()
                    .map(|a| (a.expr.clone(), a.alias.clone()))
                    .collect();
                let joining = group
                    .joining
                    .iter()
                    .map(|c| match c {
                        JoinCondition::SelfEquality(e) => JoinCondition::SelfEquality(replace_subtrees(e, &aliases)),
                        JoinCondition::Binary { expr, fork_expr } => JoinCondition::Binary {
                            expr: replace_subtrees(expr, &aliases),
                            fork_expr: replace_subtrees(fork_expr, &aliases),
                        },
                    })
                    .collect();
                let filter_indices = query
                    .filters
                    .iter()
                    .enumerate()
                    .filter(|(i, f)| {
                        let before = f
                            .original_field_id
                            .as_ref()
                            .is_some_and(|id| group.bfb.contains(id));
                        !before && !split_filters.contains(i)
                    })
                    .map(|(i, _)| i)
                    .collect();

                let mut mask = QuerySplitMask::new(SubqueryType::Default, ids.queries.next_id());
                mask.formula_split_masks = group.split_masks;
                mask.add_formulas = group.add_formulas;
                mask.filter_indices = filter_indices;
                mask.join_type = Some(group.join_type);
                mask.joining = joining;
                mask
            })
            .collect::<Vec<_>>();

        if !masks.is_empty() {
            debug!(query = %query.id, forks = masks.len(), "collected query forks");
        }
        Ok(masks)
    }

    fn depth(&self, query: &CompiledQuery) -> usize {
        query.all_exprs().map(Self::fork_depth).max().unwrap_or(0)
    }

    /// Level of detail and BFB are fully expressed by the subquery itself.
    fn mutate_split_node(&self, node: Expr) -> Expr {
        match node {
            Expr::Call(mut call) if self.registry.is_aggregate(&call.name) => {
                call.lod = None;
                call.before_filter_by.clear();
                Expr::Call(call)
            }
            other => other,
        }
    }

    /// Drop grouping once nothing selected is aggregated any more.
    fn mutate_cropped_query(&self, mut query: CompiledQuery) -> CompiledQuery {
        let statuses: BTreeSet<bool> = query
            .select
            .iter()
            .filter(|f| !is_dimension(&query, f) && !is_constant(&f.expr))
            .map(|f| is_aggregate_expr(self.registry, &f.expr))
            .collect();
        match statuses.len() {
            0 => {}
            1 => {
                if statuses.contains(&false) {
                    query.group_by.clear();
                }
            }
            _ => warn!(query = %query.id, "mixed aggregated and plain selects after fork split"),
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::LevelTag;
    use crate::query::{CompiledFormula, FromObject, JoinedFrom};

    fn fork(result: Expr, dims: Vec<Expr>, on: Vec<Expr>) -> Expr {
        Expr::Fork(QueryFork {
            join_type: ForkJoinType::Left,
            result_expr: Box::new(result),
            joining: on.into_iter().map(JoinCondition::SelfEquality).collect(),
            lod: LodSpec::Fixed(dims),
            before_filter_by: BTreeSet::new(),
            tag: Some(LevelTag::new(Vec::<String>::new(), 0, 0)),
        })
    }

    fn query(select_fork: Expr) -> CompiledQuery {
        let from = FromObject::Table {
            id: "t".into(),
            table: "sales".into(),
            schema: None,
            columns: vec!["region".into(), "city".into(), "amount".into()],
        };
        let mut q = CompiledQuery::new("q", JoinedFrom::single(from));
        q.select = vec![
            CompiledFormula::new("region", Expr::field("region")).with_from_ids(["t"]),
            CompiledFormula::new("city", Expr::field("city")).with_from_ids(["t"]),
            CompiledFormula::new("share", select_fork).with_from_ids(["t"]),
        ];
        q.group_by = vec![
            CompiledFormula::new("region", Expr::field("region")).with_from_ids(["t"]),
            CompiledFormula::new("city", Expr::field("city")).with_from_ids(["t"]),
        ];
        q
    }

    fn region_total() -> Expr {
        fork(
            Expr::call("SUM", vec![Expr::field("amount")]),
            vec![Expr::field("region")],
            vec![Expr::field("region")],
        )
    }

    #[test]
    fn test_fork_becomes_joined_subquery() {
        let registry = Registry::default_shared();
        let splitter = QueryForkQuerySplitter::new(&registry);
        let q = query(Expr::binary(
            "/",
            Expr::call("SUM", vec![Expr::field("amount")]),
            region_total(),
        ));
        assert_eq!(splitter.depth(&q), 1);

        let mut ids = SplitIds::new("q", 0);
        let produced = splitter.split_query(&q, &mut ids).unwrap().unwrap();
        assert_eq!(produced.len(), 3);
        let (base, fork_q, cropped) = (&produced[0], &produced[1], &produced[2]);

        // e_0_0 = region dim of the fork, e_0_1 = fork result, e_0_2 = leftover SUM.
        assert_eq!(fork_q.column_names(), vec!["e_0_1", "e_0_0"]);
        assert_eq!(fork_q.group_by.len(), 1);
        assert_eq!(base.column_names(), vec!["e_0_2", "e_0_3", "e_0_4"]);
        assert_eq!(base.group_by.len(), 2);

        assert_eq!(cropped.joined_from.root_from_id, base.id);
        assert_eq!(
            cropped.select[2].expr,
            Expr::binary("/", Expr::field("e_0_2"), Expr::field("e_0_1"))
        );
        assert!(cropped.group_by.is_empty());
        let join = &cropped.join_on[0];
        assert_eq!(join.join_type, ForkJoinType::Left);
        assert_eq!(join.expr, Expr::binary("=", Expr::field("e_0_3"), Expr::field("e_0_0")));
        assert!(produced.iter().all(|p| splitter.depth(p) == 0));
    }

    #[test]
    fn test_identical_forks_share_a_subquery() {
        let registry = Registry::default_shared();
        let splitter = QueryForkQuerySplitter::new(&registry);
        let mut q = query(region_total());
        q.order_by.push(CompiledFormula::new("share", region_total()).descending(true));

        let mut ids = SplitIds::new("q", 0);
        let produced = splitter.split_query(&q, &mut ids).unwrap().unwrap();
        // The fork groups by region only, so a base with both dimensions is generated.
        assert_eq!(produced.len(), 3);
        assert_eq!(produced[1].column_names(), vec!["e_0_1", "e_0_0"]);
        let cropped = &produced[2];
        assert_eq!(cropped.select[2].expr, Expr::field("e_0_1"));
        assert_eq!(cropped.order_by[0].expr, Expr::field("e_0_1"));
        assert!(cropped.order_by[0].desc);
    }

    #[test]
    fn test_bfb_filter_stays_out_of_fork() {
        let registry = Registry::default_shared();
        let splitter = QueryForkQuerySplitter::new(&registry);
        let mut q = query(Expr::binary(
            "/",
            Expr::call("SUM", vec![Expr::field("amount")]),
            region_total().with_bfb(["city_filter"]),
        ));
        q.filters = vec![
            CompiledFormula::new("f0", Expr::binary("=", Expr::field("city"), Expr::string("Paris")))
                .with_field_id("city_filter"),
            CompiledFormula::new("f1", Expr::binary(">", Expr::field("amount"), Expr::int(0)))
                .with_field_id("amount_filter"),
        ];
        let mut ids = SplitIds::new("q", 0);
        let produced = splitter.split_query(&q, &mut ids).unwrap().unwrap();
        let (base, fork_q, cropped) = (&produced[0], &produced[1], &produced[2]);
        assert_eq!(fork_q.filters.len(), 1);
        assert_eq!(fork_q.filters[0].alias, "f1");
        assert_eq!(base.filters.len(), 2);
        assert!(cropped.filters.is_empty());
    }

    #[test]
    fn test_total_fork_joins_on_dummy_dimension() {
        let registry = Registry::default_shared();
        let splitter = QueryForkQuerySplitter::new(&registry);
        let total = fork(Expr::call("SUM", vec![Expr::field("amount")]), vec![], vec![]);
        let q = query(Expr::binary("/", Expr::call("SUM", vec![Expr::field("amount")]), total));
        let mut ids = SplitIds::new("q", 0);
        let produced = splitter.split_query(&q, &mut ids).unwrap().unwrap();
        let cropped = produced.last().unwrap();
        let join = &cropped.join_on[0];
        let Expr::Call(eq) = &join.expr else {
            panic!("expected equality, got {}", join.expr);
        };
        assert_eq!(eq.name, "=");
        let base = &produced[0];
        assert!(base.select.iter().any(|f| f.expr == Expr::int(1)));
    }

    #[test]
    fn test_include_lod_is_rejected() {
        let registry = Registry::default_shared();
        let splitter = QueryForkQuerySplitter::new(&registry);
        let mut f = region_total();
        if let Expr::Fork(inner) = &mut f {
            inner.lod = LodSpec::Include(vec![Expr::field("city")]);
        }
        let mut ids = SplitIds::new("q", 0);
        let err = splitter.split_query(&query(f), &mut ids).unwrap_err();
        assert_eq!(err, AssemblyError::UnsupportedLod { kind: "INCLUDE" });
    }
}
