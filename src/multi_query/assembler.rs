use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use super::mask::SplitIds;
use super::splitter::MultiQuerySplitter;
use super::{AssemblyError, AssemblyResult, QueryForkQuerySplitter, WinFuncQuerySplitter};
use crate::query::{CompiledLevel, CompiledMultiLevelQuery, CompiledQuery, LevelType};
use crate::registry::Registry;

/// Runs splitters over every query until nothing splits, then groups the
/// queries into levels by their position in the dependency graph.
pub struct MultiLevelAssembler<'a> {
    splitters: Vec<Box<dyn MultiQuerySplitter + 'a>>,
    iteration_id: u32,
    max_split_passes: Option<usize>,
}

impl<'a> MultiLevelAssembler<'a> {
    /// An assembler without splitters; it only re-levels.
    pub fn new(iteration_id: u32) -> Self {
        Self {
            splitters: Vec::new(),
            iteration_id,
            max_split_passes: None,
        }
    }

    /// Fork splitting, plus window splitting when enabled.
    pub fn for_registry(registry: &'a Registry, iteration_id: u32, split_window_aggregates: bool) -> Self {
        let assembler = Self::new(iteration_id).with_splitter(QueryForkQuerySplitter::new(registry));
        if split_window_aggregates {
            assembler.with_splitter(WinFuncQuerySplitter::new(registry))
        } else {
            assembler
        }
    }

    /// Splitters are tried in the order they were added.
    pub fn with_splitter(mut self, splitter: impl MultiQuerySplitter + 'a) -> Self {
        self.splitters.push(Box::new(splitter));
        self
    }

    pub fn max_split_passes(mut self, passes: usize) -> Self {
        self.max_split_passes = Some(passes);
        self
    }

    fn depth(&self, query: &CompiledQuery) -> usize {
        self.splitters.iter().map(|s| s.depth(query)).sum()
    }

    pub fn assemble(&self, multi: CompiledMultiLevelQuery) -> AssemblyResult<CompiledMultiLevelQuery> {
        let Some(top_id) = multi.top_query().map(|q| q.id.clone()) else {
            return Ok(multi);
        };
        let mut queries: Vec<CompiledQuery> = multi.levels.into_iter().flat_map(|l| l.queries).collect();
        let mut ids = SplitIds::new(&top_id, self.iteration_id);

        let initial_depth = queries.iter().map(|q| self.depth(q)).max().unwrap_or(0);
        let limit = self
            .max_split_passes
            .map_or(initial_depth, |max| max.min(initial_depth));

        let mut passes = 0;
        loop {
            let mut split_any = false;
            let mut next = Vec::with_capacity(queries.len());
            for query in queries {
                match self.split_once(&query, &mut ids)? {
                    Some(produced) => {
                        split_any = true;
                        next.extend(produced);
                    }
                    None => next.push(query),
                }
            }
            queries = next;
            if !split_any {
                break;
            }
            passes += 1;
            if passes > limit {
                return Err(AssemblyError::PassLimitExceeded { limit });
            }
        }
        debug!(passes, queries = queries.len(), initial_depth, "splitting finished");

        relevel(queries, &top_id)
    }

    fn split_once(&self, query: &CompiledQuery, ids: &mut SplitIds) -> AssemblyResult<Option<Vec<CompiledQuery>>> {
        for splitter in &self.splitters {
            let Some(produced) = splitter.split_query(query, ids)? else {
                continue;
            };
            let before = splitter.depth(query);
            for p in &produced {
                let after = splitter.depth(p);
                if after >= before {
                    return Err(AssemblyError::NonDecreasingDepth {
                        query: query.id.clone(),
                        produced: p.id.clone(),
                        before,
                        after,
                    });
                }
            }
            return Ok(Some(produced));
        }
        Ok(None)
    }
}

/// Group queries into levels: a query sits one level above the highest
/// query it reads from. Post-processing queries additionally sit above every
/// source level, so each level holds a single [`LevelType`].
fn relevel(queries: Vec<CompiledQuery>, top_id: &str) -> AssemblyResult<CompiledMultiLevelQuery> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: HashMap<&str, NodeIndex> = queries
        .iter()
        .enumerate()
        .map(|(i, q)| (q.id.as_str(), graph.add_node(i)))
        .collect();

    for query in &queries {
        let reader = nodes[query.id.as_str()];
        for from in query.subquery_ids() {
            let Some(&source) = nodes.get(from) else {
                return Err(AssemblyError::DanglingFrom {
                    query: query.id.clone(),
                    from: from.to_string(),
                });
            };
            graph.add_edge(source, reader, ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| AssemblyError::Cycle {
        query: queries[graph[cycle.node_id()]].id.clone(),
    })?;

    let is_source = |i: usize| queries[i].level_type == LevelType::SourceDb;
    let mut level_of = vec![0usize; queries.len()];
    for &node in &order {
        let i = graph[node];
        if !is_source(i) {
            continue;
        }
        let mut level = 0;
        for input in graph.neighbors_directed(node, Direction::Incoming) {
            let j = graph[input];
            if !is_source(j) {
                return Err(AssemblyError::SourceReadsPostProcessed {
                    query: queries[i].id.clone(),
                    from: queries[j].id.clone(),
                });
            }
            level = level.max(level_of[j] + 1);
        }
        level_of[i] = level;
    }

    let source_levels = (0..queries.len())
        .filter(|&i| is_source(i))
        .map(|i| level_of[i] + 1)
        .max()
        .unwrap_or(0);
    for &node in &order {
        let i = graph[node];
        if is_source(i) {
            continue;
        }
        level_of[i] = graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|input| level_of[graph[input]] + 1)
            .fold(source_levels, usize::max);
    }

    let level_count = level_of.iter().max().map_or(0, |m| m + 1);
    let mut slots: Vec<Option<CompiledQuery>> = queries.into_iter().map(Some).collect();
    let mut grouped: Vec<Vec<CompiledQuery>> = vec![Vec::new(); level_count];
    for &node in &order {
        let i = graph[node];
        if let Some(query) = slots[i].take() {
            grouped[level_of[i]].push(query);
        }
    }

    let levels = grouped
        .into_iter()
        .filter(|queries| !queries.is_empty())
        .map(|mut queries| {
            // The top query leads its level.
            if let Some(pos) = queries.iter().position(|q| q.id == top_id) {
                let top = queries.remove(pos);
                queries.insert(0, top);
            }
            let level_type = queries[0].level_type;
            debug_assert!(queries.iter().all(|q| q.level_type == level_type));
            CompiledLevel { level_type, queries }
        })
        .collect();

    Ok(CompiledMultiLevelQuery { levels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{Expr, ForkJoinType, JoinCondition, LodSpec, QueryFork};
    use crate::query::{CompiledFormula, FromObject, JoinedFrom};
    use std::collections::BTreeSet;

    fn table() -> JoinedFrom {
        JoinedFrom::single(FromObject::Table {
            id: "t".into(),
            table: "sales".into(),
            schema: None,
            columns: vec!["region".into(), "amount".into()],
        })
    }

    fn single(query: CompiledQuery) -> CompiledMultiLevelQuery {
        CompiledMultiLevelQuery {
            levels: vec![CompiledLevel {
                level_type: LevelType::SourceDb,
                queries: vec![query],
            }],
        }
    }

    fn fork(result: Expr) -> Expr {
        Expr::Fork(QueryFork {
            join_type: ForkJoinType::Left,
            result_expr: Box::new(result),
            joining: vec![JoinCondition::SelfEquality(Expr::field("region"))],
            lod: LodSpec::Fixed(vec![Expr::field("region")]),
            before_filter_by: BTreeSet::new(),
            tag: None,
        })
    }

    fn region_query(select: Expr) -> CompiledQuery {
        let mut q = CompiledQuery::new("q", table());
        q.select = vec![
            CompiledFormula::new("region", Expr::field("region")).with_from_ids(["t"]),
            CompiledFormula::new("m", select).with_from_ids(["t"]),
        ];
        q.group_by = vec![CompiledFormula::new("region", Expr::field("region")).with_from_ids(["t"])];
        q
    }

    #[test]
    fn test_nested_forks_take_two_passes() {
        let registry = Registry::default_shared();
        let inner = fork(Expr::call("SUM", vec![Expr::field("amount")]));
        let outer = fork(Expr::call("MAX", vec![inner]));
        let q = region_query(Expr::binary("-", Expr::call("SUM", vec![Expr::field("amount")]), outer));

        let multi = MultiLevelAssembler::for_registry(&registry, 0, false)
            .assemble(single(q))
            .unwrap();
        assert!(multi.levels.len() >= 3);
        assert_eq!(multi.top_query().unwrap().id, "q");
        assert!(multi.dangling_from_ids().is_empty());
        assert!(multi
            .queries()
            .all(|q| q.all_exprs().all(|e| !crate::formula::inspect::contains_fork(e))));
    }

    #[test]
    fn test_pass_limit() {
        let registry = Registry::default_shared();
        let inner = fork(Expr::call("SUM", vec![Expr::field("amount")]));
        let outer = fork(Expr::call("MAX", vec![inner]));
        let err = MultiLevelAssembler::for_registry(&registry, 0, false)
            .max_split_passes(1)
            .assemble(single(region_query(outer)))
            .unwrap_err();
        assert_eq!(err, AssemblyError::PassLimitExceeded { limit: 1 });
    }

    #[test]
    fn test_relevel_reports_dangling_and_cycles() {
        let mut a = CompiledQuery::new("a", table());
        a.joined_from = JoinedFrom::single(FromObject::Subquery {
            id: "b".into(),
            query_id: "b".into(),
            columns: vec![],
        });
        let err = relevel(vec![a.clone()], "a").unwrap_err();
        assert!(matches!(err, AssemblyError::DanglingFrom { .. }));

        let mut b = CompiledQuery::new("b", table());
        b.joined_from = JoinedFrom::single(FromObject::Subquery {
            id: "a".into(),
            query_id: "a".into(),
            columns: vec![],
        });
        let err = relevel(vec![a, b], "a").unwrap_err();
        assert!(matches!(err, AssemblyError::Cycle { .. }));
    }

    fn reading(id: &str, from: &str, level_type: LevelType) -> CompiledQuery {
        let mut q = CompiledQuery::new(id, table());
        q.joined_from = JoinedFrom::single(FromObject::Subquery {
            id: from.into(),
            query_id: from.into(),
            columns: vec![],
        });
        q.level_type = level_type;
        q
    }

    #[test]
    fn test_post_processing_queries_sit_above_every_source_level() {
        // `fork` and `win` both read `base`; `fork` stays in the source
        // database and `top` joins on it there.
        let base = CompiledQuery::new("base", table());
        let fork = reading("fork", "base", LevelType::SourceDb);
        let top = reading("top", "fork", LevelType::SourceDb);
        let win = reading("win", "base", LevelType::Compeng);

        let multi = relevel(vec![win, top, fork, base], "top").unwrap();
        let shape: Vec<(LevelType, Vec<&str>)> = multi
            .levels
            .iter()
            .map(|l| (l.level_type, l.queries.iter().map(|q| q.id.as_str()).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (LevelType::SourceDb, vec!["base"]),
                (LevelType::SourceDb, vec!["fork"]),
                (LevelType::SourceDb, vec!["top"]),
                (LevelType::Compeng, vec!["win"]),
            ]
        );
        for level in &multi.levels {
            assert!(level.queries.iter().all(|q| q.level_type == level.level_type));
        }
    }

    #[test]
    fn test_source_query_cannot_read_post_processed_results() {
        let base = CompiledQuery::new("base", table());
        let win = reading("win", "base", LevelType::Compeng);
        let top = reading("top", "win", LevelType::SourceDb);
        let err = relevel(vec![base, win, top], "top").unwrap_err();
        assert_eq!(
            err,
            AssemblyError::SourceReadsPostProcessed {
                query: "top".into(),
                from: "win".into(),
            }
        );
    }

    #[test]
    fn test_unsplittable_query_is_unchanged() {
        let registry = Registry::default_shared();
        let q = region_query(Expr::call("SUM", vec![Expr::field("amount")]));
        let multi = MultiLevelAssembler::for_registry(&registry, 0, true)
            .assemble(single(q.clone()))
            .unwrap();
        assert_eq!(multi.levels.len(), 1);
        assert_eq!(multi.levels[0].queries, vec![q]);
    }
}
