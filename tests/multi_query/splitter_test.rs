//! Splitting level queries into joined subqueries.

use formula_slicer::formula::inspect::{contains_fork, contains_window};
use formula_slicer::formula::{Expr, LodSpec, NodeHierarchyIndex, WindowGrouping, WindowOrder};
use formula_slicer::multi_query::{
    AliasedFormulaSplitMask, AssemblyError, AssemblyResult, MultiLevelAssembler, MultiQuerySplitter,
    QueryPart, QuerySplitMask, SplitIds, SubqueryType,
};
use formula_slicer::mutation::lods_to_forks;
use formula_slicer::query::{
    CompiledFormula, CompiledLevel, CompiledMultiLevelQuery, CompiledQuery, FromObject, JoinedFrom,
    LevelType,
};
use formula_slicer::registry::Registry;

fn sales(columns: &[&str]) -> JoinedFrom {
    JoinedFrom::single(FromObject::Table {
        id: "sales".into(),
        table: "sales".into(),
        schema: None,
        columns: columns.iter().map(|c| c.to_string()).collect(),
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

fn dim(name: &str) -> CompiledFormula {
    CompiledFormula::new(name, Expr::field(name)).with_from_ids(["sales"])
}

/// Each city's amount as a share of its region's total.
fn region_share() -> CompiledQuery {
    let registry = Registry::default_shared();
    let dims = [Expr::field("region"), Expr::field("city")];
    let mut region_total = Expr::call("SUM", vec![Expr::field("amount")])
        .with_lod(LodSpec::Fixed(vec![Expr::field("region")]));
    lods_to_forks(&mut region_total, &dims, &registry).unwrap();

    let mut q = CompiledQuery::new("share", sales(&["region", "city", "amount"]));
    q.select = vec![
        dim("region"),
        dim("city"),
        CompiledFormula::new(
            "share",
            Expr::binary("/", Expr::call("SUM", vec![Expr::field("amount")]), region_total),
        )
        .with_from_ids(["sales"]),
    ];
    q.group_by = vec![dim("region"), dim("city")];
    q
}

fn running_total() -> CompiledQuery {
    let rsum = Expr::window(
        "RSUM",
        vec![Expr::call("SUM", vec![Expr::field("amount")])],
        WindowGrouping::Total,
    )
    .with_order_by(vec![WindowOrder::asc(Expr::field("day"))]);
    let mut q = CompiledQuery::new("running", sales(&["day", "amount"]));
    q.select = vec![
        dim("day"),
        CompiledFormula::new("running", rsum).with_from_ids(["sales"]),
    ];
    q.group_by = vec![dim("day")];
    q
}

/// Queries only read from queries of lower levels.
fn assert_well_leveled(multi: &CompiledMultiLevelQuery) {
    assert!(multi.dangling_from_ids().is_empty());
    for (level, l) in multi.levels.iter().enumerate() {
        for q in &l.queries {
            for from in q.subquery_ids() {
                let below = multi.levels[..level]
                    .iter()
                    .any(|lower| lower.queries.iter().any(|other| other.id == from));
                assert!(below, "{} reads {} from its own level or above", q.id, from);
            }
        }
    }
}

#[test]
fn test_fork_becomes_joined_subqueries() {
    let registry = Registry::default_shared();
    let multi = MultiLevelAssembler::for_registry(&registry, 0, true)
        .assemble(single(region_share()))
        .unwrap();

    assert_well_leveled(&multi);
    assert!(multi.query_count() >= 3);
    assert!(multi.queries().all(|q| !q.all_exprs().any(contains_fork)));

    let top = multi.top_query().unwrap();
    assert_eq!(top.id, "share");
    assert_eq!(top.column_names(), vec!["region", "city", "share"]);
    assert!(!top.join_on.is_empty());
    assert!(top.group_by.is_empty());
    assert!(multi
        .queries()
        .filter(|q| q.id != "share")
        .all(|q| q.id.starts_with("share_s0_")));
}

#[test]
fn test_window_over_aggregate_split_is_optional() {
    let registry = Registry::default_shared();

    let split = MultiLevelAssembler::for_registry(&registry, 2, true)
        .assemble(single(running_total()))
        .unwrap();
    assert_well_leveled(&split);
    assert_eq!(split.levels.len(), 2);
    let top = split.top_query().unwrap();
    assert!(top.group_by.is_empty());
    assert!(top.all_exprs().any(contains_window));
    let sub = &split.levels[0].queries[0];
    assert_eq!(sub.group_by.len(), 1);
    assert!(!sub.all_exprs().any(contains_window));

    let kept = MultiLevelAssembler::for_registry(&registry, 2, false)
        .assemble(single(running_total()))
        .unwrap();
    assert_eq!(kept, single(running_total()));
}

#[test]
fn test_split_ids_follow_iteration() {
    let mut ids = SplitIds::new("share", 3);
    assert_eq!(ids.exprs.next_id(), "e_3_0");
    assert_eq!(ids.queries.next_id(), "share_s3_0");
    assert_eq!(ids.queries.next_id(), "share_s3_1");
}

/// Cuts the first aggregate of the select out, yet claims the cropped query
/// is as deep as before.
struct StubbornSplitter;

impl MultiQuerySplitter for StubbornSplitter {
    fn name(&self) -> &'static str {
        "stubborn"
    }

    fn get_split_masks(&self, query: &CompiledQuery, ids: &mut SplitIds) -> AssemblyResult<Vec<QuerySplitMask>> {
        let Some(position) = query
            .select
            .iter()
            .position(|f| matches!(&f.expr, Expr::Call(c) if c.name == "SUM"))
        else {
            return Ok(Vec::new());
        };
        let mut mask = QuerySplitMask::new(SubqueryType::Default, ids.queries.next_id());
        mask.formula_split_masks.push(AliasedFormulaSplitMask::new(
            QueryPart::Select,
            position,
            NodeHierarchyIndex::root(),
            ids.exprs.next_id(),
        ));
        Ok(vec![mask])
    }

    fn depth(&self, _query: &CompiledQuery) -> usize {
        1
    }
}

#[test]
fn test_splitter_must_reduce_depth() {
    let mut q = CompiledQuery::new("q", sales(&["region", "amount"]));
    q.select = vec![
        dim("region"),
        CompiledFormula::new("total", Expr::call("SUM", vec![Expr::field("amount")])).with_from_ids(["sales"]),
    ];
    q.group_by = vec![dim("region")];

    let err = MultiLevelAssembler::new(0)
        .with_splitter(StubbornSplitter)
        .assemble(single(q))
        .unwrap_err();
    assert!(matches!(err, AssemblyError::NonDecreasingDepth { before: 1, after: 1, .. }));
}
