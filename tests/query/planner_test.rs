//! Planning and level separation of compiled queries.

use formula_slicer::formula::{inspect, Expr, LevelTag, WindowGrouping};
use formula_slicer::mutation::LevelTagMutator;
use formula_slicer::query::{
    planner_for, CompiledFormula, CompiledQuery, ExecutionPlanner, FromObject, JoinedFrom,
    LevelType, NestedLevelTagPlanner, PlanError, QueryRenderer, QuerySeparator, SlicedQuery,
    WindowToCompengPlanner,
};
use formula_slicer::registry::Registry;
use formula_slicer::slicing::AliasGenerator;
use formula_slicer::sql::Dialect;
use formula_slicer::types::{DataType, TypeKind};
use formula_slicer::typing::TypeEnv;
use sqlparser::dialect::{MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

fn sales() -> CompiledQuery {
    CompiledQuery::new(
        "q",
        JoinedFrom::single(FromObject::Table {
            id: "sales".into(),
            table: "sales".into(),
            schema: None,
            columns: vec!["day".into(), "amount".into()],
        }),
    )
}

fn env() -> TypeEnv {
    TypeEnv::new()
        .with_field("day", DataType::new(TypeKind::Date, false))
        .with_field("amount", DataType::FLOAT)
}

fn tagged(expr: Expr) -> Expr {
    let registry = Registry::default_shared();
    LevelTagMutator::new(&registry).tag(expr).unwrap()
}

fn running_total() -> Expr {
    tagged(Expr::window(
        "RSUM",
        vec![Expr::call("SUM", vec![Expr::field("amount")])],
        WindowGrouping::Total,
    ))
}

/// Daily totals with a running total over them.
fn running_total_query() -> CompiledQuery {
    let mut q = sales();
    q.select.push(CompiledFormula::new("day", Expr::field("day")));
    q.select.push(CompiledFormula::new("running", running_total()));
    q.group_by.push(CompiledFormula::new("day", Expr::field("day")));
    q.order_by.push(CompiledFormula::new("day", Expr::field("day")));
    q.limit = Some(5);
    q
}

#[test]
fn test_window_query_gets_two_levels() {
    let q = running_total_query();
    let plan = NestedLevelTagPlanner::new(LevelType::SourceDb).plan(&q).unwrap();

    assert_eq!(plan.level_count(), 2);
    assert_eq!(plan.level_types, vec![LevelType::SourceDb, LevelType::SourceDb]);
    // Group by lives in the bottom level, select in the top one.
    assert_eq!(plan.group_by[0].schema.len(), 1);
    assert!(plan.select.iter().all(|p| p.schema.len() == 2));
}

#[test]
fn test_window_free_query_is_flat() {
    let mut q = sales();
    q.select.push(CompiledFormula::new(
        "total",
        Expr::binary("/", Expr::call("SUM", vec![Expr::field("amount")]), Expr::int(100)),
    ));
    let plan = NestedLevelTagPlanner::new(LevelType::SourceDb).plan(&q).unwrap();
    assert_eq!(plan.level_count(), 1);
}

#[test]
fn test_bfb_filter_moves_above_its_window() {
    let day = LevelTag::new(["day"], 0, 0);
    let mut q = sales();
    q.select.push(CompiledFormula::new(
        "running",
        Expr::tagged(
            day,
            Expr::window("RSUM", vec![Expr::field("amount")], WindowGrouping::Total).with_bfb(["day"]),
        ),
    ));
    q.filters.push(
        CompiledFormula::new("day", Expr::binary(">", Expr::field("day"), Expr::string("2020-01-01")))
            .with_field_id("day"),
    );

    let plan = NestedLevelTagPlanner::new(LevelType::SourceDb).plan(&q).unwrap();
    assert_eq!(plan.level_count(), 2);
    assert_eq!(plan.filters[0].schema.len(), 2);

    // Without the BFB reference the filter stays at the source.
    q.filters[0].original_field_id = Some("amount".into());
    let plan = NestedLevelTagPlanner::new(LevelType::SourceDb).plan(&q).unwrap();
    assert_eq!(plan.filters[0].schema.len(), 1);
}

#[test]
fn test_planner_choice_by_source() {
    let registry = Registry::default_shared();
    let q = running_total_query();

    let plan = planner_for(&registry, Dialect::Postgres, &q, false)
        .unwrap()
        .plan(&q)
        .unwrap();
    assert!(plan.level_types.iter().all(|t| *t == LevelType::SourceDb));

    let plan = planner_for(&registry, Dialect::MySql, &q, false)
        .unwrap()
        .plan(&q)
        .unwrap();
    assert_eq!(plan.level_types[0], LevelType::SourceDb);
    assert!(plan.level_types[1..].iter().all(|t| *t == LevelType::Compeng));
}

#[test]
fn test_fork_on_unforkable_source() {
    let registry = Registry::default_shared();
    let mut q = sales();
    q.select.push(CompiledFormula::new(
        "total",
        Expr::call("SUM", vec![Expr::field("amount")])
            .with_lod(formula_slicer::formula::LodSpec::Fixed(vec![Expr::field("day")])),
    ));
    let mut fork = q.select[0].expr.clone();
    formula_slicer::mutation::lods_to_forks(&mut fork, &[Expr::field("day")], &registry).unwrap();
    q.select[0].expr = fork;
    assert!(q.all_exprs().any(inspect::contains_fork));

    let result = planner_for(&registry, Dialect::MySql, &q, false);
    assert!(matches!(
        result.err(),
        Some(PlanError::UnsupportedFork { dialect: Dialect::MySql })
    ));
}

#[test]
fn test_compeng_planner_keeps_windows_out_of_the_source() {
    let q = running_total_query();
    let plan = WindowToCompengPlanner::new().plan(&q).unwrap();
    assert_eq!(plan.level_types[0], LevelType::SourceDb);
    assert!(plan.level_count() >= 2);
}

#[test]
fn test_separated_levels_chain_by_id() {
    let q = running_total_query();
    let plan = NestedLevelTagPlanner::new(LevelType::SourceDb).plan(&q).unwrap();
    let mut gen = AliasGenerator::new(7);
    let sliced = SlicedQuery::from_plan(&plan, &mut gen);
    let multi = QuerySeparator::new(7).separate(&plan, &q, &sliced);

    assert_eq!(multi.levels.len(), 2);
    let bottom = &multi.levels[0].queries[0];
    let top = multi.top_query().unwrap();
    assert_eq!(bottom.id, "q_7_0_0");
    assert_eq!(top.id, "q");
    assert_eq!(top.subquery_ids(), vec!["q_7_0_0"]);
    assert!(multi.dangling_from_ids().is_empty());

    // The top keeps the caller's select order and pagination.
    assert_eq!(top.column_names(), vec!["day", "running"]);
    assert_eq!(top.limit, Some(5));
    assert_eq!(bottom.limit, None);
    assert!(!bottom.group_by.is_empty());

    let aliases = bottom.column_names();
    let mut sorted = aliases.clone();
    sorted.sort();
    assert_eq!(aliases, sorted);
    assert!(aliases.iter().all(|a| a.starts_with("res_7_0_")));
}

#[test]
fn test_nested_render_parses() {
    let registry = Registry::default_shared();
    let q = running_total_query();
    let plan = NestedLevelTagPlanner::new(LevelType::SourceDb).plan(&q).unwrap();
    let mut gen = AliasGenerator::new(0);
    let sliced = SlicedQuery::from_plan(&plan, &mut gen);
    let multi = QuerySeparator::new(0).separate(&plan, &q, &sliced);

    let mut renderer = QueryRenderer::new(&registry, Dialect::Postgres, env());
    let sql = renderer.render_nested(&multi).unwrap().to_sql(Dialect::Postgres);
    Parser::parse_sql(&PostgreSqlDialect {}, &sql).unwrap_or_else(|e| panic!("{e}\n{sql}"));

    let rendered = renderer.render_all(&multi).unwrap();
    assert_eq!(rendered.len(), 2);
    assert_eq!(rendered.last().unwrap().id, "q");
}

#[test]
fn test_compeng_levels_render_in_compeng_dialect() {
    let registry = Registry::default_shared();
    let q = running_total_query();
    let plan = planner_for(&registry, Dialect::MySql, &q, false)
        .unwrap()
        .plan(&q)
        .unwrap();
    let mut gen = AliasGenerator::new(0);
    let sliced = SlicedQuery::from_plan(&plan, &mut gen);
    let multi = QuerySeparator::new(0).separate(&plan, &q, &sliced);

    let mut renderer =
        QueryRenderer::new(&registry, Dialect::MySql, env()).with_compeng_dialect(Dialect::Postgres);
    let rendered = renderer.render_all(&multi).unwrap();

    assert_eq!(rendered[0].dialect, Dialect::MySql);
    Parser::parse_sql(&MySqlDialect {}, &rendered[0].sql).unwrap();
    for query in &rendered[1..] {
        assert_eq!(query.level_type, LevelType::Compeng);
        assert_eq!(query.dialect, Dialect::Postgres);
    }
}
