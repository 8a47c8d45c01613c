//! Property tests for tagging, slicing, splitting and casting.

use std::collections::BTreeSet;

use formula_slicer::formula::inspect::{collect_tags, contains_fork};
use formula_slicer::formula::{
    order_tags, Expr, ForkJoinType, JoinCondition, LevelTag, LodSpec, QueryFork, WindowGrouping,
};
use formula_slicer::multi_query::MultiLevelAssembler;
use formula_slicer::mutation::LevelTagMutator;
use formula_slicer::query::{
    CompiledFormula, CompiledLevel, CompiledMultiLevelQuery, CompiledQuery, FromObject, JoinedFrom,
    LevelType,
};
use formula_slicer::registry::Registry;
use formula_slicer::slicing::{AliasGenerator, FormulaSlicer, SliceSchema};
use formula_slicer::types::{get_common_cast_type, DataType, TypeKind};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn arb_field() -> impl Strategy<Value = Expr> {
    prop_oneof![Just("a"), Just("b"), Just("c")].prop_map(Expr::field)
}

fn arb_window_name() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("RSUM"), Just("AVG"), Just("MAX")]
}

/// Formulas over `a`, `b` and `c` mixing arithmetic, aggregates and windows
/// with empty BFB sets, so every tag they get is comparable.
fn arb_formula() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        arb_field(),
        (0i64..100).prop_map(Expr::int),
        arb_field().prop_map(|f| Expr::call("SUM", vec![f])),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (prop_oneof![Just("+"), Just("-"), Just("*")], inner.clone(), inner.clone())
                .prop_map(|(op, l, r)| Expr::binary(op, l, r)),
            (arb_window_name(), inner).prop_map(|(name, arg)| Expr::window(name, vec![arg], WindowGrouping::Total)),
        ]
    })
}

fn arb_data_type() -> impl Strategy<Value = DataType> {
    let kind = prop_oneof![
        Just(TypeKind::Null),
        Just(TypeKind::Boolean),
        Just(TypeKind::Integer),
        Just(TypeKind::Float),
        Just(TypeKind::String),
    ];
    (kind, any::<bool>()).prop_map(|(kind, is_const)| DataType::new(kind, is_const))
}

// ============================================================================
// Helpers
// ============================================================================

fn nested_windows(names: &[&str]) -> Expr {
    names.iter().rev().fold(Expr::field("a"), |arg, name| {
        Expr::window(*name, vec![arg], WindowGrouping::Total)
    })
}

/// Tags met walking from the root down the first argument of each window.
fn inward_tags(expr: &Expr) -> Vec<LevelTag> {
    let mut tags = Vec::new();
    let mut current = expr;
    loop {
        match current {
            Expr::Tagged(t) => {
                tags.push(t.tag.clone());
                current = &t.expr;
            }
            Expr::Window(w) if !w.args.is_empty() => current = &w.args[0],
            _ => return tags,
        }
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

fn nested_forks(depth: usize) -> CompiledQuery {
    let mut measure = Expr::call("SUM", vec![Expr::field("amount")]);
    for _ in 0..depth {
        measure = Expr::call("MAX", vec![fork(measure)]);
    }
    let from = FromObject::Table {
        id: "t".into(),
        table: "sales".into(),
        schema: None,
        columns: vec!["region".into(), "amount".into()],
    };
    let mut q = CompiledQuery::new("q", JoinedFrom::single(from));
    q.select = vec![
        CompiledFormula::new("region", Expr::field("region")).with_from_ids(["t"]),
        CompiledFormula::new("m", measure).with_from_ids(["t"]),
    ];
    q.group_by = vec![CompiledFormula::new("region", Expr::field("region")).with_from_ids(["t"])];
    q
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_nested_window_tags_grow_inward(
        names in prop::collection::vec(arb_window_name(), 1..6)
    ) {
        let registry = Registry::default_shared();
        let tagged = LevelTagMutator::new(&registry).tag(nested_windows(&names)).unwrap();

        let inward = inward_tags(&tagged);
        prop_assert_eq!(inward.len(), names.len());
        for pair in inward.windows(2) {
            prop_assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
        prop_assert_eq!(inward.last().map(|t| t.func_nesting), Some(0));

        let mut bottom_up = inward.clone();
        bottom_up.reverse();
        prop_assert_eq!(order_tags(&collect_tags(&tagged)).unwrap(), bottom_up);
    }

    #[test]
    fn prop_tagging_is_idempotent(formula in arb_formula()) {
        let registry = Registry::default_shared();
        let mutator = LevelTagMutator::new(&registry);
        let once = mutator.tag(formula).unwrap();
        let twice = mutator.tag(once.clone()).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_slices_reassemble_to_the_formula(formula in arb_formula()) {
        let registry = Registry::default_shared();
        let tagged = LevelTagMutator::new(&registry).tag(formula).unwrap();
        let tags = order_tags(&collect_tags(&tagged)).unwrap();
        let schema = SliceSchema::from_tags(&tags);
        let mut gen = AliasGenerator::new(0);

        let sliced = FormulaSlicer::new(&schema).slice(&tagged, "f", &mut gen);
        prop_assert_eq!(sliced.levels.len(), tags.len() + 1);
        prop_assert_eq!(sliced.reassemble(), tagged);
    }

    #[test]
    fn prop_common_cast_ignores_order(
        a in arb_data_type(),
        b in arb_data_type(),
        c in arb_data_type(),
    ) {
        let left = get_common_cast_type(&[a, b]).and_then(|ab| get_common_cast_type(&[ab, c]));
        let right = get_common_cast_type(&[b, c]).and_then(|bc| get_common_cast_type(&[a, bc]));
        prop_assert_eq!(left.ok(), right.ok());

        let forward = get_common_cast_type(&[a, b, c]).ok();
        let backward = get_common_cast_type(&[c, b, a]).ok();
        prop_assert_eq!(forward, backward);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_nested_forks_split_completely(depth in 1usize..4) {
        let registry = Registry::default_shared();
        let multi = CompiledMultiLevelQuery {
            levels: vec![CompiledLevel {
                level_type: LevelType::SourceDb,
                queries: vec![nested_forks(depth)],
            }],
        };

        let assembled = MultiLevelAssembler::for_registry(&registry, 0, false)
            .assemble(multi)
            .unwrap();
        prop_assert!(assembled.levels.len() > depth);
        prop_assert!(assembled.dangling_from_ids().is_empty());
        prop_assert_eq!(assembled.top_query().map(|q| q.id.as_str()), Some("q"));
        prop_assert!(assembled
            .queries()
            .all(|q| !q.all_exprs().any(contains_fork)));
    }
}
