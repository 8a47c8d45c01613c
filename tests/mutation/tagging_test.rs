//! BFB normalization, LOD rewriting and level tagging working together.

use std::collections::BTreeSet;

use formula_slicer::formula::inspect::{collect_tags, contains_fork};
use formula_slicer::formula::{
    order_tags, Expr, LevelTag, LodSpec, NodeHierarchyIndex, WindowGrouping,
};
use formula_slicer::mutation::{
    lods_to_forks, normalize_before_filter_by, LevelTagMutator, TaggingError,
};
use formula_slicer::registry::Registry;

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn rsum(arg: Expr) -> Expr {
    Expr::window("RSUM", vec![arg], WindowGrouping::Total)
}

fn window_bfb(expr: &Expr) -> BTreeSet<String> {
    match expr.unwrap_transparent() {
        Expr::Window(w) => w.before_filter_by.clone(),
        other => panic!("not a window: {other}"),
    }
}

#[test]
fn test_bfb_names_are_restricted_to_present_filters() {
    let registry = Registry::default_shared();
    let mut e = rsum(rsum(Expr::field("x")).with_bfb(["A", "B"]));
    normalize_before_filter_by(&mut e, &names(&["A", "C", "D"]), &registry);

    assert!(window_bfb(&e).is_empty());
    let inner = e.get(&NodeHierarchyIndex::from(vec![0])).unwrap();
    assert_eq!(window_bfb(inner), names(&["A"]));
}

#[test]
fn test_outer_bfb_flows_into_nested_windows() {
    let registry = Registry::default_shared();
    let mut e = rsum(rsum(Expr::field("x"))).with_bfb(["A"]);
    normalize_before_filter_by(&mut e, &names(&["A"]), &registry);
    let inner = e.get(&NodeHierarchyIndex::from(vec![0])).unwrap();
    assert_eq!(window_bfb(inner), names(&["A"]));
}

#[test]
fn test_bfb_window_runs_before_plain_window() {
    let registry = Registry::default_shared();
    let mut e = rsum(rsum(Expr::field("x")).with_bfb(["A"]));
    normalize_before_filter_by(&mut e, &names(&["A"]), &registry);
    let tagged = LevelTagMutator::new(&registry).tag(e).unwrap();

    let ordered = order_tags(&collect_tags(&tagged)).unwrap();
    assert_eq!(
        ordered,
        vec![
            LevelTag::new(["A"], 0, 0),
            LevelTag::new(Vec::<String>::new(), 0, 0)
        ]
    );
}

#[test]
fn test_tag_chain_order() {
    let chain = vec![
        LevelTag::new(["A"], 0, 0),
        LevelTag::new(["A", "B", "C", "D"], 0, 0),
        LevelTag::new(["A"], 1, 0),
        LevelTag::new(["A", "B"], 0, 0),
    ];
    let ordered = order_tags(&chain).unwrap();
    assert_eq!(
        ordered,
        vec![
            LevelTag::new(["A", "B", "C", "D"], 0, 0),
            LevelTag::new(["A", "B"], 0, 0),
            LevelTag::new(["A"], 1, 0),
            LevelTag::new(["A"], 0, 0),
        ]
    );

    let broken = vec![
        LevelTag::new(["A", "B"], 0, 0),
        LevelTag::new(["A"], 0, 0),
        LevelTag::new(["B"], 0, 0),
    ];
    assert!(order_tags(&broken).is_err());
}

#[test]
fn test_lod_fork_is_tagged() {
    let registry = Registry::default_shared();
    let dims = vec![Expr::field("region"), Expr::field("city")];
    let mut e = Expr::binary(
        "/",
        Expr::call("SUM", vec![Expr::field("amount")]),
        Expr::call("SUM", vec![Expr::field("amount")])
            .with_lod(LodSpec::Fixed(vec![Expr::field("region")])),
    );
    lods_to_forks(&mut e, &dims, &registry).unwrap();
    assert!(contains_fork(&e));

    let tagged = LevelTagMutator::new(&registry).tag(e).unwrap();
    let tags = collect_tags(&tagged);
    assert_eq!(tags, vec![LevelTag::new(Vec::<String>::new(), 0, 0)]);
}

#[test]
fn test_include_lod_is_rejected() {
    let registry = Registry::default_shared();
    let mut e = Expr::call("SUM", vec![Expr::field("amount")])
        .with_lod(LodSpec::Include(vec![Expr::field("city")]));
    let err = lods_to_forks(&mut e, &[Expr::field("region")], &registry).unwrap_err();
    assert!(matches!(err, TaggingError::UnsupportedLod { kind: "INCLUDE", .. }));
}
