//! Slicing tagged formulas into levels.

use formula_slicer::formula::inspect::collect_tags;
use formula_slicer::formula::{order_tags, Expr, WindowGrouping};
use formula_slicer::mutation::LevelTagMutator;
use formula_slicer::registry::Registry;
use formula_slicer::slicing::{
    AliasGenerator, FormulaSlicer, LevelBoundary, SliceError, SliceSchema, SlicedFormula,
};

fn avg_over(arg: Expr) -> Expr {
    Expr::window("AVG", vec![arg], WindowGrouping::Total)
}

fn slice_tagged(expr: Expr) -> (Expr, SlicedFormula) {
    let registry = Registry::default_shared();
    let tagged = LevelTagMutator::new(&registry).tag(expr).unwrap();
    let tags = order_tags(&collect_tags(&tagged)).unwrap();
    let schema = SliceSchema::from_tags(&tags);
    let mut gen = AliasGenerator::new(0);
    let sliced = FormulaSlicer::new(&schema).slice(&tagged, "f", &mut gen);
    (tagged, sliced)
}

#[test]
fn test_field_minus_window_takes_two_levels() {
    let (tagged, sliced) = slice_tagged(Expr::binary(
        "-",
        Expr::field("field_a"),
        avg_over(Expr::field("field_a")),
    ));

    assert_eq!(sliced.levels.len(), 2);
    let level0 = &sliced.levels[0];
    assert_eq!(level0.aliased.len(), 2);
    assert!(level0
        .aliased
        .iter()
        .any(|(_, e)| matches!(e.unwrap_transparent(), Expr::Window(_))));
    assert!(level0
        .aliased
        .iter()
        .any(|(_, e)| *e == Expr::field("field_a")));

    let top = sliced.top_expr().unwrap();
    match top {
        Expr::Call(call) => {
            assert_eq!(call.name, "-");
            assert!(call.args.iter().all(|a| a.as_field().is_some()));
        }
        other => panic!("unexpected top {other}"),
    }
    assert_eq!(sliced.reassemble(), tagged);
}

#[test]
fn test_window_free_formula_stays_on_one_level() {
    let (tagged, sliced) = slice_tagged(Expr::binary(
        "/",
        Expr::call("SUM", vec![Expr::field("field_a")]),
        Expr::int(100),
    ));
    assert_eq!(sliced.levels.len(), 1);
    assert_eq!(sliced.top_expr(), Some(&tagged));
}

#[test]
fn test_window_function_boundary_pushes_aggregates_down() {
    let schema = SliceSchema::new(vec![LevelBoundary::WindowFunction, LevelBoundary::Top]).unwrap();
    let e = Expr::binary(
        "+",
        avg_over(Expr::call("SUM", vec![Expr::field("x")])),
        Expr::int(1),
    );
    let mut gen = AliasGenerator::new(2);
    let sliced = FormulaSlicer::new(&schema).slice(&e, "f", &mut gen);

    assert_eq!(
        sliced.levels[0].aliased,
        vec![(
            "res_2_0_0".to_string(),
            Expr::call("SUM", vec![Expr::field("x")])
        )]
    );
    assert_eq!(
        sliced.top_expr(),
        Some(&Expr::binary(
            "+",
            avg_over(Expr::field("res_2_0_0")),
            Expr::int(1)
        ))
    );
    assert_eq!(sliced.reassemble(), e);
}

#[test]
fn test_non_field_boundary_reads_columns_only() {
    let schema = SliceSchema::new(vec![LevelBoundary::NonField, LevelBoundary::Top]).unwrap();
    let e = Expr::call("SUM", vec![Expr::binary("*", Expr::field("price"), Expr::field("qty"))]);
    let mut gen = AliasGenerator::new(0);
    let sliced = FormulaSlicer::new(&schema).slice(&e, "f", &mut gen);

    let columns: Vec<&Expr> = sliced.levels[0].aliased.iter().map(|(_, e)| e).collect();
    assert_eq!(columns, vec![&Expr::field("price"), &Expr::field("qty")]);
    assert_eq!(sliced.reassemble(), e);
}

#[test]
fn test_schema_must_end_with_top() {
    assert!(matches!(
        SliceSchema::new(vec![LevelBoundary::WindowFunction]),
        Err(SliceError::IncompleteSchema(_))
    ));
    assert!(matches!(
        SliceSchema::new(vec![LevelBoundary::Top, LevelBoundary::NonField, LevelBoundary::Top]),
        Err(SliceError::MisplacedTop { position: 0 })
    ));
}
