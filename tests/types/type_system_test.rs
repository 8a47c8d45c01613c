//! Type system behaviour seen through the public API.

use formula_slicer::formula::{Expr, WindowGrouping};
use formula_slicer::registry::Registry;
use formula_slicer::sql::Dialect;
use formula_slicer::types::{get_common_cast_type, DataType, TypeError, TypeStrategy};
use formula_slicer::typing::{TypeChecker, TypeEnv};

fn env() -> TypeEnv {
    TypeEnv::new()
        .with_field("field_a", DataType::FLOAT)
        .with_field("qty", DataType::INTEGER)
        .with_field("day", DataType::DATE)
        .with_field("name", DataType::STRING)
}

#[test]
fn test_sum_divided_by_literal_is_float() {
    let registry = Registry::default_shared();
    let mut checker = TypeChecker::new(&registry, Dialect::Postgres);
    let e = Expr::binary(
        "/",
        Expr::call("SUM", vec![Expr::field("field_a")]),
        Expr::int(100),
    );
    assert_eq!(checker.check(&e, &env()).unwrap(), DataType::FLOAT);
}

#[test]
fn test_integer_division_is_float() {
    let registry = Registry::default_shared();
    let mut checker = TypeChecker::new(&registry, Dialect::MySql);
    let e = Expr::binary("/", Expr::field("qty"), Expr::int(2));
    assert_eq!(checker.check(&e, &env()).unwrap().kind, DataType::FLOAT.kind);
}

#[test]
fn test_window_over_aggregate_types() {
    let registry = Registry::default_shared();
    let mut checker = TypeChecker::new(&registry, Dialect::DuckDb);
    let e = Expr::window(
        "RSUM",
        vec![Expr::call("SUM", vec![Expr::field("qty")])],
        WindowGrouping::Total,
    );
    assert_eq!(checker.check(&e, &env()).unwrap(), DataType::INTEGER);
}

#[test]
fn test_constant_arithmetic_stays_const() {
    let registry = Registry::default_shared();
    let mut checker = TypeChecker::new(&registry, Dialect::Postgres);
    let e = Expr::binary("+", Expr::int(1), Expr::int(2));
    assert_eq!(checker.check(&e, &env()).unwrap(), DataType::CONST_INTEGER);
}

#[test]
fn test_string_plus_integer_has_no_overload() {
    let registry = Registry::default_shared();
    let mut checker = TypeChecker::new(&registry, Dialect::Postgres);
    let e = Expr::binary("+", Expr::field("name"), Expr::field("qty"));
    let err = checker.check(&e, &env()).unwrap_err();
    assert!(matches!(err.root(), TypeError::NoMatchingOverload { .. }));
}

#[test]
fn test_common_cast_rules() {
    assert_eq!(
        get_common_cast_type(&[DataType::INTEGER, DataType::FLOAT]).unwrap(),
        DataType::FLOAT
    );
    assert_eq!(
        get_common_cast_type(&[DataType::NULL, DataType::STRING]).unwrap(),
        DataType::STRING
    );
    assert_eq!(
        get_common_cast_type(&[DataType::DATE, DataType::DATETIME]).unwrap(),
        DataType::DATETIME
    );
    assert_eq!(
        get_common_cast_type(&[DataType::CONST_INTEGER, DataType::CONST_INTEGER]).unwrap(),
        DataType::CONST_INTEGER
    );
    assert_eq!(
        get_common_cast_type(&[DataType::CONST_INTEGER, DataType::INTEGER]).unwrap(),
        DataType::INTEGER
    );
    assert!(matches!(
        get_common_cast_type(&[DataType::BOOLEAN, DataType::INTEGER]),
        Err(TypeError::NoCommonCast { .. })
    ));
}

#[test]
fn test_float_slot_accepts_integers() {
    assert!(DataType::FLOAT.autocast_types().contains(&DataType::INTEGER));
    assert!(!DataType::INTEGER.autocast_types().contains(&DataType::FLOAT));
}

#[test]
fn test_strategy_from_args() {
    let strategy = TypeStrategy::FromArgs(vec![0, 1]);
    assert_eq!(
        strategy
            .get_from_args(&[DataType::INTEGER, DataType::FLOAT])
            .unwrap(),
        DataType::FLOAT
    );
    assert_eq!(
        TypeStrategy::Fixed(DataType::STRING)
            .get_from_args(&[DataType::INTEGER])
            .unwrap(),
        DataType::STRING
    );
}

#[test]
fn test_case_arity_is_validated() {
    let err = TypeStrategy::Case
        .get_from_args(&[DataType::STRING, DataType::CONST_STRING, DataType::INTEGER])
        .unwrap_err();
    assert!(matches!(err, TypeError::InvalidArity { .. }));
}
