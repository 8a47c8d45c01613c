//! Arithmetic, comparison and boolean operators.

use super::{arg, binary_renderer, cast_to, slots};
use crate::registry::{DialectSet, FunctionDefinition, RegistryBuilder, RegistryResult, Renderer};
use crate::sql::{self, BinaryOperator, UnaryOperator};
use crate::types::{DataType, TypeKind, TypeStrategy};

pub(super) fn register(b: &mut RegistryBuilder) -> RegistryResult<()> {
    let int2 = slots(&[DataType::INTEGER, DataType::INTEGER]);
    let float2 = slots(&[DataType::FLOAT, DataType::FLOAT]);
    let str2 = slots(&[DataType::STRING, DataType::STRING]);

    b.register(
        FunctionDefinition::new("+")
            .with_id("op_plus")
            .variant(DialectSet::ALL, int2.clone(), binary_renderer(BinaryOperator::Plus))
            .variant(DialectSet::ALL, float2.clone(), binary_renderer(BinaryOperator::Plus))
            .variant(DialectSet::ALL, str2, binary_renderer(BinaryOperator::Concat)),
    )?;

    for (name, id, op) in [
        ("-", "op_minus", BinaryOperator::Minus),
        ("*", "op_mul", BinaryOperator::Mul),
    ] {
        b.register(
            FunctionDefinition::new(name)
                .with_id(id)
                .variant(DialectSet::ALL, int2.clone(), binary_renderer(op))
                .variant(DialectSet::ALL, float2.clone(), binary_renderer(op)),
        )?;
    }

    b.register(
        FunctionDefinition::new("/")
            .with_id("op_div")
            .returns(TypeStrategy::Fixed(DataType::FLOAT))
            .variant(DialectSet::ALL, float2, float_division()),
    )?;

    // One family per comparable kind. NULL widens into every family, so it
    // gets its own to keep `NULL = NULL` from tying across them.
    let families = [
        DataType::NULL,
        DataType::FLOAT,
        DataType::STRING,
        DataType::GENERICDATETIME,
        DataType::BOOLEAN,
    ];
    for (name, id, op) in [
        ("=", "op_eq", BinaryOperator::Eq),
        ("!=", "op_ne", BinaryOperator::Ne),
        ("<", "op_lt", BinaryOperator::Lt),
        (">", "op_gt", BinaryOperator::Gt),
        ("<=", "op_lte", BinaryOperator::Lte),
        (">=", "op_gte", BinaryOperator::Gte),
    ] {
        let mut def = FunctionDefinition::new(name)
            .with_id(id)
            .returns(TypeStrategy::Fixed(DataType::BOOLEAN));
        for family in families {
            def = def.variant(DialectSet::ALL, slots(&[family, family]), binary_renderer(op));
        }
        b.register(def)?;
    }

    let bool2 = slots(&[DataType::BOOLEAN, DataType::BOOLEAN]);
    b.register(
        FunctionDefinition::new("AND")
            .with_id("op_and")
            .variant(DialectSet::ALL, bool2.clone(), binary_renderer(BinaryOperator::And)),
    )?;
    b.register(
        FunctionDefinition::new("OR")
            .with_id("op_or")
            .variant(DialectSet::ALL, bool2, binary_renderer(BinaryOperator::Or)),
    )?;
    b.register(
        FunctionDefinition::new("NOT").with_id("op_not").variant(
            DialectSet::ALL,
            slots(&[DataType::BOOLEAN]),
            Renderer::new("unary:not", |ctx| {
                Ok(sql::Expr::UnaryOp {
                    op: UnaryOperator::Not,
                    expr: Box::new(arg(ctx, "NOT", 0)?),
                })
            }),
        ),
    )?;
    Ok(())
}

/// Division that never truncates: an integer numerator is cast first.
fn float_division() -> Renderer {
    Renderer::new("div:float", |ctx| {
        let mut left = arg(ctx, "/", 0)?;
        let right = arg(ctx, "/", 1)?;
        let both_int = ctx.arg_types.iter().all(|t| t.kind == TypeKind::Integer);
        if both_int {
            left = cast_to(ctx, left, TypeKind::Float);
        }
        Ok(sql::Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOperator::Div,
            right: Box::new(right),
        })
    })
}
