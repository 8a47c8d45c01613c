//! String functions and type conversions.

use super::{arg, cast_to, function_renderer};
use crate::registry::{DialectSet, FunctionDefinition, RegistryBuilder, RegistryResult, Renderer};
use crate::sql::dialect::Dialect;
use crate::sql::{self, BinaryOperator};
use crate::types::{ArgType, ArgTypeMatcher, DataType, TypeKind, TypeStrategy};

pub(super) fn register(b: &mut RegistryBuilder) -> RegistryResult<()> {
    let strings = ArgTypeMatcher::variadic(ArgType::one(DataType::STRING), 1);
    b.register(
        FunctionDefinition::new("CONCAT")
            .returns(TypeStrategy::Fixed(DataType::STRING))
            .variant(
                DialectSet::except(&[Dialect::MySql]),
                strings.clone(),
                concat_chain(),
            )
            .variant(Dialect::MySql, strings, function_renderer("CONCAT")),
    )?;

    let one_string = ArgTypeMatcher::fixed(vec![ArgType::one(DataType::STRING)]);
    for name in ["UPPER", "LOWER"] {
        b.register(FunctionDefinition::new(name).variant(
            DialectSet::ALL,
            one_string.clone(),
            function_renderer(name),
        ))?;
    }
    b.register(
        FunctionDefinition::new("LEN")
            .returns(TypeStrategy::Fixed(DataType::INTEGER))
            .variant(
                DialectSet::of(&[Dialect::DuckDb, Dialect::Postgres, Dialect::MySql]),
                one_string.clone(),
                function_renderer("LENGTH"),
            )
            .variant(Dialect::TSql, one_string.clone(), function_renderer("LEN"))
            .variant(Dialect::ClickHouse, one_string, function_renderer("lengthUTF8")),
    )?;

    b.register(
        FunctionDefinition::new("ABS")
            .variant(
                DialectSet::ALL,
                ArgTypeMatcher::fixed(vec![ArgType::one(DataType::INTEGER)]),
                function_renderer("ABS"),
            )
            .variant(
                DialectSet::ALL,
                ArgTypeMatcher::fixed(vec![ArgType::one(DataType::FLOAT)]),
                function_renderer("ABS"),
            ),
    )?;

    register_conversion(b, "STR", TypeKind::String, ArgType::any())?;
    register_conversion(
        b,
        "FLOAT",
        TypeKind::Float,
        ArgType::of(&[DataType::FLOAT, DataType::STRING, DataType::BOOLEAN]),
    )?;
    register_conversion(
        b,
        "INT",
        TypeKind::Integer,
        ArgType::of(&[
            DataType::INTEGER,
            DataType::FLOAT,
            DataType::STRING,
            DataType::BOOLEAN,
        ]),
    )?;
    Ok(())
}

fn register_conversion(
    b: &mut RegistryBuilder,
    name: &str,
    target: TypeKind,
    accepts: ArgType,
) -> RegistryResult<()> {
    b.register(
        FunctionDefinition::new(name)
            .returns(TypeStrategy::Fixed(DataType::new(target, false)))
            .variant(
                DialectSet::ALL,
                ArgTypeMatcher::fixed(vec![accepts]),
                Renderer::new(format!("cast:{}", target), move |ctx| {
                    let value = arg(ctx, "CAST", 0)?;
                    Ok(cast_to(ctx, value, target))
                }),
            ),
    )
}

/// `a || b || c`, or the dialect's own operator.
fn concat_chain() -> Renderer {
    Renderer::new("concat:operator", |ctx| {
        let mut args = ctx.args.iter().cloned();
        let first = match args.next() {
            Some(first) => first,
            None => arg(ctx, "CONCAT", 0)?,
        };
        Ok(args.fold(first, |acc, next| sql::Expr::BinaryOp {
            left: Box::new(acc),
            op: BinaryOperator::Concat,
            right: Box::new(next),
        }))
    })
}
