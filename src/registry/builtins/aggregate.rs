//! Aggregate functions.

use super::{any_slots, arg, cast_to, function_renderer, slots};
use crate::registry::{
    DialectSet, FunctionDefinition, RegistryBuilder, RegistryResult, Renderer, Scopes,
};
use crate::sql::dialect::Dialect;
use crate::sql;
use crate::types::{ArgTypeMatcher, DataType, TypeKind, TypeStrategy};

pub(crate) fn aggregate_scopes() -> Scopes {
    Scopes::AGGREGATE | Scopes::NON_WINDOW | Scopes::SUPPORTS_LOD | Scopes::SUPPORTS_BFB
}

pub(super) fn register(b: &mut RegistryBuilder) -> RegistryResult<()> {
    b.register(
        FunctionDefinition::new("SUM")
            .scopes(aggregate_scopes())
            .variant(DialectSet::ALL, slots(&[DataType::INTEGER]), function_renderer("SUM"))
            .variant(DialectSet::ALL, slots(&[DataType::FLOAT]), function_renderer("SUM")),
    )?;

    b.register(
        FunctionDefinition::new("AVG")
            .scopes(aggregate_scopes())
            .returns(TypeStrategy::Fixed(DataType::FLOAT))
            .variant(
                DialectSet::except(&[Dialect::TSql]),
                slots(&[DataType::FLOAT]),
                function_renderer("AVG"),
            )
            .variant(Dialect::TSql, slots(&[DataType::FLOAT]), float_avg()),
    )?;

    for name in ["MIN", "MAX"] {
        b.register(
            FunctionDefinition::new(name)
                .scopes(aggregate_scopes())
                .returns(TypeStrategy::ParamsFromArgs {
                    base: Box::new(TypeStrategy::FromArgs(vec![0])),
                    source: 0,
                })
                .variant(DialectSet::ALL, any_slots(1), function_renderer(name)),
        )?;
    }

    b.register(
        FunctionDefinition::new("COUNT")
            .scopes(aggregate_scopes())
            .returns(TypeStrategy::Fixed(DataType::INTEGER))
            .variant(
                DialectSet::ALL,
                ArgTypeMatcher::fixed(vec![]),
                Renderer::new("count:star", |_| Ok(sql::count_star())),
            )
            .variant(DialectSet::ALL, any_slots(1), function_renderer("COUNT")),
    )?;

    b.register(
        FunctionDefinition::new("COUNTD")
            .scopes(aggregate_scopes())
            .returns(TypeStrategy::Fixed(DataType::INTEGER))
            .variant(
                DialectSet::except(&[Dialect::ClickHouse]),
                any_slots(1),
                Renderer::new("count:distinct", |ctx| {
                    Ok(sql::func_distinct("COUNT", vec![arg(ctx, "COUNTD", 0)?]))
                }),
            )
            .variant(Dialect::ClickHouse, any_slots(1), function_renderer("uniqExact")),
    )?;
    Ok(())
}

/// T-SQL averages integers with integer arithmetic.
fn float_avg() -> Renderer {
    Renderer::new("avg:tsql", |ctx| {
        let mut value = arg(ctx, "AVG", 0)?;
        if ctx.arg_types.first().is_some_and(|t| t.kind == TypeKind::Integer) {
            value = cast_to(ctx, value, TypeKind::Float);
        }
        Ok(sql::func("AVG", vec![value]))
    })
}

#[cfg(test)]
mod tests {
    use crate::registry::Registry;
    use crate::sql::col;
    use crate::sql::dialect::Dialect;
    use crate::types::DataType;

    #[test]
    fn test_aggregate_results_are_never_const() {
        let reg = Registry::default_shared();
        let r = reg
            .resolve("SUM", false, Dialect::DuckDb, &[DataType::CONST_INTEGER])
            .unwrap();
        assert_eq!(r.return_type, DataType::INTEGER);
    }

    #[test]
    fn test_countd_on_clickhouse() {
        let reg = Registry::default_shared();
        let render = |d: Dialect| {
            reg.lower("COUNTD", false, d, vec![col("user_id")], &[DataType::INTEGER], None)
                .unwrap()
                .to_sql(d)
        };
        assert_eq!(render(Dialect::ClickHouse), "uniqExact(`user_id`)");
        assert_eq!(render(Dialect::Postgres), "COUNT(DISTINCT \"user_id\")");
    }

    #[test]
    fn test_tsql_avg_casts_integers() {
        let reg = Registry::default_shared();
        let out = reg
            .lower("AVG", false, Dialect::TSql, vec![col("qty")], &[DataType::INTEGER], None)
            .unwrap();
        assert_eq!(out.to_sql(Dialect::TSql), "AVG(CAST([qty] AS FLOAT))");
    }

    #[test]
    fn test_count_star() {
        let reg = Registry::default_shared();
        let out = reg.lower("COUNT", false, Dialect::MySql, vec![], &[], None).unwrap();
        assert_eq!(out.to_sql(Dialect::MySql), "COUNT(*)");
    }
}
