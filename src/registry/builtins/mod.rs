//! Builtin function library and dialect capabilities.

mod aggregate;
mod conditional;
mod operators;
mod scalar;
mod window;

use super::{RegistryBuilder, RegistryResult, RenderContext, Renderer};
use crate::sql::dialect::Dialect;
use crate::sql::{self, BinaryOperator};
use crate::translation::{TranslationError, TranslationResult};
use crate::types::{ArgType, ArgTypeMatcher, DataType, TypeKind};

pub fn register_all(builder: &mut RegistryBuilder) -> RegistryResult<()> {
    operators::register(builder)?;
    conditional::register(builder)?;
    scalar::register(builder)?;
    aggregate::register(builder)?;
    window::register(builder)?;
    register_capabilities(builder)
}

fn register_capabilities(builder: &mut RegistryBuilder) -> RegistryResult<()> {
    for dialect in Dialect::ALL {
        // MySQL runs single-level queries only; anything nested is post-processed.
        builder.register_is_forkable_source(dialect, dialect != Dialect::MySql)?;
        builder.register_is_compeng_executable(dialect, true)?;
    }
    for (alias, dialect) in [
        ("pg", Dialect::Postgres),
        ("postgresql", Dialect::Postgres),
        ("mssql", Dialect::TSql),
        ("sqlserver", Dialect::TSql),
        ("mariadb", Dialect::MySql),
        ("ch", Dialect::ClickHouse),
    ] {
        builder.register_dialect_alias(alias, dialect)?;
    }
    Ok(())
}

// =============================================================================
// Helpers shared by the builtin modules
// =============================================================================

/// One single-type slot per argument.
pub(crate) fn slots(types: &[DataType]) -> ArgTypeMatcher {
    ArgTypeMatcher::fixed(types.iter().map(|t| ArgType::one(*t)).collect())
}

pub(crate) fn any_slots(count: usize) -> ArgTypeMatcher {
    ArgTypeMatcher::fixed(vec![ArgType::any(); count])
}

pub(crate) fn arg(ctx: &RenderContext<'_>, function: &str, position: usize) -> TranslationResult<sql::Expr> {
    ctx.args
        .get(position)
        .cloned()
        .ok_or_else(|| TranslationError::MissingArgument {
            function: function.to_string(),
            position,
        })
}

pub(crate) fn function_renderer(sql_name: &'static str) -> Renderer {
    Renderer::new(format!("fn:{}", sql_name), move |ctx| {
        Ok(sql::func(sql_name, ctx.args.clone()))
    })
}

pub(crate) fn binary_renderer(op: BinaryOperator) -> Renderer {
    Renderer::new(format!("binary:{:?}", op), move |ctx| {
        let name = format!("{:?}", op);
        Ok(sql::Expr::BinaryOp {
            left: Box::new(arg(ctx, &name, 0)?),
            op,
            right: Box::new(arg(ctx, &name, 1)?),
        })
    })
}

/// `CAST(expr AS <native type of kind>)`.
pub(crate) fn cast_to(ctx: &RenderContext<'_>, expr: sql::Expr, kind: TypeKind) -> sql::Expr {
    sql::Expr::Cast {
        expr: Box::new(expr),
        type_name: ctx.registry.native_type(ctx.dialect, kind).name().to_string(),
    }
}

/// Value of a constant integer argument such as a moving window size.
pub(crate) fn const_int(ctx: &RenderContext<'_>, function: &str, position: usize) -> TranslationResult<i64> {
    match arg(ctx, function, position)? {
        sql::Expr::Literal(sql::Literal::Int(n)) => Ok(n),
        other => Err(TranslationError::InvalidArgument {
            function: function.to_string(),
            detail: format!("argument {} must be an integer literal, got {:?}", position, other),
        }),
    }
}
