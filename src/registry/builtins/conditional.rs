//! CASE, IF and null handling.

use super::{any_slots, arg, function_renderer};
use crate::registry::{DialectSet, FunctionDefinition, RegistryBuilder, RegistryResult, Renderer};
use crate::sql;
use crate::translation::TranslationError;
use crate::types::{ArgType, ArgTypeMatcher, DataType, TypeStrategy};

pub(super) fn register(b: &mut RegistryBuilder) -> RegistryResult<()> {
    // Arity is left to the type strategies so a short CASE reports which
    // shape was expected rather than "no matching signature".
    let anything = ArgTypeMatcher::variadic(ArgType::any(), 1);

    b.register(
        FunctionDefinition::new("CASE")
            .returns(TypeStrategy::Case)
            .variant(DialectSet::ALL, anything.clone(), case_renderer()),
    )?;
    b.register(
        FunctionDefinition::new("IF")
            .returns(TypeStrategy::If)
            .variant(DialectSet::ALL, anything, if_renderer()),
    )?;
    b.register(
        FunctionDefinition::new("IFNULL").variant(
            DialectSet::ALL,
            any_slots(2),
            function_renderer("IFNULL"),
        ),
    )?;
    b.register(
        FunctionDefinition::new("ISNULL")
            .returns(TypeStrategy::Fixed(DataType::BOOLEAN))
            .variant(
                DialectSet::ALL,
                any_slots(1),
                Renderer::new("isnull", |ctx| {
                    Ok(sql::Expr::IsNull {
                        expr: Box::new(arg(ctx, "ISNULL", 0)?),
                        negated: false,
                    })
                }),
            ),
    )?;
    Ok(())
}

fn malformed(function: &str, count: usize) -> TranslationError {
    TranslationError::InvalidArgument {
        function: function.to_string(),
        detail: format!("malformed branch list of {} arguments", count),
    }
}

fn case_renderer() -> Renderer {
    Renderer::new("case:simple", |ctx| {
        let n = ctx.args.len();
        if n < 4 || n % 2 != 0 {
            return Err(malformed("CASE", n));
        }
        let subject = arg(ctx, "CASE", 0)?;
        let otherwise = arg(ctx, "CASE", n - 1)?;
        let branches = ctx.args[1..n - 1]
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Ok(sql::Expr::Case {
            subject: Some(Box::new(subject)),
            branches,
            otherwise: Some(Box::new(otherwise)),
        })
    })
}

fn if_renderer() -> Renderer {
    Renderer::new("case:searched", |ctx| {
        let n = ctx.args.len();
        if n < 3 || n % 2 != 1 {
            return Err(malformed("IF", n));
        }
        let otherwise = arg(ctx, "IF", n - 1)?;
        let branches = ctx.args[..n - 1]
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Ok(sql::Expr::Case {
            subject: None,
            branches,
            otherwise: Some(Box::new(otherwise)),
        })
    })
}
