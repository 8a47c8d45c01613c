//! Window functions.
//!
//! Partitioning and ordering arrive lowered in [`RenderContext::window`];
//! renderers only choose the function and the frame.

use super::{any_slots, arg, const_int, slots};
use crate::registry::{
    DialectSet, FunctionDefinition, RegistryBuilder, RegistryResult, RenderContext, Renderer,
    Scopes,
};
use crate::sql::{self, WindowFrame, WindowOrderBy};
use crate::translation::{TranslationError, TranslationResult};
use crate::types::{ArgType, ArgTypeMatcher, DataType, TypeStrategy};

pub(crate) fn window_scopes() -> Scopes {
    Scopes::WINDOW | Scopes::SUPPORTS_GROUPING | Scopes::SUPPORTS_ORDERING | Scopes::SUPPORTS_BFB
}

/// Type and parameters of the first argument.
fn same_as_first() -> TypeStrategy {
    TypeStrategy::ParamsFromArgs {
        base: Box::new(TypeStrategy::FromArgs(vec![0])),
        source: 0,
    }
}

#[derive(Clone, Copy)]
enum Frame {
    /// Whole partition.
    Partition,
    /// Start of partition up to the current row, when ordered.
    Running,
    /// `n` preceding rows up to the current row; `n` is argument 1.
    Moving,
}

pub(super) fn register(b: &mut RegistryBuilder) -> RegistryResult<()> {
    let numeric = [DataType::INTEGER, DataType::FLOAT];

    // (name, sql function, frame, return type, numeric-only)
    let table: [(&str, &'static str, Frame, TypeStrategy, bool); 12] = [
        ("SUM", "SUM", Frame::Partition, TypeStrategy::FromArgs(vec![0]), true),
        ("AVG", "AVG", Frame::Partition, TypeStrategy::Fixed(DataType::FLOAT), true),
        ("MIN", "MIN", Frame::Partition, same_as_first(), false),
        ("MAX", "MAX", Frame::Partition, same_as_first(), false),
        ("COUNT", "COUNT", Frame::Partition, TypeStrategy::Fixed(DataType::INTEGER), false),
        ("RSUM", "SUM", Frame::Running, TypeStrategy::FromArgs(vec![0]), true),
        ("RAVG", "AVG", Frame::Running, TypeStrategy::Fixed(DataType::FLOAT), true),
        ("RCOUNT", "COUNT", Frame::Running, TypeStrategy::Fixed(DataType::INTEGER), false),
        ("RMIN", "MIN", Frame::Running, same_as_first(), false),
        ("RMAX", "MAX", Frame::Running, same_as_first(), false),
        ("MSUM", "SUM", Frame::Moving, TypeStrategy::FromArgs(vec![0]), true),
        ("MAVG", "AVG", Frame::Moving, TypeStrategy::Fixed(DataType::FLOAT), true),
    ];

    for (name, sql_name, frame, ret, numeric_only) in table {
        let mut def = FunctionDefinition::window(name)
            .scopes(window_scopes())
            .returns(ret);
        let matchers: Vec<ArgTypeMatcher> = match (numeric_only, frame) {
            (true, Frame::Moving) => numeric
                .iter()
                .map(|t| slots(&[*t, DataType::CONST_INTEGER]))
                .collect(),
            (true, _) => numeric.iter().map(|t| slots(&[*t])).collect(),
            (false, _) => vec![any_slots(1)],
        };
        for matcher in matchers {
            def = def.variant(DialectSet::ALL, matcher, aggregate_over(sql_name, frame));
        }
        b.register(def)?;
    }

    for (name, sql_name) in [("RANK", "RANK"), ("RANK_DENSE", "DENSE_RANK")] {
        b.register(
            FunctionDefinition::window(name)
                .scopes(window_scopes())
                .returns(TypeStrategy::Fixed(DataType::INTEGER))
                .variant(DialectSet::ALL, any_slots(1), ranking(sql_name))
                .variant(
                    DialectSet::ALL,
                    ArgTypeMatcher::fixed(vec![
                        ArgType::any(),
                        ArgType::one(DataType::CONST_STRING),
                    ]),
                    ranking(sql_name),
                ),
        )?;
    }

    b.register(
        FunctionDefinition::window("ROW_NUMBER")
            .scopes(window_scopes())
            .returns(TypeStrategy::Fixed(DataType::INTEGER))
            .variant(
                DialectSet::ALL,
                ArgTypeMatcher::fixed(vec![]),
                Renderer::new("window:row_number", |ctx| {
                    Ok(ctx.over(sql::func("ROW_NUMBER", vec![]), None))
                }),
            ),
    )?;
    Ok(())
}

fn aggregate_over(sql_name: &'static str, frame: Frame) -> Renderer {
    let tag = match frame {
        Frame::Partition => "partition",
        Frame::Running => "running",
        Frame::Moving => "moving",
    };
    Renderer::new(format!("window:{}:{}", tag, sql_name), move |ctx| {
        let value = arg(ctx, sql_name, 0)?;
        let frame = match frame {
            Frame::Partition => None,
            Frame::Running if ctx.has_ordering() => Some(WindowFrame::rows_to_current()),
            Frame::Running => None,
            Frame::Moving => Some(moving_frame(ctx, sql_name)?),
        };
        Ok(ctx.over(sql::func(sql_name, vec![value]), frame))
    })
}

fn moving_frame(ctx: &RenderContext<'_>, function: &str) -> TranslationResult<WindowFrame> {
    let rows = const_int(ctx, function, 1)?;
    let rows = u64::try_from(rows).map_err(|_| TranslationError::InvalidArgument {
        function: function.to_string(),
        detail: format!("moving window size must not be negative, got {}", rows),
    })?;
    Ok(WindowFrame::preceding_to_current(rows))
}

/// `RANK() OVER (... ORDER BY value DESC, <window order>)`.
fn ranking(sql_name: &'static str) -> Renderer {
    Renderer::new(format!("window:rank:{}", sql_name), move |ctx| {
        let value = arg(ctx, sql_name, 0)?;
        let descending = match ctx.args.get(1) {
            None => true,
            Some(sql::Expr::Literal(sql::Literal::String(dir))) => match dir.to_ascii_lowercase().as_str() {
                "desc" => true,
                "asc" => false,
                other => {
                    return Err(TranslationError::InvalidArgument {
                        function: sql_name.to_string(),
                        detail: format!("direction must be 'asc' or 'desc', got '{}'", other),
                    })
                }
            },
            Some(other) => {
                return Err(TranslationError::InvalidArgument {
                    function: sql_name.to_string(),
                    detail: format!("direction must be a string literal, got {:?}", other),
                })
            }
        };
        let mut spec = ctx.window.clone().unwrap_or_default();
        let by_value = if descending {
            WindowOrderBy::desc(value)
        } else {
            WindowOrderBy::asc(value)
        };
        spec.order_by.insert(0, by_value);
        Ok(sql::Expr::Window {
            function: Box::new(sql::func(sql_name, vec![])),
            partition_by: spec.partition_by,
            order_by: spec.order_by,
            frame: None,
        })
    })
}
