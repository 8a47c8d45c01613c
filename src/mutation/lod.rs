use tracing::debug;

use super::{TaggingError, TaggingResult};
use crate::formula::{Expr, ForkJoinType, JoinCondition, LodSpec, QueryFork, WindowGrouping};
use crate::registry::Registry;

/// Rewrite every aggregate carrying a level of detail into a query fork.
///
/// The fork is computed over the LOD dimensions and joined back on the
/// dimensions it shares with the enclosing query. Nested LODs are rewritten
/// first, so an inner fork ends up inside the outer fork's result.
pub fn lods_to_forks(
    expr: &mut Expr,
    query_dims: &[Expr],
    registry: &Registry,
) -> TaggingResult<()> {
    for child in expr.children_mut() {
        lods_to_forks(child, query_dims, registry)?;
    }

    let Expr::Call(call) = expr else {
        return Ok(());
    };
    let Some(lod) = call.lod.take() else {
        return Ok(());
    };
    if !registry.is_aggregate(&call.name) {
        return Err(TaggingError::LodOnNonAggregate {
            function: call.name.clone(),
        });
    }

    let dims = match lod {
        LodSpec::Inherited => return Ok(()),
        LodSpec::Fixed(dims) => dims,
        LodSpec::Exclude(excluded) => query_dims
            .iter()
            .filter(|d| !contains_dim(&excluded, d))
            .cloned()
            .collect(),
        LodSpec::Include(_) => {
            return Err(TaggingError::UnsupportedLod {
                kind: "INCLUDE",
                function: call.name.clone(),
            })
        }
    };

    let joining = dims
        .iter()
        .filter(|d| contains_dim(query_dims, d))
        .cloned()
        .map(JoinCondition::SelfEquality)
        .collect();
    let before_filter_by = std::mem::take(&mut call.before_filter_by);

    debug!(function = %call.name, dims = dims.len(), "LOD aggregate becomes a fork");
    let result = std::mem::replace(expr, Expr::null());
    *expr = Expr::Fork(QueryFork {
        join_type: ForkJoinType::Left,
        result_expr: Box::new(result),
        joining,
        lod: LodSpec::Fixed(dims),
        before_filter_by,
        tag: None,
    });
    Ok(())
}

/// Turn `AMONG` groupings into the equivalent `WITHIN` partitioning.
pub fn resolve_among(expr: &mut Expr, query_dims: &[Expr]) {
    if let Expr::Window(w) = expr {
        if let WindowGrouping::Among(among) = &w.grouping {
            let within = query_dims
                .iter()
                .filter(|d| !contains_dim(among, d))
                .cloned()
                .collect();
            w.grouping = WindowGrouping::Within(within);
        }
    }
    for child in expr.children_mut() {
        resolve_among(child, query_dims);
    }
}

pub(crate) fn contains_dim(dims: &[Expr], dim: &Expr) -> bool {
    let dim = dim.unwrap_transparent();
    dims.iter().any(|d| d.unwrap_transparent() == dim)
}
