//! Execution planning: how many levels a query needs and where each formula
//! stops.
//!
//! Two planners exist:
//! 1. [`NestedLevelTagPlanner`] for sources that run nested subqueries. Every
//!    distinct level tag gets its own level, plus one for late filters.
//! 2. [`WindowToCompengPlanner`] for sources that cannot. The source computes
//!    the window-free part in level 0 and the post-processing engine runs the
//!    tag levels on top of it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{CompiledFormula, CompiledJoinOn, CompiledQuery, LevelType};
use crate::formula::inspect::{collect_tags, contains_fork, contains_window};
use crate::formula::{order_tags, LevelTag};
use crate::registry::Registry;
use crate::slicing::{LevelBoundary, SliceSchema};
use crate::sql::dialect::Dialect;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("Level tags {0} and {1} cannot be ordered")]
    UnresolvableTagOrder(LevelTag, LevelTag),

    #[error("Dialect {dialect} can neither nest queries nor hand them to a post-processing engine")]
    NoExecutionPath { dialect: Dialect },

    #[error("Dialect {dialect} does not support query forks")]
    UnsupportedFork { dialect: Dialect },
}

pub type PlanResult<T> = Result<T, PlanError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedFormula {
    pub formula: CompiledFormula,
    pub schema: SliceSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedJoinOn {
    pub join_on: CompiledJoinOn,
    pub schema: SliceSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub level_types: Vec<LevelType>,
    pub select: Vec<PlannedFormula>,
    pub group_by: Vec<PlannedFormula>,
    pub order_by: Vec<PlannedFormula>,
    pub filters: Vec<PlannedFormula>,
    pub join_on: Vec<PlannedJoinOn>,
}

impl ExecutionPlan {
    pub fn level_count(&self) -> usize {
        self.level_types.len()
    }

    /// Plan with every formula on one level.
    fn single_level(query: &CompiledQuery, level_type: LevelType) -> Self {
        let flat = |formulas: &[CompiledFormula]| -> Vec<PlannedFormula> {
            formulas
                .iter()
                .map(|f| PlannedFormula {
                    formula: f.clone(),
                    schema: SliceSchema::top_only(),
                })
                .collect()
        };
        Self {
            level_types: vec![level_type],
            select: flat(&query.select),
            group_by: flat(&query.group_by),
            order_by: flat(&query.order_by),
            filters: flat(&query.filters),
            join_on: plan_join_on(query),
        }
    }
}

fn plan_join_on(query: &CompiledQuery) -> Vec<PlannedJoinOn> {
    query
        .join_on
        .iter()
        .map(|j| PlannedJoinOn {
            join_on: j.clone(),
            schema: SliceSchema::top_only(),
        })
        .collect()
}

pub trait ExecutionPlanner {
    fn plan(&self, query: &CompiledQuery) -> PlanResult<ExecutionPlan>;
}

/// Pick the planner the source dialect supports.
pub fn planner_for(
    registry: &Registry,
    dialect: Dialect,
    query: &CompiledQuery,
    verbose: bool,
) -> PlanResult<Box<dyn ExecutionPlanner>> {
    if registry.is_forkable_source(dialect) {
        return Ok(Box::new(
            NestedLevelTagPlanner::new(LevelType::SourceDb).verbose(verbose),
        ));
    }
    if query.all_exprs().any(contains_fork) {
        return Err(PlanError::UnsupportedFork { dialect });
    }
    if registry.is_compeng_executable(dialect) {
        return Ok(Box::new(WindowToCompengPlanner { verbose }));
    }
    let nested = query.all_exprs().any(|e| !collect_tags(e).is_empty());
    if nested {
        return Err(PlanError::NoExecutionPath { dialect });
    }
    Ok(Box::new(FlatPlanner))
}

fn ordered_query_tags(query: &CompiledQuery) -> PlanResult<Vec<LevelTag>> {
    let tags: Vec<LevelTag> = query.all_exprs().flat_map(collect_tags).collect();
    order_tags(&tags).map_err(|(a, b)| PlanError::UnresolvableTagOrder(a, b))
}

/// Level of a filter among `tags` levels, before the filter level itself.
///
/// A filter lands above every level whose tag names its field in BFB (one
/// lower when that tag belongs to a fork, whose subquery sees the filter
/// anyway), and above the outermost tag inside the filter itself.
fn filter_level(filter: &CompiledFormula, tags: &[LevelTag]) -> usize {
    let mut level = 0;
    if let Some(field_id) = &filter.original_field_id {
        if let Some((i, tag)) = tags
            .iter()
            .enumerate()
            .rev()
            .find(|(_, t)| t.bfb_names.contains(field_id))
        {
            let mut referenced = i + 1;
            if tag.qfork_nesting != 0 {
                referenced -= 1;
            }
            debug!(field_id, %tag, referenced, "filter referenced by BFB");
            level = level.max(referenced);
        }
    }
    let own = collect_tags(&filter.expr);
    let outermost = own
        .iter()
        .filter_map(|t| tags.iter().position(|x| x == t))
        .max();
    if let Some(pos) = outermost {
        level = level.max(pos + 1);
    }
    level
}

/// Planner for sources that execute arbitrarily nested subqueries.
pub struct NestedLevelTagPlanner {
    level_type: LevelType,
    verbose: bool,
}

impl NestedLevelTagPlanner {
    pub fn new(level_type: LevelType) -> Self {
        Self {
            level_type,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn log(&self, message: fmt::Arguments<'_>) {
        if self.verbose {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
    }

    fn schema(tags: &[LevelTag], before_level: usize) -> SliceSchema {
        SliceSchema::from_tags(&tags[..before_level.saturating_sub(1).min(tags.len())])
    }
}

impl ExecutionPlanner for NestedLevelTagPlanner {
    fn plan(&self, query: &CompiledQuery) -> PlanResult<ExecutionPlan> {
        let tags = ordered_query_tags(query)?;
        let levels = tags.len() + 1;
        self.log(format_args!("Found {} tag levels", tags.len()));
        self.log(format_args!("Using {} execution levels", levels));

        let at = |f: &CompiledFormula, before_level: usize| PlannedFormula {
            formula: f.clone(),
            schema: Self::schema(&tags, before_level),
        };

        let filters = query
            .filters
            .iter()
            .map(|f| {
                let level = filter_level(f, &tags);
                self.log(format_args!(
                    "Level of filter {} was determined to be {}",
                    f.original_field_id.as_deref().unwrap_or(&f.alias),
                    level
                ));
                at(f, level + 1)
            })
            .collect();

        Ok(ExecutionPlan {
            level_types: vec![self.level_type; levels],
            select: query.select.iter().map(|f| at(f, levels)).collect(),
            group_by: query.group_by.iter().map(|f| at(f, 1)).collect(),
            order_by: query.order_by.iter().map(|f| at(f, levels)).collect(),
            filters,
            join_on: plan_join_on(query),
        })
    }
}

/// Planner for sources that only run flat queries but whose results the
/// post-processing engine can take over.
pub struct WindowToCompengPlanner {
    verbose: bool,
}

impl WindowToCompengPlanner {
    pub fn new() -> Self {
        Self { verbose: false }
    }
}

impl Default for WindowToCompengPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionPlanner for WindowToCompengPlanner {
    fn plan(&self, query: &CompiledQuery) -> PlanResult<ExecutionPlan> {
        if !query.all_exprs().any(contains_window) {
            return Ok(ExecutionPlan::single_level(query, LevelType::SourceDb));
        }

        let tags = ordered_query_tags(query)?;
        let compeng_levels = tags.len() + 1;
        let mut level_types = vec![LevelType::SourceDb];
        level_types.extend(std::iter::repeat(LevelType::Compeng).take(compeng_levels));
        if self.verbose {
            info!(levels = level_types.len(), "windows go to the post-processing engine");
        }

        let compeng = |f: &CompiledFormula, before_level: usize| PlannedFormula {
            formula: f.clone(),
            schema: NestedLevelTagPlanner::schema(&tags, before_level)
                .with_bottom(LevelBoundary::WindowFunction),
        };
        let source = |f: &CompiledFormula| PlannedFormula {
            formula: f.clone(),
            schema: SliceSchema::top_only(),
        };

        let filters = query
            .filters
            .iter()
            .map(|f| match filter_level(f, &tags) {
                0 if !contains_window(&f.expr) => source(f),
                level => compeng(f, level + 1),
            })
            .collect();

        Ok(ExecutionPlan {
            level_types,
            select: query.select.iter().map(|f| compeng(f, compeng_levels)).collect(),
            group_by: query.group_by.iter().map(source).collect(),
            order_by: query.order_by.iter().map(|f| compeng(f, compeng_levels)).collect(),
            filters,
            join_on: plan_join_on(query),
        })
    }
}

/// Everything in one source query.
struct FlatPlanner;

impl ExecutionPlanner for FlatPlanner {
    fn plan(&self, query: &CompiledQuery) -> PlanResult<ExecutionPlan> {
        Ok(ExecutionPlan::single_level(query, LevelType::SourceDb))
    }
}
