//! Compiled queries, from planning to SQL.
//!
//! 1. [`planner`] decides the level count and a slice schema per formula.
//! 2. [`separator`] slices the formulas and builds one query per level.
//! 3. [`render`] lowers each level query into dialect SQL.

pub mod planner;
pub mod primitives;
pub mod render;
pub mod separator;

pub use planner::{
    planner_for, ExecutionPlan, ExecutionPlanner, NestedLevelTagPlanner, PlanError, PlanResult,
    PlannedFormula, PlannedJoinOn, WindowToCompengPlanner,
};
pub use primitives::{
    CompiledFormula, CompiledJoinOn, CompiledLevel, CompiledMultiLevelQuery, CompiledQuery,
    FromObject, JoinedFrom, LevelType,
};
pub use render::{QueryRenderer, RenderError, RenderResult, RenderedQuery};
pub use separator::{QuerySeparator, SlicedQuery};
