//! # formula_slicer
//!
//! Compiles typed formula expressions into multi-level, multi-dialect SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Formula AST (JSON or builder API)             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [typing + registry]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Typed formulas (overloads, autocasts)             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [mutation]
//! ┌─────────────────────────────────────────────────────────┐
//! │   AMONG → WITHIN, LOD → query forks, BFB, level tags     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [query::planner + slicing]
//! ┌─────────────────────────────────────────────────────────┐
//! │       One query per level (sliced formulas)              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [multi_query]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Fork / window subqueries, leveled query DAG            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [query::render + translation + sql]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Dialect SQL                              │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod compile;
pub mod config;
pub mod formula;
pub mod multi_query;
pub mod mutation;
pub mod query;
pub mod registry;
pub mod slicing;
pub mod sql;
pub mod translation;
pub mod types;
pub mod typing;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::compile::{compile_query, CompileError, CompileOptions, CompileOutput, QueryInput};
    pub use crate::formula::{Expr, LevelTag, NodeHierarchyIndex};
    pub use crate::query::{CompiledMultiLevelQuery, CompiledQuery};
    pub use crate::registry::Registry;
    pub use crate::sql::{Dialect, SqlDialect};
    pub use crate::types::{DataType, TypeKind};
}

pub use compile::{compile_query, CompileError, CompileOptions, CompileOutput};
pub use sql::Dialect;
