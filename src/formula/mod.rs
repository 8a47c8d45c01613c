//! Formula IR.
//!
//! Formulas arrive already parsed and validated, as JSON or through the
//! constructor API on [`Expr`]. Later stages rewrite these trees: tagging wraps
//! windows in [`Tagged`] nodes, slicing replaces subtrees with alias fields and
//! splitting rewrites forks into joined subqueries.

pub mod index;
pub mod inspect;
pub mod node;
pub mod tag;

pub use index::NodeHierarchyIndex;
pub use node::{
    Expr, FieldRef, ForkJoinType, FuncCall, JoinCondition, Literal, LodSpec, QueryFork, Span,
    Tagged, WindowCall, WindowGrouping, WindowOrder,
};
pub use tag::{order_tags, LevelTag};
