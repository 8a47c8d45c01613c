//! SQL generation.
//!
//! The function registry lowers formulas into [`Expr`] trees and the query
//! renderer wraps them into [`Query`] statements. Both push tokens into a
//! [`TokenStream`]; only serialization consults the [`Dialect`].

pub mod dialect;
pub mod expr;
pub mod query;
pub mod token;

#[cfg(test)]
pub mod test_utils;

pub use dialect::{ConcatStyle, Dialect, SqlDialect};
pub use expr::{
    and_all, binary, col, count_star, func, func_distinct, lit_bool, lit_float, lit_int, lit_null, lit_str,
    BinaryOperator, Expr, Literal, UnaryOperator, WindowFrame, WindowOrderBy,
};
pub use query::{Cte, Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, TableRef};
pub use token::{Token, TokenStream};
