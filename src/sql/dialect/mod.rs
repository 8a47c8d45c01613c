//! Target SQL dialects.
//!
//! [`SqlDialect`] collects everything that differs between targets once an
//! expression tree exists: quoting, literal spelling, pagination, function
//! names and CAST targets. [`Dialect`] is the closed set of targets the
//! registry knows how to render for.
//!
//! | | Postgres | DuckDB | MySQL | T-SQL | ClickHouse |
//! |---|---|---|---|---|---|
//! | identifiers | `"x"` | `"x"` | `` `x` `` | `[x]` | `` `x` `` |
//! | booleans | `true` | `true` | `1` | `1` | `true` |
//! | concat | `\|\|` | `\|\|` | `CONCAT()` | `+` | `\|\|` |
//! | paging | `LIMIT` | `LIMIT` | `LIMIT` | `OFFSET .. FETCH` | `LIMIT` |

mod clickhouse;
mod duckdb;
pub mod helpers;
mod mysql;
mod postgres;
mod tsql;

pub use clickhouse::ClickHouse;
pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use tsql::TSql;

use serde::{Deserialize, Serialize};

use super::token::TokenStream;
use crate::types::TypeKind;

/// How a dialect spells string concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStyle {
    Operator(&'static str),
    /// `CONCAT(a, b)`; MySQL reads `||` as logical OR.
    Function,
}

pub trait SqlDialect: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn quote_identifier(&self, ident: &str) -> String;

    fn quote_string(&self, s: &str) -> String {
        helpers::single_quoted(s)
    }

    fn format_bool(&self, b: bool) -> &'static str;

    fn format_null(&self) -> &'static str {
        "NULL"
    }

    /// Push the pagination clause for `limit`/`offset` onto `ts`.
    fn emit_limit_offset(&self, ts: &mut TokenStream, limit: Option<u64>, offset: Option<u64>) {
        helpers::limit_offset(ts, limit, offset)
    }

    /// Pagination is only valid after an ORDER BY.
    fn requires_order_by_for_offset(&self) -> bool {
        false
    }

    fn concat_style(&self) -> ConcatStyle {
        ConcatStyle::Operator("||")
    }

    /// `date` is ISO `YYYY-MM-DD`.
    fn format_date_literal(&self, date: &str) -> String {
        format!("DATE '{date}'")
    }

    fn format_datetime_literal(&self, datetime: &str) -> String {
        format!("TIMESTAMP '{datetime}'")
    }

    /// Dialect name for a generic function, or `None` to keep `name`.
    /// Matching ignores case.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }

    /// CAST target for `kind`, or `None` when the dialect has no direct
    /// equivalent and values travel as text.
    fn native_type_name(&self, kind: TypeKind) -> Option<&'static str>;

    fn text_type_name(&self) -> &'static str {
        "TEXT"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    DuckDb,
    Postgres,
    MySql,
    TSql,
    ClickHouse,
}

impl Dialect {
    /// Every dialect; a dialect's position here is its bit in a `DialectSet`.
    pub const ALL: [Dialect; 5] = [
        Dialect::DuckDb,
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::TSql,
        Dialect::ClickHouse,
    ];

    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::DuckDb => &DuckDb,
            Dialect::Postgres => &Postgres,
            Dialect::MySql => &MySql,
            Dialect::TSql => &TSql,
            Dialect::ClickHouse => &ClickHouse,
        }
    }

    pub fn index(&self) -> u32 {
        *self as u32
    }

    /// Case-insensitive lookup by display name.
    pub fn from_name(name: &str) -> Option<Dialect> {
        Dialect::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
    }
}

macro_rules! delegate_to_impl {
    ($( fn $method:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty; )*) => {
        impl SqlDialect for Dialect {
            $(
                fn $method(&self $(, $arg: $ty)*) -> $ret {
                    self.dialect().$method($($arg),*)
                }
            )*
        }
    };
}

delegate_to_impl! {
    fn name(&self) -> &'static str;
    fn quote_identifier(&self, ident: &str) -> String;
    fn quote_string(&self, s: &str) -> String;
    fn format_bool(&self, b: bool) -> &'static str;
    fn format_null(&self) -> &'static str;
    fn emit_limit_offset(&self, ts: &mut TokenStream, limit: Option<u64>, offset: Option<u64>) -> ();
    fn requires_order_by_for_offset(&self) -> bool;
    fn concat_style(&self) -> ConcatStyle;
    fn format_date_literal(&self, date: &str) -> String;
    fn format_datetime_literal(&self, datetime: &str) -> String;
    fn remap_function(&self, name: &str) -> Option<&'static str>;
    fn native_type_name(&self, kind: TypeKind) -> Option<&'static str>;
    fn text_type_name(&self) -> &'static str;
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dialect().name())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::from_name(s).ok_or_else(|| format!("unknown dialect '{s}'"))
    }
}
