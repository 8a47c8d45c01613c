//! T-SQL (SQL Server, Azure SQL).
//!
//! Pagination is `OFFSET .. FETCH` and needs an ORDER BY. Non-ASCII string
//! literals take the `N'..'` prefix, and `+` concatenates.

use super::{helpers, ConcatStyle, SqlDialect};
use crate::sql::token::TokenStream;
use crate::types::TypeKind;

const RENAMES: &[(&str, &str)] = &[
    ("LENGTH", "LEN"),
    ("SUBSTR", "SUBSTRING"),
    ("NVL", "ISNULL"),
    ("IFNULL", "ISNULL"),
];

#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::bracket_quoted(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        let quoted = helpers::single_quoted(s);
        if s.is_ascii() {
            quoted
        } else {
            format!("N{quoted}")
        }
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::bool_digit(b)
    }

    fn emit_limit_offset(&self, ts: &mut TokenStream, limit: Option<u64>, offset: Option<u64>) {
        helpers::offset_fetch(ts, limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        true
    }

    fn concat_style(&self) -> ConcatStyle {
        ConcatStyle::Operator("+")
    }

    fn format_date_literal(&self, date: &str) -> String {
        format!("CAST('{date}' AS DATE)")
    }

    fn format_datetime_literal(&self, datetime: &str) -> String {
        format!("CAST('{datetime}' AS DATETIME2)")
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::lookup_rename(RENAMES, name)
    }

    fn native_type_name(&self, kind: TypeKind) -> Option<&'static str> {
        Some(match kind {
            TypeKind::Boolean => "BIT",
            TypeKind::Integer => "BIGINT",
            TypeKind::Float => "FLOAT",
            TypeKind::String => "NVARCHAR(MAX)",
            TypeKind::Date => "DATE",
            TypeKind::Datetime | TypeKind::GenericDatetime => "DATETIME2",
            TypeKind::DatetimeTz => "DATETIMEOFFSET",
            TypeKind::Uuid => "UNIQUEIDENTIFIER",
            _ => return None,
        })
    }

    fn text_type_name(&self) -> &'static str {
        "NVARCHAR(MAX)"
    }
}
