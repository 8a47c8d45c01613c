//! ClickHouse.
//!
//! Function and type names are case-sensitive camelCase, and backslash is an
//! escape character inside string literals.

use super::{helpers, SqlDialect};
use crate::types::TypeKind;

const RENAMES: &[(&str, &str)] = &[("NVL", "ifNull"), ("IFNULL", "ifNull"), ("ISNULL", "ifNull")];

#[derive(Debug, Clone, Copy)]
pub struct ClickHouse;

impl SqlDialect for ClickHouse {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::backtick_quoted(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::single_quoted(&s.replace('\\', "\\\\"))
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::bool_word(b)
    }

    fn format_date_literal(&self, date: &str) -> String {
        format!("toDate('{date}')")
    }

    fn format_datetime_literal(&self, datetime: &str) -> String {
        format!("toDateTime('{datetime}')")
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::lookup_rename(RENAMES, name)
    }

    fn native_type_name(&self, kind: TypeKind) -> Option<&'static str> {
        Some(match kind {
            TypeKind::Boolean => "Bool",
            TypeKind::Integer => "Int64",
            TypeKind::Float => "Float64",
            TypeKind::String => "String",
            TypeKind::Date => "Date",
            TypeKind::Datetime | TypeKind::DatetimeTz | TypeKind::GenericDatetime => "DateTime",
            TypeKind::Uuid => "UUID",
            TypeKind::ArrayInt => "Array(Int64)",
            TypeKind::ArrayFloat => "Array(Float64)",
            TypeKind::ArrayStr => "Array(String)",
            _ => return None,
        })
    }

    fn text_type_name(&self) -> &'static str {
        "String"
    }
}
