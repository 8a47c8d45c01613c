//! MySQL.
//!
//! Booleans are `TINYINT(1)`, `||` means OR, and CAST accepts only a short
//! list of targets (`SIGNED`, `DOUBLE`, `CHAR`, `DATE`, `DATETIME`).

use super::{helpers, ConcatStyle, SqlDialect};
use crate::types::TypeKind;

const RENAMES: &[(&str, &str)] = &[("NVL", "IFNULL"), ("ISNULL", "IFNULL"), ("SUBSTR", "SUBSTRING")];

#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::backtick_quoted(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::bool_digit(b)
    }

    fn concat_style(&self) -> ConcatStyle {
        ConcatStyle::Function
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::lookup_rename(RENAMES, name)
    }

    fn native_type_name(&self, kind: TypeKind) -> Option<&'static str> {
        Some(match kind {
            TypeKind::Boolean | TypeKind::Integer => "SIGNED",
            TypeKind::Float => "DOUBLE",
            TypeKind::String => "CHAR",
            TypeKind::Date => "DATE",
            TypeKind::Datetime | TypeKind::DatetimeTz | TypeKind::GenericDatetime => "DATETIME",
            _ => return None,
        })
    }

    fn text_type_name(&self) -> &'static str {
        "CHAR"
    }
}
