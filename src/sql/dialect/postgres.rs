//! PostgreSQL. Also the default dialect of the post-processing engine, so
//! every builtin needs a Postgres rendering.

use super::{helpers, SqlDialect};
use crate::types::TypeKind;

#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::double_quoted(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::bool_word(b)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::lookup_rename(helpers::COALESCE_RENAMES, name)
    }

    fn native_type_name(&self, kind: TypeKind) -> Option<&'static str> {
        helpers::ansi_type_name(kind)
    }
}
