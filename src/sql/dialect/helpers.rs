//! Spelling rules shared by more than one dialect.

use crate::sql::token::{Token, TokenStream};
use crate::types::TypeKind;

pub fn double_quoted(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn backtick_quoted(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

pub fn bracket_quoted(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

pub fn single_quoted(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn bool_word(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

pub fn bool_digit(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

/// `LIMIT n OFFSET m`, either part optional.
pub fn limit_offset(ts: &mut TokenStream, limit: Option<u64>, offset: Option<u64>) {
    if let Some(n) = limit {
        ts.keyword("LIMIT").space().push(count(n));
    }
    if let Some(m) = offset {
        if limit.is_some() {
            ts.space();
        }
        ts.keyword("OFFSET").space().push(count(m));
    }
}

/// `OFFSET m ROWS [FETCH NEXT n ROWS ONLY]`; the offset is always present.
pub fn offset_fetch(ts: &mut TokenStream, limit: Option<u64>, offset: Option<u64>) {
    ts.keyword("OFFSET")
        .space()
        .push(count(offset.unwrap_or(0)))
        .space()
        .keyword("ROWS");
    if let Some(n) = limit {
        ts.space()
            .keyword("FETCH NEXT")
            .space()
            .push(count(n))
            .space()
            .keyword("ROWS ONLY");
    }
}

fn count(n: u64) -> Token {
    Token::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// Case-insensitive lookup in a rename table.
pub fn lookup_rename(table: &[(&str, &'static str)], name: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(from, _)| from.eq_ignore_ascii_case(name))
        .map(|(_, to)| *to)
}

/// Null-handling spellings that fold into `COALESCE`.
pub const COALESCE_RENAMES: &[(&str, &str)] = &[("NVL", "COALESCE"), ("IFNULL", "COALESCE"), ("ISNULL", "COALESCE")];

/// CAST targets of Postgres and DuckDB.
pub fn ansi_type_name(kind: TypeKind) -> Option<&'static str> {
    Some(match kind {
        TypeKind::Boolean => "BOOLEAN",
        TypeKind::Integer => "BIGINT",
        TypeKind::Float => "DOUBLE PRECISION",
        TypeKind::String => "TEXT",
        TypeKind::Date => "DATE",
        TypeKind::Datetime | TypeKind::GenericDatetime => "TIMESTAMP",
        TypeKind::DatetimeTz => "TIMESTAMPTZ",
        TypeKind::Uuid => "UUID",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dialect::Dialect;

    fn paging(emit: fn(&mut TokenStream, Option<u64>, Option<u64>), limit: Option<u64>, offset: Option<u64>) -> String {
        let mut ts = TokenStream::new();
        emit(&mut ts, limit, offset);
        ts.serialize(Dialect::Postgres)
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(paging(limit_offset, Some(10), None), "LIMIT 10");
        assert_eq!(paging(limit_offset, None, Some(5)), "OFFSET 5");
        assert_eq!(paging(limit_offset, Some(10), Some(5)), "LIMIT 10 OFFSET 5");
    }

    #[test]
    fn test_offset_fetch() {
        assert_eq!(paging(offset_fetch, Some(10), None), "OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY");
        assert_eq!(paging(offset_fetch, None, Some(20)), "OFFSET 20 ROWS");
    }

    #[test]
    fn test_rename_lookup_ignores_case() {
        assert_eq!(lookup_rename(COALESCE_RENAMES, "nvl"), Some("COALESCE"));
        assert_eq!(lookup_rename(COALESCE_RENAMES, "SUM"), None);
    }
}
