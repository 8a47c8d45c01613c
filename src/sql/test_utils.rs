//! Parse emitted SQL back with sqlparser to catch syntax slips.

use sqlparser::dialect::{ClickHouseDialect, DuckDbDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

use super::dialect::Dialect;

pub fn validate_sql(sql: &str, dialect: Dialect) -> Result<(), String> {
    let parsed = match dialect {
        Dialect::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
        Dialect::DuckDb => Parser::parse_sql(&DuckDbDialect {}, sql),
        Dialect::MySql => Parser::parse_sql(&MySqlDialect {}, sql),
        Dialect::TSql => Parser::parse_sql(&MsSqlDialect {}, sql),
        Dialect::ClickHouse => Parser::parse_sql(&ClickHouseDialect {}, sql),
    };
    parsed
        .map(|_| ())
        .map_err(|e| format!("{dialect} rejects generated SQL: {e}\n{sql}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_and_rejects() {
        validate_sql("SELECT * FROM sales", Dialect::Postgres).unwrap();
        validate_sql("SELECT * FROM sales", Dialect::ClickHouse).unwrap();
        assert!(validate_sql("SELEC * FORM sales", Dialect::Postgres).is_err());
    }
}
