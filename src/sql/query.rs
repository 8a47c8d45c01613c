//! SELECT statement builder.
//!
//! Each level query renders as one [`Query`]. Nesting a whole plan into a
//! single statement puts the lower levels into the `WITH` list of the top
//! query, in level order.

use super::dialect::{Dialect, SqlDialect};
use super::expr::{binary, BinaryOperator, Expr};
use super::token::{Token, TokenStream};

#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

/// `[schema.]table [AS alias]`
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(table: &str) -> Self {
        Self {
            schema: None,
            table: table.into(),
            alias: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn emit(&self, ts: &mut TokenStream) {
        ts.push(Token::QualifiedIdent {
            schema: self.schema.clone(),
            name: self.table.clone(),
        });
        emit_alias(ts, self.alias.as_deref());
    }
}

/// Fork joins only ever produce these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub descending: bool,
}

impl OrderByExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            descending: false,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            descending: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitOffset {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// A named subquery in the `WITH` list.
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub query: Box<Query>,
}

impl Cte {
    pub fn new(name: &str, query: Query) -> Self {
        Self {
            name: name.into(),
            query: Box::new(query),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "a query does nothing until rendered with to_sql()"]
pub struct Query {
    pub with: Vec<Cte>,
    pub select: Vec<SelectExpr>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit_offset: Option<LimitOffset>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.select = exprs.into_iter().map(Into::into).collect();
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    pub fn join(mut self, join_type: JoinType, table: TableRef, on: Option<Expr>) -> Self {
        self.joins.push(Join { join_type, table, on });
        self
    }

    /// AND `condition` into the WHERE clause.
    pub fn filter(mut self, condition: Expr) -> Self {
        self.where_clause = Some(conjoin(self.where_clause.take(), condition));
        self
    }

    /// AND `condition` into the HAVING clause.
    pub fn having(mut self, condition: Expr) -> Self {
        self.having = Some(conjoin(self.having.take(), condition));
        self
    }

    pub fn group_by(mut self, exprs: Vec<Expr>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn order_by(mut self, exprs: Vec<OrderByExpr>) -> Self {
        self.order_by = exprs;
        self
    }

    /// `(None, None)` clears pagination.
    pub fn limit_offset(mut self, limit: Option<u64>, offset: Option<u64>) -> Self {
        self.limit_offset = (limit.is_some() || offset.is_some()).then_some(LimitOffset { limit, offset });
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut ts = TokenStream::new();
        self.emit(&mut ts, dialect);
        ts.serialize(dialect)
    }

    pub fn emit(&self, ts: &mut TokenStream, dialect: Dialect) {
        if !self.with.is_empty() {
            ts.keyword("WITH").space();
            for (i, cte) in self.with.iter().enumerate() {
                if i > 0 {
                    ts.comma().newline();
                }
                ts.ident(&cte.name)
                    .space()
                    .keyword("AS")
                    .space()
                    .lparen()
                    .newline();
                cte.query.emit(ts, dialect);
                ts.newline().rparen();
            }
            ts.newline();
        }

        ts.keyword("SELECT");
        for (i, item) in self.select.iter().enumerate() {
            if i > 0 {
                ts.comma();
            }
            ts.newline().indent(1);
            item.expr.emit(ts, dialect);
            emit_alias(ts, item.alias.as_deref());
        }

        if let Some(from) = &self.from {
            ts.newline().keyword("FROM").space();
            from.emit(ts);
        }

        for join in &self.joins {
            ts.newline().keyword(match join.join_type {
                JoinType::Inner => "INNER JOIN",
                JoinType::Left => "LEFT JOIN",
            });
            ts.space();
            join.table.emit(ts);
            if let Some(on) = &join.on {
                ts.space().keyword("ON").space();
                on.emit(ts, dialect);
            }
        }

        if let Some(condition) = &self.where_clause {
            ts.newline().keyword("WHERE").space();
            condition.emit(ts, dialect);
        }

        if !self.group_by.is_empty() {
            ts.newline().keyword("GROUP BY").space();
            ts.comma_separated(&self.group_by, |ts, e| e.emit(ts, dialect));
        }

        if let Some(condition) = &self.having {
            ts.newline().keyword("HAVING").space();
            condition.emit(ts, dialect);
        }

        if !self.order_by.is_empty() {
            ts.newline().keyword("ORDER BY").space();
            ts.comma_separated(&self.order_by, |ts, o| {
                o.expr.emit(ts, dialect);
                ts.space().keyword(if o.descending { "DESC" } else { "ASC" });
            });
        } else if self.limit_offset.is_some() && dialect.requires_order_by_for_offset() {
            // OFFSET .. FETCH is only legal after an ORDER BY.
            ts.newline().keyword("ORDER BY (SELECT NULL)");
        }

        if let Some(page) = self.limit_offset {
            ts.newline();
            dialect.emit_limit_offset(ts, page.limit, page.offset);
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_sql(Dialect::default()))
    }
}

fn emit_alias(ts: &mut TokenStream, alias: Option<&str>) {
    if let Some(alias) = alias {
        ts.space().keyword("AS").space().ident(alias);
    }
}

fn conjoin(existing: Option<Expr>, condition: Expr) -> Expr {
    match existing {
        Some(existing) => binary(existing, BinaryOperator::And, condition),
        None => condition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::expr::{col, count_star, func, lit_int};
    use crate::sql::test_utils::validate_sql;

    fn total() -> Expr {
        func("SUM", vec![col("amount")])
    }

    #[test]
    fn test_schema_qualified_source() {
        let query = Query::new()
            .select(vec![col("region"), col("amount")])
            .from(TableRef::new("sales").with_schema("dbo"));

        let sql = query.to_sql(Dialect::TSql);
        assert!(sql.contains("FROM [dbo].[sales]"), "{sql}");
        validate_sql(&sql, Dialect::TSql).unwrap();
    }

    #[test]
    fn test_aggregation_with_having() {
        let query = Query::new()
            .select(vec![
                SelectExpr::new(col("region")),
                SelectExpr::new(total()).with_alias("total"),
                SelectExpr::new(count_star()).with_alias("cnt"),
            ])
            .from(TableRef::new("orders"))
            .group_by(vec![col("region")])
            .having(binary(total(), BinaryOperator::Gt, lit_int(1000)));

        let sql = query.to_sql(Dialect::Postgres);
        assert!(sql.contains("GROUP BY \"region\""), "{sql}");
        assert!(sql.contains("HAVING SUM(\"amount\") > 1000"), "{sql}");
        validate_sql(&sql, Dialect::Postgres).unwrap();
    }

    #[test]
    fn test_filters_are_anded() {
        let query = Query::new()
            .select(vec![col("x")])
            .from(TableRef::new("t"))
            .filter(binary(col("x"), BinaryOperator::Gt, lit_int(1)))
            .filter(binary(col("x"), BinaryOperator::Lt, lit_int(9)));
        let sql = query.to_sql(Dialect::DuckDb);
        assert!(sql.contains("WHERE \"x\" > 1 AND \"x\" < 9"), "{sql}");
    }

    #[test]
    fn test_left_join_on_subquery() {
        let on = binary(
            Expr::Column {
                table: Some("q".into()),
                column: "region".into(),
            },
            BinaryOperator::Eq,
            Expr::Column {
                table: Some("q_s0_0".into()),
                column: "region".into(),
            },
        );
        let query = Query::new()
            .select(vec![col("region")])
            .from(TableRef::new("q"))
            .join(JoinType::Left, TableRef::new("q_s0_0"), Some(on));

        let sql = query.to_sql(Dialect::DuckDb);
        assert!(sql.contains("LEFT JOIN \"q_s0_0\" ON \"q\".\"region\" = \"q_s0_0\".\"region\""), "{sql}");
        validate_sql(&sql, Dialect::DuckDb).unwrap();
    }

    #[test]
    fn test_tsql_pagination_without_order_by() {
        let query = Query::new()
            .select(vec![col("x")])
            .from(TableRef::new("t"))
            .limit_offset(Some(10), None);

        let sql = query.to_sql(Dialect::TSql);
        assert!(sql.contains("ORDER BY (SELECT NULL)"), "{sql}");
        assert!(sql.contains("OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"), "{sql}");
        validate_sql(&sql, Dialect::TSql).unwrap();
    }

    #[test]
    fn test_pagination_cleared() {
        let query = Query::new().select(vec![col("x")]).limit_offset(None, None);
        assert!(query.limit_offset.is_none());
        let sql = query.limit_offset(Some(5), Some(10)).to_sql(Dialect::Postgres);
        assert!(sql.ends_with("LIMIT 5 OFFSET 10"), "{sql}");
    }

    #[test]
    fn test_level_chain_as_ctes() {
        let bottom = Query::new()
            .select(vec![
                SelectExpr::new(col("region")).with_alias("res_0_0_0"),
                SelectExpr::new(total()).with_alias("res_0_0_1"),
            ])
            .from(TableRef::new("orders"))
            .group_by(vec![col("region")]);

        let mut top = Query::new()
            .select(vec![SelectExpr::new(col("res_0_0_1")).with_alias("total")])
            .from(TableRef::new("q_0_0_0"))
            .filter(binary(col("res_0_0_1"), BinaryOperator::Gt, lit_int(10000)));
        top.with = vec![Cte::new("q_0_0_0", bottom)];

        let sql = top.to_sql(Dialect::Postgres);
        assert!(sql.starts_with("WITH \"q_0_0_0\" AS ("), "{sql}");
        validate_sql(&sql, Dialect::Postgres).unwrap();
    }
}
