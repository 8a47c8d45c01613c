//! Rendering compiled queries into dialect SQL.

use tracing::debug;

use super::{CompiledMultiLevelQuery, CompiledQuery, FromObject, JoinedFrom, LevelType};
use crate::formula::inspect::any_outer;
use crate::formula::{Expr, ForkJoinType};
use crate::registry::Registry;
use crate::sql::dialect::Dialect;
use crate::sql::{self, Cte, JoinType, OrderByExpr, Query, SelectExpr, TableRef};
use crate::translation::{TranslationError, Translator};
use crate::typing::TypeEnv;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error("Query {0} runs in the post-processing engine and cannot be nested into one statement")]
    CompengLevelInNested(String),

    #[error("Query {query} references unknown FROM object {from}")]
    UnknownFrom { query: String, from: String },
}

pub type RenderResult<T> = Result<T, RenderError>;

/// One rendered level query.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub id: String,
    pub level_type: LevelType,
    pub dialect: Dialect,
    pub sql: String,
}

/// Renders compiled queries, tracking the types of every alias it emits so
/// higher levels can be lowered against them.
pub struct QueryRenderer<'r> {
    registry: &'r Registry,
    source_dialect: Dialect,
    compeng_dialect: Dialect,
    env: TypeEnv,
}

impl<'r> QueryRenderer<'r> {
    /// `env` types the source columns.
    pub fn new(registry: &'r Registry, source_dialect: Dialect, env: TypeEnv) -> Self {
        Self {
            registry,
            source_dialect,
            compeng_dialect: Dialect::Postgres,
            env,
        }
    }

    pub fn with_compeng_dialect(mut self, dialect: Dialect) -> Self {
        self.compeng_dialect = dialect;
        self
    }

    pub fn dialect_for(&self, level_type: LevelType) -> Dialect {
        match level_type {
            LevelType::SourceDb => self.source_dialect,
            LevelType::Compeng => self.compeng_dialect,
        }
    }

    /// Render every query of `multi` on its own, bottom-up, in the dialect of
    /// its level.
    pub fn render_all(&mut self, multi: &CompiledMultiLevelQuery) -> RenderResult<Vec<RenderedQuery>> {
        let mut out = Vec::with_capacity(multi.query_count());
        for level in &multi.levels {
            let dialect = self.dialect_for(level.level_type);
            for query in &level.queries {
                let rendered = self.render_query(query, dialect)?;
                out.push(RenderedQuery {
                    id: query.id.clone(),
                    level_type: level.level_type,
                    dialect,
                    sql: rendered.to_sql(dialect),
                });
            }
        }
        Ok(out)
    }

    /// Render the whole plan as a single statement: every query below the top
    /// becomes a CTE named after its id. Only plans made of source levels nest.
    pub fn render_nested(&mut self, multi: &CompiledMultiLevelQuery) -> RenderResult<Query> {
        let mut ctes = Vec::new();
        let mut top: Option<Query> = None;
        let top_id = multi.top_query().map(|q| q.id.clone());
        for level in &multi.levels {
            if level.level_type == LevelType::Compeng {
                let id = level.queries.first().map(|q| q.id.clone()).unwrap_or_default();
                return Err(RenderError::CompengLevelInNested(id));
            }
            for query in &level.queries {
                let rendered = self.render_query(query, self.source_dialect)?;
                if Some(&query.id) == top_id.as_ref() {
                    top = Some(rendered);
                } else {
                    ctes.push(Cte::new(&query.id, rendered));
                }
            }
        }
        let mut top = top.unwrap_or_default();
        top.with = ctes;
        Ok(top)
    }

    pub fn render_query(&mut self, query: &CompiledQuery, dialect: Dialect) -> RenderResult<Query> {
        let mut translator = Translator::new(self.registry, dialect);
        let joined = &query.joined_from;
        let qualify = joined.froms.len() > 1;

        let lower = |translator: &mut Translator<'_>, env: &TypeEnv, expr: &Expr| {
            translator.lower(expr, env).map(|(mut sql, t)| {
                if qualify {
                    qualify_columns(&mut sql, joined);
                }
                (sql, t)
            })
        };

        let root = joined
            .get(&joined.root_from_id)
            .ok_or_else(|| unknown_from(query, &joined.root_from_id))?;
        let mut out = Query::new().from(table_ref(root, qualify));

        let mut select = Vec::with_capacity(query.select.len());
        let mut produced = Vec::with_capacity(query.select.len());
        for formula in &query.select {
            let (sql, t) = lower(&mut translator, &self.env, &formula.expr)?;
            select.push(SelectExpr::new(sql).with_alias(&formula.alias));
            produced.push((formula.alias.clone(), t.non_const()));
        }
        out = out.select(select);

        for (right_id, conditions) in group_joins(query) {
            let right = joined
                .get(right_id)
                .ok_or_else(|| unknown_from(query, right_id))?;
            let mut on = Vec::with_capacity(conditions.len());
            let mut join_type = JoinType::Inner;
            for join in conditions {
                on.push(lower(&mut translator, &self.env, &join.expr)?.0);
                if join.join_type == ForkJoinType::Left {
                    join_type = JoinType::Left;
                }
            }
            out = out.join(join_type, table_ref(right, true), sql::and_all(on));
        }

        for filter in &query.filters {
            let (sql, _) = lower(&mut translator, &self.env, &filter.expr)?;
            out = if self.is_aggregated(&filter.expr) {
                out.having(sql)
            } else {
                out.filter(sql)
            };
        }

        let mut group_by = Vec::with_capacity(query.group_by.len());
        for formula in &query.group_by {
            group_by.push(lower(&mut translator, &self.env, &formula.expr)?.0);
        }
        out = out.group_by(group_by);

        let mut order_by = Vec::with_capacity(query.order_by.len());
        for formula in &query.order_by {
            let (sql, _) = lower(&mut translator, &self.env, &formula.expr)?;
            order_by.push(if formula.desc {
                OrderByExpr::desc(sql)
            } else {
                OrderByExpr::asc(sql)
            });
        }
        out = out.order_by(order_by).limit_offset(query.limit, query.offset);

        for (alias, t) in produced {
            self.env.insert(alias, t);
        }
        debug!(id = %query.id, %dialect, "rendered query");
        Ok(out)
    }

    fn is_aggregated(&self, expr: &Expr) -> bool {
        any_outer(expr, |e| matches!(e, Expr::Call(c) if self.registry.is_aggregate(&c.name)))
    }
}

fn unknown_from(query: &CompiledQuery, from: &str) -> RenderError {
    RenderError::UnknownFrom {
        query: query.id.clone(),
        from: from.to_string(),
    }
}

fn table_ref(from: &FromObject, aliased: bool) -> TableRef {
    let table = match from {
        FromObject::Table { table, schema, .. } => {
            let t = TableRef::new(table);
            match schema {
                Some(schema) => t.with_schema(schema),
                None => t,
            }
        }
        FromObject::Subquery { query_id, .. } => TableRef::new(query_id),
    };
    let needs_alias = match from {
        FromObject::Table { table, .. } => table != from.id(),
        FromObject::Subquery { query_id, .. } => query_id != from.id(),
    };
    if aliased && needs_alias {
        table.with_alias(from.id())
    } else {
        table
    }
}

/// Join conditions grouped by joined FROM object, in first-seen order.
fn group_joins(query: &CompiledQuery) -> Vec<(&str, Vec<&super::CompiledJoinOn>)> {
    let mut groups: Vec<(&str, Vec<&super::CompiledJoinOn>)> = Vec::new();
    for join in &query.join_on {
        match groups.iter_mut().find(|(id, _)| *id == join.right_id) {
            Some((_, list)) => list.push(join),
            None => groups.push((join.right_id.as_str(), vec![join])),
        }
    }
    groups
}

/// Prefix bare columns with the id of the FROM object that provides them.
fn qualify_columns(expr: &mut sql::Expr, joined: &JoinedFrom) {
    use sql::Expr as E;
    match expr {
        E::Column { table, column } => {
            if table.is_none() {
                *table = joined.source_of(column).map(|f| f.id().to_string());
            }
        }
        E::Literal(_) | E::Star => {}
        E::BinaryOp { left, right, .. } => {
            qualify_columns(left, joined);
            qualify_columns(right, joined);
        }
        E::UnaryOp { expr, .. }
        | E::IsNull { expr, .. }
        | E::Cast { expr, .. }
        | E::Paren(expr) => qualify_columns(expr, joined),
        E::Function { args, .. } => args.iter_mut().for_each(|a| qualify_columns(a, joined)),
        E::Case {
            subject,
            branches,
            otherwise,
        } => {
            if let Some(subject) = subject {
                qualify_columns(subject, joined);
            }
            for (when, then) in branches {
                qualify_columns(when, joined);
                qualify_columns(then, joined);
            }
            if let Some(e) = otherwise {
                qualify_columns(e, joined);
            }
        }
        E::Window {
            function,
            partition_by,
            order_by,
            ..
        } => {
            qualify_columns(function, joined);
            partition_by.iter_mut().for_each(|p| qualify_columns(p, joined));
            order_by.iter_mut().for_each(|o| qualify_columns(&mut o.expr, joined));
        }
    }
}
