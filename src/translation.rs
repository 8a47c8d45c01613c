//! Lowering of formula trees into dialect SQL expressions.
//!
//! Every call goes through [`Registry::lower`], so dialect differences live in
//! the registered translation variants rather than here. Forks and LOD calls
//! must already be split into subqueries; AMONG groupings must already be
//! resolved against the query's dimensions.

use tracing::debug;

use crate::formula::{Expr, Literal, LodSpec, WindowGrouping};
use crate::registry::{Registry, WindowSpec};
use crate::sql::dialect::Dialect;
use crate::sql::{self, WindowOrderBy};
use crate::typing::{literal_type, TypeChecker, TypeEnv};
use crate::types::{DataType, TypeError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslationError {
    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("{function}: missing argument {position}")]
    MissingArgument { function: String, position: usize },

    #[error("{function}: {detail}")]
    InvalidArgument { function: String, detail: String },

    #[error("Cannot render non-finite float literal {0}")]
    NonFiniteFloat(f64),

    #[error("{kind} must be resolved before translation: {expr}")]
    Unresolved { kind: &'static str, expr: String },
}

pub type TranslationResult<T> = Result<T, TranslationError>;

/// Lowers formulas for one dialect against one field environment.
pub struct Translator<'r> {
    registry: &'r Registry,
    checker: TypeChecker<'r>,
}

impl<'r> Translator<'r> {
    pub fn new(registry: &'r Registry, dialect: Dialect) -> Self {
        Self {
            registry,
            checker: TypeChecker::new(registry, dialect),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.checker.dialect()
    }

    pub fn translate(&mut self, expr: &Expr, env: &TypeEnv) -> TranslationResult<sql::Expr> {
        self.lower(expr, env).map(|(sql, _)| sql)
    }

    /// Lower `expr`, also returning its type.
    pub fn lower(
        &mut self,
        expr: &Expr,
        env: &TypeEnv,
    ) -> TranslationResult<(sql::Expr, DataType)> {
        match expr {
            Expr::Literal(lit) => Ok((lower_literal(lit)?, literal_type(lit))),
            Expr::Field(field) => {
                let data_type = env
                    .get(&field.name)
                    .ok_or_else(|| TypeError::UnknownField(field.name.clone()))?;
                Ok((sql::col(&field.name), data_type))
            }
            Expr::Call(call) => {
                if matches!(&call.lod, Some(lod) if *lod != LodSpec::Inherited) {
                    return Err(unresolved("LOD call", expr));
                }
                let (args, types) = self.lower_all(&call.args, env)?;
                let ret = self.checker.call_type(&call.name, false, &types)?;
                let sql = self.registry.lower(
                    &call.name,
                    false,
                    self.dialect(),
                    args,
                    &types,
                    None,
                )?;
                Ok((sql, ret))
            }
            Expr::Window(win) => {
                let partition = match &win.grouping {
                    WindowGrouping::Total => Vec::new(),
                    WindowGrouping::Within(dims) => dims.clone(),
                    WindowGrouping::Among(_) => return Err(unresolved("AMONG grouping", expr)),
                };
                let (args, types) = self.lower_all(&win.args, env)?;
                let (partition_by, _) = self.lower_all(&partition, env)?;
                let mut order_by = Vec::with_capacity(win.order_by.len());
                for order in &win.order_by {
                    let (sql, _) = self.lower(&order.expr, env)?;
                    order_by.push(if order.desc {
                        WindowOrderBy::desc(sql)
                    } else {
                        WindowOrderBy::asc(sql)
                    });
                }
                let ret = self.checker.call_type(&win.name, true, &types)?;
                let sql = self.registry.lower(
                    &win.name,
                    true,
                    self.dialect(),
                    args,
                    &types,
                    Some(WindowSpec {
                        partition_by,
                        order_by,
                    }),
                )?;
                Ok((sql, ret))
            }
            Expr::Paren(inner) => {
                let (sql, t) = self.lower(inner, env)?;
                Ok((sql::Expr::Paren(Box::new(sql)), t))
            }
            Expr::Tagged(t) => self.lower(&t.expr, env),
            Expr::Fork(_) => Err(unresolved("query fork", expr)),
        }
    }

    fn lower_all(
        &mut self,
        exprs: &[Expr],
        env: &TypeEnv,
    ) -> TranslationResult<(Vec<sql::Expr>, Vec<DataType>)> {
        let mut sqls = Vec::with_capacity(exprs.len());
        let mut types = Vec::with_capacity(exprs.len());
        for e in exprs {
            let (sql, t) = self.lower(e, env)?;
            sqls.push(sql);
            types.push(t);
        }
        Ok((sqls, types))
    }
}

fn unresolved(kind: &'static str, expr: &Expr) -> TranslationError {
    debug!(kind, %expr, "untranslatable node");
    TranslationError::Unresolved {
        kind,
        expr: expr.to_string(),
    }
}

fn lower_literal(lit: &Literal) -> TranslationResult<sql::Expr> {
    Ok(match lit {
        Literal::Integer(n) => sql::lit_int(*n),
        Literal::Float(x) if !x.is_finite() => return Err(TranslationError::NonFiniteFloat(*x)),
        Literal::Float(x) => sql::lit_float(*x),
        Literal::String(s) => sql::lit_str(s),
        Literal::Boolean(b) => sql::lit_bool(*b),
        Literal::Date(d) => sql::Expr::Literal(sql::Literal::Date(d.clone())),
        Literal::Datetime(d) => sql::Expr::Literal(sql::Literal::Datetime(d.clone())),
        Literal::Null => sql::lit_null(),
    })
}
