//! Compiled query structures.
//!
//! Everything here is plain data: formulas are still formula trees, and a
//! query reads its sources through string ids so the whole plan serializes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::formula::{Expr, ForkJoinType};

/// Engine that executes a level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelType {
    /// The source database.
    #[default]
    SourceDb,
    /// Post-processing engine working on results fetched from the source.
    Compeng,
}

/// A formula with its result alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledFormula {
    pub alias: String,
    pub expr: Expr,
    /// Field this formula was created for; filters use it to match BFB names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_field_id: Option<String>,
    /// Ids of the FROM objects the formula reads.
    #[serde(default)]
    pub from_ids: BTreeSet<String>,
    /// Sort direction, meaningful in ORDER BY only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub desc: bool,
}

impl CompiledFormula {
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: alias.into(),
            expr,
            original_field_id: None,
            from_ids: BTreeSet::new(),
            desc: false,
        }
    }

    pub fn with_field_id(mut self, field_id: impl Into<String>) -> Self {
        self.original_field_id = Some(field_id.into());
        self
    }

    pub fn with_from_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.from_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn descending(mut self, desc: bool) -> Self {
        self.desc = desc;
        self
    }
}

/// Join between two FROM objects of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledJoinOn {
    pub left_id: String,
    pub right_id: String,
    pub join_type: ForkJoinType,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FromObject {
    Table {
        id: String,
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        columns: Vec<String>,
    },
    /// Result of another compiled query.
    Subquery {
        id: String,
        query_id: String,
        columns: Vec<String>,
    },
}

impl FromObject {
    pub fn id(&self) -> &str {
        match self {
            FromObject::Table { id, .. } | FromObject::Subquery { id, .. } => id,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            FromObject::Table { columns, .. } | FromObject::Subquery { columns, .. } => columns,
        }
    }

    pub fn query_id(&self) -> Option<&str> {
        match self {
            FromObject::Subquery { query_id, .. } => Some(query_id),
            FromObject::Table { .. } => None,
        }
    }
}

/// FROM objects of a query; joins between them live in `CompiledQuery::join_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedFrom {
    pub root_from_id: String,
    pub froms: Vec<FromObject>,
}

impl JoinedFrom {
    pub fn single(from: FromObject) -> Self {
        Self {
            root_from_id: from.id().to_string(),
            froms: vec![from],
        }
    }

    pub fn get(&self, id: &str) -> Option<&FromObject> {
        self.froms.iter().find(|f| f.id() == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.froms.iter().map(FromObject::id)
    }

    /// First FROM object providing `column`, the root one preferred.
    pub fn source_of(&self, column: &str) -> Option<&FromObject> {
        let provides = |f: &&FromObject| f.columns().iter().any(|c| c == column);
        self.get(&self.root_from_id)
            .filter(provides)
            .or_else(|| self.froms.iter().find(provides))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub id: String,
    #[serde(default)]
    pub level_type: LevelType,
    pub select: Vec<CompiledFormula>,
    #[serde(default)]
    pub group_by: Vec<CompiledFormula>,
    #[serde(default)]
    pub order_by: Vec<CompiledFormula>,
    #[serde(default)]
    pub filters: Vec<CompiledFormula>,
    #[serde(default)]
    pub join_on: Vec<CompiledJoinOn>,
    pub joined_from: JoinedFrom,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl CompiledQuery {
    pub fn new(id: impl Into<String>, joined_from: JoinedFrom) -> Self {
        Self {
            id: id.into(),
            level_type: LevelType::SourceDb,
            select: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            filters: Vec::new(),
            join_on: Vec::new(),
            joined_from,
            limit: None,
            offset: None,
        }
    }

    /// Every formula expression, join conditions included.
    pub fn all_exprs(&self) -> impl Iterator<Item = &Expr> {
        self.select
            .iter()
            .chain(&self.group_by)
            .chain(&self.order_by)
            .chain(&self.filters)
            .map(|f| &f.expr)
            .chain(self.join_on.iter().map(|j| &j.expr))
    }

    pub fn all_exprs_mut(&mut self) -> impl Iterator<Item = &mut Expr> {
        self.select
            .iter_mut()
            .chain(&mut self.group_by)
            .chain(&mut self.order_by)
            .chain(&mut self.filters)
            .map(|f| &mut f.expr)
            .chain(self.join_on.iter_mut().map(|j| &mut j.expr))
    }

    /// Ids of the queries this one reads from.
    pub fn subquery_ids(&self) -> Vec<&str> {
        self.joined_from
            .froms
            .iter()
            .filter_map(FromObject::query_id)
            .collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.select.iter().map(|f| f.alias.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledLevel {
    pub level_type: LevelType,
    pub queries: Vec<CompiledQuery>,
}

/// Queries grouped by level; each query reads only from lower levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledMultiLevelQuery {
    pub levels: Vec<CompiledLevel>,
}

impl CompiledMultiLevelQuery {
    pub fn queries(&self) -> impl Iterator<Item = &CompiledQuery> {
        self.levels.iter().flat_map(|l| l.queries.iter())
    }

    pub fn query(&self, id: &str) -> Option<&CompiledQuery> {
        self.queries().find(|q| q.id == id)
    }

    pub fn query_count(&self) -> usize {
        self.levels.iter().map(|l| l.queries.len()).sum()
    }

    /// The single query of the last level.
    pub fn top_query(&self) -> Option<&CompiledQuery> {
        self.levels.last().and_then(|l| l.queries.first())
    }

    /// Subquery references that point at no query of this plan.
    pub fn dangling_from_ids(&self) -> Vec<(String, String)> {
        let known: BTreeSet<&str> = self.queries().map(|q| q.id.as_str()).collect();
        self.queries()
            .flat_map(|q| {
                q.subquery_ids()
                    .into_iter()
                    .filter(|id| !known.contains(id))
                    .map(|id| (q.id.clone(), id.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FromObject {
        FromObject::Table {
            id: "src".into(),
            table: "sales".into(),
            schema: None,
            columns: vec!["region".into(), "amount".into()],
        }
    }

    #[test]
    fn test_source_of_prefers_root() {
        let joined = JoinedFrom {
            root_from_id: "src".into(),
            froms: vec![
                FromObject::Subquery {
                    id: "fork".into(),
                    query_id: "q_1".into(),
                    columns: vec!["region".into(), "total".into()],
                },
                table(),
            ],
        };
        assert_eq!(joined.source_of("region").map(FromObject::id), Some("src"));
        assert_eq!(joined.source_of("total").map(FromObject::id), Some("fork"));
        assert!(joined.source_of("missing").is_none());
    }

    #[test]
    fn test_dangling_subquery_is_reported() {
        let mut q = CompiledQuery::new("top", JoinedFrom::single(table()));
        q.joined_from.froms.push(FromObject::Subquery {
            id: "f".into(),
            query_id: "ghost".into(),
            columns: vec![],
        });
        let multi = CompiledMultiLevelQuery {
            levels: vec![CompiledLevel {
                level_type: LevelType::SourceDb,
                queries: vec![q],
            }],
        };
        assert_eq!(multi.dangling_from_ids(), vec![("top".to_string(), "ghost".to_string())]);
    }

    #[test]
    fn test_plan_serializes() {
        let mut q = CompiledQuery::new("q", JoinedFrom::single(table()));
        q.select.push(CompiledFormula::new("total", Expr::call("SUM", vec![Expr::field("amount")])).with_from_ids(["src"]));
        let json = serde_json::to_string(&q).unwrap();
        let back: CompiledQuery = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
    }
}
