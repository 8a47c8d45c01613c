use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::formula::{Expr, ForkJoinType, JoinCondition, NodeHierarchyIndex};
use crate::query::{CompiledFormula, CompiledQuery};

/// Clause of a compiled query a formula belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPart {
    Select,
    GroupBy,
    OrderBy,
    Filters,
}

impl QueryPart {
    /// Parts whose formulas may be cut into subqueries. Group-by formulas are
    /// never cut: they become dimensions of every subquery instead.
    pub const SPLITTABLE: [QueryPart; 3] = [QueryPart::Select, QueryPart::OrderBy, QueryPart::Filters];

    pub fn formulas(self, query: &CompiledQuery) -> &[CompiledFormula] {
        match self {
            QueryPart::Select => &query.select,
            QueryPart::GroupBy => &query.group_by,
            QueryPart::OrderBy => &query.order_by,
            QueryPart::Filters => &query.filters,
        }
    }
}

impl fmt::Display for QueryPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryPart::Select => "select",
            QueryPart::GroupBy => "group_by",
            QueryPart::OrderBy => "order_by",
            QueryPart::Filters => "filters",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubqueryType {
    WindowFunc,
    Default,
    /// Base subquery created for whatever the other masks left behind.
    GeneratedBase,
}

/// One node cut out of a formula.
///
/// `outer_node_idx` is replaced by a field named `alias` in the cropped
/// query; `inner_node_idx` (the same node or one of its descendants) is what
/// the subquery selects under that alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasedFormulaSplitMask {
    pub query_part: QueryPart,
    pub formula_list_idx: usize,
    pub outer_node_idx: NodeHierarchyIndex,
    pub inner_node_idx: NodeHierarchyIndex,
    pub alias: String,
}

impl AliasedFormulaSplitMask {
    pub fn new(
        query_part: QueryPart,
        formula_list_idx: usize,
        node_idx: NodeHierarchyIndex,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            query_part,
            formula_list_idx,
            outer_node_idx: node_idx.clone(),
            inner_node_idx: node_idx,
            alias: alias.into(),
        }
    }

    pub fn with_inner(mut self, inner_node_idx: NodeHierarchyIndex) -> Self {
        debug_assert!(inner_node_idx.starts_with(&self.outer_node_idx));
        self.inner_node_idx = inner_node_idx;
        self
    }
}

/// Extra formula selected by a subquery: a dimension, or a measure needed
/// by a join condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddFormula {
    pub alias: String,
    pub expr: Expr,
    pub from_ids: BTreeSet<String>,
    pub is_group_by: bool,
}

/// Description of one subquery to split off a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySplitMask {
    pub subquery_type: SubqueryType,
    pub subquery_id: String,
    pub formula_split_masks: Vec<AliasedFormulaSplitMask>,
    pub add_formulas: Vec<AddFormula>,
    /// Filters of the original query applied inside the subquery.
    pub filter_indices: BTreeSet<usize>,
    pub join_type: Option<ForkJoinType>,
    /// Join conditions, written in terms of this subquery's aliases.
    pub joining: Vec<JoinCondition>,
    pub is_base: bool,
}

impl QuerySplitMask {
    pub fn new(subquery_type: SubqueryType, subquery_id: impl Into<String>) -> Self {
        Self {
            subquery_type,
            subquery_id: subquery_id.into(),
            formula_split_masks: Vec::new(),
            add_formulas: Vec::new(),
            filter_indices: BTreeSet::new(),
            join_type: None,
            joining: Vec::new(),
            is_base: false,
        }
    }

    pub fn group_by_count(&self) -> usize {
        self.add_formulas.iter().filter(|f| f.is_group_by).count()
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &Expr> {
        self.add_formulas.iter().filter(|f| f.is_group_by).map(|f| &f.expr)
    }

    /// Whether every join condition matches a column to its counterpart.
    pub fn has_direct_equality_join(&self) -> bool {
        self.joining
            .iter()
            .all(|c| matches!(c, JoinCondition::SelfEquality(_)))
    }

    /// Aliases of everything the subquery selects, first occurrence order.
    pub fn column_aliases(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.formula_split_masks
            .iter()
            .map(|m| &m.alias)
            .chain(self.add_formulas.iter().map(|f| &f.alias))
            .filter(|alias| seen.insert(alias.as_str()))
            .cloned()
            .collect()
    }
}

/// Sequential ids with a fixed prefix.
#[derive(Debug, Clone)]
pub struct PrefixedIdGen {
    prefix: String,
    next: usize,
}

impl PrefixedIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}

/// Id generators shared by all splitters of one assembly run.
#[derive(Debug, Clone)]
pub struct SplitIds {
    pub exprs: PrefixedIdGen,
    pub queries: PrefixedIdGen,
}

impl SplitIds {
    /// Expression aliases `e_{iteration}_{n}`, query ids `{top}_s{iteration}_{n}`.
    pub fn new(top_query_id: &str, iteration_id: u32) -> Self {
        Self {
            exprs: PrefixedIdGen::new(format!("e_{iteration_id}_")),
            queries: PrefixedIdGen::new(format!("{top_query_id}_s{iteration_id}_")),
        }
    }
}
