//! Splitting compiled level queries into joined subqueries.
//!
//! Slicing gives one query per execution level. Some of those queries still
//! hold things a single SELECT cannot compute: forks that aggregate at their
//! own level of detail, or windows over aggregates when window splitting is
//! enabled. A [`MultiQuerySplitter`] describes the pieces to cut out as
//! [`QuerySplitMask`]s; the provided [`MultiQuerySplitter::split_query`] turns
//! masks into subqueries plus a cropped version of the original query that
//! joins them. [`MultiLevelAssembler`] repeats that until nothing splits and
//! recomputes levels from the resulting query graph.

mod assembler;
mod mask;
mod query_fork;
mod splitter;
mod win_func;

pub use assembler::MultiLevelAssembler;
pub use mask::{
    AddFormula, AliasedFormulaSplitMask, PrefixedIdGen, QueryPart, QuerySplitMask, SplitIds,
    SubqueryType,
};
pub use query_fork::QueryForkQuerySplitter;
pub use splitter::MultiQuerySplitter;
pub use win_func::WinFuncQuerySplitter;

use crate::formula::NodeHierarchyIndex;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    #[error("Query {query}: split produced {produced} with depth {after}, expected less than {before}")]
    NonDecreasingDepth {
        query: String,
        produced: String,
        before: usize,
        after: usize,
    },

    #[error("Query splitting did not finish within {limit} passes")]
    PassLimitExceeded { limit: usize },

    #[error("Query {query} reads from unknown query {from}")]
    DanglingFrom { query: String, from: String },

    #[error("Query {query} is part of a dependency cycle")]
    Cycle { query: String },

    #[error("Source query {query} reads from post-processed query {from}")]
    SourceReadsPostProcessed { query: String, from: String },

    #[error("{kind} level of detail is not supported in query forks")]
    UnsupportedLod { kind: &'static str },

    #[error("Level of detail dimensions are incompatible in query {query}")]
    IncompatibleLodDimensions { query: String },

    #[error("Query {query}: {part} formula {alias} was left out of every split subquery")]
    UnsplitFormula {
        query: String,
        part: QueryPart,
        alias: String,
    },

    #[error("Query {query}: no node at {index} in {part} formula {formula}")]
    InvalidNodeIndex {
        query: String,
        part: QueryPart,
        formula: usize,
        index: NodeHierarchyIndex,
    },
}

pub type AssemblyResult<T> = Result<T, AssemblyError>;
