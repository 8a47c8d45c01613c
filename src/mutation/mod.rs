//! Tree rewrites applied before planning.
//!
//! The compile pipeline runs them in this order: AMONG groupings are resolved
//! against the query dimensions, LOD aggregates become query forks, BFB names
//! are normalized against the filters present in the query, and finally every
//! window and fork receives its [`LevelTag`](crate::formula::LevelTag).

mod bfb;
mod lod;
mod tagging;

pub use bfb::normalize_before_filter_by;
pub use lod::{lods_to_forks, resolve_among};
pub use tagging::LevelTagMutator;

use crate::formula::NodeHierarchyIndex;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaggingError {
    #[error("Node at {index} is tagged twice")]
    DoubleTagged { index: NodeHierarchyIndex },

    #[error("{kind} level of detail is not supported ({function})")]
    UnsupportedLod {
        kind: &'static str,
        function: String,
    },

    #[error("Level of detail on non-aggregate function {function}")]
    LodOnNonAggregate { function: String },
}

pub type TaggingResult<T> = Result<T, TaggingError>;
