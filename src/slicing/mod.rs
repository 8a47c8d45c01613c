//! Cutting formulas into per-level pieces.
//!
//! A [`SliceSchema`] lists the levels a formula spans, bottom to top. The
//! [`FormulaSlicer`] pushes every sub-expression as low as its level's
//! [`LevelBoundary`] allows and replaces it with an alias field in the level
//! above.

mod boundary;
mod name_gen;
mod slicer;

pub use boundary::{LevelBoundary, SliceSchema};
pub use name_gen::AliasGenerator;
pub use slicer::{FormulaSlicer, SlicedFormula, SlicedLevel};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SliceError {
    #[error("Slice schema must end with a top level, got [{0}]")]
    IncompleteSchema(String),

    #[error("Top boundary at position {position} is not the last level")]
    MisplacedTop { position: usize },
}

pub type SliceResult<T> = Result<T, SliceError>;
