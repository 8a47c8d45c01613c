use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

use super::{SliceError, SliceResult};
use crate::formula::inspect::{any_outer, contains_tags, own_tag};
use crate::formula::{Expr, LevelTag};

/// Upper limit of what one level may compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LevelBoundary {
    /// The final level; takes whatever is left.
    Top,
    /// Anything without a window function, e.g. work pushed to the source
    /// database ahead of a post-processing engine.
    WindowFunction,
    /// Plain field references only.
    NonField,
    /// Untagged subtrees, or subtrees tagged no later than the given tag.
    LevelTagged(LevelTag),
}

impl LevelBoundary {
    /// Whether `expr` may be computed at this level (or below).
    pub fn accepts(&self, expr: &Expr) -> bool {
        match self {
            LevelBoundary::Top => true,
            LevelBoundary::WindowFunction => !any_outer(expr, |e| matches!(e, Expr::Window(_))),
            LevelBoundary::NonField => matches!(expr.unwrap_transparent(), Expr::Field(_)),
            LevelBoundary::LevelTagged(tag) => match own_tag(expr) {
                Some(own) => own.executes_no_later_than(tag),
                None => !contains_tags(expr),
            },
        }
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LevelBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelBoundary::Top => write!(f, "top"),
            LevelBoundary::WindowFunction => write!(f, "window_function"),
            LevelBoundary::NonField => write!(f, "non_field"),
            LevelBoundary::LevelTagged(tag) => write!(f, "tagged{}", tag),
        }
    }
}

/// Levels of one formula, bottom to top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceSchema {
    levels: Vec<LevelBoundary>,
}

impl SliceSchema {
    pub fn new(levels: Vec<LevelBoundary>) -> SliceResult<Self> {
        if let Some(position) = levels
            .iter()
            .position(|b| *b == LevelBoundary::Top)
            .filter(|&p| p + 1 != levels.len())
        {
            error!(position, "top boundary is not the last level");
            return Err(SliceError::MisplacedTop { position });
        }
        if levels.last() != Some(&LevelBoundary::Top) {
            let names: Vec<String> = levels.iter().map(LevelBoundary::name).collect();
            error!(levels = %names.join(", "), "slice schema has no top level");
            return Err(SliceError::IncompleteSchema(names.join(", ")));
        }
        Ok(Self { levels })
    }

    /// Single level computing everything.
    pub fn top_only() -> Self {
        Self {
            levels: vec![LevelBoundary::Top],
        }
    }

    /// `LevelTagged` boundaries for `tags` (bottom-up order) capped by `Top`.
    pub fn from_tags(tags: &[LevelTag]) -> Self {
        let mut levels: Vec<LevelBoundary> =
            tags.iter().cloned().map(LevelBoundary::LevelTagged).collect();
        levels.push(LevelBoundary::Top);
        Self { levels }
    }

    /// Same schema with `boundary` inserted as the new lowest level.
    pub fn with_bottom(mut self, boundary: LevelBoundary) -> Self {
        self.levels.insert(0, boundary);
        self
    }

    pub fn levels(&self) -> &[LevelBoundary] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn top_index(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }
}
