//! Level tags.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Execution level marker stamped on windows and forks by the tagging pass.
///
/// Tags are partially ordered. A tag whose BFB name set strictly contains
/// another's is greater; with equal names the nesting pair decides. Greater
/// tags execute first, so sorting descending gives bottom-up order and the
/// outermost node of a nest carries the most negative nesting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelTag {
    pub bfb_names: BTreeSet<String>,
    pub func_nesting: i32,
    pub qfork_nesting: i32,
}

impl LevelTag {
    pub fn new<I, S>(bfb_names: I, func_nesting: i32, qfork_nesting: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bfb_names: bfb_names.into_iter().map(Into::into).collect(),
            func_nesting,
            qfork_nesting,
        }
    }

    /// True when `self` must be computed no later than `other`.
    pub fn executes_no_later_than(&self, other: &LevelTag) -> bool {
        matches!(
            self.partial_cmp(other),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        )
    }
}

impl PartialOrd for LevelTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.bfb_names == other.bfb_names {
            return Some(
                (self.func_nesting, self.qfork_nesting)
                    .cmp(&(other.func_nesting, other.qfork_nesting)),
            );
        }
        if self.bfb_names.is_subset(&other.bfb_names) {
            Some(Ordering::Less)
        } else if self.bfb_names.is_superset(&other.bfb_names) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl fmt::Display for LevelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.bfb_names.iter().map(String::as_str).collect();
        write!(
            f,
            "({{{}}}, {}, {})",
            names.join(","),
            self.func_nesting,
            self.qfork_nesting
        )
    }
}

/// Sort distinct tags into bottom-up execution order.
///
/// Returns the first incomparable pair when the tags do not form a chain.
pub fn order_tags(tags: &[LevelTag]) -> Result<Vec<LevelTag>, (LevelTag, LevelTag)> {
    let mut distinct: Vec<LevelTag> = Vec::new();
    for tag in tags {
        if !distinct.contains(tag) {
            distinct.push(tag.clone());
        }
    }
    for (i, a) in distinct.iter().enumerate() {
        for b in &distinct[i + 1..] {
            if a.partial_cmp(b).is_none() {
                return Err((a.clone(), b.clone()));
            }
        }
    }
    distinct.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    Ok(distinct)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(names: &[&str], func: i32) -> LevelTag {
        LevelTag::new(names.iter().copied(), func, 0)
    }

    #[test]
    fn test_chain_order() {
        let abcd = tag(&["A", "B", "C", "D"], 0);
        let ab = tag(&["A", "B"], 0);
        let a1 = tag(&["A"], 1);
        let a0 = tag(&["A"], 0);
        assert!(abcd > ab);
        assert!(ab > a1);
        assert!(a1 > a0);

        let ordered = order_tags(&[a0.clone(), abcd.clone(), a1.clone(), ab.clone(), a0.clone()]).unwrap();
        assert_eq!(ordered, vec![abcd, ab, a1, a0]);
    }

    #[test]
    fn test_incomparable() {
        let a = tag(&["A"], 0);
        let b = tag(&["B"], 0);
        assert_eq!(a.partial_cmp(&b), None);
        assert!(order_tags(&[tag(&["A", "B"], 0), a, b]).is_err());
    }

    #[test]
    fn test_qfork_breaks_ties() {
        let outer = LevelTag::new(Vec::<String>::new(), 0, -1);
        let inner = LevelTag::new(Vec::<String>::new(), 0, 0);
        assert!(inner.executes_no_later_than(&outer));
        assert!(!outer.executes_no_later_than(&inner));
        assert_eq!(outer.to_string(), "({}, 0, -1)");
    }
}
