//! Argument matchers for function signatures.

use std::collections::BTreeSet;
use std::fmt;

use super::{DataType, TypeKind};

/// Number of arguments a signature takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic { min: usize },
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Fixed(n) => count == n,
            Arity::Variadic { min } => count >= min,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Variadic { min } => write!(f, "at least {}", min),
        }
    }
}

/// One argument slot: the declared types it takes.
///
/// A value matches the slot when it autocasts to any declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgType {
    declared: BTreeSet<DataType>,
}

impl ArgType {
    pub fn of(types: &[DataType]) -> Self {
        Self {
            declared: types.iter().copied().collect(),
        }
    }

    pub fn one(t: DataType) -> Self {
        Self::of(&[t])
    }

    /// Any non-constant kind (and therefore any value at all).
    pub fn any() -> Self {
        Self {
            declared: TypeKind::ALL
                .into_iter()
                .map(|k| DataType::new(k, false))
                .collect(),
        }
    }

    pub fn declared(&self) -> impl Iterator<Item = &DataType> {
        self.declared.iter()
    }

    /// Cheapest widening that takes `actual` into this slot.
    pub fn cost(&self, actual: DataType) -> Option<u32> {
        self.declared
            .iter()
            .filter_map(|slot| actual.cast_cost(*slot))
            .min()
    }

    fn kinds(&self) -> BTreeSet<TypeKind> {
        self.declared.iter().map(|t| t.kind).collect()
    }

    /// Two slots overlap exactly when they declare a common type.
    pub fn overlaps(&self, other: &ArgType) -> bool {
        !self.declared.is_disjoint(&other.declared)
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.declared.len() == TypeKind::ALL.len() && self.declared.iter().all(|t| !t.is_const) {
            return f.write_str("ANY");
        }
        let names: Vec<String> = self.declared.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", names.join("|"))
    }
}

/// Matches an argument list against a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgTypeMatcher {
    /// Exactly one slot per argument.
    Fixed(Vec<ArgType>),
    /// Leading fixed slots, then any number of homogeneous trailing slots.
    Variadic {
        head: Vec<ArgType>,
        tail: ArgType,
        min: usize,
    },
}

impl ArgTypeMatcher {
    pub fn fixed(slots: Vec<ArgType>) -> Self {
        ArgTypeMatcher::Fixed(slots)
    }

    /// Same slot type for every argument, at least `min` of them.
    pub fn variadic(tail: ArgType, min: usize) -> Self {
        ArgTypeMatcher::Variadic {
            head: Vec::new(),
            tail,
            min,
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            ArgTypeMatcher::Fixed(slots) => Arity::Fixed(slots.len()),
            ArgTypeMatcher::Variadic { head, min, .. } => Arity::Variadic {
                min: (*min).max(head.len()),
            },
        }
    }

    pub fn slot(&self, position: usize) -> Option<&ArgType> {
        match self {
            ArgTypeMatcher::Fixed(slots) => slots.get(position),
            ArgTypeMatcher::Variadic { head, tail, .. } => head.get(position).or(Some(tail)),
        }
    }

    /// Total widening cost of `args`, or `None` when they do not match.
    pub fn match_cost(&self, args: &[DataType]) -> Option<u32> {
        if !self.arity().accepts(args.len()) {
            return None;
        }
        args.iter().enumerate().try_fold(0u32, |total, (i, arg)| {
            let slot = self.slot(i)?;
            Some(total + slot.cost(*arg)?)
        })
    }

    pub fn matches(&self, args: &[DataType]) -> bool {
        self.match_cost(args).is_some()
    }

    /// Whether some argument list matches both matchers without any widening.
    pub fn overlaps_exactly(&self, other: &ArgTypeMatcher) -> bool {
        let count = match (self.arity(), other.arity()) {
            (Arity::Fixed(a), Arity::Fixed(b)) if a != b => return false,
            (Arity::Fixed(a), _) if !other.arity().accepts(a) => return false,
            (_, Arity::Fixed(b)) if !self.arity().accepts(b) => return false,
            (Arity::Fixed(a), _) => a,
            (_, Arity::Fixed(b)) => b,
            (Arity::Variadic { min: a }, Arity::Variadic { min: b }) => {
                // One past the longest head covers the tails as well.
                a.max(b).max(self.head_len().max(other.head_len()) + 1)
            }
        };
        (0..count).all(|i| match (self.slot(i), other.slot(i)) {
            (Some(a), Some(b)) => a.overlaps(b),
            _ => false,
        })
    }

    /// Same slots up to constness.
    pub fn same_signature(&self, other: &ArgTypeMatcher) -> bool {
        fn same_kinds(a: &[ArgType], b: &[ArgType]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.kinds() == y.kinds())
        }
        match (self, other) {
            (ArgTypeMatcher::Fixed(a), ArgTypeMatcher::Fixed(b)) => same_kinds(a, b),
            (
                ArgTypeMatcher::Variadic { head: ha, tail: ta, min: ma },
                ArgTypeMatcher::Variadic { head: hb, tail: tb, min: mb },
            ) => ma == mb && same_kinds(ha, hb) && ta.kinds() == tb.kinds(),
            _ => false,
        }
    }

    fn head_len(&self) -> usize {
        match self {
            ArgTypeMatcher::Fixed(slots) => slots.len(),
            ArgTypeMatcher::Variadic { head, .. } => head.len(),
        }
    }
}

impl fmt::Display for ArgTypeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgTypeMatcher::Fixed(slots) => {
                let parts: Vec<String> = slots.iter().map(|s| s.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            ArgTypeMatcher::Variadic { head, tail, .. } => {
                let mut parts: Vec<String> = head.iter().map(|s| s.to_string()).collect();
                parts.push(format!("{}...", tail));
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}
