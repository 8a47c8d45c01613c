//! Formula data types.
//!
//! Every value a formula can produce has a [`TypeKind`] and a constness flag; the
//! pair is a [`DataType`]. Widening between kinds follows a declared autocast
//! graph which argument matching and common-cast resolution both consult:
//!
//! ```text
//! NULL ──► every kind
//! INTEGER ──► FLOAT
//! DATE ──► DATETIME ──► GENERICDATETIME
//! DATETIMETZ ──────────► GENERICDATETIME
//! ```
//!
//! A constant type is accepted wherever its non-constant twin is, never the
//! other way round.

pub mod args;
pub mod strategy;

pub use args::{ArgType, ArgTypeMatcher, Arity};
pub use strategy::TypeStrategy;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::formula::{NodeHierarchyIndex, Span};

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while computing or checking types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("No common type for [{}]", join_types(.types))]
    NoCommonCast { types: Vec<DataType> },

    #[error("{function}: expected {expected} arguments, got {got}")]
    InvalidArity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("{function}: argument {position} must be {expected}, got {got}")]
    InvalidArgument {
        function: String,
        position: usize,
        expected: String,
        got: DataType,
    },

    #[error("Return type reads argument {position}, but only {count} were given")]
    ArgumentOutOfRange { position: usize, count: usize },

    #[error("Return type has no arguments to derive from")]
    NoArgumentsForReturnType,

    #[error("Unknown function '{name}'{}", if *.is_window { " (window)" } else { "" })]
    UnknownFunction { name: String, is_window: bool },

    #[error("Unknown field '{0}'")]
    UnknownField(String),

    #[error("No signature of {function} accepts ({})", join_types(.args))]
    NoMatchingOverload {
        function: String,
        args: Vec<DataType>,
    },

    #[error("{function}({}) matches {candidates} signatures equally well", join_types(.args))]
    AmbiguousOverload {
        function: String,
        args: Vec<DataType>,
        candidates: usize,
    },

    #[error("{source} (at node {index}{})", .span.map(|s| format!(", {}", s)).unwrap_or_default())]
    At {
        index: NodeHierarchyIndex,
        span: Option<Span>,
        source: Box<TypeError>,
    },
}

impl TypeError {
    /// Attach a node location unless the error already carries one.
    pub fn at(self, index: &NodeHierarchyIndex, span: Option<Span>) -> TypeError {
        match self {
            located @ TypeError::At { .. } => located,
            other => TypeError::At {
                index: index.clone(),
                span,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, without location wrappers.
    pub fn root(&self) -> &TypeError {
        match self {
            TypeError::At { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type TypeResult<T> = Result<T, TypeError>;

fn join_types(types: &[DataType]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Type kinds
// ============================================================================

/// The closed set of value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    Boolean,
    Integer,
    Float,
    String,
    Date,
    Datetime,
    #[serde(rename = "DATETIMETZ")]
    DatetimeTz,
    #[serde(rename = "GENERICDATETIME")]
    GenericDatetime,
    Geopoint,
    Geopolygon,
    Uuid,
    Markup,
    Unsupported,
    ArrayInt,
    ArrayFloat,
    ArrayStr,
    TreeStr,
    Null,
}

impl TypeKind {
    pub const ALL: [TypeKind; 18] = [
        TypeKind::Boolean,
        TypeKind::Integer,
        TypeKind::Float,
        TypeKind::String,
        TypeKind::Date,
        TypeKind::Datetime,
        TypeKind::DatetimeTz,
        TypeKind::GenericDatetime,
        TypeKind::Geopoint,
        TypeKind::Geopolygon,
        TypeKind::Uuid,
        TypeKind::Markup,
        TypeKind::Unsupported,
        TypeKind::ArrayInt,
        TypeKind::ArrayFloat,
        TypeKind::ArrayStr,
        TypeKind::TreeStr,
        TypeKind::Null,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Boolean => "BOOLEAN",
            TypeKind::Integer => "INTEGER",
            TypeKind::Float => "FLOAT",
            TypeKind::String => "STRING",
            TypeKind::Date => "DATE",
            TypeKind::Datetime => "DATETIME",
            TypeKind::DatetimeTz => "DATETIMETZ",
            TypeKind::GenericDatetime => "GENERICDATETIME",
            TypeKind::Geopoint => "GEOPOINT",
            TypeKind::Geopolygon => "GEOPOLYGON",
            TypeKind::Uuid => "UUID",
            TypeKind::Markup => "MARKUP",
            TypeKind::Unsupported => "UNSUPPORTED",
            TypeKind::ArrayInt => "ARRAY_INT",
            TypeKind::ArrayFloat => "ARRAY_FLOAT",
            TypeKind::ArrayStr => "ARRAY_STR",
            TypeKind::TreeStr => "TREE_STR",
            TypeKind::Null => "NULL",
        }
    }

    /// Kinds this kind widens to in one step.
    fn widens_to(self) -> &'static [TypeKind] {
        match self {
            TypeKind::Integer => &[TypeKind::Float],
            TypeKind::Date => &[TypeKind::Datetime],
            TypeKind::Datetime => &[TypeKind::GenericDatetime],
            TypeKind::DatetimeTz => &[TypeKind::GenericDatetime],
            _ => &[],
        }
    }

    /// Number of widening steps from `self` to `target`, `None` when there is no path.
    pub fn cast_distance(self, target: TypeKind) -> Option<u32> {
        if self == target {
            return Some(0);
        }
        if self == TypeKind::Null {
            return Some(1);
        }
        let mut frontier = vec![self];
        let mut steps = 0;
        while !frontier.is_empty() {
            steps += 1;
            let mut next = Vec::new();
            for kind in frontier {
                for &wider in kind.widens_to() {
                    if wider == target {
                        return Some(steps);
                    }
                    next.push(wider);
                }
            }
            frontier = next;
        }
        None
    }

    pub fn is_datetime(self) -> bool {
        matches!(
            self,
            TypeKind::Date | TypeKind::Datetime | TypeKind::DatetimeTz | TypeKind::GenericDatetime
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, TypeKind::Integer | TypeKind::Float)
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Data types
// ============================================================================

/// A value kind plus constness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataType {
    pub kind: TypeKind,
    #[serde(default)]
    pub is_const: bool,
}

macro_rules! data_type_consts {
    ($($plain:ident, $konst:ident => $kind:ident;)*) => {
        impl DataType {
            $(
                pub const $plain: DataType = DataType { kind: TypeKind::$kind, is_const: false };
                pub const $konst: DataType = DataType { kind: TypeKind::$kind, is_const: true };
            )*
        }
    };
}

data_type_consts! {
    BOOLEAN, CONST_BOOLEAN => Boolean;
    INTEGER, CONST_INTEGER => Integer;
    FLOAT, CONST_FLOAT => Float;
    STRING, CONST_STRING => String;
    DATE, CONST_DATE => Date;
    DATETIME, CONST_DATETIME => Datetime;
    DATETIMETZ, CONST_DATETIMETZ => DatetimeTz;
    GENERICDATETIME, CONST_GENERICDATETIME => GenericDatetime;
    GEOPOINT, CONST_GEOPOINT => Geopoint;
    GEOPOLYGON, CONST_GEOPOLYGON => Geopolygon;
    UUID, CONST_UUID => Uuid;
    MARKUP, CONST_MARKUP => Markup;
    UNSUPPORTED, CONST_UNSUPPORTED => Unsupported;
    ARRAY_INT, CONST_ARRAY_INT => ArrayInt;
    ARRAY_FLOAT, CONST_ARRAY_FLOAT => ArrayFloat;
    ARRAY_STR, CONST_ARRAY_STR => ArrayStr;
    TREE_STR, CONST_TREE_STR => TreeStr;
    NULL, CONST_NULL => Null;
}

impl DataType {
    pub const fn new(kind: TypeKind, is_const: bool) -> Self {
        Self { kind, is_const }
    }

    pub const fn non_const(self) -> Self {
        Self {
            kind: self.kind,
            is_const: false,
        }
    }

    pub const fn as_const(self) -> Self {
        Self {
            kind: self.kind,
            is_const: true,
        }
    }

    /// Every data type, const and non-const.
    pub fn all() -> impl Iterator<Item = DataType> {
        TypeKind::ALL
            .into_iter()
            .flat_map(|k| [DataType::new(k, false), DataType::new(k, true)])
    }

    /// Cost of using a value of type `self` where `target` is required.
    ///
    /// Counts kind widening steps; `None` when the value is not accepted.
    pub fn cast_cost(self, target: DataType) -> Option<u32> {
        if target.is_const && !self.is_const {
            return None;
        }
        self.kind.cast_distance(target.kind)
    }

    /// Whether a value of `self` may be used where `target` is required.
    pub fn casts_to(self, target: DataType) -> bool {
        self.cast_cost(target).is_some()
    }

    /// Every type accepted where `self` is required.
    pub fn autocast_types(self) -> BTreeSet<DataType> {
        DataType::all().filter(|t| t.casts_to(self)).collect()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            write!(f, "CONST_{}", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Per-instance type parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataTypeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl DataTypeParams {
    pub fn is_empty(&self) -> bool {
        self.timezone.is_none() && self.precision.is_none()
    }
}

// ============================================================================
// Common cast
// ============================================================================

/// Least common supertype of `types`.
///
/// Constness of the result is const only when every input is const. NULL joins
/// anything; an empty input yields NULL.
pub fn get_common_cast_type(types: &[DataType]) -> TypeResult<DataType> {
    let Some((first, rest)) = types.split_first() else {
        return Ok(DataType::CONST_NULL);
    };
    rest.iter().try_fold(*first, |acc, t| {
        common_pair(acc, *t).ok_or_else(|| TypeError::NoCommonCast {
            types: types.to_vec(),
        })
    })
}

fn common_pair(a: DataType, b: DataType) -> Option<DataType> {
    let is_const = a.is_const && b.is_const;
    let kind = common_kind(a.kind, b.kind)?;
    Some(DataType::new(kind, is_const))
}

fn common_kind(a: TypeKind, b: TypeKind) -> Option<TypeKind> {
    // Smallest kind both reach; the widening graph is a forest so it is unique.
    TypeKind::ALL
        .into_iter()
        .filter_map(|k| {
            let da = a.cast_distance(k)?;
            let db = b.cast_distance(k)?;
            Some((da.max(db), da + db, k))
        })
        .filter(|(_, _, k)| *k != TypeKind::Null || (a == TypeKind::Null && b == TypeKind::Null))
        .min()
        .map(|(_, _, k)| k)
}
