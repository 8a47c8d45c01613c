//! Formula expression nodes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{LevelTag, NodeHierarchyIndex};

// =============================================================================
// Source spans
// =============================================================================

/// Byte range of a node in the formula text it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// =============================================================================
// Core Expression Type
// =============================================================================

/// Formula expression tree.
///
/// Operators are plain calls named by their symbol (`+`, `=`, `AND`, ...);
/// the registry decides how each call renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),

    /// Reference to a source column or to an alias computed by a lower level.
    Field(FieldRef),

    /// Scalar or aggregate function call.
    Call(FuncCall),

    /// Window function call.
    Window(WindowCall),

    Paren(Box<Expr>),

    /// Transparent wrapper carrying a level tag.
    Tagged(Tagged),

    /// Sub-scope computed in its own subquery and joined back.
    Fork(QueryFork),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    /// ISO date, `YYYY-MM-DD`
    Date(String),
    /// ISO datetime, `YYYY-MM-DD HH:MM:SS`
    Datetime(String),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lod: Option<LodSpec>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub before_filter_by: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expr>,
    #[serde(default)]
    pub grouping: WindowGrouping,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<WindowOrder>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub before_filter_by: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

/// Partitioning of a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum WindowGrouping {
    /// Whole result set.
    #[default]
    Total,
    /// Partition by the listed dimensions.
    Within(Vec<Expr>),
    /// Partition by every query dimension except the listed ones.
    Among(Vec<Expr>),
}

impl WindowGrouping {
    pub fn dimensions(&self) -> &[Expr] {
        match self {
            WindowGrouping::Total => &[],
            WindowGrouping::Within(dims) | WindowGrouping::Among(dims) => dims,
        }
    }

    fn dimensions_mut(&mut self) -> &mut [Expr] {
        match self {
            WindowGrouping::Total => &mut [],
            WindowGrouping::Within(dims) | WindowGrouping::Among(dims) => dims,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOrder {
    pub expr: Expr,
    #[serde(default)]
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged {
    pub tag: LevelTag,
    pub expr: Box<Expr>,
}

/// Level-of-detail scope of an aggregate or fork.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum LodSpec {
    Fixed(Vec<Expr>),
    Include(Vec<Expr>),
    Exclude(Vec<Expr>),
    #[default]
    Inherited,
}

impl LodSpec {
    pub fn dimensions(&self) -> &[Expr] {
        match self {
            LodSpec::Fixed(d) | LodSpec::Include(d) | LodSpec::Exclude(d) => d,
            LodSpec::Inherited => &[],
        }
    }

    fn dimensions_mut(&mut self) -> &mut [Expr] {
        match self {
            LodSpec::Fixed(d) | LodSpec::Include(d) | LodSpec::Exclude(d) => d,
            LodSpec::Inherited => &mut [],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkJoinType {
    #[default]
    Left,
    Inner,
}

/// How a fork's rows are matched to the rows of the enclosing query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinCondition {
    /// The same expression evaluated on both sides.
    SelfEquality(Expr),
    /// `expr` on the enclosing side equals `fork_expr` inside the fork.
    Binary { expr: Expr, fork_expr: Expr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFork {
    #[serde(default)]
    pub join_type: ForkJoinType,
    pub result_expr: Box<Expr>,
    #[serde(default)]
    pub joining: Vec<JoinCondition>,
    #[serde(default)]
    pub lod: LodSpec,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub before_filter_by: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<LevelTag>,
}

// =============================================================================
// Constructors
// =============================================================================

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        Expr::Literal(Literal::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn bool(value: bool) -> Self {
        Expr::Literal(Literal::Boolean(value))
    }

    pub fn null() -> Self {
        Expr::Literal(Literal::Null)
    }

    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(FieldRef { name: name.into() })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(FuncCall {
            name: name.into(),
            args,
            lod: None,
            before_filter_by: BTreeSet::new(),
            span: None,
        })
    }

    /// Binary operator call, e.g. `Expr::binary("-", a, b)`.
    pub fn binary(op: &str, left: Expr, right: Expr) -> Self {
        Expr::call(op, vec![left, right])
    }

    pub fn window(name: impl Into<String>, args: Vec<Expr>, grouping: WindowGrouping) -> Self {
        Expr::Window(WindowCall {
            name: name.into(),
            args,
            grouping,
            order_by: Vec::new(),
            before_filter_by: BTreeSet::new(),
            span: None,
        })
    }

    pub fn paren(inner: Expr) -> Self {
        Expr::Paren(Box::new(inner))
    }

    pub fn tagged(tag: LevelTag, inner: Expr) -> Self {
        Expr::Tagged(Tagged {
            tag,
            expr: Box::new(inner),
        })
    }

    /// Set window ordering; no-op on other nodes.
    pub fn with_order_by(mut self, order: Vec<WindowOrder>) -> Self {
        if let Expr::Window(w) = &mut self {
            w.order_by = order;
        }
        self
    }

    /// Set before-filter-by names on a call, window or fork.
    pub fn with_bfb<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        match &mut self {
            Expr::Call(c) => c.before_filter_by = names,
            Expr::Window(w) => w.before_filter_by = names,
            Expr::Fork(f) => f.before_filter_by = names,
            _ => {}
        }
        self
    }

    /// Set a level of detail on a call; no-op on other nodes.
    pub fn with_lod(mut self, lod: LodSpec) -> Self {
        if let Expr::Call(c) = &mut self {
            c.lod = Some(lod);
        }
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        match &mut self {
            Expr::Call(c) => c.span = Some(span),
            Expr::Window(w) => w.span = Some(span),
            _ => {}
        }
        self
    }
}

impl WindowOrder {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, desc: false }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, desc: true }
    }
}

// =============================================================================
// Structure
// =============================================================================

impl Expr {
    /// Direct children in index order.
    ///
    /// Windows list arguments, grouping dimensions, then ordering expressions.
    /// Forks list the result, the joining expressions, then LOD dimensions.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Field(_) => Vec::new(),
            Expr::Call(c) => {
                let mut out: Vec<&Expr> = c.args.iter().collect();
                if let Some(lod) = &c.lod {
                    out.extend(lod.dimensions());
                }
                out
            }
            Expr::Window(w) => w
                .args
                .iter()
                .chain(w.grouping.dimensions())
                .chain(w.order_by.iter().map(|o| &o.expr))
                .collect(),
            Expr::Paren(inner) => vec![inner.as_ref()],
            Expr::Tagged(t) => vec![t.expr.as_ref()],
            Expr::Fork(f) => {
                let mut out: Vec<&Expr> = vec![f.result_expr.as_ref()];
                for cond in &f.joining {
                    match cond {
                        JoinCondition::SelfEquality(e) => out.push(e),
                        JoinCondition::Binary { expr, fork_expr } => {
                            out.push(expr);
                            out.push(fork_expr);
                        }
                    }
                }
                out.extend(f.lod.dimensions());
                out
            }
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Literal(_) | Expr::Field(_) => Vec::new(),
            Expr::Call(c) => {
                let mut out: Vec<&mut Expr> = c.args.iter_mut().collect();
                if let Some(lod) = &mut c.lod {
                    out.extend(lod.dimensions_mut());
                }
                out
            }
            Expr::Window(w) => w
                .args
                .iter_mut()
                .chain(w.grouping.dimensions_mut())
                .chain(w.order_by.iter_mut().map(|o| &mut o.expr))
                .collect(),
            Expr::Paren(inner) => vec![inner.as_mut()],
            Expr::Tagged(t) => vec![t.expr.as_mut()],
            Expr::Fork(f) => {
                let mut out: Vec<&mut Expr> = vec![f.result_expr.as_mut()];
                for cond in &mut f.joining {
                    match cond {
                        JoinCondition::SelfEquality(e) => out.push(e),
                        JoinCondition::Binary { expr, fork_expr } => {
                            out.push(expr);
                            out.push(fork_expr);
                        }
                    }
                }
                out.extend(f.lod.dimensions_mut());
                out
            }
        }
    }

    /// Child positions that may be computed separately from this node.
    ///
    /// Wrappers are transparent: a tag or parenthesis around a window reports
    /// the window's children, prefixed with the wrapper's own position.
    pub fn autonomous_children(&self) -> Vec<NodeHierarchyIndex> {
        let root = NodeHierarchyIndex::root();
        match self {
            Expr::Call(_) | Expr::Window(_) => {
                (0..self.children().len()).map(|i| root.child(i)).collect()
            }
            Expr::Fork(_) => vec![root.child(0)],
            Expr::Paren(inner) => prefixed(0, inner.autonomous_children()),
            Expr::Tagged(t) => prefixed(0, t.expr.autonomous_children()),
            Expr::Literal(_) | Expr::Field(_) => Vec::new(),
        }
    }

    pub fn get(&self, index: &NodeHierarchyIndex) -> Option<&Expr> {
        index
            .positions()
            .iter()
            .try_fold(self, |node, &pos| node.children().into_iter().nth(pos))
    }

    pub fn get_mut(&mut self, index: &NodeHierarchyIndex) -> Option<&mut Expr> {
        let mut node = self;
        for &pos in index.positions() {
            node = node.children_mut().into_iter().nth(pos)?;
        }
        Some(node)
    }

    /// Replace the node at `index`, returning the old node.
    pub fn replace(&mut self, index: &NodeHierarchyIndex, with: Expr) -> Option<Expr> {
        let slot = self.get_mut(index)?;
        Some(std::mem::replace(slot, with))
    }

    /// Pre-order walk; return `false` from `visit` to skip a node's children.
    pub fn walk<F>(&self, visit: &mut F)
    where
        F: FnMut(&NodeHierarchyIndex, &Expr) -> bool,
    {
        self.walk_at(&NodeHierarchyIndex::root(), visit);
    }

    fn walk_at<F>(&self, index: &NodeHierarchyIndex, visit: &mut F)
    where
        F: FnMut(&NodeHierarchyIndex, &Expr) -> bool,
    {
        if !visit(index, self) {
            return;
        }
        for (i, child) in self.children().into_iter().enumerate() {
            child.walk_at(&index.child(i), visit);
        }
    }

    /// Strip parentheses and tag wrappers.
    pub fn unwrap_transparent(&self) -> &Expr {
        match self {
            Expr::Paren(inner) => inner.unwrap_transparent(),
            Expr::Tagged(t) => t.expr.unwrap_transparent(),
            other => other,
        }
    }

    pub fn as_field(&self) -> Option<&str> {
        match self {
            Expr::Field(f) => Some(&f.name),
            _ => None,
        }
    }

    pub fn node_kind(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "literal",
            Expr::Field(_) => "field",
            Expr::Call(_) => "call",
            Expr::Window(_) => "window",
            Expr::Paren(_) => "paren",
            Expr::Tagged(_) => "tagged",
            Expr::Fork(_) => "fork",
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Expr::Call(c) => c.span,
            Expr::Window(w) => w.span,
            _ => None,
        }
    }
}

fn prefixed(position: usize, indices: Vec<NodeHierarchyIndex>) -> Vec<NodeHierarchyIndex> {
    indices
        .into_iter()
        .map(|idx| {
            let mut path = vec![position];
            path.extend_from_slice(idx.positions());
            NodeHierarchyIndex::from(path)
        })
        .collect()
}

// =============================================================================
// Display
// =============================================================================

const INFIX: &[&str] = &[
    "+", "-", "*", "/", "%", "=", "!=", "<", ">", "<=", ">=", "AND", "OR",
];

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Literal::Date(d) => write!(f, "#{}#", d),
            Literal::Datetime(d) => write!(f, "##{}##", d),
            Literal::Null => f.write_str("NULL"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_bfb(f: &mut fmt::Formatter<'_>, names: &BTreeSet<String>) -> fmt::Result {
    if names.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = names.iter().map(|n| format!("[{}]", n)).collect();
    write!(f, " BEFORE FILTER BY {}", names.join(", "))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Field(field) => write!(f, "[{}]", field.name),
            Expr::Call(c) if c.args.len() == 2 && INFIX.contains(&c.name.as_str()) => {
                write!(f, "{} {} {}", c.args[0], c.name, c.args[1])
            }
            Expr::Call(c) if c.name == "NOT" && c.args.len() == 1 => write!(f, "NOT {}", c.args[0]),
            Expr::Call(c) => {
                write!(f, "{}(", c.name)?;
                write_list(f, &c.args)?;
                match &c.lod {
                    Some(LodSpec::Fixed(d)) => {
                        f.write_str(" FIXED ")?;
                        write_list(f, d)?;
                    }
                    Some(LodSpec::Include(d)) => {
                        f.write_str(" INCLUDE ")?;
                        write_list(f, d)?;
                    }
                    Some(LodSpec::Exclude(d)) => {
                        f.write_str(" EXCLUDE ")?;
                        write_list(f, d)?;
                    }
                    Some(LodSpec::Inherited) | None => {}
                }
                write_bfb(f, &c.before_filter_by)?;
                f.write_str(")")
            }
            Expr::Window(w) => {
                write!(f, "{}(", w.name)?;
                write_list(f, &w.args)?;
                match &w.grouping {
                    WindowGrouping::Total => f.write_str(" TOTAL")?,
                    WindowGrouping::Within(d) => {
                        f.write_str(" WITHIN ")?;
                        write_list(f, d)?;
                    }
                    WindowGrouping::Among(d) => {
                        f.write_str(" AMONG ")?;
                        write_list(f, d)?;
                    }
                }
                if !w.order_by.is_empty() {
                    f.write_str(" ORDER BY ")?;
                    for (i, o) in w.order_by.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", o.expr)?;
                        if o.desc {
                            f.write_str(" DESC")?;
                        }
                    }
                }
                write_bfb(f, &w.before_filter_by)?;
                f.write_str(")")
            }
            Expr::Paren(inner) => write!(f, "({})", inner),
            Expr::Tagged(t) => write!(f, "{}", t.expr),
            Expr::Fork(fork) => {
                write!(f, "FORK({}", fork.result_expr)?;
                if !fork.joining.is_empty() {
                    f.write_str(" ON ")?;
                    for (i, cond) in fork.joining.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        match cond {
                            JoinCondition::SelfEquality(e) => write!(f, "{}", e)?,
                            JoinCondition::Binary { expr, fork_expr } => {
                                write!(f, "{} = {}", expr, fork_expr)?
                            }
                        }
                    }
                }
                write_bfb(f, &fork.before_filter_by)?;
                f.write_str(")")
            }
        }
    }
}
