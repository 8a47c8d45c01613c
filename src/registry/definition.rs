//! Function definitions and translation variants.

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

use super::{DialectSet, Registry};
use crate::sql::dialect::Dialect;
use crate::sql::{self, WindowFrame};
use crate::translation::TranslationResult;
use crate::types::{ArgTypeMatcher, DataType, TypeStrategy};

// =============================================================================
// Scopes
// =============================================================================

/// Capability flags of a function, queried by tagging and slicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Scopes(u16);

impl Scopes {
    pub const NONE: Scopes = Scopes(0);
    pub const AGGREGATE: Scopes = Scopes(1);
    pub const WINDOW: Scopes = Scopes(1 << 1);
    pub const NON_WINDOW: Scopes = Scopes(1 << 2);
    pub const SUPPORTS_GROUPING: Scopes = Scopes(1 << 3);
    pub const SUPPORTS_ORDERING: Scopes = Scopes(1 << 4);
    pub const SUPPORTS_LOD: Scopes = Scopes(1 << 5);
    pub const SUPPORTS_BFB: Scopes = Scopes(1 << 6);
    pub const SUPPORTS_IGNORE_DIMENSIONS: Scopes = Scopes(1 << 7);

    const NAMES: [(Scopes, &'static str); 8] = [
        (Scopes::AGGREGATE, "AGGREGATE"),
        (Scopes::WINDOW, "WINDOW"),
        (Scopes::NON_WINDOW, "NON_WINDOW"),
        (Scopes::SUPPORTS_GROUPING, "SUPPORTS_GROUPING"),
        (Scopes::SUPPORTS_ORDERING, "SUPPORTS_ORDERING"),
        (Scopes::SUPPORTS_LOD, "SUPPORTS_LOD"),
        (Scopes::SUPPORTS_BFB, "SUPPORTS_BFB"),
        (Scopes::SUPPORTS_IGNORE_DIMENSIONS, "SUPPORTS_IGNORE_DIMENSIONS"),
    ];

    pub fn contains(self, other: Scopes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Scopes) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Scopes {
    type Output = Scopes;

    fn bitor(self, rhs: Scopes) -> Scopes {
        Scopes(self.0 | rhs.0)
    }
}

impl BitAnd for Scopes {
    type Output = Scopes;

    fn bitand(self, rhs: Scopes) -> Scopes {
        Scopes(self.0 & rhs.0)
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(" | "))
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Window clause pieces, already lowered to SQL.
#[derive(Debug, Clone, Default)]
pub struct WindowSpec {
    pub partition_by: Vec<sql::Expr>,
    pub order_by: Vec<sql::WindowOrderBy>,
}

/// Everything a renderer sees for one call site.
pub struct RenderContext<'a> {
    pub registry: &'a Registry,
    pub dialect: Dialect,
    pub args: Vec<sql::Expr>,
    pub arg_types: &'a [DataType],
    pub window: Option<WindowSpec>,
}

impl RenderContext<'_> {
    /// Wrap a function in `OVER (...)` using this call's window spec.
    pub fn over(&self, function: sql::Expr, frame: Option<WindowFrame>) -> sql::Expr {
        let spec = self.window.clone().unwrap_or_default();
        sql::Expr::Window {
            function: Box::new(function),
            partition_by: spec.partition_by,
            order_by: spec.order_by,
            frame,
        }
    }

    pub fn has_ordering(&self) -> bool {
        self.window.as_ref().is_some_and(|w| !w.order_by.is_empty())
    }
}

pub type RenderFn = Arc<dyn Fn(&RenderContext<'_>) -> TranslationResult<sql::Expr> + Send + Sync>;

/// A named render function. The name identifies the renderer when
/// re-registrations are compared.
#[derive(Clone)]
pub struct Renderer {
    pub name: String,
    func: RenderFn,
}

impl Renderer {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&RenderContext<'_>) -> TranslationResult<sql::Expr> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn render(&self, ctx: &RenderContext<'_>) -> TranslationResult<sql::Expr> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Renderer").field(&self.name).finish()
    }
}

impl PartialEq for Renderer {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

// =============================================================================
// Definitions
// =============================================================================

/// One dialect- and argument-specific rendering rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationVariant {
    pub dialects: DialectSet,
    pub args: ArgTypeMatcher,
    pub render: Renderer,
}

impl TranslationVariant {
    pub fn new(dialects: impl Into<DialectSet>, args: ArgTypeMatcher, render: Renderer) -> Self {
        Self {
            dialects: dialects.into(),
            args,
            render,
        }
    }

    /// Whether some `(dialect, argument types)` pair reaches both variants
    /// without any widening.
    pub fn collides_with(&self, other: &TranslationVariant) -> bool {
        self.dialects.overlaps(other.dialects) && self.args.overlaps_exactly(&other.args)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub id: String,
    pub name: String,
    pub is_window: bool,
    pub scopes: Scopes,
    pub return_type: TypeStrategy,
    pub variants: Vec<TranslationVariant>,
}

impl FunctionDefinition {
    /// Scalar definition with id derived from the name.
    pub fn new(name: &str) -> Self {
        let name = name.to_ascii_uppercase();
        Self {
            id: name.to_ascii_lowercase(),
            name,
            is_window: false,
            scopes: Scopes::NON_WINDOW,
            return_type: TypeStrategy::FromArgs(vec![]),
            variants: Vec::new(),
        }
    }

    pub fn window(name: &str) -> Self {
        let def = Self::new(name);
        Self {
            id: format!("win_{}", def.id),
            is_window: true,
            scopes: Scopes::WINDOW,
            ..def
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn scopes(mut self, scopes: Scopes) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn returns(mut self, strategy: TypeStrategy) -> Self {
        self.return_type = strategy;
        self
    }

    pub fn variant(
        mut self,
        dialects: impl Into<DialectSet>,
        args: ArgTypeMatcher,
        render: Renderer,
    ) -> Self {
        self.variants.push(TranslationVariant::new(dialects, args, render));
        self
    }

    pub fn is_aggregate(&self) -> bool {
        self.scopes.contains(Scopes::AGGREGATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArgType;

    #[test]
    fn test_scopes() {
        let s = Scopes::AGGREGATE | Scopes::SUPPORTS_LOD;
        assert!(s.contains(Scopes::AGGREGATE));
        assert!(!s.contains(Scopes::AGGREGATE | Scopes::WINDOW));
        assert!(s.intersects(Scopes::WINDOW | Scopes::SUPPORTS_LOD));
        assert_eq!(s.to_string(), "AGGREGATE | SUPPORTS_LOD");
    }

    #[test]
    fn test_variant_collision() {
        let r = Renderer::new("noop", |ctx| Ok(ctx.args[0].clone()));
        let ints = ArgTypeMatcher::fixed(vec![ArgType::one(DataType::INTEGER)]);
        let a = TranslationVariant::new(DialectSet::ALL, ints.clone(), r.clone());
        let b = TranslationVariant::new(Dialect::Postgres, ints, r.clone());
        let c = TranslationVariant::new(
            Dialect::Postgres,
            ArgTypeMatcher::fixed(vec![ArgType::one(DataType::FLOAT)]),
            r,
        );
        assert!(a.collides_with(&b));
        assert!(!b.collides_with(&c));
    }

    #[test]
    fn test_window_definition_defaults() {
        let def = FunctionDefinition::window("rsum");
        assert_eq!(def.name, "RSUM");
        assert_eq!(def.id, "win_rsum");
        assert!(def.is_window);
    }
}
