//! Translation registry.
//!
//! The registry owns every function definition, the dialect alias table, the
//! per-dialect execution capabilities and native type names. It is assembled
//! once with a [`RegistryBuilder`] and is immutable afterwards, so lookups
//! need no locking:
//!
//! ```text
//! RegistryBuilder ──register_*()──► RegistryBuilder ──build()──► Arc<Registry>
//!                                                                   │
//!                    resolve(name, is_window, dialect, arg_types) ◄─┤
//!                    lower(name, is_window, dialect, args, ...)   ◄─┘
//! ```
//!
//! Registering the same definition twice is a no-op. Registering anything
//! that would make some `(dialect, argument types)` pair reach two different
//! variants without widening is a [`RegistryError::Conflict`].

pub mod builtins;
pub mod definition;
pub mod dialect_set;

pub use definition::{
    FunctionDefinition, RenderContext, RenderFn, Renderer, Scopes, TranslationVariant, WindowSpec,
};
pub use dialect_set::DialectSet;

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::sql;
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::translation::{TranslationError, TranslationResult};
use crate::types::{DataType, TypeError, TypeKind, TypeResult, TypeStrategy};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Registration conflict for {key}: {detail}")]
    Conflict { key: String, detail: String },

    #[error("Invalid definition {id}: {reason}")]
    InvalidDefinition { id: String, reason: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

fn conflict(key: impl Into<String>, detail: impl Into<String>) -> RegistryError {
    RegistryError::Conflict {
        key: key.into(),
        detail: detail.into(),
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Mutable registration surface. Not shared; call [`RegistryBuilder::build`]
/// once every connector has registered.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    definitions: Vec<FunctionDefinition>,
    dialect_aliases: HashMap<String, Dialect>,
    forkable: HashMap<Dialect, bool>,
    compeng: HashMap<Dialect, bool>,
    native_types: HashMap<(Dialect, TypeKind), String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preloaded with the builtin function library and capabilities.
    pub fn with_builtins() -> RegistryResult<Self> {
        let mut builder = Self::new();
        builtins::register_all(&mut builder)?;
        Ok(builder)
    }

    /// Register a function definition.
    pub fn register(&mut self, definition: FunctionDefinition) -> RegistryResult<()> {
        if definition.variants.is_empty() {
            return Err(RegistryError::InvalidDefinition {
                id: definition.id,
                reason: "no translation variants".into(),
            });
        }
        for (i, a) in definition.variants.iter().enumerate() {
            for b in &definition.variants[i + 1..] {
                if a.collides_with(b) {
                    return Err(conflict(
                        definition.id.clone(),
                        format!("variants {} and {} overlap on {}", a.args, b.args, a.dialects),
                    ));
                }
            }
        }

        if let Some(existing) = self.definitions.iter().find(|d| d.id == definition.id) {
            if *existing == definition {
                debug!(id = %definition.id, "identical re-registration ignored");
                return Ok(());
            }
            return Err(conflict(
                definition.id.clone(),
                "definition id already registered with different content",
            ));
        }

        for existing in self
            .definitions
            .iter()
            .filter(|d| d.name == definition.name && d.is_window == definition.is_window)
        {
            for new_variant in &definition.variants {
                if let Some(old) = existing
                    .variants
                    .iter()
                    .find(|old| old.collides_with(new_variant))
                {
                    return Err(conflict(
                        format!("{}{}", definition.name, window_suffix(definition.is_window)),
                        format!(
                            "{} {} overlaps {} {} on {}",
                            definition.id,
                            new_variant.args,
                            existing.id,
                            old.args,
                            new_variant.dialects
                        ),
                    ));
                }
            }
        }

        debug!(
            id = %definition.id,
            variants = definition.variants.len(),
            "registered function"
        );
        self.definitions.push(definition);
        Ok(())
    }

    /// Register a definition assembled from its parts, id derived from the name.
    pub fn register_function(
        &mut self,
        name: &str,
        scopes: Scopes,
        return_type: TypeStrategy,
        variants: Vec<TranslationVariant>,
    ) -> RegistryResult<()> {
        let mut def = if scopes.contains(Scopes::WINDOW) {
            FunctionDefinition::window(name)
        } else {
            FunctionDefinition::new(name)
        };
        def.scopes = scopes;
        def.return_type = return_type;
        def.variants = variants;
        self.register(def)
    }

    pub fn register_dialect_alias(&mut self, alias: &str, dialect: Dialect) -> RegistryResult<()> {
        insert_once(
            &mut self.dialect_aliases,
            alias.to_ascii_lowercase(),
            dialect,
            || format!("dialect alias '{}'", alias),
        )
    }

    pub fn register_is_forkable_source(&mut self, dialect: Dialect, value: bool) -> RegistryResult<()> {
        insert_once(&mut self.forkable, dialect, value, || {
            format!("is_forkable_source({})", dialect)
        })
    }

    pub fn register_is_compeng_executable(
        &mut self,
        dialect: Dialect,
        value: bool,
    ) -> RegistryResult<()> {
        insert_once(&mut self.compeng, dialect, value, || {
            format!("is_compeng_executable({})", dialect)
        })
    }

    pub fn register_native_type(
        &mut self,
        dialect: Dialect,
        kind: TypeKind,
        name: &str,
    ) -> RegistryResult<()> {
        insert_once(
            &mut self.native_types,
            (dialect, kind),
            name.to_string(),
            || format!("native type {} for {}", kind, dialect),
        )
    }

    pub fn build(self) -> Arc<Registry> {
        let mut variants: HashMap<(String, bool, Dialect), Vec<VariantRef>> = HashMap::new();
        let mut scopes: HashMap<(String, bool), Scopes> = HashMap::new();

        for (def_idx, def) in self.definitions.iter().enumerate() {
            let entry = scopes
                .entry((def.name.clone(), def.is_window))
                .or_insert(Scopes::NONE);
            *entry = *entry | def.scopes;
            for (var_idx, variant) in def.variants.iter().enumerate() {
                for dialect in variant.dialects.iter() {
                    variants
                        .entry((def.name.clone(), def.is_window, dialect))
                        .or_default()
                        .push(VariantRef {
                            definition: def_idx,
                            variant: var_idx,
                        });
                }
            }
        }

        debug!(
            definitions = self.definitions.len(),
            keys = variants.len(),
            "registry built"
        );
        Arc::new(Registry {
            definitions: self.definitions,
            variants,
            scopes,
            dialect_aliases: self.dialect_aliases,
            forkable: self.forkable,
            compeng: self.compeng,
            native_types: self.native_types,
        })
    }
}

fn insert_once<K, V>(
    map: &mut HashMap<K, V>,
    key: K,
    value: V,
    describe: impl FnOnce() -> String,
) -> RegistryResult<()>
where
    K: std::hash::Hash + Eq,
    V: PartialEq + std::fmt::Debug,
{
    match map.get(&key) {
        Some(existing) if *existing == value => Ok(()),
        Some(existing) => Err(conflict(
            describe(),
            format!("already registered as {:?}, got {:?}", existing, value),
        )),
        None => {
            map.insert(key, value);
            Ok(())
        }
    }
}

fn window_suffix(is_window: bool) -> &'static str {
    if is_window {
        " (window)"
    } else {
        ""
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct VariantRef {
    definition: usize,
    variant: usize,
}

/// A resolved overload.
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'r> {
    pub definition: &'r FunctionDefinition,
    pub variant: &'r TranslationVariant,
    pub return_type: DataType,
}

/// Native type name chosen for a CAST target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeType {
    Mapped(String),
    /// No mapping exists; the dialect's generic text type is used instead.
    NativeTypeFallback(String),
}

impl NativeType {
    pub fn name(&self) -> &str {
        match self {
            NativeType::Mapped(n) | NativeType::NativeTypeFallback(n) => n,
        }
    }
}

#[derive(Debug)]
pub struct Registry {
    definitions: Vec<FunctionDefinition>,
    variants: HashMap<(String, bool, Dialect), Vec<VariantRef>>,
    scopes: HashMap<(String, bool), Scopes>,
    dialect_aliases: HashMap<String, Dialect>,
    forkable: HashMap<Dialect, bool>,
    compeng: HashMap<Dialect, bool>,
    native_types: HashMap<(Dialect, TypeKind), String>,
}

static DEFAULT_REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| match RegistryBuilder::with_builtins() {
    Ok(builder) => builder.build(),
    Err(err) => {
        tracing::error!(error = %err, "builtin registration failed");
        debug_assert!(false, "builtin registration failed: {}", err);
        RegistryBuilder::new().build()
    }
});

impl Registry {
    /// Process-wide registry with the builtin library.
    pub fn default_shared() -> Arc<Registry> {
        Arc::clone(&DEFAULT_REGISTRY)
    }

    pub fn definitions(&self) -> &[FunctionDefinition] {
        &self.definitions
    }

    /// Union of the scopes of every definition under `(name, is_window)`.
    pub fn scopes(&self, name: &str, is_window: bool) -> Option<Scopes> {
        self.scopes
            .get(&(name.to_ascii_uppercase(), is_window))
            .copied()
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.scopes(name, false)
            .is_some_and(|s| s.contains(Scopes::AGGREGATE))
    }

    pub fn has_function(&self, name: &str, is_window: bool) -> bool {
        self.scopes(name, is_window).is_some()
    }

    /// Dialect by alias or canonical name.
    pub fn dialect_by_name(&self, name: &str) -> Option<Dialect> {
        self.dialect_aliases
            .get(&name.to_ascii_lowercase())
            .copied()
            .or_else(|| Dialect::from_name(name))
    }

    pub fn is_forkable_source(&self, dialect: Dialect) -> bool {
        self.forkable.get(&dialect).copied().unwrap_or(false)
    }

    pub fn is_compeng_executable(&self, dialect: Dialect) -> bool {
        self.compeng.get(&dialect).copied().unwrap_or(false)
    }

    /// Native type for a CAST target: registered name, then the dialect's own
    /// mapping, then the dialect's generic text type.
    pub fn native_type(&self, dialect: Dialect, kind: TypeKind) -> NativeType {
        if let Some(name) = self.native_types.get(&(dialect, kind)) {
            return NativeType::Mapped(name.clone());
        }
        if let Some(name) = dialect.native_type_name(kind) {
            return NativeType::Mapped(name.to_string());
        }
        let text = dialect.text_type_name();
        debug!(%dialect, %kind, fallback = text, "no native type mapping, casting to text");
        NativeType::NativeTypeFallback(text.to_string())
    }

    /// Pick the best overload for a call site.
    ///
    /// The candidate with the lowest total widening cost wins. Candidates tied
    /// on cost with the same signature up to constness, and return types that
    /// differ only in constness, resolve to the non-const one. Any other tie is
    /// ambiguous, including distinct signatures that both widen to fit.
    pub fn resolve(
        &self,
        name: &str,
        is_window: bool,
        dialect: Dialect,
        arg_types: &[DataType],
    ) -> TypeResult<Resolved<'_>> {
        let upper = name.to_ascii_uppercase();
        if !self.has_function(&upper, is_window) {
            return Err(TypeError::UnknownFunction {
                name: upper,
                is_window,
            });
        }
        let refs = self
            .variants
            .get(&(upper.clone(), is_window, dialect))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut best: Vec<(&FunctionDefinition, &TranslationVariant)> = Vec::new();
        let mut best_cost = u32::MAX;
        for r in refs {
            let def = &self.definitions[r.definition];
            let variant = &def.variants[r.variant];
            let Some(cost) = variant.args.match_cost(arg_types) else {
                continue;
            };
            if cost < best_cost {
                best_cost = cost;
                best.clear();
            }
            if cost == best_cost {
                best.push((def, variant));
            }
        }

        let mut typed = Vec::with_capacity(best.len());
        for (def, variant) in best {
            let mut ret = def.return_type.get_from_args(arg_types)?;
            if def.scopes.intersects(Scopes::AGGREGATE | Scopes::WINDOW) {
                ret = ret.non_const();
            }
            typed.push(Resolved {
                definition: def,
                variant,
                return_type: ret,
            });
        }

        match typed.as_slice() {
            [] => Err(TypeError::NoMatchingOverload {
                function: upper,
                args: arg_types.to_vec(),
            }),
            [only] => Ok(*only),
            [first, rest @ ..] => {
                let constness_only = rest.iter().all(|r| {
                    r.return_type.kind == first.return_type.kind
                        && r.variant.args.same_signature(&first.variant.args)
                });
                if !constness_only {
                    return Err(TypeError::AmbiguousOverload {
                        function: upper,
                        args: arg_types.to_vec(),
                        candidates: typed.len(),
                    });
                }
                Ok(*typed
                    .iter()
                    .find(|r| !r.return_type.is_const)
                    .unwrap_or(first))
            }
        }
    }

    /// Resolve and render one call.
    pub fn lower(
        &self,
        name: &str,
        is_window: bool,
        dialect: Dialect,
        args: Vec<sql::Expr>,
        arg_types: &[DataType],
        window: Option<WindowSpec>,
    ) -> TranslationResult<sql::Expr> {
        let resolved = self
            .resolve(name, is_window, dialect, arg_types)
            .map_err(TranslationError::Type)?;
        let ctx = RenderContext {
            registry: self,
            dialect,
            args,
            arg_types,
            window,
        };
        resolved.variant.render.render(&ctx)
    }

    /// Every definition reachable for `dialect`, for listings.
    pub fn functions_for(&self, dialect: Dialect) -> Vec<&FunctionDefinition> {
        let mut defs: Vec<&FunctionDefinition> = self
            .definitions
            .iter()
            .filter(|d| d.variants.iter().any(|v| v.dialects.contains(dialect)))
            .collect();
        defs.sort_by(|a, b| (&a.name, a.is_window).cmp(&(&b.name, b.is_window)));
        defs
    }
}
