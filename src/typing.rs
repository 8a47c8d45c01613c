//! Bottom-up type checking of formula trees.
//!
//! Every node gets a [`TypeInfo`]: its [`DataType`] plus the per-instance
//! [`DataTypeParams`] (timezone, precision) a field declares. Parameters flow
//! upward only through functions whose return strategy copies them.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::formula::{Expr, JoinCondition, Literal, NodeHierarchyIndex};
use crate::registry::Registry;
use crate::sql::dialect::Dialect;
use crate::types::{get_common_cast_type, DataType, DataTypeParams, TypeError, TypeResult, TypeStrategy};

/// Types of the fields a formula may reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeEnv {
    fields: HashMap<String, DataType>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    params: HashMap<String, DataTypeParams>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.insert(name, data_type);
        self
    }

    pub fn with_field_params(mut self, name: impl Into<String>, data_type: DataType, params: DataTypeParams) -> Self {
        let name = name.into();
        self.insert(name.clone(), data_type);
        self.set_params(name, params);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, data_type: DataType) {
        self.fields.insert(name.into(), data_type);
    }

    /// Empty parameters are not stored.
    pub fn set_params(&mut self, name: impl Into<String>, params: DataTypeParams) {
        let name = name.into();
        if params.is_empty() {
            self.params.remove(&name);
        } else {
            self.params.insert(name, params);
        }
    }

    pub fn get(&self, name: &str) -> Option<DataType> {
        self.fields.get(name).copied()
    }

    pub fn info(&self, name: &str) -> Option<TypeInfo> {
        let data_type = self.get(name)?;
        Some(TypeInfo {
            data_type,
            params: self.params.get(name).cloned().unwrap_or_default(),
        })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A checked type with its per-instance parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "DataTypeParams::is_empty")]
    pub params: DataTypeParams,
}

impl From<DataType> for TypeInfo {
    fn from(data_type: DataType) -> Self {
        Self {
            data_type,
            params: DataTypeParams::default(),
        }
    }
}

pub fn literal_type(lit: &Literal) -> DataType {
    match lit {
        Literal::Integer(_) => DataType::CONST_INTEGER,
        Literal::Float(_) => DataType::CONST_FLOAT,
        Literal::String(_) => DataType::CONST_STRING,
        Literal::Boolean(_) => DataType::CONST_BOOLEAN,
        Literal::Date(_) => DataType::CONST_DATE,
        Literal::Datetime(_) => DataType::CONST_DATETIME,
        Literal::Null => DataType::CONST_NULL,
    }
}

type SignatureKey = (String, bool, Vec<DataType>);

struct CachedCall {
    return_type: DataType,
    strategy: TypeStrategy,
}

/// Type checker for one dialect.
///
/// Call resolutions are memoized per `(function, is_window, argument types)`;
/// the cached return strategy then derives parameters for each call site.
pub struct TypeChecker<'r> {
    registry: &'r Registry,
    dialect: Dialect,
    cache: HashMap<SignatureKey, CachedCall>,
}

impl<'r> TypeChecker<'r> {
    pub fn new(registry: &'r Registry, dialect: Dialect) -> Self {
        Self {
            registry,
            dialect,
            cache: HashMap::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Type of `expr`; errors carry the offending node's index and span.
    pub fn check(&mut self, expr: &Expr, env: &TypeEnv) -> TypeResult<DataType> {
        self.check_info(expr, env).map(|info| info.data_type)
    }

    /// Type and parameters of `expr`.
    pub fn check_info(&mut self, expr: &Expr, env: &TypeEnv) -> TypeResult<TypeInfo> {
        self.check_at(expr, env, &NodeHierarchyIndex::root())
    }

    pub fn call_type(
        &mut self,
        name: &str,
        is_window: bool,
        args: &[DataType],
    ) -> TypeResult<DataType> {
        Ok(self.resolve_cached(name, is_window, args)?.return_type)
    }

    pub fn call_info(&mut self, name: &str, is_window: bool, args: &[TypeInfo]) -> TypeResult<TypeInfo> {
        let types: Vec<DataType> = args.iter().map(|a| a.data_type).collect();
        let params: Vec<DataTypeParams> = args.iter().map(|a| a.params.clone()).collect();
        let call = self.resolve_cached(name, is_window, &types)?;
        Ok(TypeInfo {
            data_type: call.return_type,
            params: call.strategy.params_from_args(&params),
        })
    }

    fn resolve_cached(&mut self, name: &str, is_window: bool, args: &[DataType]) -> TypeResult<&CachedCall> {
        let key = (name.to_ascii_uppercase(), is_window, args.to_vec());
        match self.cache.entry(key) {
            Entry::Occupied(hit) => Ok(&*hit.into_mut()),
            Entry::Vacant(slot) => {
                let resolved = self.registry.resolve(name, is_window, self.dialect, args)?;
                trace!(function = %slot.key().0, is_window, result = %resolved.return_type, "resolved call type");
                Ok(&*slot.insert(CachedCall {
                    return_type: resolved.return_type,
                    strategy: resolved.definition.return_type.clone(),
                }))
            }
        }
    }

    pub fn cached_signatures(&self) -> usize {
        self.cache.len()
    }

    fn check_at(
        &mut self,
        expr: &Expr,
        env: &TypeEnv,
        index: &NodeHierarchyIndex,
    ) -> TypeResult<TypeInfo> {
        let located = |err: TypeError| err.at(index, expr.span());
        match expr {
            Expr::Literal(lit) => Ok(literal_type(lit).into()),
            Expr::Field(field) => env
                .info(&field.name)
                .ok_or_else(|| TypeError::UnknownField(field.name.clone()))
                .map_err(located),
            Expr::Call(call) => {
                let children = self.check_children(expr, env, index)?;
                let args = &children[..call.args.len()];
                self.call_info(&call.name, false, args).map_err(located)
            }
            Expr::Window(win) => {
                let children = self.check_children(expr, env, index)?;
                let args = &children[..win.args.len()];
                self.call_info(&win.name, true, args).map_err(located)
            }
            Expr::Paren(inner) => self.check_at(inner, env, &index.child(0)),
            Expr::Tagged(t) => self.check_at(&t.expr, env, &index.child(0)),
            Expr::Fork(fork) => {
                let mut children = self.check_children(expr, env, index)?;
                let mut pos = 1;
                for cond in &fork.joining {
                    match cond {
                        JoinCondition::SelfEquality(_) => pos += 1,
                        JoinCondition::Binary { .. } => {
                            get_common_cast_type(&[children[pos].data_type, children[pos + 1].data_type])
                                .map_err(|e| e.at(&index.child(pos), None))?;
                            pos += 2;
                        }
                    }
                }
                let mut result = children.swap_remove(0);
                result.data_type = result.data_type.non_const();
                Ok(result)
            }
        }
    }

    fn check_children(
        &mut self,
        expr: &Expr,
        env: &TypeEnv,
        index: &NodeHierarchyIndex,
    ) -> TypeResult<Vec<TypeInfo>> {
        expr.children()
            .into_iter()
            .enumerate()
            .map(|(i, child)| self.check_at(child, env, &index.child(i)))
            .collect()
    }
}
