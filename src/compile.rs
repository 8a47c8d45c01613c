//! End-to-end compilation from a query document to level queries and SQL.
//!
//! ```text
//! QueryInput → Type check → AMONG / LOD / BFB rewrites → Level tags
//!            → Plan → Slice → Separate → Split & assemble → Render
//! ```
//!
//! # Example
//!
//! ```ignore
//! use formula_slicer::compile::{compile_query, CompileOptions, QueryInput};
//! use formula_slicer::registry::Registry;
//! use formula_slicer::sql::Dialect;
//!
//! let input = QueryInput::from_json(r#"{
//!     "id": "q",
//!     "source": {"table": "sales", "fields": [{"name": "amount", "data_type": "FLOAT"}]},
//!     "select": [{"alias": "total", "expr": {"Call": {"name": "SUM", "args": [{"Field": {"name": "amount"}}]}}}]
//! }"#)?;
//! let registry = Registry::default_shared();
//! let output = compile_query(&input, &registry, &CompileOptions::default().with_dialect(Dialect::Postgres))?;
//! println!("{}", output.nested_sql.unwrap_or_default());
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Settings;
use crate::formula::Expr;
use crate::multi_query::{AssemblyError, MultiLevelAssembler};
use crate::mutation::{
    lods_to_forks, normalize_before_filter_by, resolve_among, LevelTagMutator, TaggingError,
};
use crate::query::{
    planner_for, CompiledFormula, CompiledMultiLevelQuery, CompiledQuery, FromObject, JoinedFrom,
    LevelType, PlanError, QuerySeparator, QueryRenderer, RenderError, RenderedQuery, SlicedQuery,
};
use crate::registry::{Registry, RegistryError};
use crate::slicing::{AliasGenerator, SliceError};
use crate::sql::Dialect;
use crate::types::{DataType, DataTypeParams, TypeError, TypeKind};
use crate::typing::{TypeChecker, TypeEnv, TypeInfo};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during compilation.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Invalid query document: {0}")]
    InvalidInput(String),

    #[error("Failed to parse query document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Tagging error: {0}")]
    Tagging(#[from] TaggingError),

    #[error("Slicing error: {0}")]
    Slice(#[from] SliceError),

    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),
}

pub type CompileResult<T> = Result<T, CompileError>;

// ============================================================================
// Input document
// ============================================================================

/// A query to compile, as read from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    pub id: String,
    pub source: SourceInput,
    pub select: Vec<FormulaInput>,
    #[serde(default)]
    pub group_by: Vec<FormulaInput>,
    #[serde(default)]
    pub order_by: Vec<FormulaInput>,
    /// Filters, RLS filters included.
    #[serde(default)]
    pub filters: Vec<FormulaInput>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInput {
    /// FROM id; defaults to the table name.
    #[serde(default)]
    pub id: Option<String>,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub fields: Vec<FieldInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInput {
    pub name: String,
    pub data_type: TypeKind,
    /// Timezone or precision of the column, when it has any.
    #[serde(default, skip_serializing_if = "DataTypeParams::is_empty")]
    pub params: DataTypeParams,
}

impl FieldInput {
    pub fn new(name: impl Into<String>, data_type: TypeKind) -> Self {
        Self {
            name: name.into(),
            data_type,
            params: DataTypeParams::default(),
        }
    }

    pub fn with_params(mut self, params: DataTypeParams) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaInput {
    /// Required for select and group-by formulas.
    #[serde(default)]
    pub alias: Option<String>,
    pub expr: Expr,
    /// Field the formula was created for; BFB names refer to it.
    #[serde(default)]
    pub field_id: Option<String>,
    /// Only meaningful in `order_by`.
    #[serde(default)]
    pub desc: bool,
}

impl FormulaInput {
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: Some(alias.into()),
            expr,
            field_id: None,
            desc: false,
        }
    }
}

impl QueryInput {
    pub fn from_json(json: &str) -> CompileResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    fn source_id(&self) -> &str {
        self.source.id.as_deref().unwrap_or(&self.source.table)
    }

    /// Column types of the source.
    pub fn type_env(&self) -> TypeEnv {
        let mut env = TypeEnv::new();
        for field in &self.source.fields {
            env.insert(field.name.clone(), DataType::new(field.data_type, false));
            env.set_params(field.name.clone(), field.params.clone());
        }
        env
    }

    /// The single-level query the pipeline starts from.
    pub fn to_compiled(&self) -> CompileResult<CompiledQuery> {
        let source_id = self.source_id().to_string();
        let from = FromObject::Table {
            id: source_id.clone(),
            table: self.source.table.clone(),
            schema: self.source.schema.clone(),
            columns: self.source.fields.iter().map(|f| f.name.clone()).collect(),
        };
        let mut query = CompiledQuery::new(self.id.clone(), JoinedFrom::single(from));

        let build = |part: &str, inputs: &[FormulaInput], default_prefix: Option<&str>| {
            inputs
                .iter()
                .enumerate()
                .map(|(i, input)| {
                    let alias = match (&input.alias, default_prefix) {
                        (Some(alias), _) => alias.clone(),
                        (None, Some(prefix)) => format!("{prefix}{i}"),
                        (None, None) => {
                            return Err(CompileError::InvalidInput(format!(
                                "{part} formula #{i} has no alias"
                            )))
                        }
                    };
                    let mut formula = CompiledFormula::new(alias, input.expr.clone())
                        .with_from_ids([source_id.clone()])
                        .descending(input.desc);
                    formula.original_field_id = input.field_id.clone();
                    Ok(formula)
                })
                .collect::<CompileResult<Vec<_>>>()
        };

        query.select = build("select", &self.select, None)?;
        query.group_by = build("group_by", &self.group_by, None)?;
        query.order_by = build("order_by", &self.order_by, Some("__order_"))?;
        query.filters = build("filters", &self.filters, Some("__filter_"))?;
        query.limit = self.limit;
        query.offset = self.offset;

        if query.select.is_empty() {
            return Err(CompileError::InvalidInput(format!(
                "query {} selects nothing",
                self.id
            )));
        }
        Ok(query)
    }
}

// ============================================================================
// Options
// ============================================================================

/// Options for compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Dialect of the source database.
    pub dialect: Dialect,
    pub compeng_dialect: Dialect,
    pub iteration_id: u32,
    pub split_window_aggregates: bool,
    pub tag_aggregates: bool,
    pub max_split_passes: Option<usize>,
    pub verbose: bool,
    /// Render SQL next to the compiled plan.
    pub render: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl CompileOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            dialect: settings.compiler.default_dialect,
            compeng_dialect: settings.compiler.compeng_dialect,
            iteration_id: settings.slicing.iteration_id,
            split_window_aggregates: settings.compiler.split_window_aggregates,
            tag_aggregates: settings.compiler.tag_aggregates,
            max_split_passes: settings.compiler.max_split_passes,
            verbose: settings.logging.verbose,
            render: true,
        }
    }

    /// Set the SQL dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }
}

// ============================================================================
// Result Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// The compiled level queries.
    pub plan: CompiledMultiLevelQuery,

    /// Every query rendered on its own, bottom-up. Empty when rendering is off.
    pub queries: Vec<RenderedQuery>,

    /// The whole plan as one statement, when every level runs on the source.
    pub nested_sql: Option<String>,

    /// Alias and type of every selected column, in select order.
    pub columns: Vec<ResultColumn>,

    pub dialect: Dialect,
}

/// One column of the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub alias: String,
    #[serde(flatten)]
    pub info: TypeInfo,
}

// ============================================================================
// Compilation Functions
// ============================================================================

/// Compile a query document.
pub fn compile_query(
    input: &QueryInput,
    registry: &Registry,
    options: &CompileOptions,
) -> CompileResult<CompileOutput> {
    let env = input.type_env();
    let query = input.to_compiled()?;
    let columns = result_columns(&query, &env, registry, options.dialect)?;
    let plan = compile_plan(query, &env, registry, options)?;

    if !options.render {
        return Ok(CompileOutput {
            plan,
            queries: Vec::new(),
            nested_sql: None,
            columns,
            dialect: options.dialect,
        });
    }

    let renderer = || {
        QueryRenderer::new(registry, options.dialect, env.clone())
            .with_compeng_dialect(options.compeng_dialect)
    };
    let queries = renderer().render_all(&plan)?;
    let nested_sql = if plan.levels.iter().all(|l| l.level_type == LevelType::SourceDb) {
        Some(renderer().render_nested(&plan)?.to_sql(options.dialect))
    } else {
        None
    };

    Ok(CompileOutput {
        plan,
        queries,
        nested_sql,
        columns,
        dialect: options.dialect,
    })
}

fn result_columns(
    query: &CompiledQuery,
    env: &TypeEnv,
    registry: &Registry,
    dialect: Dialect,
) -> CompileResult<Vec<ResultColumn>> {
    let mut checker = TypeChecker::new(registry, dialect);
    query
        .select
        .iter()
        .map(|formula| {
            let info = checker.check_info(&formula.expr, env)?;
            Ok(ResultColumn {
                alias: formula.alias.clone(),
                info: TypeInfo {
                    data_type: info.data_type.non_const(),
                    ..info
                },
            })
        })
        .collect()
}

/// Run the pipeline up to the assembled multi-level query.
pub fn compile_plan(
    mut query: CompiledQuery,
    env: &TypeEnv,
    registry: &Registry,
    options: &CompileOptions,
) -> CompileResult<CompiledMultiLevelQuery> {
    // Step 1: Type check
    let mut checker = TypeChecker::new(registry, options.dialect);
    for expr in query.all_exprs() {
        checker.check(expr, env)?;
    }

    // Step 2: Rewrites against the query dimensions
    let dims: Vec<Expr> = query.group_by.iter().map(|f| f.expr.clone()).collect();
    let available: BTreeSet<String> = query
        .filters
        .iter()
        .filter_map(|f| f.original_field_id.clone())
        .collect();
    let tagger = LevelTagMutator::new(registry).with_aggregates(options.tag_aggregates);
    for expr in query.all_exprs_mut() {
        resolve_among(expr, &dims);
        lods_to_forks(expr, &dims, registry)?;
        normalize_before_filter_by(expr, &available, registry);
        let owned = std::mem::replace(expr, Expr::null());
        *expr = tagger.tag(owned)?;
    }
    debug!(query = %query.id, "formulas tagged");

    // Step 3: Plan, slice and separate
    let planner = planner_for(registry, options.dialect, &query, options.verbose)?;
    let plan = planner.plan(&query)?;
    let mut gen = AliasGenerator::new(options.iteration_id);
    let sliced = SlicedQuery::from_plan(&plan, &mut gen);
    let separated = QuerySeparator::new(options.iteration_id).separate(&plan, &query, &sliced);

    // Step 4: Split and assemble
    let mut assembler = MultiLevelAssembler::for_registry(
        registry,
        options.iteration_id,
        options.split_window_aggregates,
    );
    if let Some(passes) = options.max_split_passes {
        assembler = assembler.max_split_passes(passes);
    }
    let assembled = assembler.assemble(separated)?;

    if options.verbose {
        info!(
            query = %query.id,
            levels = assembled.levels.len(),
            queries = assembled.query_count(),
            "query compiled"
        );
    }
    Ok(assembled)
}
