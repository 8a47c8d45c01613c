use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::mask::{AddFormula, AliasedFormulaSplitMask, QueryPart, QuerySplitMask, SplitIds, SubqueryType};
use super::{AssemblyError, AssemblyResult};
use crate::formula::inspect::{any_outer, collect_fields, is_constant};
use crate::formula::{Expr, JoinCondition, NodeHierarchyIndex};
use crate::query::{CompiledFormula, CompiledJoinOn, CompiledQuery, FromObject, JoinedFrom};
use crate::registry::Registry;

/// Cuts parts of a compiled query into subqueries.
///
/// Implementors only decide *what* to cut by returning masks; the provided
/// [`split_query`](MultiQuerySplitter::split_query) does the rest:
///
/// 1. Whatever the masks leave behind (their "counterparts") goes into a base
///    subquery together with the query dimensions, unless one of the masks can
///    serve as the base itself.
/// 2. Every mask becomes a subquery selecting the cut nodes.
/// 3. The original query is cropped: cut nodes become fields, dimensions
///    become base columns, and the subqueries are joined to the base.
pub trait MultiQuerySplitter {
    fn name(&self) -> &'static str;

    fn get_split_masks(
        &self,
        query: &CompiledQuery,
        ids: &mut SplitIds,
    ) -> AssemblyResult<Vec<QuerySplitMask>>;

    /// Nesting removed by this splitter. Every query produced by a split must
    /// have a strictly smaller depth than the query it came from.
    fn depth(&self, query: &CompiledQuery) -> usize;

    /// Adjust a node before it is selected by a subquery.
    fn mutate_split_node(&self, node: Expr) -> Expr {
        node
    }

    /// Adjust the original query after everything was cut out of it.
    fn mutate_cropped_query(&self, query: CompiledQuery) -> CompiledQuery {
        query
    }

    /// Subqueries followed by the cropped query, or `None` if nothing splits.
    fn split_query(
        &self,
        query: &CompiledQuery,
        ids: &mut SplitIds,
    ) -> AssemblyResult<Option<Vec<CompiledQuery>>> {
        let masks = self.get_split_masks(query, ids)?;
        if masks.is_empty() {
            return Ok(None);
        }
        split_with_masks(self, query, masks, ids).map(Some)
    }
}

fn split_with_masks<S>(
    splitter: &S,
    query: &CompiledQuery,
    masks: Vec<QuerySplitMask>,
    ids: &mut SplitIds,
) -> AssemblyResult<Vec<CompiledQuery>>
where
    S: MultiQuerySplitter + ?Sized,
{
    if !dimensions_compatible(&masks) {
        return Err(AssemblyError::IncompatibleLodDimensions {
            query: query.id.clone(),
        });
    }
    let masks = patch_masks_with_base(query, masks, ids)?;
    let masks = patch_base_dimensions(masks, ids);

    let mut result = masks
        .iter()
        .map(|mask| subquery_for_mask(splitter, query, mask))
        .collect::<AssemblyResult<Vec<_>>>()?;
    let cropped = crop_original_query(query, &masks)?;
    result.push(splitter.mutate_cropped_query(cropped));

    debug!(
        splitter = splitter.name(),
        query = %query.id,
        subqueries = masks.len(),
        base = %masks[0].subquery_id,
        "split query"
    );
    Ok(result)
}

// =============================================================================
// Helpers shared with the splitters
// =============================================================================

/// Whether `expr` aggregates outside fork interiors.
pub(crate) fn is_aggregate_expr(registry: &Registry, expr: &Expr) -> bool {
    any_outer(expr, |node| matches!(node, Expr::Call(c) if registry.is_aggregate(&c.name)))
}

/// Whether the formula is one of the query's dimensions.
pub(crate) fn is_dimension(query: &CompiledQuery, formula: &CompiledFormula) -> bool {
    query.group_by.iter().any(|gb| {
        gb.alias == formula.alias || (!is_constant(&gb.expr) && gb.expr == formula.expr)
    })
}

pub(crate) fn join_index(prefix: &NodeHierarchyIndex, relative: &NodeHierarchyIndex) -> NodeHierarchyIndex {
    relative
        .positions()
        .iter()
        .fold(prefix.clone(), |idx, &pos| idx.child(pos))
}

pub(crate) fn same_expr(a: &Expr, b: &Expr) -> bool {
    a.unwrap_transparent() == b.unwrap_transparent()
}

fn same_set(a: &[&Expr], b: &[&Expr]) -> bool {
    a.iter().all(|x| b.iter().any(|y| same_expr(x, y)))
        && b.iter().all(|y| a.iter().any(|x| same_expr(x, y)))
}

/// Replace whole subtrees equal to a key, outermost first.
pub(crate) fn replace_subtrees(expr: &Expr, aliases: &[(Expr, String)]) -> Expr {
    if let Some((_, alias)) = aliases.iter().find(|(e, _)| same_expr(e, expr)) {
        return Expr::field(alias.clone());
    }
    let mut out = expr.clone();
    for child in out.children_mut() {
        *child = replace_subtrees(child, aliases);
    }
    out
}

fn remap_fields(expr: &Expr, names: &HashMap<&str, &str>) -> Expr {
    if let Some(new) = expr.as_field().and_then(|name| names.get(name)) {
        return Expr::field(*new);
    }
    let mut out = expr.clone();
    for child in out.children_mut() {
        *child = remap_fields(child, names);
    }
    out
}

fn invalid_index(query: &CompiledQuery, part: QueryPart, formula: usize, index: &NodeHierarchyIndex) -> AssemblyError {
    AssemblyError::InvalidNodeIndex {
        query: query.id.clone(),
        part,
        formula,
        index: index.clone(),
    }
}

// =============================================================================
// Base subquery
// =============================================================================

/// Masks can share one grouping only if one of them has every dimension
/// the others have.
fn dimensions_compatible(masks: &[QuerySplitMask]) -> bool {
    let sets: Vec<Vec<&Expr>> = masks.iter().map(|m| m.dimensions().collect()).collect();
    let mut union: Vec<&Expr> = Vec::new();
    for dim in sets.iter().flatten() {
        if !union.iter().any(|d| same_expr(d, dim)) {
            union.push(dim);
        }
    }
    sets.is_empty() || sets.iter().any(|set| same_set(set, &union))
}

/// Uncut siblings of the cut nodes, for every splittable formula.
fn counterparts(
    query: &CompiledQuery,
    masks: &[QuerySplitMask],
    ids: &mut SplitIds,
) -> AssemblyResult<Vec<AliasedFormulaSplitMask>> {
    let mut result = Vec::new();
    for part in QueryPart::SPLITTABLE {
        for (i, formula) in part.formulas(query).iter().enumerate() {
            if is_constant(&formula.expr) || (part != QueryPart::Filters && is_dimension(query, formula)) {
                continue;
            }
            let cut: Vec<NodeHierarchyIndex> = masks
                .iter()
                .flat_map(|m| &m.formula_split_masks)
                .filter(|m| m.query_part == part && m.formula_list_idx == i)
                .map(|m| m.outer_node_idx.clone())
                .collect();
            // An unsplit filter stays with the base, not among its selects.
            if part == QueryPart::Filters && cut.is_empty() {
                continue;
            }
            let mut found = Vec::new();
            collect_counterparts(&formula.expr, &NodeHierarchyIndex::root(), &cut, &mut found)
                .map_err(|idx| invalid_index(query, part, i, &idx))?;
            for idx in found {
                result.push(AliasedFormulaSplitMask::new(part, i, idx, ids.exprs.next_id()));
            }
        }
    }
    Ok(result)
}

fn collect_counterparts(
    node: &Expr,
    prefix: &NodeHierarchyIndex,
    cut: &[NodeHierarchyIndex],
    out: &mut Vec<NodeHierarchyIndex>,
) -> Result<(), NodeHierarchyIndex> {
    if cut.iter().any(|m| prefix.starts_with(m)) {
        return Ok(());
    }
    if !cut.iter().any(|m| m.starts_with(prefix)) {
        if !is_constant(node) {
            out.push(prefix.clone());
        }
        return Ok(());
    }
    let children = node.autonomous_children();
    if children.is_empty() {
        return Err(prefix.clone());
    }
    for relative in children {
        let child = node.get(&relative).ok_or_else(|| join_index(prefix, &relative))?;
        collect_counterparts(child, &join_index(prefix, &relative), cut, out)?;
    }
    Ok(())
}

/// Index of a mask that can stand in for the base subquery.
///
/// That works when nothing else needs selecting and the mask has exactly the
/// query dimensions and filters and joins by plain equalities. A query
/// without dimensions always reuses the mask with the most dimensions.
fn find_base_candidate(
    query: &CompiledQuery,
    masks: &[QuerySplitMask],
    base_counterparts: &[AliasedFormulaSplitMask],
    base_filter_indices: &BTreeSet<usize>,
) -> Option<usize> {
    if !base_counterparts.is_empty() {
        return None;
    }
    let mut base_dims: Vec<&Expr> = Vec::new();
    for gb in query.group_by.iter().filter(|f| !is_constant(&f.expr)) {
        if !base_dims.iter().any(|d| same_expr(d, &gb.expr)) {
            base_dims.push(&gb.expr);
        }
    }
    let max_dims = masks.iter().map(QuerySplitMask::group_by_count).max()?;

    let mut candidate = None;
    let mut exact = false;
    for (i, mask) in masks.iter().enumerate() {
        if mask.group_by_count() != max_dims {
            continue;
        }
        let dims: Vec<&Expr> = mask.dimensions().collect();
        if !base_dims.iter().all(|b| dims.iter().any(|d| same_expr(d, b))) {
            continue;
        }
        candidate = Some(i);
        exact = mask.group_by_count() == base_dims.len()
            && &mask.filter_indices == base_filter_indices
            && mask.has_direct_equality_join();
    }
    if exact || base_dims.is_empty() {
        candidate
    } else {
        None
    }
}

/// Put the base mask first, generating one if no mask can serve.
fn patch_masks_with_base(
    query: &CompiledQuery,
    mut masks: Vec<QuerySplitMask>,
    ids: &mut SplitIds,
) -> AssemblyResult<Vec<QuerySplitMask>> {
    let base_counterparts = counterparts(query, &masks, ids)?;
    let split_filters: BTreeSet<usize> = masks
        .iter()
        .flat_map(|m| &m.formula_split_masks)
        .filter(|m| m.query_part == QueryPart::Filters)
        .map(|m| m.formula_list_idx)
        .collect();
    let base_filter_indices: BTreeSet<usize> = (0..query.filters.len())
        .filter(|i| !split_filters.contains(i))
        .collect();

    if let Some(i) = find_base_candidate(query, &masks, &base_counterparts, &base_filter_indices) {
        let mut base = masks.remove(i);
        base.is_base = true;
        masks.insert(0, base);
        return Ok(masks);
    }

    let mut base = QuerySplitMask::new(SubqueryType::GeneratedBase, ids.queries.next_id());
    base.is_base = true;
    base.formula_split_masks = base_counterparts;
    base.filter_indices = base_filter_indices;
    base.add_formulas = query
        .group_by
        .iter()
        .map(|gb| AddFormula {
            alias: ids.exprs.next_id(),
            expr: gb.expr.clone(),
            from_ids: gb.from_ids.clone(),
            is_group_by: !is_constant(&gb.expr),
        })
        .collect();
    masks.insert(0, base);
    Ok(masks)
}

/// Give the base every column the other masks' join conditions need.
fn patch_base_dimensions(mut masks: Vec<QuerySplitMask>, ids: &mut SplitIds) -> Vec<QuerySplitMask> {
    let (base, others) = masks.split_at_mut(1);
    let base = &mut base[0];
    for other in others.iter() {
        let referenced: BTreeSet<String> = other
            .joining
            .iter()
            .flat_map(|c| match c {
                JoinCondition::SelfEquality(e) => collect_fields(e),
                JoinCondition::Binary { expr, .. } => collect_fields(expr),
            })
            .collect();
        for add in other.add_formulas.iter().filter(|a| referenced.contains(&a.alias)) {
            if base.add_formulas.iter().any(|b| same_expr(&b.expr, &add.expr)) {
                continue;
            }
            base.add_formulas.push(AddFormula {
                alias: ids.exprs.next_id(),
                ..add.clone()
            });
        }
    }
    masks
}

// =============================================================================
// Subqueries and cropping
// =============================================================================

fn subquery_for_mask<S>(
    splitter: &S,
    query: &CompiledQuery,
    mask: &QuerySplitMask,
) -> AssemblyResult<CompiledQuery>
where
    S: MultiQuerySplitter + ?Sized,
{
    let mut sub = CompiledQuery::new(mask.subquery_id.clone(), query.joined_from.clone());
    sub.level_type = query.level_type;
    sub.join_on = query.join_on.clone();

    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for fsm in &mask.formula_split_masks {
        let part = fsm.query_part;
        let idx = fsm.formula_list_idx;
        let original = part
            .formulas(query)
            .get(idx)
            .ok_or_else(|| invalid_index(query, part, idx, &fsm.inner_node_idx))?;
        let node = original
            .expr
            .get(&fsm.inner_node_idx)
            .ok_or_else(|| invalid_index(query, part, idx, &fsm.inner_node_idx))?;
        if !seen.insert(&fsm.alias) {
            continue;
        }
        sub.select.push(CompiledFormula {
            alias: fsm.alias.clone(),
            expr: splitter.mutate_split_node(node.clone()),
            original_field_id: original.original_field_id.clone(),
            from_ids: original.from_ids.clone(),
            desc: false,
        });
    }

    for add in &mask.add_formulas {
        let formula = CompiledFormula::new(add.alias.clone(), add.expr.clone())
            .with_from_ids(add.from_ids.iter().cloned());
        if add.is_group_by {
            sub.group_by.push(formula.clone());
        }
        if seen.insert(&add.alias) {
            sub.select.push(formula);
        }
    }

    sub.filters = query
        .filters
        .iter()
        .enumerate()
        .filter(|(i, _)| mask.filter_indices.contains(i))
        .map(|(_, f)| f.clone())
        .collect();
    Ok(sub)
}

/// Join condition of `other` against the base, ANDed equalities.
fn join_on_base(base: &QuerySplitMask, other: &QuerySplitMask) -> Option<CompiledJoinOn> {
    let mut right_to_left: HashMap<&str, &str> = HashMap::new();
    for right in &other.add_formulas {
        if let Some(left) = base.add_formulas.iter().find(|l| same_expr(&l.expr, &right.expr)) {
            right_to_left.insert(&right.alias, &left.alias);
        }
    }

    let expr = other
        .joining
        .iter()
        .map(|condition| {
            let (left, right) = match condition {
                JoinCondition::SelfEquality(e) => (e, e),
                JoinCondition::Binary { expr, fork_expr } => (expr, fork_expr),
            };
            Expr::binary("=", remap_fields(left, &right_to_left), right.clone())
        })
        .reduce(|acc, part| Expr::binary("AND", acc, part))?;

    Some(CompiledJoinOn {
        left_id: base.subquery_id.clone(),
        right_id: other.subquery_id.clone(),
        join_type: other.join_type.unwrap_or_default(),
        expr,
    })
}

fn crop_original_query(query: &CompiledQuery, masks: &[QuerySplitMask]) -> AssemblyResult<CompiledQuery> {
    let base = &masks[0];
    let base_dims: Vec<(Expr, String)> = base
        .add_formulas
        .iter()
        .filter(|a| a.is_group_by)
        .map(|a| (a.expr.clone(), a.alias.clone()))
        .collect();

    let mut alias_sources: HashMap<&str, &str> = HashMap::new();
    for mask in masks {
        for fsm in &mask.formula_split_masks {
            alias_sources.insert(&fsm.alias, &mask.subquery_id);
        }
        for add in &mask.add_formulas {
            alias_sources.insert(&add.alias, &mask.subquery_id);
        }
    }
    let from_ids_of = |expr: &Expr| -> BTreeSet<String> {
        collect_fields(expr)
            .iter()
            .filter_map(|name| alias_sources.get(name.as_str()))
            .map(|id| id.to_string())
            .collect()
    };

    let crop = |part: QueryPart, exclude: &BTreeSet<usize>| -> AssemblyResult<Vec<CompiledFormula>> {
        let mut out = Vec::new();
        for (i, formula) in part.formulas(query).iter().enumerate() {
            if exclude.contains(&i) {
                continue;
            }
            if is_constant(&formula.expr) {
                out.push(formula.clone());
                continue;
            }
            let mut expr = formula.expr.clone();
            let mut updated = false;
            let dimension = match part {
                QueryPart::GroupBy => true,
                QueryPart::Filters => false,
                _ => is_dimension(query, formula),
            };
            if dimension {
                if let Some((_, alias)) = base_dims.iter().find(|(e, _)| same_expr(e, &formula.expr)) {
                    expr = Expr::field(alias.clone());
                    updated = true;
                }
            } else {
                for fsm in masks
                    .iter()
                    .flat_map(|m| &m.formula_split_masks)
                    .filter(|m| m.query_part == part && m.formula_list_idx == i)
                {
                    expr.replace(&fsm.outer_node_idx, Expr::field(fsm.alias.clone()))
                        .ok_or_else(|| invalid_index(query, part, i, &fsm.outer_node_idx))?;
                    updated = true;
                }
                if part == QueryPart::Filters {
                    let replaced = replace_subtrees(&expr, &base_dims);
                    updated |= replaced != expr;
                    expr = replaced;
                }
            }
            if !updated {
                // Only a filter applied below may disappear here.
                if part == QueryPart::Filters {
                    continue;
                }
                return Err(AssemblyError::UnsplitFormula {
                    query: query.id.clone(),
                    part,
                    alias: formula.alias.clone(),
                });
            }
            out.push(CompiledFormula {
                from_ids: from_ids_of(&expr),
                expr,
                ..formula.clone()
            });
        }
        Ok(out)
    };

    let none = BTreeSet::new();
    let mut cropped = query.clone();
    cropped.select = crop(QueryPart::Select, &none)?;
    cropped.group_by = crop(QueryPart::GroupBy, &none)?;
    cropped.order_by = crop(QueryPart::OrderBy, &none)?;
    cropped.filters = crop(QueryPart::Filters, &base.filter_indices)?;

    cropped.joined_from = JoinedFrom {
        root_from_id: base.subquery_id.clone(),
        froms: masks
            .iter()
            .map(|m| FromObject::Subquery {
                id: m.subquery_id.clone(),
                query_id: m.subquery_id.clone(),
                columns: m.column_aliases(),
            })
            .collect(),
    };
    cropped.join_on = masks[1..]
        .iter()
        .filter_map(|other| join_on_base(base, other))
        .collect();
    Ok(cropped)
}
