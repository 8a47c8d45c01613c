//! Registry construction and overload resolution across the builtin library.

use formula_slicer::registry::{
    FunctionDefinition, Registry, RegistryBuilder, RegistryError, Renderer, Scopes,
    TranslationVariant,
};
use formula_slicer::sql::{col, Dialect};
use formula_slicer::types::{ArgType, ArgTypeMatcher, DataType, TypeError, TypeKind, TypeStrategy};

fn passthrough() -> Renderer {
    Renderer::new("passthrough", |ctx| Ok(ctx.args[0].clone()))
}

fn int_pair() -> ArgTypeMatcher {
    ArgTypeMatcher::fixed(vec![
        ArgType::one(DataType::INTEGER),
        ArgType::one(DataType::INTEGER),
    ])
}

/// Every argument list of up to `max_len` values.
fn argument_lists(max_len: usize) -> Vec<Vec<DataType>> {
    let mut lists = vec![vec![]];
    let mut frontier = vec![vec![]];
    for _ in 0..max_len {
        frontier = frontier
            .iter()
            .flat_map(|prefix: &Vec<DataType>| {
                DataType::all().map(move |t| {
                    let mut next = prefix.clone();
                    next.push(t);
                    next
                })
            })
            .collect();
        lists.extend(frontier.iter().cloned());
    }
    lists
}

#[test]
fn test_overlapping_variants_are_rejected() {
    let mut builder = RegistryBuilder::new();
    builder
        .register(
            FunctionDefinition::new("PICK")
                .with_id("pick_a")
                .returns(TypeStrategy::FromArgs(vec![0]))
                .variant(Dialect::Postgres, int_pair(), passthrough()),
        )
        .unwrap();

    let err = builder
        .register(
            FunctionDefinition::new("PICK")
                .with_id("pick_b")
                .returns(TypeStrategy::FromArgs(vec![1]))
                .variant(Dialect::Postgres, int_pair(), passthrough()),
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::Conflict { .. }));

    // Same matcher, disjoint dialects.
    builder
        .register(
            FunctionDefinition::new("PICK")
                .with_id("pick_mysql")
                .returns(TypeStrategy::FromArgs(vec![0]))
                .variant(Dialect::MySql, int_pair(), passthrough()),
        )
        .unwrap();
    let registry = builder.build();
    assert_eq!(registry.definitions().len(), 2);
}

#[test]
fn test_register_function_from_parts() {
    let mut builder = RegistryBuilder::new();
    builder
        .register_function(
            "first",
            Scopes::NON_WINDOW,
            TypeStrategy::FromArgs(vec![0]),
            vec![TranslationVariant::new(Dialect::DuckDb, int_pair(), passthrough())],
        )
        .unwrap();
    let registry = builder.build();

    let resolved = registry
        .resolve("FIRST", false, Dialect::DuckDb, &[DataType::INTEGER, DataType::INTEGER])
        .unwrap();
    assert_eq!(resolved.return_type, DataType::INTEGER);
    assert!(matches!(
        registry.resolve("FIRST", false, Dialect::Postgres, &[DataType::INTEGER, DataType::INTEGER]),
        Err(TypeError::NoMatchingOverload { .. })
    ));
    assert!(matches!(
        registry.resolve("FIRST", true, Dialect::DuckDb, &[DataType::INTEGER]),
        Err(TypeError::UnknownFunction { is_window: true, .. })
    ));
}

#[test]
fn test_builtin_scopes() {
    let registry = Registry::default_shared();
    assert!(registry.is_aggregate("sum"));
    assert!(!registry.is_aggregate("IFNULL"));
    let rsum = registry.scopes("RSUM", true).unwrap();
    assert!(rsum.contains(Scopes::WINDOW));
    assert!(rsum.contains(Scopes::SUPPORTS_ORDERING));
    assert!(registry
        .scopes("SUM", false)
        .is_some_and(|s| s.contains(Scopes::SUPPORTS_LOD)));
}

#[test]
fn test_source_capabilities() {
    let registry = Registry::default_shared();
    assert!(registry.is_forkable_source(Dialect::Postgres));
    assert!(!registry.is_forkable_source(Dialect::MySql));
    assert!(registry.is_compeng_executable(Dialect::Postgres));
}

#[test]
fn test_builtin_resolution_picks_one_variant_or_reports_ambiguity() {
    let registry = Registry::default_shared();
    let mut names: Vec<(&str, bool)> = registry
        .definitions()
        .iter()
        .map(|d| (d.name.as_str(), d.is_window))
        .collect();
    names.sort();
    names.dedup();
    let lists = argument_lists(2);

    for (name, is_window) in names {
        for dialect in Dialect::ALL {
            let variants: Vec<&TranslationVariant> = registry
                .definitions()
                .iter()
                .filter(|d| d.name == name && d.is_window == is_window)
                .flat_map(|d| d.variants.iter())
                .filter(|v| v.dialects.contains(dialect))
                .collect();

            for args in &lists {
                let costs: Vec<(&TranslationVariant, u32)> = variants
                    .iter()
                    .filter_map(|v| v.args.match_cost(args).map(|c| (*v, c)))
                    .collect();
                let Some(best) = costs.iter().map(|(_, c)| *c).min() else {
                    continue;
                };
                let tied: Vec<&TranslationVariant> = costs
                    .iter()
                    .filter(|(_, c)| *c == best)
                    .map(|(v, _)| *v)
                    .collect();
                let unique = tied
                    .iter()
                    .all(|v| v.args.same_signature(&tied[0].args));

                match registry.resolve(name, is_window, dialect, args) {
                    Ok(resolved) => {
                        assert!(unique, "{name}({args:?}) on {dialect} hid a tie between {} variants", tied.len());
                        assert_eq!(resolved.variant.args.match_cost(args), Some(best));
                    }
                    Err(TypeError::AmbiguousOverload { candidates, .. }) => {
                        assert!(!unique, "{name}({args:?}) on {dialect} has one best variant");
                        assert_eq!(candidates, tied.len());
                        // Only an untyped NULL can widen into two builtin signatures at once.
                        assert_eq!(args[0].kind, TypeKind::Null, "{name}({args:?}) on {dialect}");
                    }
                    // Return type strategies may still refuse the argument list.
                    Err(_) => {}
                }
            }
        }
    }
}

#[test]
fn test_sum_lowers_for_every_dialect() {
    let registry = Registry::default_shared();
    for dialect in Dialect::ALL {
        let sql = registry
            .lower("SUM", false, dialect, vec![col("amount")], &[DataType::FLOAT], None)
            .unwrap()
            .to_sql(dialect);
        assert!(sql.to_ascii_uppercase().starts_with("SUM("), "{dialect}: {sql}");
    }
}
