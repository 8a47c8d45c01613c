//! Return type strategies.

use super::{get_common_cast_type, DataType, DataTypeParams, TypeError, TypeKind, TypeResult};

/// Computes a call's return type from its resolved argument types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeStrategy {
    /// Always this type.
    Fixed(DataType),
    /// Common cast of the listed arguments; an empty list means all of them.
    FromArgs(Vec<usize>),
    /// Common cast of the sub-strategy results.
    Combined(Vec<TypeStrategy>),
    /// `CASE(subject, when_1, then_1, ..., when_n, then_n, else)`
    Case,
    /// `IF(cond_1, value_1, ..., cond_n, value_n, else)`
    If,
    /// Type from `base`, type parameters copied from argument `source`.
    ParamsFromArgs {
        base: Box<TypeStrategy>,
        source: usize,
    },
}

impl TypeStrategy {
    pub fn get_from_args(&self, args: &[DataType]) -> TypeResult<DataType> {
        match self {
            TypeStrategy::Fixed(t) => Ok(*t),
            TypeStrategy::FromArgs(indices) => {
                let picked: Vec<DataType> = if indices.is_empty() {
                    args.to_vec()
                } else {
                    indices
                        .iter()
                        .map(|&i| {
                            args.get(i).copied().ok_or(TypeError::ArgumentOutOfRange {
                                position: i,
                                count: args.len(),
                            })
                        })
                        .collect::<TypeResult<_>>()?
                };
                if picked.is_empty() {
                    return Err(TypeError::NoArgumentsForReturnType);
                }
                get_common_cast_type(&picked)
            }
            TypeStrategy::Combined(parts) => {
                let types = parts
                    .iter()
                    .map(|p| p.get_from_args(args))
                    .collect::<TypeResult<Vec<_>>>()?;
                get_common_cast_type(&types)
            }
            TypeStrategy::Case => case_type(args),
            TypeStrategy::If => if_type(args),
            TypeStrategy::ParamsFromArgs { base, .. } => base.get_from_args(args),
        }
    }

    /// Type parameters of the result; only [`TypeStrategy::ParamsFromArgs`] carries any.
    pub fn params_from_args(&self, params: &[DataTypeParams]) -> DataTypeParams {
        match self {
            TypeStrategy::ParamsFromArgs { source, .. } => {
                params.get(*source).cloned().unwrap_or_default()
            }
            _ => DataTypeParams::default(),
        }
    }
}

fn case_type(args: &[DataType]) -> TypeResult<DataType> {
    if args.len() < 4 || args.len() % 2 != 0 {
        return Err(TypeError::InvalidArity {
            function: "CASE".into(),
            expected: "an even number (at least 4: value, WHEN, THEN, ELSE)".into(),
            got: args.len(),
        });
    }
    let (subject, rest) = (args[0], &args[1..]);
    let (branches, else_type) = rest.split_at(rest.len() - 1);

    let mut whens = vec![subject];
    whens.extend(branches.iter().step_by(2));
    get_common_cast_type(&whens)?;

    let mut results: Vec<DataType> = branches.iter().skip(1).step_by(2).copied().collect();
    results.extend_from_slice(else_type);
    get_common_cast_type(&results)
}

fn if_type(args: &[DataType]) -> TypeResult<DataType> {
    if args.len() < 3 || args.len() % 2 != 1 {
        return Err(TypeError::InvalidArity {
            function: "IF".into(),
            expected: "an odd number (at least 3: condition, THEN, ELSE)".into(),
            got: args.len(),
        });
    }
    let (branches, else_type) = args.split_at(args.len() - 1);
    for (n, cond) in branches.iter().step_by(2).enumerate() {
        if !matches!(cond.kind, TypeKind::Boolean | TypeKind::Null) {
            return Err(TypeError::InvalidArgument {
                function: "IF".into(),
                position: n * 2,
                expected: "BOOLEAN".into(),
                got: *cond,
            });
        }
    }
    let mut results: Vec<DataType> = branches.iter().skip(1).step_by(2).copied().collect();
    results.extend_from_slice(else_type);
    get_common_cast_type(&results)
}
