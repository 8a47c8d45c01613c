use crate::formula::Expr;

/// Hands out level aliases for every formula of one query.
///
/// Aliases look like `res_{iteration}_{level}_{n}`. Identical expressions
/// registered on the same level get the same alias, so shared sub-expressions
/// of different formulas are computed once.
#[derive(Debug, Clone, Default)]
pub struct AliasGenerator {
    iteration_id: u32,
    levels: Vec<Vec<(Expr, String)>>,
}

impl AliasGenerator {
    pub fn new(iteration_id: u32) -> Self {
        Self {
            iteration_id,
            levels: Vec::new(),
        }
    }

    pub fn iteration_id(&self) -> u32 {
        self.iteration_id
    }

    /// Alias of `expr` on `level`, creating one if needed.
    pub fn register(&mut self, level: usize, expr: &Expr) -> String {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
        let entries = &mut self.levels[level];
        if let Some((_, alias)) = entries.iter().find(|(e, _)| e == expr) {
            return alias.clone();
        }
        let alias = format!("res_{}_{}_{}", self.iteration_id, level, entries.len());
        entries.push((expr.clone(), alias.clone()));
        alias
    }

    pub fn alias_count(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, Vec::len)
    }
}
