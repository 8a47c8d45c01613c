//! Sets of dialects a translation variant applies to.

use std::fmt;
use std::ops::BitOr;

use crate::sql::dialect::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DialectSet(u8);

impl DialectSet {
    pub const EMPTY: DialectSet = DialectSet(0);
    pub const ALL: DialectSet = DialectSet((1 << Dialect::ALL.len()) - 1);

    pub fn only(dialect: Dialect) -> Self {
        DialectSet(1 << dialect.index())
    }

    pub fn of(dialects: &[Dialect]) -> Self {
        dialects.iter().fold(Self::EMPTY, |set, d| set | Self::only(*d))
    }

    pub fn except(dialects: &[Dialect]) -> Self {
        DialectSet(Self::ALL.0 & !Self::of(dialects).0)
    }

    pub fn contains(self, dialect: Dialect) -> bool {
        self.0 & (1 << dialect.index()) != 0
    }

    pub fn overlaps(self, other: DialectSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Dialect> {
        Dialect::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl BitOr for DialectSet {
    type Output = DialectSet;

    fn bitor(self, rhs: DialectSet) -> DialectSet {
        DialectSet(self.0 | rhs.0)
    }
}

impl From<Dialect> for DialectSet {
    fn from(dialect: Dialect) -> Self {
        Self::only(dialect)
    }
}

impl fmt::Display for DialectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ALL {
            return f.write_str("*");
        }
        let names: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let set = DialectSet::except(&[Dialect::MySql]);
        assert!(set.contains(Dialect::Postgres));
        assert!(!set.contains(Dialect::MySql));
        assert!(set.overlaps(DialectSet::only(Dialect::ClickHouse)));
        assert!(!set.overlaps(Dialect::MySql.into()));
        assert_eq!(set.iter().count(), Dialect::ALL.len() - 1);
        assert!(DialectSet::EMPTY.is_empty());
        assert_eq!(DialectSet::ALL.to_string(), "*");
    }
}
