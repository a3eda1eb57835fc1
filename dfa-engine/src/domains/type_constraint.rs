use std::collections::BTreeSet;

use crate::domains::*;

/// Named types a reference is known to be an instance of, and named types it
/// is known not to be an instance of. Types are opaque names here, there is
/// no subtyping knowledge, so only literal clashes are contradictions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TypeConstraint {
    pub instance_of: BTreeSet<String>,
    pub not_instance_of: BTreeSet<String>,
}

impl TypeConstraint {
    pub fn instance_of(name: &str) -> Self {
        Self {
            instance_of: BTreeSet::from([name.to_owned()]),
            not_instance_of: BTreeSet::new(),
        }
    }

    pub fn not_instance_of(name: &str) -> Self {
        Self {
            instance_of: BTreeSet::new(),
            not_instance_of: BTreeSet::from([name.to_owned()]),
        }
    }
}

impl Display for TypeConstraint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let positive = self.instance_of.iter().map(|t| format!("instanceof {t}"));
        let negative = self.not_instance_of.iter().map(|t| format!("!instanceof {t}"));
        write!(f, "{}", positive.chain(negative).join(" "))
    }
}

impl PartialOrd for TypeConstraint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        // Fewer constraints describe more values.
        let le = self.instance_of.is_superset(&other.instance_of)
            && self.not_instance_of.is_superset(&other.not_instance_of);
        let ge = other.instance_of.is_superset(&self.instance_of)
            && other.not_instance_of.is_superset(&self.not_instance_of);
        match (le, ge) {
            (true, _) => Some(Ordering::Less),
            (_, true) => Some(Ordering::Greater),
            _ => None,
        }
    }
}

impl JoinSemiLattice for TypeConstraint {
    fn join(&self, other: &Self) -> Self {
        Self {
            instance_of: self
                .instance_of
                .intersection(&other.instance_of)
                .cloned()
                .collect(),
            not_instance_of: self
                .not_instance_of
                .intersection(&other.not_instance_of)
                .cloned()
                .collect(),
        }
    }
}

impl Fact for TypeConstraint {
    fn unknown() -> Self {
        Self::default()
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        let result = Self {
            instance_of: self.instance_of.union(&other.instance_of).cloned().collect(),
            not_instance_of: self
                .not_instance_of
                .union(&other.not_instance_of)
                .cloned()
                .collect(),
        };
        result
            .instance_of
            .is_disjoint(&result.not_instance_of)
            .then_some(result)
    }
}
