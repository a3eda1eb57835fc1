use crate::domains::*;

/// How a referenced object may be modified. The variants form a chain, the
/// later ones allow more.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mutability {
    /// Nobody can modify the object.
    Unmodifiable,
    /// This reference cannot be used to modify it, others may.
    UnmodifiableView,
    /// The object is not supposed to be modified, though it might be.
    MustNotModify,
    Unknown,
}

impl Display for Mutability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl JoinSemiLattice for Mutability {
    fn join(&self, other: &Self) -> Self {
        *self.max(other)
    }
}

impl Fact for Mutability {
    fn unknown() -> Self {
        Mutability::Unknown
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        Some(*self.min(other))
    }
}
