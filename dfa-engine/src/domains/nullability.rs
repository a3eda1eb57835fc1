use crate::domains::*;

/// What is known about a reference being null.
///
/// ```txt
///          Nullable
///          /      \
///      Flushed     \
///         |         \
///      Unknown       |
///         |          |
///      NotNull      Null
/// ```
///
/// `Unknown` carries no information. `Flushed` is an unknown reference that
/// used to have a known nullability before an impure call invalidated it.
/// `Nullable` means null was observed on at least one merged path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Nullability {
    Null,
    NotNull,
    Unknown,
    Flushed,
    Nullable,
}

impl Nullability {
    /// Nullability of a value after the knowledge about it was invalidated.
    pub fn flushed(self) -> Self {
        match self {
            Nullability::Nullable => Nullability::Nullable,
            Nullability::Unknown => Nullability::Unknown,
            _ => Nullability::Flushed,
        }
    }

    /// Whether the value may be null without anybody having proven it.
    pub fn may_be_null(self) -> bool {
        !matches!(self, Nullability::NotNull)
    }
}

impl Display for Nullability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl PartialOrd for Nullability {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        let joined = self.join(other);
        if joined == *other {
            Some(Ordering::Less)
        } else if joined == *self {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl JoinSemiLattice for Nullability {
    fn join(&self, other: &Self) -> Self {
        use Nullability::*;
        match (*self, *other) {
            (a, b) if a == b => a,
            (Null | Nullable, _) | (_, Null | Nullable) => Nullable,
            (Flushed, _) | (_, Flushed) => Flushed,
            _ => Unknown,
        }
    }
}

impl Fact for Nullability {
    fn unknown() -> Self {
        Nullability::Unknown
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        use Nullability::*;
        match (*self, *other) {
            (a, b) if a == b => Some(a),
            (Null, NotNull) | (NotNull, Null) => None,
            (NotNull, _) | (_, NotNull) => Some(NotNull),
            (Null, _) | (_, Null) => Some(Null),
            (Nullable, _) | (_, Nullable) => Some(Nullable),
            (Flushed, _) | (_, Flushed) => Some(Flushed),
            _ => Some(Unknown),
        }
    }
}
