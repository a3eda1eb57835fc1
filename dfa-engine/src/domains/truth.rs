use crate::domains::*;

/// Boolean knowledge: `Unknown` is above both constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl From<bool> for Truth {
    fn from(val: bool) -> Self {
        if val { Truth::True } else { Truth::False }
    }
}

impl Truth {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Truth::True => Some(true),
            Truth::False => Some(false),
            Truth::Unknown => None,
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }
}

impl Display for Truth {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Truth::True => f.write_str("true"),
            Truth::False => f.write_str("false"),
            Truth::Unknown => f.write_str("bool"),
        }
    }
}

impl PartialOrd for Truth {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (a, b) if a == b => Some(Ordering::Equal),
            (Truth::Unknown, _) => Some(Ordering::Greater),
            (_, Truth::Unknown) => Some(Ordering::Less),
            _ => None,
        }
    }
}

impl JoinSemiLattice for Truth {
    fn join(&self, other: &Self) -> Self {
        if self == other { *self } else { Truth::Unknown }
    }
}

impl Fact for Truth {
    fn unknown() -> Self {
        Truth::Unknown
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (a, b) if a == b => Some(*a),
            (Truth::Unknown, x) | (x, Truth::Unknown) => Some(*x),
            _ => None,
        }
    }
}
