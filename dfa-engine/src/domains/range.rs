use crate::domains::*;

pub const INF: i64 = i64::MAX;
pub const NEG_INF: i64 = i64::MIN;

/// An interval of 64-bit integers. The extreme values of `i64` stand for the
/// infinities, so `[NEG_INF, INF]` is the unknown range. Empty intervals are
/// never constructed, contradictions are reported by [`Fact::intersect`].
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub struct LongRange {
    pub min: i64,
    pub max: i64,
}

impl From<i64> for LongRange {
    fn from(val: i64) -> Self {
        Self { min: val, max: val }
    }
}

impl Display for LongRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let to_str = |x: i64| match x {
            INF => "inf".to_owned(),
            NEG_INF => "-inf".to_owned(),
            _ => x.to_string(),
        };
        write!(f, "[{}, {}]", to_str(self.min), to_str(self.max))
    }
}

impl PartialOrd for LongRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        if self.min <= other.min && self.max >= other.max {
            return Some(Ordering::Greater);
        }
        if self.min >= other.min && self.max <= other.max {
            return Some(Ordering::Less);
        }

        None
    }
}

impl JoinSemiLattice for LongRange {
    fn join(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    fn widen(&self, prev: &Self, _: usize) -> Self {
        Self {
            min: if prev.min > self.min {
                NEG_INF
            } else {
                self.min
            },
            max: if prev.max < self.max { INF } else { self.max },
        }
    }
}

impl Fact for LongRange {
    fn unknown() -> Self {
        Self {
            min: NEG_INF,
            max: INF,
        }
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        let result = LongRange {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        };
        (result.min <= result.max).then_some(result)
    }
}

impl LongRange {
    pub fn new(min: i64, max: i64) -> Self {
        debug_assert!(min <= max);
        Self { min, max }
    }

    pub fn as_constant(&self) -> Option<i64> {
        (self.min == self.max && self.min != INF && self.min != NEG_INF).then_some(self.min)
    }

    /// All values `x` for which `x <relation> y` holds for at least one `y`
    /// in `other`.
    pub fn satisfying(relation: Relation, other: &LongRange) -> LongRange {
        match relation {
            Relation::Eq => *other,
            Relation::Ne => LongRange::unknown(),
            Relation::Lt => LongRange {
                min: NEG_INF,
                max: dec(other.max),
            },
            Relation::Le => LongRange {
                min: NEG_INF,
                max: other.max,
            },
            Relation::Gt => LongRange {
                min: inc(other.min),
                max: INF,
            },
            Relation::Ge => LongRange {
                min: other.min,
                max: INF,
            },
        }
    }

    /// Narrows `self` so that `self <relation> other` can hold, or returns
    /// `None` when no value in `self` satisfies it. Inequality against a
    /// constant can only cut off the bounds of the interval.
    pub fn meet_relation(&self, relation: Relation, other: &LongRange) -> Option<LongRange> {
        if relation == Relation::Ne {
            let Some(excluded) = other.as_constant() else {
                return Some(*self);
            };
            return match (self.min == excluded, self.max == excluded) {
                (true, true) => None,
                (true, false) => Some(LongRange::new(excluded + 1, self.max)),
                (false, true) => Some(LongRange::new(self.min, excluded - 1)),
                (false, false) => Some(*self),
            };
        }
        if (relation == Relation::Lt && other.max == NEG_INF)
            || (relation == Relation::Gt && other.min == INF)
        {
            return None;
        }
        self.intersect(&LongRange::satisfying(relation, other))
    }

    /// Whether `self <relation> other` holds for every pair of values, fails
    /// for every pair, or neither.
    pub fn evaluate(&self, relation: Relation, other: &LongRange) -> Option<bool> {
        let always = match relation {
            Relation::Eq => self.as_constant().is_some() && self == other,
            Relation::Ne => self.max < other.min || self.min > other.max,
            Relation::Lt => self.max < other.min,
            Relation::Le => self.max <= other.min,
            Relation::Gt => self.min > other.max,
            Relation::Ge => self.min >= other.max,
        };
        if always {
            return Some(true);
        }
        let never = match relation {
            Relation::Eq => self.max < other.min || self.min > other.max,
            Relation::Ne => self.as_constant().is_some() && self == other,
            Relation::Lt => self.min >= other.max,
            Relation::Le => self.min > other.max,
            Relation::Gt => self.max <= other.min,
            Relation::Ge => self.max < other.min,
        };
        if never { Some(false) } else { None }
    }

    /// Keeps only the sign information of the interval.
    pub fn to_sign(self) -> LongRange {
        if self.min >= 0 {
            LongRange { min: 0, max: INF }
        } else if self.max < 0 {
            LongRange {
                min: NEG_INF,
                max: -1,
            }
        } else {
            LongRange::unknown()
        }
    }
}

fn inc(x: i64) -> i64 {
    if x == INF || x == NEG_INF { x } else { x + 1 }
}

fn dec(x: i64) -> i64 {
    if x == INF || x == NEG_INF { x } else { x - 1 }
}

fn clamp(x: i128) -> i64 {
    if x >= INF as i128 {
        INF
    } else if x <= NEG_INF as i128 {
        NEG_INF
    } else {
        x as i64
    }
}

fn is_infinite(x: i64) -> bool {
    x == INF || x == NEG_INF
}

fn mul_bound(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 {
        return 0;
    }
    if is_infinite(a) || is_infinite(b) {
        return if (a > 0) == (b > 0) { INF } else { NEG_INF };
    }
    clamp(a as i128 * b as i128)
}

impl core::ops::Add<LongRange> for LongRange {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            min: if self.min == NEG_INF || rhs.min == NEG_INF {
                NEG_INF
            } else {
                clamp(self.min as i128 + rhs.min as i128)
            },
            max: if self.max == INF || rhs.max == INF {
                INF
            } else {
                clamp(self.max as i128 + rhs.max as i128)
            },
        }
    }
}

impl core::ops::Neg for LongRange {
    type Output = Self;

    fn neg(self) -> Self {
        let negate = |x: i64| match x {
            INF => NEG_INF,
            NEG_INF => INF,
            _ => -x,
        };
        Self {
            min: negate(self.max),
            max: negate(self.min),
        }
    }
}

impl core::ops::Sub<LongRange> for LongRange {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl core::ops::Mul<LongRange> for LongRange {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let products = [
            mul_bound(self.min, rhs.min),
            mul_bound(self.min, rhs.max),
            mul_bound(self.max, rhs.min),
            mul_bound(self.max, rhs.max),
        ];
        Self {
            min: products.iter().copied().min().unwrap_or(NEG_INF),
            max: products.iter().copied().max().unwrap_or(INF),
        }
    }
}
