use core::cmp::Ordering;
use core::fmt::{Debug, Display};
use core::hash::Hash;

use itertools::Itertools;

/////////////////////////
// Traits for domains. //
/////////////////////////

/// A join semi-lattice is a partially ordered set where the least upper bound
/// exists for every pair of elements. The ordering relation is read as "safe
/// approximation": a larger element describes more concrete values. Every fact
/// kind tracked by the engine is one of these.
pub trait JoinSemiLattice: Eq + PartialOrd + Clone + Debug {
    /// Least upper bound of two elements. Used when states are merged.
    ///
    /// Requirements:
    /// * Reflexive: a.join(a) == a
    /// * Commutative: a.join(b) == b.join(a)
    /// * Upper bound: a.join(b) >= a and a.join(b) >= b
    /// * Ordering is respected: a <= b => a.join(b) == b
    fn join(&self, other: &Self) -> Self;

    /// Widening for domains with long ascending chains. The default keeps the
    /// current element, which is fine for finite domains.
    ///
    /// Requirements:
    /// * Reflexive: a.widen(a, i) == a
    /// * Upper bound: a.widen(b, i) >= a and a.widen(b, i) >= b
    fn widen(&self, _previous: &Self, _iteration: usize) -> Self {
        self.clone()
    }
}

/// A kind of fact that can be attached to a value. Facts are lattices where
/// [`Fact::unknown`] is the element standing for "nothing is known", which is
/// what an absent entry of a [`FactMap`] means. Meets can fail: a `None`
/// intersection is a contradiction and makes the current path infeasible.
///
/// Note that `unknown` is not necessarily the greatest element of the join
/// order. For nullability, joining a null path with an unknown one yields
/// [`Nullability::Nullable`], which records that null was actually observed.
pub trait Fact: JoinSemiLattice + Hash + Display {
    /// The fact that an unconstrained value carries.
    fn unknown() -> Self;

    /// Greatest lower bound, or `None` when the two facts are contradictory.
    ///
    /// * Commutative: a.intersect(b) == b.intersect(a)
    /// * Unknown is unit: unknown.intersect(b) == Some(b)
    fn intersect(&self, other: &Self) -> Option<Self>;

    /// Whether every value described by `other` is also described by `self`.
    fn is_super_of(&self, other: &Self) -> bool {
        matches!(
            self.partial_cmp(other),
            Some(Ordering::Greater | Ordering::Equal)
        )
    }

    fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

/// Binary relations between two values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    /// The relation that holds exactly when `self` does not.
    pub fn negate(self) -> Self {
        match self {
            Relation::Eq => Relation::Ne,
            Relation::Ne => Relation::Eq,
            Relation::Lt => Relation::Ge,
            Relation::Le => Relation::Gt,
            Relation::Gt => Relation::Le,
            Relation::Ge => Relation::Lt,
        }
    }

    /// The relation with swapped operands: `a < b` iff `b > a`.
    pub fn flip(self) -> Self {
        match self {
            Relation::Lt => Relation::Gt,
            Relation::Le => Relation::Ge,
            Relation::Gt => Relation::Lt,
            Relation::Ge => Relation::Le,
            other => other,
        }
    }

    /// Evaluates the relation on an ordering of the two operands.
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Relation::Eq => ordering.is_eq(),
            Relation::Ne => ordering.is_ne(),
            Relation::Lt => ordering.is_lt(),
            Relation::Le => ordering.is_le(),
            Relation::Gt => ordering.is_gt(),
            Relation::Ge => ordering.is_ge(),
        }
    }

    /// Whether knowing `self` is enough to conclude `other`.
    pub fn implies(self, other: Relation) -> bool {
        use Relation::*;
        self == other
            || matches!(
                (self, other),
                (Eq, Le | Ge) | (Lt, Le | Ne) | (Gt, Ge | Ne)
            )
    }

    /// Whether both relations can hold between the same two values.
    pub fn compatible_with(self, other: Relation) -> bool {
        use Relation::*;
        !matches!(
            (self, other),
            (Eq, Ne | Lt | Gt)
                | (Ne, Eq)
                | (Lt, Eq | Gt | Ge)
                | (Le, Gt)
                | (Gt, Eq | Lt | Le)
                | (Ge, Lt)
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Eq => "==",
            Relation::Ne => "!=",
            Relation::Lt => "<",
            Relation::Le => "<=",
            Relation::Gt => ">",
            Relation::Ge => ">=",
        }
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Identifies one slot of a [`FactMap`] together with the type of the fact
/// stored there, so lookups are checked at compile time.
pub trait FactKey: Copy + Debug {
    type Fact: Fact;

    const NAME: &'static str;

    fn slot(map: &FactMap) -> &Option<Self::Fact>;

    fn slot_mut(map: &mut FactMap) -> &mut Option<Self::Fact>;
}

macro_rules! fact_map {
    ($($field:ident: $fact:ty),* $(,)?) => {
        paste::paste! {
            /// Facts known about a single value. Missing entries are unknown, so
            /// the default map is the unconstrained one. Unknown facts are never
            /// stored, which keeps equality and hashing structural.
            #[derive(Clone, Default, PartialEq, Eq, Hash)]
            pub struct FactMap {
                $($field: Option<$fact>,)*
            }

            $(
                #[derive(Clone, Copy, Debug, PartialEq, Eq)]
                pub struct [<$field:camel Key>];

                pub const [<$field:upper>]: [<$field:camel Key>] = [<$field:camel Key>];

                impl FactKey for [<$field:camel Key>] {
                    type Fact = $fact;

                    const NAME: &'static str = stringify!($field);

                    fn slot(map: &FactMap) -> &Option<$fact> {
                        &map.$field
                    }

                    fn slot_mut(map: &mut FactMap) -> &mut Option<$fact> {
                        &mut map.$field
                    }
                }
            )*

            impl FactMap {
                /// Pointwise intersection, `None` if any fact kind contradicts.
                pub fn intersect(&self, other: &Self) -> Option<Self> {
                    Some(Self {
                        $($field: intersect_slot(&self.$field, &other.$field)?,)*
                    })
                }

                /// Pointwise join, dropping the kinds that become unknown.
                pub fn union(&self, other: &Self) -> Self {
                    Self {
                        $($field: join_slot(&self.$field, &other.$field),)*
                    }
                }

                /// Whether every value described by `other` is described by `self`.
                pub fn is_super_of(&self, other: &Self) -> bool {
                    $(super_slot(&self.$field, &other.$field))&&*
                }

                pub fn is_unknown(&self) -> bool {
                    $(self.$field.is_none())&&*
                }

                fn entries(&self) -> Vec<String> {
                    let mut result = Vec::new();
                    $(
                        if let Some(fact) = &self.$field {
                            result.push(fact.to_string());
                        }
                    )*
                    result
                }
            }
        }
    };
}

fact_map! {
    nullability: Nullability,
    range: LongRange,
    truth: Truth,
    type_constraint: TypeConstraint,
    mutability: Mutability,
}

fn intersect_slot<F: Fact>(a: &Option<F>, b: &Option<F>) -> Option<Option<F>> {
    match (a, b) {
        (None, None) => Some(None),
        (Some(x), None) | (None, Some(x)) => Some(Some(x.clone())),
        (Some(x), Some(y)) => x.intersect(y).map(normalize),
    }
}

fn join_slot<F: Fact>(a: &Option<F>, b: &Option<F>) -> Option<F> {
    let a = a.clone().unwrap_or_else(F::unknown);
    let b = b.clone().unwrap_or_else(F::unknown);
    normalize(a.join(&b))
}

fn super_slot<F: Fact>(a: &Option<F>, b: &Option<F>) -> bool {
    match (a, b) {
        (None, None) => true,
        (a, b) => {
            let a = a.clone().unwrap_or_else(F::unknown);
            let b = b.clone().unwrap_or_else(F::unknown);
            a.is_super_of(&b)
        }
    }
}

fn normalize<F: Fact>(fact: F) -> Option<F> {
    if fact.is_unknown() { None } else { Some(fact) }
}

impl FactMap {
    /// The map without any knowledge.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// The stored fact or the unknown fact of that kind.
    pub fn get<K: FactKey>(&self, _key: K) -> K::Fact {
        K::slot(self).clone().unwrap_or_else(K::Fact::unknown)
    }

    /// The stored fact, if anything is known.
    pub fn lookup<K: FactKey>(&self, _key: K) -> Option<&K::Fact> {
        K::slot(self).as_ref()
    }

    pub fn with<K: FactKey>(mut self, _key: K, fact: K::Fact) -> Self {
        *K::slot_mut(&mut self) = normalize(fact);
        self
    }

    pub fn without<K: FactKey>(mut self, _key: K) -> Self {
        *K::slot_mut(&mut self) = None;
        self
    }

    pub fn set<K: FactKey>(&mut self, _key: K, fact: K::Fact) {
        *K::slot_mut(self) = normalize(fact);
    }

    /// Widens the numeric part against the facts seen at an earlier visit.
    pub fn widen(&self, previous: &Self, iteration: usize) -> Self {
        let range = match (&self.range, &previous.range) {
            (Some(current), Some(previous)) => normalize(current.widen(previous, iteration)),
            (current, _) => *current,
        };
        Self {
            range,
            ..self.clone()
        }
    }

    /// Drops numeric bounds that are not implied by the sign of the range.
    pub fn widen_to_sign(&self) -> Self {
        Self {
            range: self.range.and_then(|r| normalize(r.to_sign())),
            ..self.clone()
        }
    }

    /// The single constant this map describes, if there is one.
    pub fn constant(&self) -> Option<crate::values::Constant> {
        use crate::values::Constant;
        if self.nullability == Some(Nullability::Null) {
            return Some(Constant::Null);
        }
        if let Some(truth) = self.truth.and_then(|t| t.as_bool()) {
            return Some(Constant::Bool(truth));
        }
        self.range.and_then(|r| r.as_constant()).map(Constant::Int)
    }

    /// The facts a value must have so that `value <relation> other` can hold,
    /// where `other` is described by `other_facts`.
    pub fn implied_by_relation(relation: Relation, other_facts: &FactMap) -> FactMap {
        let mut result = FactMap::unknown();
        match relation {
            Relation::Eq => {
                result = other_facts.clone().without(MUTABILITY);
            }
            Relation::Ne => {
                if other_facts.nullability == Some(Nullability::Null) {
                    result.set(NULLABILITY, Nullability::NotNull);
                }
                if let Some(truth) = other_facts.truth.and_then(|t| t.as_bool()) {
                    result.set(TRUTH, Truth::from(!truth));
                }
            }
            _ => {}
        }
        if let Some(range) = &other_facts.range {
            let limit = LongRange::satisfying(relation, range);
            result.range = match &result.range {
                Some(current) => current.intersect(&limit).and_then(normalize),
                None => normalize(limit),
            };
        }
        result
    }
}

impl Debug for FactMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for FactMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{{{}}}", self.entries().iter().join(", "))
    }
}

mod nullability;
pub use nullability::*;

mod range;
pub use range::*;

mod truth;
pub use truth::*;

mod type_constraint;
pub use type_constraint::*;

mod mutability;
pub use mutability::*;
