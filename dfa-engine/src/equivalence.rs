use core::hash::{Hash, Hasher};
use std::collections::HashMap;

use itertools::Itertools;

use crate::domains::Relation;
use crate::values::ValueId;

/// A set of values known to be equal, kept sorted. The smallest handle is the
/// canonical representative.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EqClass(Vec<ValueId>);

impl EqClass {
    pub fn new(value: ValueId) -> Self {
        Self(vec![value])
    }

    pub fn contains(&self, value: ValueId) -> bool {
        self.0.binary_search(&value).is_ok()
    }

    pub fn insert(&mut self, value: ValueId) {
        if let Err(pos) = self.0.binary_search(&value) {
            self.0.insert(pos, value);
        }
    }

    pub fn remove(&mut self, value: ValueId) {
        if let Ok(pos) = self.0.binary_search(&value) {
            self.0.remove(pos);
        }
    }

    pub fn canonical(&self) -> Option<ValueId> {
        self.0.first().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.0.iter().copied()
    }
}

/// Order stored with a pair. For ordered pairs the class with the lower index
/// is either the smaller (`LowFirst`) or the larger (`HighFirst`) one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum PairOrder {
    Unordered,
    LowFirst,
    HighFirst,
}

/// A decoded distinct pair. When `ordered` holds, `first < second`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DistinctPair {
    pub first: usize,
    pub second: usize,
    pub ordered: bool,
}

impl DistinctPair {
    pub fn other_class(&self, class: usize) -> Option<usize> {
        if self.first == class {
            Some(self.second)
        } else if self.second == class {
            Some(self.first)
        } else {
            None
        }
    }
}

fn pair_key(a: usize, b: usize) -> u64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    ((lo as u64) << 32) | (hi as u64 & 0xffff_ffff)
}

fn decode(key: u64, order: PairOrder) -> DistinctPair {
    let lo = (key >> 32) as usize;
    let hi = (key & 0xffff_ffff) as usize;
    match order {
        PairOrder::Unordered => DistinctPair {
            first: lo,
            second: hi,
            ordered: false,
        },
        PairOrder::LowFirst => DistinctPair {
            first: lo,
            second: hi,
            ordered: true,
        },
        PairOrder::HighFirst => DistinctPair {
            first: hi,
            second: lo,
            ordered: true,
        },
    }
}

/// Pairs of equivalence classes known to hold different values, optionally
/// with a strict order. Pairs are keyed by the two class indices packed into
/// one `u64`, smaller index in the high half.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistinctPairSet {
    pairs: HashMap<u64, PairOrder>,
}

impl Hash for DistinctPairSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for entry in self.pairs.iter().sorted_by_key(|(k, _)| **k) {
            entry.hash(state);
        }
    }
}

impl DistinctPairSet {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Records that two classes differ. Returns false for a class compared
    /// with itself.
    pub fn add_unordered(&mut self, a: usize, b: usize) -> bool {
        if a == b {
            return false;
        }
        self.pairs.entry(pair_key(a, b)).or_insert(PairOrder::Unordered);
        true
    }

    /// Records `smaller < larger`. Returns false if this contradicts a known
    /// ordering, including one implied through a chain of ordered pairs.
    pub fn add_ordered(&mut self, smaller: usize, larger: usize) -> bool {
        if smaller == larger || self.reaches(larger, smaller) {
            return false;
        }
        let order = if smaller < larger {
            PairOrder::LowFirst
        } else {
            PairOrder::HighFirst
        };
        self.pairs.insert(pair_key(smaller, larger), order);
        true
    }

    /// Whether `from < ... < to` follows from the ordered pairs.
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![from];
        while let Some(current) = stack.pop() {
            for pair in self.iter().filter(|p| p.ordered && p.first == current) {
                if pair.second == to {
                    return true;
                }
                if !seen.contains(&pair.second) {
                    seen.push(pair.second);
                    stack.push(pair.second);
                }
            }
        }
        false
    }

    pub fn are_distinct(&self, a: usize, b: usize) -> bool {
        self.pairs.contains_key(&pair_key(a, b))
    }

    pub fn get(&self, a: usize, b: usize) -> Option<DistinctPair> {
        let key = pair_key(a, b);
        self.pairs.get(&key).map(|order| decode(key, *order))
    }

    /// The relation known between the classes `a` and `b`, from `a`'s side.
    pub fn relation(&self, a: usize, b: usize) -> Option<Relation> {
        let pair = self.get(a, b)?;
        Some(match (pair.ordered, pair.first == a) {
            (false, _) => Relation::Ne,
            (true, true) => Relation::Lt,
            (true, false) => Relation::Gt,
        })
    }

    /// Pairs in a deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = DistinctPair> + '_ {
        self.pairs
            .iter()
            .sorted_by_key(|(k, _)| **k)
            .map(|(k, order)| decode(*k, *order))
    }

    /// Moves every pair mentioning `from` over to `into`, used when the two
    /// classes are united. Fails when the classes were distinct, or when the
    /// moved orderings contradict the ones of `into`. The set is unchanged
    /// on failure.
    pub fn unite(&mut self, into: usize, from: usize) -> bool {
        if self.are_distinct(into, from) {
            return false;
        }
        let moved: Vec<DistinctPair> = self
            .iter()
            .filter(|p| p.first == from || p.second == from)
            .collect();
        if moved.is_empty() {
            return true;
        }
        let mut united = self.clone();
        for pair in &moved {
            united.pairs.remove(&pair_key(pair.first, pair.second));
        }
        for pair in moved {
            let replace = |c: usize| if c == from { into } else { c };
            let (first, second) = (replace(pair.first), replace(pair.second));
            let ok = if pair.ordered {
                united.add_ordered(first, second)
            } else {
                united.add_unordered(first, second)
            };
            if !ok {
                return false;
            }
        }
        *self = united;
        true
    }

    /// Renames classes through an order preserving `renumber`. Pairs of
    /// classes mapped to `None` are dropped.
    fn renumber(&mut self, renumber: impl Fn(usize) -> Option<usize>) {
        self.pairs = core::mem::take(&mut self.pairs)
            .into_iter()
            .filter_map(|(key, order)| {
                let pair = decode(key, PairOrder::Unordered);
                let (lo, hi) = (renumber(pair.first)?, renumber(pair.second)?);
                Some((pair_key(lo, hi), order))
            })
            .collect();
    }

    pub fn remove_class(&mut self, class: usize) {
        self.pairs.retain(|k, order| {
            let pair = decode(*k, *order);
            pair.first != class && pair.second != class
        });
    }

    /// Copies every pair of `class` to each class in `parts`.
    pub fn split_class(&mut self, class: usize, parts: &[usize]) {
        let affected: Vec<DistinctPair> = self
            .iter()
            .filter(|p| p.other_class(class).is_some())
            .collect();
        for pair in affected {
            for &part in parts {
                let replace = |c: usize| if c == class { part } else { c };
                let (first, second) = (replace(pair.first), replace(pair.second));
                if pair.ordered {
                    self.add_ordered(first, second);
                } else {
                    self.add_unordered(first, second);
                }
            }
        }
    }
}

/// Equalities and disequalities between values of one memory state.
#[derive(Clone, Debug, Default)]
pub struct Equivalences {
    classes: Vec<Option<EqClass>>,
    index: HashMap<ValueId, usize>,
    distinct: DistinctPairSet,
}

/// Structural form of [`Equivalences`], independent of class numbering.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Canonical {
    classes: Vec<Vec<ValueId>>,
    pairs: Vec<(ValueId, ValueId, bool)>,
}

impl Equivalences {
    pub fn class_index(&self, value: ValueId) -> Option<usize> {
        self.index.get(&value).copied()
    }

    pub fn class(&self, index: usize) -> Option<&EqClass> {
        self.classes.get(index).and_then(|c| c.as_ref())
    }

    /// The class of `value`, or just the value itself.
    pub fn class_members(&self, value: ValueId) -> Vec<ValueId> {
        match self.class_index(value).and_then(|i| self.class(i)) {
            Some(class) => class.iter().collect(),
            None => vec![value],
        }
    }

    pub fn distinct_pairs(&self) -> &DistinctPairSet {
        &self.distinct
    }

    pub fn get_or_create(&mut self, value: ValueId) -> usize {
        if let Some(index) = self.class_index(value) {
            return index;
        }
        let index = self.classes.len();
        self.classes.push(Some(EqClass::new(value)));
        self.index.insert(value, index);
        index
    }

    /// Every value that is in a class of its own or with others.
    pub fn tracked_values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.index.keys().copied()
    }

    pub fn are_equal(&self, a: ValueId, b: ValueId) -> bool {
        a == b
            || matches!((self.class_index(a), self.class_index(b)), (Some(x), Some(y)) if x == y)
    }

    pub fn are_distinct(&self, a: ValueId, b: ValueId) -> bool {
        match (self.class_index(a), self.class_index(b)) {
            (Some(x), Some(y)) => self.distinct.are_distinct(x, y),
            _ => false,
        }
    }

    /// The strongest relation recorded between two values.
    pub fn relation(&self, a: ValueId, b: ValueId) -> Option<Relation> {
        if self.are_equal(a, b) {
            return Some(Relation::Eq);
        }
        let (x, y) = (self.class_index(a)?, self.class_index(b)?);
        self.distinct.relation(x, y)
    }

    /// Merges the classes of `a` and `b`. Returns false if they are known to
    /// be different.
    pub fn unite(&mut self, a: ValueId, b: ValueId) -> bool {
        let x = self.get_or_create(a);
        let y = self.get_or_create(b);
        if x == y {
            return true;
        }
        let (into, from) = if x < y { (x, y) } else { (y, x) };
        if !self.distinct.unite(into, from) {
            return false;
        }
        let Some(moved) = self.classes[from].take() else {
            return true;
        };
        for value in moved.iter() {
            self.index.insert(value, into);
        }
        if let Some(target) = self.classes[into].as_mut() {
            for value in moved.iter() {
                target.insert(value);
            }
        }
        self.compact();
        true
    }

    /// Number of class slots, every one of them holding a class.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Renumbers the classes so no emptied slots remain.
    fn compact(&mut self) {
        if self.classes.iter().all(Option::is_some) {
            return;
        }
        let mut renumbered = vec![None; self.classes.len()];
        let mut classes = Vec::new();
        for (old, class) in core::mem::take(&mut self.classes).into_iter().enumerate() {
            if class.is_some() {
                renumbered[old] = Some(classes.len());
                classes.push(class);
            }
        }
        self.classes = classes;
        for index in self.index.values_mut() {
            if let Some(new) = renumbered[*index] {
                *index = new;
            }
        }
        self.distinct.renumber(|c| renumbered.get(c).copied().flatten());
    }

    /// Records `a != b`, or `a < b` when `ordered`. Fails if the values are
    /// equal or the order contradicts what is known.
    pub fn mark_distinct(&mut self, a: ValueId, b: ValueId, ordered: bool) -> bool {
        if self.are_equal(a, b) {
            return false;
        }
        let x = self.get_or_create(a);
        let y = self.get_or_create(b);
        if ordered {
            self.distinct.add_ordered(x, y)
        } else {
            self.distinct.add_unordered(x, y)
        }
    }

    /// Forgets everything about `value`. Relations of its class stay with the
    /// remaining members.
    pub fn remove(&mut self, value: ValueId) {
        let Some(index) = self.index.remove(&value) else {
            return;
        };
        let now_empty = match self.classes[index].as_mut() {
            Some(class) => {
                class.remove(value);
                class.is_empty()
            }
            None => true,
        };
        if now_empty {
            self.classes[index] = None;
            self.distinct.remove_class(index);
            self.compact();
        }
    }

    fn canonical(&self) -> Canonical {
        let classes = self
            .classes
            .iter()
            .flatten()
            .filter(|c| c.len() > 1)
            .map(|c| c.iter().collect_vec())
            .sorted()
            .collect();
        let representative = |i: usize| self.class(i).and_then(|c| c.canonical());
        let pairs = self
            .distinct
            .iter()
            .filter_map(|p| {
                let (a, b) = (representative(p.first)?, representative(p.second)?);
                Some(match (p.ordered, a <= b) {
                    (true, _) => (a, b, true),
                    (false, true) => (a, b, false),
                    (false, false) => (b, a, false),
                })
            })
            .sorted()
            .collect();
        Canonical { classes, pairs }
    }

    /// Whether every equality and disequality of `self` also holds in
    /// `other`, so `self` describes at least the states `other` does.
    pub fn is_super_of(&self, other: &Equivalences) -> bool {
        for class in self.classes.iter().flatten().filter(|c| c.len() > 1) {
            let mut members = class.iter();
            let Some(first) = members.next() else {
                continue;
            };
            if !members.all(|m| other.are_equal(first, m)) {
                return false;
            }
        }
        self.distinct.iter().all(|pair| {
            let (Some(a), Some(b)) = (
                self.class(pair.first).and_then(|c| c.canonical()),
                self.class(pair.second).and_then(|c| c.canonical()),
            ) else {
                return true;
            };
            match other.relation(a, b) {
                Some(Relation::Lt) => true,
                Some(Relation::Gt) => !pair.ordered,
                Some(Relation::Ne) => !pair.ordered,
                _ => false,
            }
        })
    }

    /// Keeps only what holds in both `self` and `other`: classes are split
    /// into the parts that are also equal in `other`, and distinct pairs
    /// survive when `other` knows them as well.
    pub fn retain_common(&mut self, other: &Equivalences) {
        let old_classes: Vec<(usize, EqClass)> = self
            .classes
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.clone().map(|c| (i, c)))
            .collect();
        for (index, class) in old_classes {
            let mut groups: Vec<Vec<ValueId>> = Vec::new();
            for value in class.iter() {
                match groups
                    .iter_mut()
                    .find(|g| g.first().is_some_and(|&f| other.are_equal(f, value)))
                {
                    Some(group) => group.push(value),
                    None => groups.push(vec![value]),
                }
            }
            if groups.len() <= 1 {
                continue;
            }
            let mut parts = Vec::new();
            for group in groups.iter().skip(1) {
                let new_index = self.classes.len();
                let mut new_class = EqClass::default();
                for &value in group {
                    new_class.insert(value);
                    self.index.insert(value, new_index);
                }
                self.classes.push(Some(new_class));
                parts.push(new_index);
            }
            if let Some(kept) = self.classes[index].as_mut() {
                for group in groups.iter().skip(1) {
                    for &value in group {
                        kept.remove(value);
                    }
                }
            }
            self.distinct.split_class(index, &parts);
        }

        let pairs: Vec<DistinctPair> = self.distinct.iter().collect();
        for pair in pairs {
            let (Some(a), Some(b)) = (
                self.class(pair.first).and_then(|c| c.canonical()),
                self.class(pair.second).and_then(|c| c.canonical()),
            ) else {
                continue;
            };
            let mine = if pair.ordered {
                Relation::Lt
            } else {
                Relation::Ne
            };
            let theirs = other.relation(a, b);
            let kept = match (mine, theirs) {
                (Relation::Lt, Some(Relation::Lt)) => Some(true),
                (_, Some(Relation::Lt | Relation::Gt | Relation::Ne)) => Some(false),
                _ => None,
            };
            let key = pair_key(pair.first, pair.second);
            match kept {
                Some(true) => {}
                Some(false) => {
                    self.distinct.pairs.insert(key, PairOrder::Unordered);
                }
                None => {
                    self.distinct.pairs.remove(&key);
                }
            }
        }
    }
}

impl PartialEq for Equivalences {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Equivalences {}

impl Hash for Equivalences {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}
