use super::domains::Relation;
use super::equivalence::*;
use super::values::*;

fn vars(values: &ValueFactory, names: &[&str]) -> Vec<ValueId> {
    names
        .iter()
        .map(|name| values.variable(name, ValueType::Int))
        .collect()
}

#[test]
fn distinct_pair_tests() {
    let mut pairs = DistinctPairSet::default();
    assert!(pairs.add_unordered(0, 1));
    assert!(!pairs.add_unordered(2, 2));
    assert!(pairs.are_distinct(1, 0));
    assert_eq!(pairs.relation(0, 1), Some(Relation::Ne));

    assert!(pairs.add_ordered(3, 2));
    assert_eq!(pairs.relation(3, 2), Some(Relation::Lt));
    assert_eq!(pairs.relation(2, 3), Some(Relation::Gt));
    assert_eq!(
        pairs.get(2, 3),
        Some(DistinctPair {
            first: 3,
            second: 2,
            ordered: true
        })
    );

    // 3 < 2 < 4 rules out 4 < 3.
    assert!(pairs.add_ordered(2, 4));
    assert!(!pairs.add_ordered(4, 3));
    assert_eq!(pairs.len(), 3);

    // Uniting distinct classes fails.
    assert!(!pairs.clone().unite(0, 1));

    pairs.remove_class(2);
    assert_eq!(pairs.len(), 1);
    assert!(!pairs.are_distinct(3, 2));
}

#[test]
fn unite_tests() {
    let values = ValueFactory::new();
    let [a, b, c, d] = vars(&values, &["a", "b", "c", "d"])[..] else {
        unreachable!()
    };
    let mut eq = Equivalences::default();

    assert!(eq.unite(a, b));
    assert!(eq.are_equal(a, b));
    assert_eq!(eq.class_members(b), vec![a, b]);
    assert_eq!(eq.class_members(c), vec![c]);
    assert_eq!(eq.relation(b, a), Some(Relation::Eq));

    assert!(eq.mark_distinct(b, c, true));
    assert_eq!(eq.relation(a, c), Some(Relation::Lt));
    assert_eq!(eq.relation(c, a), Some(Relation::Gt));
    assert!(!eq.unite(a, c));
    assert!(!eq.mark_distinct(a, b, false));

    // The relation moves along when classes are united.
    assert!(eq.unite(c, d));
    assert_eq!(eq.relation(a, d), Some(Relation::Lt));
    assert!(!eq.mark_distinct(d, a, true));

    // Removing a member keeps the relations of the rest.
    eq.remove(a);
    assert_eq!(eq.class_members(b), vec![b]);
    assert_eq!(eq.relation(b, d), Some(Relation::Lt));
    assert_eq!(eq.relation(a, d), None);
}

#[test]
fn equality_is_structural() {
    let values = ValueFactory::new();
    let [a, b, c] = vars(&values, &["a", "b", "c"])[..] else {
        unreachable!()
    };

    let mut first = Equivalences::default();
    first.unite(a, b);
    first.mark_distinct(a, c, false);

    // Same relations, created in a different order.
    let mut second = Equivalences::default();
    second.mark_distinct(c, b, false);
    second.unite(b, a);

    assert_eq!(first, second);

    let mut third = second.clone();
    third.mark_distinct(a, c, true);
    assert_ne!(first, third);
}

#[test]
fn subsumption_tests() {
    let values = ValueFactory::new();
    let [a, b, c] = vars(&values, &["a", "b", "c"])[..] else {
        unreachable!()
    };

    let empty = Equivalences::default();
    let mut equal = Equivalences::default();
    equal.unite(a, b);
    let mut ordered = equal.clone();
    ordered.mark_distinct(a, c, true);
    let mut unordered = equal.clone();
    unordered.mark_distinct(c, b, false);

    assert!(empty.is_super_of(&equal));
    assert!(!equal.is_super_of(&empty));
    assert!(equal.is_super_of(&ordered));
    assert!(unordered.is_super_of(&ordered));
    assert!(!ordered.is_super_of(&unordered));
}

#[test]
fn retain_common_tests() {
    let values = ValueFactory::new();
    let [a, b, c, d] = vars(&values, &["a", "b", "c", "d"])[..] else {
        unreachable!()
    };

    let mut left = Equivalences::default();
    left.unite(a, b);
    left.unite(b, c);
    left.mark_distinct(a, d, true);

    let mut right = Equivalences::default();
    right.unite(a, c);
    right.mark_distinct(c, d, false);

    left.retain_common(&right);
    assert!(left.are_equal(a, c));
    assert!(!left.are_equal(a, b));
    // `a < d` weakens to `a != d`, `b` knows nothing about `d` any more.
    assert_eq!(left.relation(a, d), Some(Relation::Ne));
    assert_eq!(left.relation(b, d), None);
    assert!(left.is_super_of(&right));
}

#[test]
fn failed_unite_keeps_state() {
    let values = ValueFactory::new();
    let [a, b, c] = vars(&values, &["a", "b", "c"])[..] else {
        unreachable!()
    };
    let mut eq = Equivalences::default();
    assert!(eq.mark_distinct(a, b, true));
    assert!(eq.mark_distinct(b, c, true));
    let before = eq.clone();

    // a == c would make b both larger and smaller than a.
    assert!(!eq.unite(a, c));
    assert_eq!(eq, before);
    assert_eq!(eq.relation(a, b), Some(Relation::Lt));
    assert_eq!(eq.relation(b, c), Some(Relation::Lt));
    assert_eq!(eq.distinct_pairs().len(), 2);

    let mut pairs = DistinctPairSet::default();
    assert!(pairs.add_ordered(0, 1));
    assert!(pairs.add_ordered(1, 2));
    let snapshot = pairs.clone();
    assert!(!pairs.unite(0, 2));
    assert_eq!(pairs, snapshot);
}

#[test]
fn class_slots_are_reused() {
    let values = ValueFactory::new();
    let [a, b, c, d] = vars(&values, &["a", "b", "c", "d"])[..] else {
        unreachable!()
    };
    let mut eq = Equivalences::default();
    assert!(eq.unite(a, b));
    assert_eq!(eq.class_count(), 1);
    assert!(eq.mark_distinct(c, d, true));
    assert!(eq.mark_distinct(b, d, false));
    assert_eq!(eq.class_count(), 3);

    // Emptying the class of `c` renumbers `d`, its relations follow along.
    eq.remove(c);
    assert_eq!(eq.class_count(), 2);
    assert_eq!(eq.relation(a, d), Some(Relation::Ne));
    assert_eq!(eq.relation(c, d), None);

    for _ in 0..10 {
        assert!(eq.unite(c, d));
        eq.remove(c);
    }
    assert_eq!(eq.class_count(), 2);
    assert_eq!(eq.relation(d, b), Some(Relation::Ne));
}
