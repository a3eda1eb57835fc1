use core::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::domains::*;
use crate::equivalence::Equivalences;
use crate::error::EngineError;
use crate::values::{ArithOp, BinOp, Condition, Constant, Value, ValueFactory, ValueId};

/// States with equal keys can be merged into each other. The top of the
/// stack is part of the key because it usually is the condition about to be
/// branched on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MergeKey {
    pub depth: usize,
    pub ephemeral: bool,
    pub top: Option<ValueId>,
}

/// The abstract state at one program point: an operand stack of values,
/// facts about variables, and equalities/disequalities between them.
///
/// Every member of an equivalence class carries the same facts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemoryState {
    stack: Vec<ValueId>,
    facts: BTreeMap<ValueId, FactMap>,
    equivalences: Equivalences,
    ephemeral: bool,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    ///////////
    // Stack //
    ///////////

    pub fn push(&mut self, value: ValueId) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Option<ValueId> {
        self.stack.pop()
    }

    pub fn peek(&self) -> Option<ValueId> {
        self.stack.last().copied()
    }

    pub fn stack(&self) -> &[ValueId] {
        &self.stack
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    ///////////////
    // Ephemeral //
    ///////////////

    /// Ephemeral states only exist because a contract split assumed a value
    /// with unknown nullability is null. Problems found only in such states
    /// are not reported.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn mark_ephemeral(&mut self) {
        self.ephemeral = true;
    }

    pub fn clear_ephemeral(&mut self) {
        self.ephemeral = false;
    }

    pub fn equivalences(&self) -> &Equivalences {
        &self.equivalences
    }

    pub fn merge_key(&self) -> MergeKey {
        MergeKey {
            depth: self.stack.len(),
            ephemeral: self.ephemeral,
            top: self.peek(),
        }
    }

    /// Same stack depth and ephemeral flag. Widening pairs states by shape,
    /// as values kept on the stack across a loop change on every iteration.
    pub fn same_shape(&self, other: &MemoryState) -> bool {
        self.stack.len() == other.stack.len() && self.ephemeral == other.ephemeral
    }

    ///////////
    // Facts //
    ///////////

    /// Recorded facts of a variable, unknown if nothing was recorded.
    pub fn variable_facts(&self, var: ValueId) -> FactMap {
        self.facts.get(&var).cloned().unwrap_or_default()
    }

    /// Everything known about a value in this state.
    pub fn facts_of(&self, values: &ValueFactory, value: ValueId) -> FactMap {
        match &*values.get(value) {
            Value::Variable(_) => self.variable_facts(value),
            Value::Constant(c) => c.facts(),
            Value::Typed(facts) => facts.clone(),
            Value::Boxed(inner) => {
                let inner = self.facts_of(values, *inner);
                let mut facts = FactMap::unknown().with(NULLABILITY, Nullability::NotNull);
                if let Some(range) = inner.lookup(RANGE) {
                    facts.set(RANGE, *range);
                }
                if let Some(truth) = inner.lookup(TRUTH) {
                    facts.set(TRUTH, *truth);
                }
                facts
            }
            Value::BinOp {
                op: BinOp::Arith(op),
                left,
                right,
            } => {
                let left = self.facts_of(values, *left).get(RANGE);
                let right = self.facts_of(values, *right).get(RANGE);
                FactMap::unknown().with(RANGE, op.apply(left, right))
            }
            Value::BinOp {
                op: BinOp::Compare(rel),
                left,
                right,
            } => match self.evaluate(values, Condition::new(*left, *rel, *right)) {
                Some(result) => FactMap::unknown().with(TRUTH, Truth::from(result)),
                None => FactMap::unknown(),
            },
            Value::Fail => FactMap::unknown(),
        }
    }

    /// The value of a variable when the state pins it to one constant.
    pub fn constant_of(&self, values: &ValueFactory, value: ValueId) -> Option<Constant> {
        self.facts_of(values, value).constant()
    }

    /// Stores facts for a variable and every value equal to it.
    fn record(&mut self, var: ValueId, facts: FactMap) {
        for member in self.equivalences.class_members(var) {
            if facts.is_unknown() {
                self.facts.remove(&member);
            } else {
                self.facts.insert(member, facts.clone());
            }
        }
    }

    /// Whether a condition holds in every concrete state, in none, or the
    /// state cannot tell.
    pub fn evaluate(&self, values: &ValueFactory, cond: Condition) -> Option<bool> {
        let Condition {
            left,
            relation,
            right,
        } = cond;
        if left == right {
            return Some(relation.holds(Ordering::Equal));
        }
        if let Some(known) = self.equivalences.relation(left, right) {
            if known.implies(relation) {
                return Some(true);
            }
            if !known.compatible_with(relation) {
                return Some(false);
            }
        }
        let lf = self.facts_of(values, left);
        let rf = self.facts_of(values, right);
        if let (Some(a), Some(b)) = (lf.lookup(RANGE), rf.lookup(RANGE)) {
            if let Some(result) = a.evaluate(relation, b) {
                return Some(result);
            }
        }
        let equal = match (lf.lookup(NULLABILITY), rf.lookup(NULLABILITY)) {
            (Some(Nullability::Null), Some(Nullability::Null)) => Some(true),
            (Some(Nullability::Null), Some(Nullability::NotNull))
            | (Some(Nullability::NotNull), Some(Nullability::Null)) => Some(false),
            _ => match (
                lf.lookup(TRUTH).and_then(|t| t.as_bool()),
                rf.lookup(TRUTH).and_then(|t| t.as_bool()),
            ) {
                (Some(a), Some(b)) => Some(a == b),
                _ => None,
            },
        };
        match (equal, relation) {
            (Some(eq), Relation::Eq) => Some(eq),
            (Some(eq), Relation::Ne) => Some(!eq),
            _ => None,
        }
    }

    /// Narrows a value with extra facts. Returns false if the value cannot
    /// have them, i.e. the state is infeasible.
    pub fn meet_facts(&mut self, values: &ValueFactory, value: ValueId, facts: &FactMap) -> bool {
        if facts.is_unknown() {
            return true;
        }
        match &*values.get(value) {
            Value::Variable(_) => {
                let Some(met) = self.variable_facts(value).intersect(facts) else {
                    return false;
                };
                self.record(value, met);
                self.propagate_constant(value)
            }
            Value::Boxed(inner) => {
                if facts.lookup(NULLABILITY) == Some(&Nullability::Null) {
                    return false;
                }
                let inner_facts = facts
                    .clone()
                    .without(NULLABILITY)
                    .without(TYPE_CONSTRAINT)
                    .without(MUTABILITY);
                self.meet_facts(values, *inner, &inner_facts)
            }
            Value::BinOp {
                op: BinOp::Arith(op),
                left,
                right,
            } => {
                let Some(wanted) = facts.lookup(RANGE) else {
                    return true;
                };
                let current = self.facts_of(values, value).get(RANGE);
                let Some(narrowed) = current.intersect(wanted) else {
                    return false;
                };
                let Some(c) = self.facts_of(values, *right).get(RANGE).as_constant() else {
                    return true;
                };
                let operand = match op {
                    ArithOp::Add => narrowed - LongRange::from(c),
                    ArithOp::Sub => narrowed + LongRange::from(c),
                    ArithOp::Mul => return true,
                };
                self.meet_facts(values, *left, &FactMap::unknown().with(RANGE, operand))
            }
            Value::BinOp {
                op: BinOp::Compare(rel),
                left,
                right,
            } => {
                let cond = Condition::new(*left, *rel, *right);
                match facts.lookup(TRUTH).and_then(|t| t.as_bool()) {
                    Some(true) => self.apply_condition(values, cond),
                    Some(false) => self.apply_condition(values, cond.negate()),
                    None => true,
                }
            }
            Value::Fail => true,
            Value::Constant(_) | Value::Typed(_) => {
                self.facts_of(values, value).intersect(facts).is_some()
            }
        }
    }

    /// A variable pinned to null or a boolean constant tells us something
    /// about every class it is known to differ from.
    fn propagate_constant(&mut self, var: ValueId) -> bool {
        let facts = self.variable_facts(var);
        let mut implied = FactMap::unknown();
        if facts.lookup(NULLABILITY) == Some(&Nullability::Null) {
            implied.set(NULLABILITY, Nullability::NotNull);
        }
        if let Some(truth) = facts.lookup(TRUTH).and_then(|t| t.as_bool()) {
            implied.set(TRUTH, Truth::from(!truth));
        }
        if implied.is_unknown() {
            return true;
        }
        let Some(class) = self.equivalences.class_index(var) else {
            return true;
        };
        let others: Vec<ValueId> = self
            .equivalences
            .distinct_pairs()
            .iter()
            .filter(|p| !p.ordered)
            .filter_map(|p| p.other_class(class))
            .filter_map(|c| self.equivalences.class(c).and_then(|c| c.canonical()))
            .collect();
        for other in others {
            let Some(met) = self.variable_facts(other).intersect(&implied) else {
                return false;
            };
            self.record(other, met);
        }
        true
    }

    /// Restricts the state to the concrete states where `cond` holds. Returns
    /// false if there are none.
    pub fn apply_condition(&mut self, values: &ValueFactory, cond: Condition) -> bool {
        let Condition {
            left,
            relation,
            right,
        } = cond;
        let (lv, rv) = (values.get(left), values.get(right));
        if matches!(*lv, Value::Fail) || matches!(*rv, Value::Fail) {
            return (left == right) == (relation == Relation::Eq);
        }
        if left == right {
            return relation.holds(Ordering::Equal);
        }

        // `(a < b) == true` is just `a < b`.
        for (cmp, other) in [(&lv, &rv), (&rv, &lv)] {
            if let (
                Value::BinOp {
                    op: BinOp::Compare(inner),
                    left: a,
                    right: b,
                },
                Value::Constant(Constant::Bool(truth)),
            ) = (&**cmp, &**other)
            {
                if matches!(relation, Relation::Eq | Relation::Ne) {
                    let inner = Condition::new(*a, *inner, *b);
                    let positive = *truth == (relation == Relation::Eq);
                    return self.apply_condition(values, if positive { inner } else { inner.negate() });
                }
            }
        }

        let lf = self.facts_of(values, left);
        let rf = self.facts_of(values, right);
        let mut left_implied = FactMap::implied_by_relation(relation, &rf);
        let mut right_implied = FactMap::implied_by_relation(relation.flip(), &lf);
        if lf.lookup(RANGE).is_some() || rf.lookup(RANGE).is_some() {
            let (a, b) = (lf.get(RANGE), rf.get(RANGE));
            let (Some(a_new), Some(b_new)) = (
                a.meet_relation(relation, &b),
                b.meet_relation(relation.flip(), &a),
            ) else {
                return false;
            };
            left_implied.set(RANGE, a_new);
            right_implied.set(RANGE, b_new);
        }
        if !self.meet_facts(values, left, &left_implied)
            || !self.meet_facts(values, right, &right_implied)
        {
            return false;
        }

        if values.is_variable(left) && values.is_variable(right) {
            if let Some(known) = self.equivalences.relation(left, right) {
                if !known.compatible_with(relation) {
                    return false;
                }
            }
            return match relation {
                Relation::Eq => self.unite(left, right),
                Relation::Ne => self.equivalences.mark_distinct(left, right, false),
                Relation::Lt => self.equivalences.mark_distinct(left, right, true),
                Relation::Gt => self.equivalences.mark_distinct(right, left, true),
                Relation::Le | Relation::Ge => true,
            };
        }
        true
    }

    /// Same as [`MemoryState::apply_condition`], for conditions coming from a
    /// contract clause. Assuming that a value with unknown nullability is null
    /// makes the state ephemeral.
    pub fn apply_contract_condition(&mut self, values: &ValueFactory, cond: Condition) -> bool {
        let null = values.null();
        let assumes_null = cond.relation == Relation::Eq
            && [(cond.left, cond.right), (cond.right, cond.left)]
                .iter()
                .any(|&(value, other)| {
                    other == null
                        && self.facts_of(values, value).get(NULLABILITY) == Nullability::Unknown
                });
        if !self.apply_condition(values, cond) {
            return false;
        }
        if assumes_null {
            self.mark_ephemeral();
        }
        true
    }

    fn unite(&mut self, a: ValueId, b: ValueId) -> bool {
        let Some(facts) = self.variable_facts(a).intersect(&self.variable_facts(b)) else {
            return false;
        };
        if !self.equivalences.unite(a, b) {
            return false;
        }
        self.record(a, facts);
        true
    }

    ////////////////
    // Assignment //
    ////////////////

    /// Stores `value` into the variable `target`.
    pub fn assign(
        &mut self,
        values: &ValueFactory,
        target: ValueId,
        value: ValueId,
    ) -> Result<(), EngineError> {
        if !values.is_variable(target) {
            return Err(EngineError::NotAVariable {
                value: target,
                action: "assigned",
            });
        }
        if target == value {
            return Ok(());
        }
        let facts = self.facts_of(values, value);
        let value = if values.depends_on(value, target) {
            values.typed(facts.clone())
        } else {
            value
        };
        self.flush_variable(values, target, false);
        if !values.is_variable(value) {
            self.record(target, facts);
            return Ok(());
        }

        self.equivalences.unite(target, value);
        self.record(target, facts);
        // Tracked fields of the source are now readable through the target.
        for field in values.dependents(value) {
            if !self.is_tracked(field) {
                continue;
            }
            let Value::Variable(var) = &*values.get(field) else {
                continue;
            };
            let alias = values.field(target, &var.name, var.ty);
            let field_facts = self.variable_facts(field);
            self.equivalences.unite(alias, field);
            self.record(alias, field_facts);
        }
        Ok(())
    }

    fn is_tracked(&self, var: ValueId) -> bool {
        self.facts.contains_key(&var) || self.equivalences.class_index(var).is_some()
    }

    //////////////
    // Flushing //
    //////////////

    /// Forgets what is known about a variable and everything read through it.
    /// Values on the stack that read it are replaced by anonymous values with
    /// the same facts. With `mark_flushed`, a previously known nullability
    /// turns into [`Nullability::Flushed`].
    pub fn flush_variable(&mut self, values: &ValueFactory, var: ValueId, mark_flushed: bool) {
        for i in 0..self.stack.len() {
            let entry = self.stack[i];
            if values.depends_on(entry, var) {
                let facts = self.facts_of(values, entry);
                self.stack[i] = values.typed(facts);
            }
        }
        for dependent in values.dependents(var) {
            if self.is_tracked(dependent) {
                self.flush_variable(values, dependent, mark_flushed);
            }
        }
        let old = self.facts.remove(&var);
        self.equivalences.remove(var);
        if mark_flushed {
            let nullability = old.and_then(|f| f.lookup(NULLABILITY).copied());
            if let Some(nullability) = nullability {
                let flushed = FactMap::unknown().with(NULLABILITY, nullability.flushed());
                if !flushed.is_unknown() {
                    self.facts.insert(var, flushed);
                }
            }
        }
    }

    /// Invalidates every field, as an unknown call may have written any of
    /// them.
    pub fn flush_fields(&mut self, values: &ValueFactory) {
        let fields: BTreeSet<ValueId> = self
            .facts
            .keys()
            .copied()
            .chain(self.equivalences.tracked_values())
            .chain(self.stack.iter().copied())
            .filter(|&v| values.is_qualified(v))
            .collect();
        for field in fields {
            self.flush_variable(values, field, true);
        }
    }

    /// The state a nested closure starts from: fields may have changed by
    /// the time it runs and the operand stack is not shared.
    pub fn closure_state(&self, values: &ValueFactory) -> MemoryState {
        let mut state = self.clone();
        state.flush_fields(values);
        state.clear_stack();
        state
    }

    /////////////////////////////
    // Subsumption and joining //
    /////////////////////////////

    /// Whether every concrete state described by `other` is described by
    /// `self` as well, so `other` does not need to be explored.
    pub fn is_super_state_of(&self, values: &ValueFactory, other: &MemoryState) -> bool {
        if self.ephemeral && !other.ephemeral {
            return false;
        }
        if self.stack.len() != other.stack.len() {
            return false;
        }
        for (&mine, &theirs) in self.stack.iter().zip(&other.stack) {
            if mine == theirs {
                continue;
            }
            let Value::Typed(facts) = &*values.get(mine) else {
                return false;
            };
            if !facts.is_super_of(&other.facts_of(values, theirs)) {
                return false;
            }
        }
        if !self.equivalences.is_super_of(&other.equivalences) {
            return false;
        }
        self.facts
            .keys()
            .chain(other.facts.keys())
            .all(|&var| self.variable_facts(var).is_super_of(&other.variable_facts(var)))
    }

    /// Joins two states if the result describes exactly the union of both,
    /// without losing precision.
    pub fn try_join_exactly(&self, values: &ValueFactory, other: &MemoryState) -> Option<MemoryState> {
        if self.is_super_state_of(values, other) {
            return Some(self.clone());
        }
        if other.is_super_state_of(values, self) {
            return Some(other.clone());
        }
        if self.stack != other.stack
            || self.ephemeral != other.ephemeral
            || self.equivalences != other.equivalences
        {
            return None;
        }
        let differing: Vec<ValueId> = self
            .facts
            .keys()
            .chain(other.facts.keys())
            .copied()
            .unique()
            .filter(|&var| self.variable_facts(var) != other.variable_facts(var))
            .collect();
        let [var] = differing[..] else {
            return None;
        };
        let (mine, theirs) = (self.variable_facts(var), other.variable_facts(var));
        if !join_is_exact(&mine, &theirs) {
            return None;
        }
        let mut result = self.clone();
        result.record(var, mine.union(&theirs));
        Some(result)
    }

    /// Lossy join used when too many states accumulate. Both states must have
    /// the same [`MergeKey`] depth. Only what holds in both is kept.
    pub fn merge(&mut self, values: &ValueFactory, other: &MemoryState) {
        debug_assert_eq!(self.stack.len(), other.stack.len());
        for i in 0..self.stack.len().min(other.stack.len()) {
            if self.stack[i] != other.stack[i] {
                let joined = self
                    .facts_of(values, self.stack[i])
                    .union(&other.facts_of(values, other.stack[i]));
                self.stack[i] = values.typed(joined);
            }
        }
        self.equivalences.retain_common(&other.equivalences);
        let vars: BTreeSet<ValueId> = self.facts.keys().chain(other.facts.keys()).copied().collect();
        for var in vars {
            let joined = self.variable_facts(var).union(&other.variable_facts(var));
            if joined.is_unknown() {
                self.facts.remove(&var);
            } else {
                self.facts.insert(var, joined);
            }
        }
        self.ephemeral &= other.ephemeral;
    }

    /// Widens numeric facts against a state of the same shape seen at the
    /// same point earlier. Stack entries differing from the earlier state are
    /// replaced by anonymous values carrying the widened join of both.
    pub fn widen_against(&mut self, values: &ValueFactory, previous: &MemoryState, iteration: usize) {
        debug_assert!(self.same_shape(previous));
        for i in 0..self.stack.len().min(previous.stack.len()) {
            let (mine, old) = (self.stack[i], previous.stack[i]);
            if mine == old {
                continue;
            }
            let old_facts = previous.facts_of(values, old);
            let joined = self.facts_of(values, mine).union(&old_facts);
            self.stack[i] = values.typed(joined.widen(&old_facts, iteration));
        }
        for (var, facts) in self.facts.iter_mut() {
            if let Some(old) = previous.facts.get(var) {
                *facts = facts.widen(old, iteration);
            }
        }
        self.facts.retain(|_, facts| !facts.is_unknown());
    }

    /// Widening without a reference state: numeric facts keep their sign only.
    pub fn widen(&mut self, values: &ValueFactory) {
        for i in 0..self.stack.len() {
            let entry = self.stack[i];
            if values.is_variable(entry) {
                continue;
            }
            let facts = self.facts_of(values, entry);
            if facts.lookup(RANGE).is_some() {
                self.stack[i] = values.typed(facts.widen_to_sign());
            }
        }
        for facts in self.facts.values_mut() {
            *facts = facts.widen_to_sign();
        }
        self.facts.retain(|_, facts| !facts.is_unknown());
    }

    /// A readable dump used for logs and abort reports.
    pub fn render(&self, values: &ValueFactory) -> String {
        let stack = self.stack.iter().map(|&v| values.display(v)).join(", ");
        let facts = self
            .facts
            .iter()
            .map(|(&var, facts)| format!("{}: {facts}", values.display(var)))
            .join(", ");
        let mut eq = Vec::new();
        for var in self.equivalences.tracked_values().sorted() {
            let members = self.equivalences.class_members(var);
            if members.len() > 1 && members.first() == Some(&var) {
                eq.push(members.iter().map(|&m| values.display(m)).join(" == "));
            }
        }
        for pair in self.equivalences.distinct_pairs().iter() {
            let name = |c: usize| {
                self.equivalences
                    .class(c)
                    .and_then(|c| c.canonical())
                    .map(|v| values.display(v))
                    .unwrap_or_default()
            };
            let op = if pair.ordered { "<" } else { "!=" };
            eq.push(format!("{} {op} {}", name(pair.first), name(pair.second)));
        }
        let mut result = format!("stack: [{stack}] facts: {{{facts}}} relations: [{}]", eq.join(", "));
        if self.ephemeral {
            result.push_str(" ephemeral");
        }
        result
    }
}

/// Whether the join of two fact maps loses nothing. Only maps differing in a
/// single kind qualify, and intervals must overlap or touch.
fn join_is_exact(a: &FactMap, b: &FactMap) -> bool {
    let kinds_differing = [
        a.lookup(NULLABILITY) != b.lookup(NULLABILITY),
        a.lookup(RANGE) != b.lookup(RANGE),
        a.lookup(TRUTH) != b.lookup(TRUTH),
        a.lookup(TYPE_CONSTRAINT) != b.lookup(TYPE_CONSTRAINT),
        a.lookup(MUTABILITY) != b.lookup(MUTABILITY),
    ];
    if kinds_differing.iter().filter(|&&d| d).count() != 1 {
        return false;
    }
    if kinds_differing[3] {
        return false;
    }
    if kinds_differing[1] {
        let (x, y) = (a.get(RANGE), b.get(RANGE));
        let (lo, hi) = if x.min <= y.min { (x, y) } else { (y, x) };
        return lo.max == INF || hi.min <= lo.max.saturating_add(1);
    }
    true
}
