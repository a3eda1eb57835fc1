use core::fmt::Display;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domains::*;
use crate::error::EngineError;

/// Handle of an interned [`Value`]. Two handles are equal exactly when the
/// values they stand for are structurally equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for ValueId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Ref,
    Unknown,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ValueType::Bool => f.write_str("bool"),
            ValueType::Int => f.write_str("int"),
            ValueType::Ref => f.write_str("ref"),
            ValueType::Unknown => f.write_str("any"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
}

impl Constant {
    pub fn ty(self) -> ValueType {
        match self {
            Constant::Null => ValueType::Ref,
            Constant::Bool(_) => ValueType::Bool,
            Constant::Int(_) => ValueType::Int,
        }
    }

    pub fn facts(self) -> FactMap {
        match self {
            Constant::Null => FactMap::unknown().with(NULLABILITY, Nullability::Null),
            Constant::Bool(b) => FactMap::unknown().with(TRUTH, Truth::from(b)),
            Constant::Int(i) => FactMap::unknown().with(RANGE, LongRange::from(i)),
        }
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Constant::Null => f.write_str("null"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Int(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
        }
    }

    fn fold(self, left: i64, right: i64) -> Option<i64> {
        match self {
            ArithOp::Add => left.checked_add(right),
            ArithOp::Sub => left.checked_sub(right),
            ArithOp::Mul => left.checked_mul(right),
        }
    }

    pub fn apply(self, left: LongRange, right: LongRange) -> LongRange {
        match self {
            ArithOp::Add => left + right,
            ArithOp::Sub => left - right,
            ArithOp::Mul => left * right,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Arith(ArithOp),
    Compare(Relation),
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Arith(op) => op.symbol(),
            BinOp::Compare(rel) => rel.symbol(),
        }
    }
}

/// A storage location. Qualified variables (fields) refer to the value they
/// are read from, and are invalidated whenever the qualifier is.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Variable {
    pub name: String,
    pub qualifier: Option<ValueId>,
    pub ty: ValueType,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Variable(Variable),
    Constant(Constant),
    /// An otherwise anonymous value described only by its facts.
    Typed(FactMap),
    /// A boxed wrapper around a primitive value.
    Boxed(ValueId),
    BinOp {
        op: BinOp,
        left: ValueId,
        right: ValueId,
    },
    /// The outcome of a call that did not complete normally.
    Fail,
}

/// A condition on two values, `left <relation> right`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Condition {
    pub left: ValueId,
    pub relation: Relation,
    pub right: ValueId,
}

impl Condition {
    pub fn new(left: ValueId, relation: Relation, right: ValueId) -> Self {
        Self {
            left,
            relation,
            right,
        }
    }

    pub fn negate(self) -> Self {
        Self {
            relation: self.relation.negate(),
            ..self
        }
    }
}

#[derive(Default)]
struct Interner {
    values: Vec<Arc<Value>>,
    ids: HashMap<Arc<Value>, ValueId>,
    /// Variables qualified by a given value.
    dependents: HashMap<ValueId, Vec<ValueId>>,
}

/// Interns values so they can be referred to by a small copyable handle.
/// The factory is shared by every state of a run (and can be shared across
/// runs), interning only ever adds values.
#[derive(Default)]
pub struct ValueFactory {
    inner: RwLock<Interner>,
}

impl ValueFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, value: Value) -> ValueId {
        if let Some(id) = self.inner.read().ids.get(&value) {
            return *id;
        }
        let mut inner = self.inner.write();
        if let Some(id) = inner.ids.get(&value) {
            return *id;
        }
        let id = ValueId(inner.values.len() as u32);
        if let Value::Variable(Variable {
            qualifier: Some(qualifier),
            ..
        }) = &value
        {
            inner.dependents.entry(*qualifier).or_default().push(id);
        }
        let value = Arc::new(value);
        inner.values.push(value.clone());
        inner.ids.insert(value, id);
        id
    }

    /// Looks up an interned value. Handles from another factory yield
    /// [`Value::Fail`], [`ValueFactory::lookup`] reports them instead.
    pub fn get(&self, id: ValueId) -> Arc<Value> {
        self.lookup(id).unwrap_or_else(|_| Arc::new(Value::Fail))
    }

    pub fn lookup(&self, id: ValueId) -> Result<Arc<Value>, EngineError> {
        self.inner
            .read()
            .values
            .get(id.index())
            .cloned()
            .ok_or(EngineError::ForeignValue(id))
    }

    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn variable(&self, name: &str, ty: ValueType) -> ValueId {
        self.intern(Value::Variable(Variable {
            name: name.to_owned(),
            qualifier: None,
            ty,
        }))
    }

    pub fn field(&self, qualifier: ValueId, name: &str, ty: ValueType) -> ValueId {
        self.intern(Value::Variable(Variable {
            name: name.to_owned(),
            qualifier: Some(qualifier),
            ty,
        }))
    }

    pub fn constant(&self, constant: Constant) -> ValueId {
        self.intern(Value::Constant(constant))
    }

    pub fn null(&self) -> ValueId {
        self.constant(Constant::Null)
    }

    pub fn bool(&self, val: bool) -> ValueId {
        self.constant(Constant::Bool(val))
    }

    pub fn int(&self, val: i64) -> ValueId {
        self.constant(Constant::Int(val))
    }

    /// An anonymous value with the given facts. Facts describing a single
    /// constant produce that constant instead.
    pub fn typed(&self, facts: FactMap) -> ValueId {
        match facts.constant() {
            Some(constant) => self.constant(constant),
            None => self.intern(Value::Typed(facts)),
        }
    }

    pub fn unknown(&self) -> ValueId {
        self.intern(Value::Typed(FactMap::unknown()))
    }

    pub fn fail(&self) -> ValueId {
        self.intern(Value::Fail)
    }

    pub fn boxed(&self, inner: ValueId) -> ValueId {
        self.intern(Value::Boxed(inner))
    }

    /// A binary operation on two values, folded when both are constants.
    pub fn binop(&self, op: BinOp, left: ValueId, right: ValueId) -> ValueId {
        let (l, r) = (self.get(left), self.get(right));
        if let (Value::Constant(a), Value::Constant(b)) = (&*l, &*r) {
            match (op, a, b) {
                (BinOp::Arith(arith), Constant::Int(x), Constant::Int(y)) => {
                    if let Some(folded) = arith.fold(*x, *y) {
                        return self.int(folded);
                    }
                }
                (BinOp::Compare(rel), Constant::Int(x), Constant::Int(y)) => {
                    return self.bool(rel.holds(x.cmp(y)));
                }
                (BinOp::Compare(rel @ (Relation::Eq | Relation::Ne)), a, b) => {
                    return self.bool((a == b) == (rel == Relation::Eq));
                }
                _ => {}
            }
        }
        self.intern(Value::BinOp { op, left, right })
    }

    /// The boolean negation of a value.
    pub fn not(&self, value: ValueId) -> ValueId {
        match &*self.get(value) {
            Value::Constant(Constant::Bool(b)) => self.bool(!b),
            Value::BinOp {
                op: BinOp::Compare(rel),
                left,
                right,
            } => self.binop(BinOp::Compare(rel.negate()), *left, *right),
            _ => {
                let falsity = self.bool(false);
                self.binop(BinOp::Compare(Relation::Eq), value, falsity)
            }
        }
    }

    /// Reads a boolean value as a condition that holds when the value is true.
    /// Constant values yield `Err` with their truth.
    pub fn as_condition(&self, value: ValueId) -> Result<Condition, bool> {
        match &*self.get(value) {
            Value::Constant(Constant::Bool(b)) => Err(*b),
            Value::BinOp {
                op: BinOp::Compare(rel),
                left,
                right,
            } => Ok(Condition::new(*left, *rel, *right)),
            _ => Ok(Condition::new(value, Relation::Eq, self.bool(true))),
        }
    }

    pub fn is_variable(&self, id: ValueId) -> bool {
        matches!(&*self.get(id), Value::Variable(_))
    }

    pub fn is_qualified(&self, id: ValueId) -> bool {
        matches!(
            &*self.get(id),
            Value::Variable(Variable {
                qualifier: Some(_),
                ..
            })
        )
    }

    pub fn value_type(&self, id: ValueId) -> ValueType {
        match &*self.get(id) {
            Value::Variable(var) => var.ty,
            Value::Constant(c) => c.ty(),
            Value::Typed(facts) => {
                if facts.lookup(NULLABILITY).is_some() || facts.lookup(TYPE_CONSTRAINT).is_some() {
                    ValueType::Ref
                } else if facts.lookup(TRUTH).is_some() {
                    ValueType::Bool
                } else if facts.lookup(RANGE).is_some() {
                    ValueType::Int
                } else {
                    ValueType::Unknown
                }
            }
            Value::Boxed(_) => ValueType::Ref,
            Value::BinOp {
                op: BinOp::Arith(_),
                ..
            } => ValueType::Int,
            Value::BinOp {
                op: BinOp::Compare(_),
                ..
            } => ValueType::Bool,
            Value::Fail => ValueType::Unknown,
        }
    }

    /// Variables qualified directly by `id`.
    pub fn dependents(&self, id: ValueId) -> Vec<ValueId> {
        self.inner
            .read()
            .dependents
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `value` reads `var`, directly or through qualifiers and operands.
    pub fn depends_on(&self, value: ValueId, var: ValueId) -> bool {
        if value == var {
            return true;
        }
        match &*self.get(value) {
            Value::Variable(Variable {
                qualifier: Some(q), ..
            }) => self.depends_on(*q, var),
            Value::Boxed(inner) => self.depends_on(*inner, var),
            Value::BinOp { left, right, .. } => {
                self.depends_on(*left, var) || self.depends_on(*right, var)
            }
            _ => false,
        }
    }

    /// A human readable rendering of a value, used in listings and reports.
    pub fn display(&self, id: ValueId) -> String {
        match &*self.get(id) {
            Value::Variable(var) => match var.qualifier {
                Some(q) => format!("{}.{}", self.display(q), var.name),
                None => var.name.clone(),
            },
            Value::Constant(c) => c.to_string(),
            Value::Typed(facts) if facts.is_unknown() => "?".to_owned(),
            Value::Typed(facts) => facts.to_string(),
            Value::Boxed(inner) => format!("box({})", self.display(*inner)),
            Value::BinOp { op, left, right } => format!(
                "({} {} {})",
                self.display(*left),
                op.symbol(),
                self.display(*right)
            ),
            Value::Fail => "fail".to_owned(),
        }
    }
}
