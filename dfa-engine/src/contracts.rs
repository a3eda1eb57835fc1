use core::fmt::Display;

use itertools::Itertools;

use crate::domains::{FactMap, NULLABILITY, Nullability, Relation, TRUTH, Truth};
use crate::error::ContractParseError;
use crate::values::{Condition, ValueFactory, ValueId, ValueType};

/// What a contract clause requires from one argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueConstraint {
    Any,
    Null,
    NotNull,
    True,
    False,
}

impl ValueConstraint {
    /// The constraint matching exactly the arguments `self` rejects. `Any`
    /// rejects nothing and has no negation.
    pub fn negate(self) -> Option<ValueConstraint> {
        match self {
            ValueConstraint::Any => None,
            ValueConstraint::Null => Some(ValueConstraint::NotNull),
            ValueConstraint::NotNull => Some(ValueConstraint::Null),
            ValueConstraint::True => Some(ValueConstraint::False),
            ValueConstraint::False => Some(ValueConstraint::True),
        }
    }

    /// The condition on `value` under which the constraint matches.
    pub fn condition(self, values: &ValueFactory, value: ValueId) -> Option<Condition> {
        let (relation, constant) = match self {
            ValueConstraint::Any => return None,
            ValueConstraint::Null => (Relation::Eq, values.null()),
            ValueConstraint::NotNull => (Relation::Ne, values.null()),
            ValueConstraint::True => (Relation::Eq, values.bool(true)),
            ValueConstraint::False => (Relation::Eq, values.bool(false)),
        };
        Some(Condition::new(value, relation, constant))
    }

    /// Whether both constraints can hold for the same argument.
    pub fn intersects(self, other: ValueConstraint) -> bool {
        self == ValueConstraint::Any
            || other == ValueConstraint::Any
            || self == other
            || !matches!(
                (self, other),
                (ValueConstraint::Null, ValueConstraint::NotNull)
                    | (ValueConstraint::NotNull, ValueConstraint::Null)
                    | (ValueConstraint::True, ValueConstraint::False)
                    | (ValueConstraint::False, ValueConstraint::True)
            )
    }

    /// Whether every argument matched by `other` is also matched by `self`.
    pub fn covers(self, other: ValueConstraint) -> bool {
        self == ValueConstraint::Any || self == other
    }

    /// The facts an argument has once the constraint matched.
    pub fn facts(self) -> FactMap {
        match self {
            ValueConstraint::Any => FactMap::unknown(),
            ValueConstraint::Null => FactMap::unknown().with(NULLABILITY, Nullability::Null),
            ValueConstraint::NotNull => FactMap::unknown().with(NULLABILITY, Nullability::NotNull),
            ValueConstraint::True => FactMap::unknown().with(TRUTH, Truth::True),
            ValueConstraint::False => FactMap::unknown().with(TRUTH, Truth::False),
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            ValueConstraint::Any => "_",
            ValueConstraint::Null => "null",
            ValueConstraint::NotNull => "!null",
            ValueConstraint::True => "true",
            ValueConstraint::False => "false",
        }
    }

    fn parse(word: &str) -> Option<ValueConstraint> {
        Some(match word {
            "_" => ValueConstraint::Any,
            "null" => ValueConstraint::Null,
            "!null" => ValueConstraint::NotNull,
            "true" => ValueConstraint::True,
            "false" => ValueConstraint::False,
            _ => return None,
        })
    }
}

impl Display for ValueConstraint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// What a contract clause promises about the call's outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnConstraint {
    Value(ValueConstraint),
    /// The call does not complete normally.
    Fail,
}

impl ReturnConstraint {
    pub const ANY: ReturnConstraint = ReturnConstraint::Value(ValueConstraint::Any);

    /// Whether a procedure with the given return type and declared
    /// nullability can return something satisfying the constraint.
    pub fn is_compatible_with(self, ty: ValueType, nullability: Option<Nullability>) -> bool {
        let ReturnConstraint::Value(constraint) = self else {
            return true;
        };
        match constraint {
            ValueConstraint::Any => true,
            ValueConstraint::Null => {
                matches!(ty, ValueType::Ref | ValueType::Unknown)
                    && nullability != Some(Nullability::NotNull)
            }
            ValueConstraint::NotNull => matches!(ty, ValueType::Ref | ValueType::Unknown),
            ValueConstraint::True | ValueConstraint::False => {
                matches!(ty, ValueType::Bool | ValueType::Unknown)
            }
        }
    }
}

impl Display for ReturnConstraint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ReturnConstraint::Value(v) => Display::fmt(v, f),
            ReturnConstraint::Fail => f.write_str("fail"),
        }
    }
}

/// One clause: when every argument matches its constraint, the outcome
/// matches the return constraint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Contract {
    pub params: Vec<ValueConstraint>,
    pub ret: ReturnConstraint,
}

impl Contract {
    pub fn new(params: Vec<ValueConstraint>, ret: ReturnConstraint) -> Self {
        Self { params, ret }
    }

    /// Whether some argument vector matches both clauses.
    pub fn intersects(&self, other: &Contract) -> bool {
        self.params
            .iter()
            .zip(&other.params)
            .all(|(a, b)| a.intersects(*b))
    }

    /// Whether every argument vector matched by `other` is matched by `self`.
    pub fn covers(&self, other: &Contract) -> bool {
        self.params
            .iter()
            .zip(&other.params)
            .all(|(a, b)| a.covers(*b))
    }
}

impl Display for Contract {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} -> {}", self.params.iter().join(", "), self.ret)
    }
}

/// Prints clauses in the same syntax [`parse_contracts`] accepts.
pub fn print_contracts(contracts: &[Contract]) -> String {
    contracts.iter().join("; ")
}

/// Parses `constraint, constraint, ... -> return; ...`. Every clause must
/// have exactly `param_count` constraints.
pub fn parse_contracts(text: &str, param_count: usize) -> Result<Vec<Contract>, ContractParseError> {
    let error = |message: String, start: usize, end: usize| {
        ContractParseError::new(message, start..end, text.len())
    };
    if text.trim().is_empty() {
        return Err(ContractParseError::new(
            "empty contract",
            0..text.len(),
            text.len(),
        ));
    }

    let mut contracts = Vec::new();
    let mut offset = 0;
    for clause in text.split(';') {
        let clause_start = offset;
        offset += clause.len() + 1;
        let Some(arrow) = clause.find("->") else {
            return Err(error(
                "expected '->'".to_owned(),
                clause_start,
                clause_start + clause.len(),
            ));
        };

        let (lhs, rhs) = (&clause[..arrow], &clause[arrow + 2..]);
        let rhs_start = clause_start + arrow + 2;
        let ret_word = rhs.trim();
        let ret_start = rhs_start + (rhs.len() - rhs.trim_start().len());
        let ret = match ret_word {
            "fail" => ReturnConstraint::Fail,
            "" => {
                return Err(error(
                    "expected a return constraint".to_owned(),
                    clause_start + arrow,
                    rhs_start,
                ));
            }
            word => ValueConstraint::parse(word).map(ReturnConstraint::Value).ok_or_else(|| {
                error(
                    format!("unknown return constraint '{word}'"),
                    ret_start,
                    ret_start + word.len(),
                )
            })?,
        };

        let mut params = Vec::new();
        if !lhs.trim().is_empty() {
            let mut param_offset = clause_start;
            for word in lhs.split(',') {
                let word_start = param_offset + (word.len() - word.trim_start().len());
                param_offset += word.len() + 1;
                let trimmed = word.trim();
                let constraint = ValueConstraint::parse(trimmed).ok_or_else(|| {
                    error(
                        format!("unknown constraint '{trimmed}'"),
                        word_start,
                        word_start + trimmed.len(),
                    )
                })?;
                params.push(constraint);
            }
        }
        if params.len() != param_count {
            return Err(error(
                format!(
                    "expected {param_count} constraint(s), found {}",
                    params.len()
                ),
                clause_start,
                clause_start + arrow,
            ));
        }
        contracts.push(Contract::new(params, ret));
    }
    Ok(contracts)
}

/// Rewrites clauses so their argument conditions do not overlap, keeping
/// first-match semantics. Every clause is split into the parts no earlier
/// clause matches. Parts matched entirely by earlier clauses are dropped.
pub fn normalize_contracts(contracts: &[Contract]) -> Vec<Contract> {
    let mut result: Vec<Contract> = Vec::new();
    for contract in contracts {
        let mut pieces = vec![contract.clone()];
        for earlier in &result {
            pieces = pieces
                .into_iter()
                .flat_map(|piece| piece.subtract(earlier))
                .collect();
        }
        for piece in pieces {
            if !result.contains(&piece) {
                result.push(piece);
            }
        }
    }
    result
}

impl Contract {
    /// The argument vectors matched by `self` but not by `other`, as
    /// disjoint clauses with the return constraint of `self`.
    fn subtract(self, other: &Contract) -> Vec<Contract> {
        if !self.intersects(other) {
            return vec![self];
        }
        // Where both constrain a position they agree, so only wildcards of
        // `self` facing a constraint of `other` are left to split on.
        let mut result = Vec::new();
        let mut prefix = self.params.clone();
        for (position, constraint) in other.params.iter().enumerate() {
            if self.params[position] != ValueConstraint::Any {
                continue;
            }
            let Some(negated) = constraint.negate() else {
                continue;
            };
            let mut params = prefix.clone();
            params[position] = negated;
            result.push(Contract::new(params, self.ret));
            prefix[position] = *constraint;
        }
        result
    }
}

mod apply;
pub use apply::*;

mod inference;
pub use inference::*;

mod checker;
pub use checker::*;
