use log::trace;

use crate::contracts::*;
use crate::domains::{FactMap, NULLABILITY, Nullability};
use crate::instructions::Call;
use crate::memory::MemoryState;

/// The states after a call, each with the call result pushed, and the number
/// of incoming paths on which the callee definitely fails.
#[derive(Clone, Debug, Default)]
pub struct CallOutcome {
    pub states: Vec<MemoryState>,
    pub failures: usize,
    /// Failures that only happen in ephemeral states.
    pub ephemeral_failures: usize,
}

/// Applies the call's contract clauses in order. Every clause splits the
/// states that no earlier clause matched into the part matching it and the
/// residues matching it up to some argument. A matching `fail` clause ends
/// the path; states matched by no clause get an unconstrained result.
pub fn apply_contracts(
    values: &ValueFactory,
    state: MemoryState,
    args: &[ValueId],
    call: &Call,
) -> CallOutcome {
    let mut outcome = CallOutcome::default();
    let mut finished: Vec<(MemoryState, ValueConstraint)> = Vec::new();
    let mut remaining = vec![state];

    for contract in &call.contracts {
        let mut next_remaining = Vec::new();
        for current in remaining {
            let conditions: Vec<Condition> = args
                .iter()
                .zip(&contract.params)
                .filter_map(|(&arg, constraint)| constraint.condition(values, arg))
                .collect();

            let mut prefix = current;
            let mut matches = true;
            for cond in conditions {
                let mut residue = prefix.clone();
                if residue.apply_contract_condition(values, cond.negate()) {
                    next_remaining.push(residue);
                }
                if !prefix.apply_contract_condition(values, cond) {
                    matches = false;
                    break;
                }
            }
            if !matches {
                continue;
            }
            match contract.ret {
                ReturnConstraint::Fail if prefix.is_ephemeral() => outcome.ephemeral_failures += 1,
                ReturnConstraint::Fail => outcome.failures += 1,
                ReturnConstraint::Value(constraint) => finished.push((prefix, constraint)),
            }
        }
        remaining = next_remaining;
    }
    finished.extend(remaining.into_iter().map(|s| (s, ValueConstraint::Any)));

    trace!(
        "call {}: {} result state(s), {} failing",
        call.name,
        finished.len(),
        outcome.failures + outcome.ephemeral_failures
    );
    for (mut state, constraint) in finished {
        if !call.pure {
            state.flush_fields(values);
        }
        let result = match constraint {
            ValueConstraint::Any => values.unknown(),
            ValueConstraint::Null => values.null(),
            ValueConstraint::True => values.bool(true),
            ValueConstraint::False => values.bool(false),
            ValueConstraint::NotNull => {
                values.typed(FactMap::unknown().with(NULLABILITY, Nullability::NotNull))
            }
        };
        state.push(result);
        outcome.states.push(state);
    }
    outcome
}
