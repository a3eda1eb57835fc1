use core::fmt::Display;

use log::debug;

use crate::contracts::*;
use crate::domains::FactMap;
use crate::instructions::InstructionGraph;
use crate::interpreter::{Engine, Listener};
use crate::memory::MemoryState;
use crate::results::RunOutcome;

/// A declared contract clause the procedure body does not honor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractViolation {
    /// The clause promises failure, yet the body can return normally.
    CanComplete { clause: usize },
    /// The body can return a value the clause rules out.
    ReturnContradicts { clause: usize, returned: FactMap },
}

impl Display for ContractViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ContractViolation::CanComplete { clause } => {
                write!(f, "clause {clause} promises failure but the procedure can complete")
            }
            ContractViolation::ReturnContradicts { clause, returned } => {
                write!(f, "clause {clause} is contradicted by a returned value {returned}")
            }
        }
    }
}

/// Verifies declared contracts against the body they describe. Every clause
/// is checked by a separate run whose entry state assumes the clause's
/// argument constraints on the graph's parameters.
pub struct ContractChecker<'e, 'v> {
    engine: &'e Engine<'v>,
}

struct Returns<'v> {
    values: &'v ValueFactory,
    completed: Vec<Option<FactMap>>,
}

impl Listener for Returns<'_> {
    fn on_return(&mut self, value: Option<ValueId>, state: &MemoryState) {
        if state.is_ephemeral() {
            return;
        }
        self.completed
            .push(value.map(|v| state.facts_of(self.values, v)));
    }
}

impl<'e, 'v> ContractChecker<'e, 'v> {
    pub fn new(engine: &'e Engine<'v>) -> Self {
        Self { engine }
    }

    /// Checks every clause. Fails with the outcome of the first run that did
    /// not reach a fixpoint, or `NotApplicable` when the clause arity does
    /// not match the parameters.
    pub fn check(
        &self,
        graph: &InstructionGraph,
        contracts: &[Contract],
    ) -> Result<Vec<ContractViolation>, RunOutcome> {
        let values = self.engine.values();
        let params = graph.parameters();
        let mut violations = Vec::new();
        for (clause, contract) in contracts.iter().enumerate() {
            if contract.params.len() != params.len() {
                return Err(RunOutcome::NotApplicable);
            }
            let mut entry = MemoryState::new();
            let feasible = params
                .iter()
                .zip(&contract.params)
                .filter_map(|(&param, constraint)| constraint.condition(values, param))
                .all(|cond| entry.apply_condition(values, cond));
            if !feasible {
                debug!("clause {clause} ({contract}) cannot match, skipping");
                continue;
            }
            entry.clear_ephemeral();

            let mut returns = Returns {
                values,
                completed: Vec::new(),
            };
            let result = self.engine.analyze(graph, vec![entry], &mut returns);
            if !result.is_ok() {
                return Err(result.outcome());
            }

            match contract.ret {
                ReturnConstraint::Fail => {
                    if !returns.completed.is_empty() {
                        violations.push(ContractViolation::CanComplete { clause });
                    }
                }
                ReturnConstraint::Value(constraint) => {
                    let promised = constraint.facts();
                    let contradicting = returns
                        .completed
                        .into_iter()
                        .flatten()
                        .find(|facts| facts.intersect(&promised).is_none());
                    if let Some(returned) = contradicting {
                        violations.push(ContractViolation::ReturnContradicts { clause, returned });
                    }
                }
            }
        }
        Ok(violations)
    }
}
