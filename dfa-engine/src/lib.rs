//! A flow-sensitive, path-sensitive dataflow engine based on
//! [abstract interpretation](https://en.wikipedia.org/wiki/Abstract_interpretation).
//! Procedures are given as a linear sequence of stack machine instructions
//! with jumps. The engine explores every path through them with abstract
//! memory states: an operand stack of symbolic values, per-variable facts
//! (nullability, integer ranges, truth, type constraints, mutability) and
//! equalities and disequalities between variables.
//!
//! Calls are not analyzed interprocedurally. Instead, callees are summarized
//! by contracts like `null -> fail; !null -> !null`, which can be written by
//! hand or inferred from small statement trees.
//!
//! Termination is ensured by subsumption at branches, forced merging once
//! too many states pile up, widening on loop back edges, and a step budget.
//! Runs that hit a limit report it instead of returning facts that could
//! miss paths.
//!
//! Some resources on the techniques used here:
//! * [Static Program Analysis, Anders Møller and Michael I. Schwartzbach](https://cs.au.dk/~amoeller/spa/)
//! * [Introduction to Static Analysis, Xavier Rival and Kwangkeun Yi](https://mitpress.mit.edu/9780262043410/introduction-to-static-analysis/)
//! * [Data flow analysis: an informal introduction](https://clang.llvm.org/docs/DataFlowAnalysisIntro.html)

/// Remembers procedures too expensive to analyze.
pub mod cache;

/// Limits and knobs of a run, and cooperative cancellation.
pub mod config;

/// Contract clauses: the textual format, applying them at call sites,
/// checking them against a body and inferring them from statement trees.
pub mod contracts;

/// The fact lattices attached to values, and the map bundling them.
pub mod domains;

/// Equivalence classes of variables and distinct pairs between classes.
pub mod equivalence;

pub mod error;

/// The instruction set and the validated instruction graph.
pub mod instructions;

/// The worklist fixpoint iteration.
pub mod interpreter;

/// Loop detection on instruction graphs.
pub mod loops;

/// The abstract state flowing through the instructions.
pub mod memory;

/// Outcomes and the facts collected at anchors.
pub mod results;

/// Interned symbolic values.
pub mod values;


#[cfg(test)]
mod values_tests;

#[cfg(test)]
mod equivalence_tests;


#[cfg(test)]
mod instructions_tests;


#[cfg(test)]
mod interpreter_tests;
