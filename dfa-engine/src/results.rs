use core::fmt::Display;
use std::collections::{BTreeMap, BTreeSet};

use crate::domains::FactMap;
use crate::instructions::Anchor;
use crate::values::Constant;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunOutcome {
    /// Fixpoint reached, the facts are sound for every path.
    Ok,
    /// Step limit, state cap or time budget exceeded.
    TooComplex,
    /// Cancellation was requested through the token.
    Cancelled,
    /// An internal invariant was violated, see the abort report.
    Aborted,
    /// The procedure cannot be analyzed at all.
    NotApplicable,
}

impl Display for RunOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            RunOutcome::Ok => "ok",
            RunOutcome::TooComplex => "too complex",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Aborted => "aborted",
            RunOutcome::NotApplicable => "not applicable",
        };
        f.write_str(text)
    }
}

/// Facts observed at an anchor, joined over every state reaching it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnchorFacts {
    pub facts: FactMap,
    /// Constant values observed. Only meaningful when `all_constant` holds.
    pub constants: BTreeSet<Constant>,
    /// Every observed value was a constant.
    pub all_constant: bool,
    /// Only ephemeral states reached the anchor.
    pub ephemeral_only: bool,
    /// Number of states that reached the anchor.
    pub hits: usize,
}

impl AnchorFacts {
    /// The single value the anchor always has, if there is one.
    pub fn constant(&self) -> Option<Constant> {
        match (self.all_constant, self.constants.len()) {
            (true, 1) => self.constants.first().copied(),
            _ => None,
        }
    }

    pub(crate) fn observe(&mut self, facts: FactMap, ephemeral: bool) {
        let constant = facts.constant();
        if self.hits == 0 {
            self.facts = facts;
            self.all_constant = true;
            self.ephemeral_only = ephemeral;
        } else {
            self.facts = self.facts.union(&facts);
            self.ephemeral_only &= ephemeral;
        }
        match constant {
            Some(c) => {
                self.constants.insert(c);
            }
            None => self.all_constant = false,
        }
        self.hits += 1;
    }

    fn absorb(&mut self, other: &AnchorFacts) {
        if other.hits == 0 {
            return;
        }
        if self.hits == 0 {
            *self = other.clone();
            return;
        }
        self.facts = self.facts.union(&other.facts);
        self.constants.extend(other.constants.iter().copied());
        self.all_constant &= other.all_constant;
        self.ephemeral_only &= other.ephemeral_only;
        self.hits += other.hits;
    }
}

/// Failures of a call site with a contract.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallFailures {
    pub failing: usize,
    pub ephemeral: usize,
}

/// Details of an aborted run, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbortReport {
    pub index: usize,
    pub error: String,
    pub listing: String,
    pub state: String,
}

/// What a run computed. Facts are only exposed for [`RunOutcome::Ok`] runs,
/// anything else may have missed paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisResult {
    outcome: RunOutcome,
    pub(crate) anchors: BTreeMap<Anchor, AnchorFacts>,
    pub(crate) all_anchors: BTreeSet<Anchor>,
    pub(crate) call_failures: BTreeMap<Anchor, CallFailures>,
    pub(crate) returns: AnchorFacts,
    pub(crate) steps: usize,
    pub(crate) abort: Option<AbortReport>,
}

impl AnalysisResult {
    pub(crate) fn new(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            anchors: BTreeMap::new(),
            all_anchors: BTreeSet::new(),
            call_failures: BTreeMap::new(),
            returns: AnchorFacts::default(),
            steps: 0,
            abort: None,
        }
    }

    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == RunOutcome::Ok
    }

    /// Number of states processed.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn abort_report(&self) -> Option<&AbortReport> {
        self.abort.as_ref()
    }

    /// Facts at every reached anchor.
    pub fn anchors(&self) -> Option<&BTreeMap<Anchor, AnchorFacts>> {
        self.is_ok().then_some(&self.anchors)
    }

    pub fn anchor(&self, anchor: Anchor) -> Option<&AnchorFacts> {
        self.anchors()?.get(&anchor)
    }

    /// Anchors no state ever reached.
    pub fn unreachable_anchors(&self) -> Option<BTreeSet<Anchor>> {
        self.is_ok().then(|| {
            self.all_anchors
                .iter()
                .filter(|a| !self.anchors.contains_key(a) && !self.call_failures.contains_key(a))
                .copied()
                .collect()
        })
    }

    pub fn call_failures(&self, anchor: Anchor) -> Option<CallFailures> {
        if !self.is_ok() {
            return None;
        }
        Some(self.call_failures.get(&anchor).copied().unwrap_or_default())
    }

    /// Failure counts of every anchored call site that was reached.
    pub fn all_call_failures(&self) -> Option<&BTreeMap<Anchor, CallFailures>> {
        self.is_ok().then_some(&self.call_failures)
    }

    /// Facts of the returned values, joined over every return.
    pub fn returned(&self) -> Option<&AnchorFacts> {
        self.is_ok().then_some(&self.returns)
    }

    /// Folds the results of a nested graph into this one.
    pub(crate) fn absorb(&mut self, other: AnalysisResult) {
        for (anchor, facts) in &other.anchors {
            self.anchors.entry(*anchor).or_default().absorb(facts);
        }
        self.all_anchors.extend(other.all_anchors);
        for (anchor, failures) in other.call_failures {
            let entry = self.call_failures.entry(anchor).or_default();
            entry.failing += failures.failing;
            entry.ephemeral += failures.ephemeral;
        }
        self.steps += other.steps;
    }
}
