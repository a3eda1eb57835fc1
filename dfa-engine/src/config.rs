use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Limits and thresholds of a run. The defaults are tuned for procedures of
/// a few hundred instructions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EngineConfig {
    /// Approximate number of states processed per instruction before the run
    /// gives up as too complex. The total limit scales with the graph size.
    pub step_limit_per_instruction: usize,
    /// Number of processed states kept at a branching instruction before new
    /// states are merged into them, losing precision.
    pub merge_threshold: usize,
    /// Processed states at a single instruction beyond which the run is too
    /// complex even after merging.
    pub state_cap: usize,
    /// Back-edge visits of an instruction before widening kicks in.
    pub widen_after: usize,
    /// Wall clock budget of a single run, `None` for no limit.
    pub time_budget: Option<Duration>,
    /// Number of steps between two polls of the cancellation token and the
    /// clock.
    pub poll_interval: usize,
    /// Maximal number of contract clauses kept per inferred procedure.
    pub max_inferred_contracts: usize,
    /// Maximal number of constraint vectors tracked during inference.
    pub max_inference_vectors: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_limit_per_instruction: 1024,
            merge_threshold: 48,
            state_cap: 192,
            widen_after: 2,
            time_budget: Some(Duration::from_secs(5)),
            poll_interval: 128,
            max_inferred_contracts: 10,
            max_inference_vectors: 32,
        }
    }
}

/// Cooperative cancellation shared between the caller and running analyses.
/// Cloning hands out another handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
