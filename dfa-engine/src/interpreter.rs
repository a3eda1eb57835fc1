use core::cmp::Reverse;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use log::{debug, trace, warn};
use priority_queue::PriorityQueue;

use crate::cache::RunCache;
use crate::config::{CancellationToken, EngineConfig};
use crate::contracts::apply_contracts;
use crate::error::EngineError;
use crate::instructions::{Anchor, Instruction, InstructionGraph};
use crate::loops::LoopInfo;
use crate::memory::MemoryState;
use crate::results::{AbortReport, AnalysisResult, RunOutcome};
use crate::values::{ValueFactory, ValueId};

/// Observes a run. Every method has an empty default, implement the ones
/// you need.
pub trait Listener {
    /// Called with every state before the instruction is executed on it.
    fn before_instruction(&mut self, _index: usize, _instruction: &Instruction, _state: &MemoryState) {}

    /// Called when a state reaches a return instruction.
    fn on_return(&mut self, _value: Option<ValueId>, _state: &MemoryState) {}
}

/// A listener that ignores everything.
pub struct NoOpListener;

impl Listener for NoOpListener {}

/// Runs the worklist fixpoint iteration over instruction graphs. The value
/// factory is shared with the caller, who interns the values the graph
/// refers to.
pub struct Engine<'v> {
    values: &'v ValueFactory,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl<'v> Engine<'v> {
    pub fn new(values: &'v ValueFactory, config: EngineConfig) -> Self {
        Self {
            values,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn values(&self) -> &'v ValueFactory {
        self.values
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the analysis from the given entry states until a fixpoint is
    /// reached or one of the limits hits. Closures are analyzed after the
    /// body, from the states captured at their creation.
    pub fn analyze<L: Listener>(
        &self,
        graph: &InstructionGraph,
        initial: Vec<MemoryState>,
        listener: &mut L,
    ) -> AnalysisResult {
        self.analyze_graph(graph, initial, listener, Instant::now())
    }

    /// Like [`Engine::analyze`], but skips graphs the cache already knows to
    /// be too complex for the same stamp, and remembers new ones.
    pub fn analyze_cached<L: Listener>(
        &self,
        cache: &RunCache,
        key: &str,
        stamp: u64,
        graph: &InstructionGraph,
        initial: Vec<MemoryState>,
        listener: &mut L,
    ) -> AnalysisResult {
        if let Some(outcome) = cache.known_outcome(key, stamp) {
            debug!("{key}: reusing cached outcome '{outcome}'");
            return AnalysisResult::new(outcome);
        }
        let result = self.analyze(graph, initial, listener);
        cache.remember(key, stamp, result.outcome());
        result
    }

    fn analyze_graph<L: Listener>(
        &self,
        graph: &InstructionGraph,
        initial: Vec<MemoryState>,
        listener: &mut L,
        started: Instant,
    ) -> AnalysisResult {
        if initial.is_empty() {
            return AnalysisResult::new(RunOutcome::NotApplicable);
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            FixpointRun::new(self, graph, listener, started).drive(initial)
        }));
        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                warn!("analysis panicked: {message}");
                let mut result = AnalysisResult::new(RunOutcome::Aborted);
                result.abort = Some(AbortReport {
                    index: 0,
                    error: EngineError::Panic(message).to_string(),
                    listing: graph.listing(self.values),
                    state: String::new(),
                });
                result
            }
        }
    }
}

/// Why the worklist loop stopped early.
enum Stop {
    TooComplex,
    Cancelled,
    Aborted {
        index: usize,
        error: EngineError,
        state: MemoryState,
    },
}

/// The state of one run over one graph.
struct FixpointRun<'r, 'v, L> {
    engine: &'r Engine<'v>,
    graph: &'r InstructionGraph,
    listener: &'r mut L,
    loops: LoopInfo,
    /// Instructions with pending states, lowest index first.
    queue: PriorityQueue<usize, Reverse<usize>>,
    pending: Vec<Vec<MemoryState>>,
    pending_in_loop: Vec<usize>,
    /// States already processed at branching instructions.
    processed: Vec<Vec<MemoryState>>,
    /// Latest state per merge key that arrived over a back edge.
    back_edge_states: Vec<Vec<MemoryState>>,
    back_edge_visits: Vec<usize>,
    closure_entries: Vec<Vec<MemoryState>>,
    steps: usize,
    started: Instant,
    result: AnalysisResult,
}

impl<'r, 'v, L: Listener> FixpointRun<'r, 'v, L> {
    fn new(
        engine: &'r Engine<'v>,
        graph: &'r InstructionGraph,
        listener: &'r mut L,
        started: Instant,
    ) -> Self {
        let len = graph.len();
        let loops = LoopInfo::new(graph);
        let mut result = AnalysisResult::new(RunOutcome::Ok);
        collect_anchors(graph, &mut result);
        Self {
            engine,
            graph,
            listener,
            queue: PriorityQueue::new(),
            pending: vec![Vec::new(); len],
            pending_in_loop: vec![0; loops.loop_count() + 1],
            processed: vec![Vec::new(); len],
            back_edge_states: vec![Vec::new(); len],
            back_edge_visits: vec![0; len],
            closure_entries: vec![Vec::new(); graph.closures().len()],
            loops,
            steps: 0,
            started,
            result,
        }
    }

    fn drive(mut self, initial: Vec<MemoryState>) -> AnalysisResult {
        for state in initial {
            self.enqueue(0, state);
        }
        if let Err(stop) = self.run_worklist() {
            return self.stopped(stop);
        }
        self.result.steps = self.steps;

        let engine = self.engine;
        let graph = self.graph;
        let entries = core::mem::take(&mut self.closure_entries);
        for (id, states) in entries.into_iter().enumerate() {
            if states.is_empty() {
                continue;
            }
            let Some(closure) = graph.closures().get(id) else {
                continue;
            };
            debug!("analyzing closure {id} from {} state(s)", states.len());
            let nested = engine.analyze_graph(closure, states, &mut *self.listener, self.started);
            if !nested.is_ok() {
                return nested;
            }
            self.result.absorb(nested);
        }
        self.result
    }

    fn run_worklist(&mut self) -> Result<(), Stop> {
        let values = self.engine.values;
        let config = &self.engine.config;
        let limit = config
            .step_limit_per_instruction
            .saturating_mul(self.graph.len());
        let poll_interval = config.poll_interval.max(1);
        let mut last_loop = 0;

        while let Some((index, _)) = self.queue.pop() {
            let batch = core::mem::take(&mut self.pending[index]);
            let loop_id = self.loops.loop_id(index);
            if loop_id != 0 {
                self.pending_in_loop[loop_id] =
                    self.pending_in_loop[loop_id].saturating_sub(batch.len());
            }
            if last_loop != 0 && last_loop != loop_id && self.pending_in_loop[last_loop] == 0 {
                self.purge_loop(last_loop);
            }
            last_loop = loop_id;

            for state in squash(values, batch) {
                self.steps += 1;
                if limit > 0 && self.steps > limit {
                    debug!("step limit {limit} exceeded");
                    return Err(Stop::TooComplex);
                }
                if self.steps % poll_interval == 0 {
                    self.poll()?;
                }
                let state = if self.graph.is_branching(index) {
                    match self.admit(index, state)? {
                        Some(state) => state,
                        None => continue,
                    }
                } else {
                    state
                };

                let instruction = &self.graph.instructions()[index];
                self.listener.before_instruction(index, instruction, &state);
                let successors = match self.execute(index, &state) {
                    Ok(successors) => successors,
                    Err(error) => {
                        return Err(Stop::Aborted {
                            index,
                            error,
                            state,
                        });
                    }
                };
                for (target, next) in successors {
                    self.transfer(index, target, next);
                }
            }
        }
        Ok(())
    }

    fn poll(&self) -> Result<(), Stop> {
        if self.engine.cancel.is_cancelled() {
            debug!("cancellation requested after {} steps", self.steps);
            return Err(Stop::Cancelled);
        }
        if let Some(budget) = self.engine.config.time_budget {
            if self.started.elapsed() > budget {
                debug!("time budget of {budget:?} exhausted after {} steps", self.steps);
                return Err(Stop::TooComplex);
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, index: usize, state: MemoryState) {
        let loop_id = self.loops.loop_id(index);
        if loop_id != 0 {
            self.pending_in_loop[loop_id] += 1;
        }
        self.pending[index].push(state);
        self.queue.push(index, Reverse(index));
    }

    /// Drops the caches of a loop once no states are pending inside it.
    fn purge_loop(&mut self, loop_id: usize) {
        trace!("leaving loop {loop_id}, purging its caches");
        for member in self.loops.members(loop_id) {
            self.processed[member].clear();
            self.back_edge_states[member].clear();
            self.back_edge_visits[member] = 0;
        }
    }

    /// Subsumption at a branching instruction. Returns `None` when an already
    /// processed state covers `state`. Past the merge threshold, the new state
    /// is merged with every processed state of the same key.
    fn admit(&mut self, index: usize, state: MemoryState) -> Result<Option<MemoryState>, Stop> {
        let values = self.engine.values;
        let config = &self.engine.config;
        let processed = &mut self.processed[index];
        if processed.iter().any(|p| p.is_super_state_of(values, &state)) {
            trace!("state at {index} is subsumed");
            return Ok(None);
        }
        if processed.len() < config.merge_threshold {
            processed.push(state.clone());
            return Ok(Some(state));
        }

        let key = state.merge_key();
        let mut merged = state;
        let mut absorbed = 0;
        processed.retain(|p| {
            if p.merge_key() != key {
                return true;
            }
            merged.merge(values, p);
            absorbed += 1;
            false
        });
        debug!("merged {absorbed} processed state(s) at instruction {index}");
        processed.push(merged.clone());
        if processed.len() > config.state_cap {
            debug!("{} states at instruction {index}", processed.len());
            return Err(Stop::TooComplex);
        }
        Ok(Some(merged))
    }

    /// Moves a state along an edge, widening it on back edges that were
    /// traversed often enough.
    fn transfer(&mut self, from: usize, to: usize, mut state: MemoryState) {
        if to <= from {
            let values = self.engine.values;
            self.back_edge_visits[to] += 1;
            let visits = self.back_edge_visits[to];
            if visits > self.engine.config.widen_after {
                match self.back_edge_states[to]
                    .iter()
                    .rev()
                    .find(|s| s.same_shape(&state))
                {
                    Some(previous) => state.widen_against(values, previous, visits),
                    None => state.widen(values),
                }
                trace!("widened state on back edge {from} -> {to}");
            }
            let seen = &mut self.back_edge_states[to];
            seen.retain(|s| !s.same_shape(&state));
            seen.push(state.clone());
        }
        self.enqueue(to, state);
    }

    fn execute(
        &mut self,
        index: usize,
        state: &MemoryState,
    ) -> Result<Vec<(usize, MemoryState)>, EngineError> {
        let values = self.engine.values;
        let mut state = state.clone();
        let next = index + 1;
        match &self.graph.instructions()[index] {
            Instruction::Push(value) | Instruction::Assign(value) | Instruction::Flush(value) => {
                values.lookup(*value)?;
            }
            _ => {}
        }
        match &self.graph.instructions()[index] {
            Instruction::Push(value) => state.push(*value),
            Instruction::Pop => {
                pop(&mut state, index)?;
            }
            Instruction::Dup => {
                let top = state.peek().ok_or(EngineError::StackUnderflow {
                    index,
                    needed: 1,
                    found: 0,
                })?;
                state.push(top);
            }
            Instruction::Swap => {
                for value in pop_n(&mut state, index, 2)?.into_iter().rev() {
                    state.push(value);
                }
            }
            Instruction::Assign(target) => {
                let value = pop(&mut state, index)?;
                state.assign(values, *target, value)?;
            }
            Instruction::Binary(op) => {
                let right = pop(&mut state, index)?;
                let left = pop(&mut state, index)?;
                state.push(values.binop(*op, left, right));
            }
            Instruction::Not => {
                let value = pop(&mut state, index)?;
                state.push(values.not(value));
            }
            Instruction::BoxValue => {
                let value = pop(&mut state, index)?;
                state.push(values.boxed(value));
            }
            Instruction::Goto(target) => return Ok(vec![(*target, state)]),
            Instruction::ConditionalGoto { target, when } => {
                let value = pop(&mut state, index)?;
                let jump = match values.as_condition(value) {
                    Err(truth) if truth == *when => return Ok(vec![(*target, state)]),
                    Err(_) => return Ok(vec![(next, state)]),
                    Ok(cond) if *when => cond,
                    Ok(cond) => cond.negate(),
                };
                let mut result = Vec::with_capacity(2);
                let mut jumped = state.clone();
                if state.apply_condition(values, jump.negate()) {
                    result.push((next, state));
                }
                if jumped.apply_condition(values, jump) {
                    result.push((*target, jumped));
                }
                return Ok(result);
            }
            Instruction::Split(targets) => {
                return Ok(targets.iter().map(|&t| (t, state.clone())).collect());
            }
            Instruction::Call(call) => {
                let args = pop_n(&mut state, index, call.arg_count)?;
                let outcome = apply_contracts(values, state, &args, call);
                if let Some(anchor) = call.anchor {
                    let failures = self.result.call_failures.entry(anchor).or_default();
                    failures.failing += outcome.failures;
                    failures.ephemeral += outcome.ephemeral_failures;
                }
                return Ok(outcome.states.into_iter().map(|s| (next, s)).collect());
            }
            Instruction::Flush(var) => {
                if !values.is_variable(*var) {
                    return Err(EngineError::NotAVariable {
                        value: *var,
                        action: "flushed",
                    });
                }
                state.flush_variable(values, *var, false);
            }
            Instruction::Probe(anchor) => {
                let facts = state
                    .peek()
                    .map(|top| state.facts_of(values, top))
                    .unwrap_or_default();
                self.result
                    .anchors
                    .entry(*anchor)
                    .or_default()
                    .observe(facts, state.is_ephemeral());
            }
            Instruction::Closure(id) => {
                let entry = state.closure_state(values);
                self.closure_entries
                    .get_mut(*id)
                    .ok_or(EngineError::UnknownClosure(*id))?
                    .push(entry);
            }
            Instruction::Return { with_value } => {
                let value = if *with_value {
                    Some(pop(&mut state, index)?)
                } else {
                    None
                };
                self.listener.on_return(value, &state);
                if let Some(value) = value {
                    let facts = state.facts_of(values, value);
                    self.result.returns.observe(facts, state.is_ephemeral());
                }
                return Ok(Vec::new());
            }
            Instruction::Throw => return Ok(Vec::new()),
        }
        Ok(vec![(next, state)])
    }

    fn stopped(self, stop: Stop) -> AnalysisResult {
        let values = self.engine.values;
        let mut result = match stop {
            Stop::TooComplex => AnalysisResult::new(RunOutcome::TooComplex),
            Stop::Cancelled => AnalysisResult::new(RunOutcome::Cancelled),
            Stop::Aborted {
                index,
                error,
                state,
            } => {
                warn!("analysis aborted at instruction {index}: {error}");
                let mut result = AnalysisResult::new(RunOutcome::Aborted);
                result.abort = Some(AbortReport {
                    index,
                    error: error.to_string(),
                    listing: self.graph.listing(values),
                    state: state.render(values),
                });
                result
            }
        };
        result.steps = self.steps;
        result
    }
}

fn pop(state: &mut MemoryState, index: usize) -> Result<ValueId, EngineError> {
    state.pop().ok_or(EngineError::StackUnderflow {
        index,
        needed: 1,
        found: 0,
    })
}

/// Pops `count` values, returned in the order they were pushed.
fn pop_n(state: &mut MemoryState, index: usize, count: usize) -> Result<Vec<ValueId>, EngineError> {
    let found = state.stack().len();
    if found < count {
        return Err(EngineError::StackUnderflow {
            index,
            needed: count,
            found,
        });
    }
    let mut popped: Vec<ValueId> = (0..count).filter_map(|_| state.pop()).collect();
    popped.reverse();
    Ok(popped)
}

/// Joins states that can be joined without losing precision.
fn squash(values: &ValueFactory, batch: Vec<MemoryState>) -> Vec<MemoryState> {
    let mut result: Vec<MemoryState> = Vec::with_capacity(batch.len());
    for state in batch {
        let mut current = state;
        // A join can enable further joins with states kept earlier.
        while let Some((i, joined)) = result
            .iter()
            .enumerate()
            .find_map(|(i, kept)| kept.try_join_exactly(values, &current).map(|j| (i, j)))
        {
            result.remove(i);
            current = joined;
        }
        result.push(current);
    }
    result
}

fn collect_anchors(graph: &InstructionGraph, result: &mut AnalysisResult) {
    for instruction in graph.instructions() {
        let anchor: Option<Anchor> = match instruction {
            Instruction::Probe(anchor) => Some(*anchor),
            Instruction::Call(call) => call.anchor,
            _ => None,
        };
        result.all_anchors.extend(anchor);
    }
    for closure in graph.closures() {
        collect_anchors(closure, result);
    }
}
