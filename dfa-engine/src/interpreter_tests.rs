use core::time::Duration;
use std::collections::BTreeSet;

use super::cache::RunCache;
use super::config::{CancellationToken, EngineConfig};
use super::contracts::parse_contracts;
use super::domains::*;
use super::instructions::*;
use super::interpreter::*;
use super::memory::MemoryState;
use super::results::*;
use super::values::*;

use Instruction::*;

fn graph(instructions: Vec<Instruction>) -> InstructionGraph {
    InstructionGraph::new(instructions, vec![]).unwrap()
}

fn compare(relation: Relation) -> Instruction {
    Binary(BinOp::Compare(relation))
}

fn run(values: &ValueFactory, graph: &InstructionGraph, config: EngineConfig) -> AnalysisResult {
    Engine::new(values, config).analyze(graph, vec![MemoryState::new()], &mut NoOpListener)
}

/// ```txt
/// if (p != null) probe(p) @1
/// probe(p) @2
/// ```
#[test_log::test]
fn null_check_tests() {
    let values = ValueFactory::new();
    let p = values.variable("p", ValueType::Ref);
    let graph = graph(vec![
        Push(p),
        Push(values.null()),
        compare(Relation::Ne),
        ConditionalGoto {
            target: 7,
            when: false,
        },
        Push(p),
        Probe(Anchor(1)),
        Pop,
        Push(p),
        Probe(Anchor(2)),
        Pop,
        Return { with_value: false },
    ]);

    let result = run(&values, &graph, EngineConfig::default());
    assert_eq!(result.outcome(), RunOutcome::Ok);
    let checked = result.anchor(Anchor(1)).unwrap();
    assert_eq!(checked.facts.get(NULLABILITY), Nullability::NotNull);
    assert!(!checked.ephemeral_only);
    let after = result.anchor(Anchor(2)).unwrap();
    assert_eq!(after.facts.get(NULLABILITY), Nullability::Nullable);
    assert_eq!(after.constant(), None);
    assert_eq!(result.unreachable_anchors(), Some(BTreeSet::new()));
}

#[test]
fn unreachable_tests() {
    let values = ValueFactory::new();
    let p = values.variable("p", ValueType::Ref);
    let null = values.null();
    // if (p == null) probe(p) @3, with p known to be non-null.
    let graph = graph(vec![
        Push(p),
        Push(null),
        compare(Relation::Eq),
        ConditionalGoto {
            target: 6,
            when: false,
        },
        Push(p),
        Probe(Anchor(3)),
        Return { with_value: false },
    ]);

    let mut entry = MemoryState::new();
    assert!(entry.apply_condition(&values, Condition::new(p, Relation::Ne, null)));
    let engine = Engine::new(&values, EngineConfig::default());
    let result = engine.analyze(&graph, vec![entry], &mut NoOpListener);
    assert!(result.is_ok());
    assert_eq!(result.anchor(Anchor(3)), None);
    assert_eq!(result.unreachable_anchors(), Some(BTreeSet::from([Anchor(3)])));
}

#[test]
fn constant_tests() {
    let values = ValueFactory::new();
    let x = values.variable("x", ValueType::Int);
    let flag = values.variable("flag", ValueType::Bool);
    // x = flag ? 1 : 5; probe(x) @1
    let graph = graph(vec![
        Split(vec![1, 4]),
        Push(values.int(1)),
        Assign(x),
        Goto(6),
        Push(values.int(5)),
        Assign(x),
        Push(flag),
        ConditionalGoto {
            target: 8,
            when: true,
        },
        Push(x),
        Probe(Anchor(1)),
        Return { with_value: true },
    ]);

    let result = run(&values, &graph, EngineConfig::default());
    let facts = result.anchor(Anchor(1)).unwrap();
    assert!(facts.all_constant);
    assert_eq!(
        facts.constants,
        BTreeSet::from([Constant::Int(1), Constant::Int(5)])
    );
    assert_eq!(facts.constant(), None);
    assert_eq!(facts.facts.get(RANGE), LongRange::new(1, 5));
    assert_eq!(result.returned().unwrap().facts.get(RANGE), LongRange::new(1, 5));

    // With forced merging at the branch the two values are blended.
    let config = EngineConfig {
        merge_threshold: 1,
        ..EngineConfig::default()
    };
    let result = run(&values, &graph, config);
    assert!(result.is_ok());
    let facts = result.anchor(Anchor(1)).unwrap();
    assert!(!facts.all_constant);
    assert_eq!(facts.facts.get(RANGE), LongRange::new(1, 5));

    // Too many states even after merging.
    let config = EngineConfig {
        merge_threshold: 0,
        state_cap: 0,
        ..EngineConfig::default()
    };
    let result = run(&values, &graph, config);
    assert_eq!(result.outcome(), RunOutcome::TooComplex);
    assert_eq!(result.anchors(), None);

    // A single path yields a constant.
    let single = InstructionGraph::new(
        vec![Push(values.int(5)), Assign(x), Push(x), Probe(Anchor(1)), Return { with_value: true }],
        vec![],
    )
    .unwrap();
    let result = run(&values, &single, EngineConfig::default());
    assert_eq!(
        result.anchor(Anchor(1)).unwrap().constant(),
        Some(Constant::Int(5))
    );
}

/// ```txt
///  0: push 0
///  1: assign i
///  2: push i       <-+
///  3: push n         |
///  4: lt             |
///  5: if_false 11    |
///  6: push i         |
///  7: push 1         |
///  8: add            |
///  9: assign i       |
/// 10: goto 2       --+
/// 11: push i
/// 12: probe 1
/// 13: return value
/// ```
fn counting_loop(values: &ValueFactory) -> InstructionGraph {
    let i = values.variable("i", ValueType::Int);
    let n = values.variable("n", ValueType::Int);
    graph(vec![
        Push(values.int(0)),
        Assign(i),
        Push(i),
        Push(n),
        compare(Relation::Lt),
        ConditionalGoto {
            target: 11,
            when: false,
        },
        Push(i),
        Push(values.int(1)),
        Binary(BinOp::Arith(ArithOp::Add)),
        Assign(i),
        Goto(2),
        Push(i),
        Probe(Anchor(1)),
        Return { with_value: true },
    ])
}

#[test_log::test]
fn widening_tests() {
    let values = ValueFactory::new();
    let graph = counting_loop(&values);

    let result = run(&values, &graph, EngineConfig::default());
    assert_eq!(result.outcome(), RunOutcome::Ok);
    let facts = result.anchor(Anchor(1)).unwrap();
    assert_eq!(facts.facts.get(RANGE), LongRange::new(0, INF));
    assert!(!facts.all_constant);
    assert!(result.steps() > graph.len());
}

/// ```txt
/// 0: push 0
/// 1: push 1       <-+
/// 2: add            |
/// 3: dup            |
/// 4: push n         |
/// 5: lt             |
/// 6: if_true 1    --+
/// 7: return value
/// ```
#[test_log::test]
fn stack_widening_tests() {
    let values = ValueFactory::new();
    let n = values.variable("n", ValueType::Int);
    let graph = graph(vec![
        Push(values.int(0)),
        Push(values.int(1)),
        Binary(BinOp::Arith(ArithOp::Add)),
        Dup,
        Push(n),
        compare(Relation::Lt),
        ConditionalGoto {
            target: 1,
            when: true,
        },
        Return { with_value: true },
    ]);

    let result = run(&values, &graph, EngineConfig::default());
    assert_eq!(result.outcome(), RunOutcome::Ok);
    assert_eq!(result.returned().unwrap().facts.get(RANGE), LongRange::new(1, INF));
    assert!(result.steps() < 10 * graph.len());
}

/// ```txt
/// 0: call more 0 : bool  <-+
/// 1: if_false 6            |
/// 2: push x                |
/// 3: call g 1 : ref        |
/// 4: assign x              |
/// 5: goto 0              --+
/// 6: push x
/// 7: probe 1
/// 8: return value
/// ```
#[test]
fn impure_call_loop_tests() {
    let values = ValueFactory::new();
    let x = values.variable("x", ValueType::Ref);
    let unknown_call = |name: &str, arg_count, return_type| super::instructions::Call {
        name: name.to_owned(),
        arg_count,
        contracts: vec![],
        return_type,
        pure: false,
        anchor: None,
    };
    let graph = graph(vec![
        Call(unknown_call("more", 0, ValueType::Bool)),
        ConditionalGoto {
            target: 6,
            when: false,
        },
        Push(x),
        Call(unknown_call("g", 1, ValueType::Ref)),
        Assign(x),
        Goto(0),
        Push(x),
        Probe(Anchor(1)),
        Return { with_value: true },
    ]);

    let mut entry = MemoryState::new();
    assert!(entry.apply_condition(&values, Condition::new(x, Relation::Ne, values.null())));
    let engine = Engine::new(&values, EngineConfig::default());
    let result = engine.analyze(&graph, vec![entry], &mut NoOpListener);
    assert_eq!(result.outcome(), RunOutcome::Ok);
    // Non-null when the loop is skipped, unknown after any call.
    let facts = result.anchor(Anchor(1)).unwrap();
    assert_eq!(facts.facts.get(NULLABILITY), Nullability::Unknown);
}

#[derive(Default)]
struct JoinCounter {
    join: usize,
    executed: usize,
}

impl Listener for JoinCounter {
    fn before_instruction(&mut self, index: usize, _: &Instruction, _: &MemoryState) {
        if index == self.join {
            self.executed += 1;
        }
    }
}

#[test]
fn branches_rejoin_tests() {
    let values = ValueFactory::new();
    let p = values.variable("p", ValueType::Ref);
    // if (p != null) { probe(p) @1 } probe(p) @2, joining at 7.
    let graph = graph(vec![
        Push(p),
        Push(values.null()),
        compare(Relation::Ne),
        ConditionalGoto {
            target: 7,
            when: false,
        },
        Push(p),
        Probe(Anchor(1)),
        Pop,
        Push(p),
        Probe(Anchor(2)),
        Pop,
        Return { with_value: false },
    ]);

    let mut counter = JoinCounter {
        join: 7,
        ..JoinCounter::default()
    };
    let result = Engine::new(&values, EngineConfig::default()).analyze(
        &graph,
        vec![MemoryState::new()],
        &mut counter,
    );
    assert!(result.is_ok());
    assert_eq!(counter.executed, 1);
    assert_eq!(result.anchor(Anchor(2)).unwrap().hits, 1);
}

#[test]
fn limit_tests() {
    let values = ValueFactory::new();
    let graph = counting_loop(&values);

    let config = EngineConfig {
        step_limit_per_instruction: 1,
        ..EngineConfig::default()
    };
    let result = run(&values, &graph, config);
    assert_eq!(result.outcome(), RunOutcome::TooComplex);
    assert_eq!(result.steps(), graph.len() + 1);
    assert_eq!(result.unreachable_anchors(), None);

    let token = CancellationToken::new();
    token.cancel();
    let config = EngineConfig {
        poll_interval: 1,
        ..EngineConfig::default()
    };
    let result = Engine::new(&values, config)
        .with_cancellation(token.clone())
        .analyze(&graph, vec![MemoryState::new()], &mut NoOpListener);
    assert_eq!(result.outcome(), RunOutcome::Cancelled);
    assert_eq!(result.returned(), None);

    // Running out of time is a complexity problem, not a cancellation, and
    // gets remembered like one.
    let config = EngineConfig {
        time_budget: Some(Duration::ZERO),
        poll_interval: 1,
        ..EngineConfig::default()
    };
    let cache = RunCache::new();
    let result = Engine::new(&values, config).analyze_cached(
        &cache,
        "loop",
        1,
        &graph,
        vec![MemoryState::new()],
        &mut NoOpListener,
    );
    assert_eq!(result.outcome(), RunOutcome::TooComplex);
    assert_eq!(cache.known_outcome("loop", 1), Some(RunOutcome::TooComplex));

    let result = Engine::new(&values, EngineConfig::default()).analyze(&graph, vec![], &mut NoOpListener);
    assert_eq!(result.outcome(), RunOutcome::NotApplicable);
}

#[test]
fn abort_tests() {
    let values = ValueFactory::new();
    let graph = graph(vec![Pop, Return { with_value: false }]);

    let result = run(&values, &graph, EngineConfig::default());
    assert_eq!(result.outcome(), RunOutcome::Aborted);
    let report = result.abort_report().unwrap();
    assert_eq!(report.index, 0);
    assert_eq!(
        report.error,
        "stack underflow at instruction 0: needed 1 value(s), found 0"
    );
    assert_eq!(report.listing, "0: pop\n1: return\n");
    assert_eq!(report.state, "stack: [] facts: {} relations: []");

    // Only variables can be assigned.
    let graph = InstructionGraph::new(
        vec![Push(values.int(1)), Assign(values.int(2)), Return { with_value: false }],
        vec![],
    )
    .unwrap();
    let result = run(&values, &graph, EngineConfig::default());
    assert_eq!(result.outcome(), RunOutcome::Aborted);
    assert_eq!(result.abort_report().unwrap().index, 1);
}

#[test]
fn foreign_value_tests() {
    let values = ValueFactory::new();
    let source = ValueFactory::new();
    for i in 0..16 {
        source.int(i);
    }
    let foreign = source.variable("elsewhere", ValueType::Int);
    let graph = graph(vec![Push(foreign), Return { with_value: true }]);

    let result = run(&values, &graph, EngineConfig::default());
    assert_eq!(result.outcome(), RunOutcome::Aborted);
    let report = result.abort_report().unwrap();
    assert_eq!(report.index, 0);
    assert_eq!(
        report.error,
        format!("value {foreign} was not created by the value factory of this run")
    );
}

/// ```txt
///  0: push 3
///  1: assign x
///  2: push x
///  3: box
///  4: probe 1
///  5: push null
///  6: eq
///  7: if_false 10
///  8: push x
///  9: probe 2
/// 10: return
/// ```
#[test]
fn boxing_tests() {
    let values = ValueFactory::new();
    let x = values.variable("x", ValueType::Int);
    let graph = graph(vec![
        Push(values.int(3)),
        Assign(x),
        Push(x),
        BoxValue,
        Probe(Anchor(1)),
        Push(values.null()),
        compare(Relation::Eq),
        ConditionalGoto {
            target: 10,
            when: false,
        },
        Push(x),
        Probe(Anchor(2)),
        Return { with_value: false },
    ]);

    let result = run(&values, &graph, EngineConfig::default());
    assert!(result.is_ok());
    let boxed = result.anchor(Anchor(1)).unwrap();
    assert_eq!(boxed.facts.get(NULLABILITY), Nullability::NotNull);
    assert_eq!(boxed.facts.get(RANGE), LongRange::new(3, 3));
    assert_eq!(result.unreachable_anchors(), Some(BTreeSet::from([Anchor(2)])));
}

#[test]
fn call_tests() {
    let values = ValueFactory::new();
    let p = values.variable("p", ValueType::Ref);
    let null = values.null();
    let call = super::instructions::Call {
        name: "require_non_null".to_owned(),
        arg_count: 1,
        contracts: parse_contracts("null -> fail; !null -> !null", 1).unwrap(),
        return_type: ValueType::Ref,
        pure: true,
        anchor: Some(Anchor(5)),
    };
    let graph = graph(vec![
        Push(p),
        Call(call),
        Probe(Anchor(6)),
        Return { with_value: true },
    ]);
    let engine = Engine::new(&values, EngineConfig::default());

    let result = engine.analyze(&graph, vec![MemoryState::new()], &mut NoOpListener);
    assert_eq!(
        result.call_failures(Anchor(5)),
        Some(CallFailures {
            failing: 0,
            ephemeral: 1
        })
    );
    assert_eq!(
        result.anchor(Anchor(6)).unwrap().facts.get(NULLABILITY),
        Nullability::NotNull
    );
    assert_eq!(result.unreachable_anchors(), Some(BTreeSet::new()));

    let mut known_null = MemoryState::new();
    assert!(known_null.apply_condition(&values, Condition::new(p, Relation::Eq, null)));
    let result = engine.analyze(&graph, vec![known_null], &mut NoOpListener);
    assert_eq!(
        result.call_failures(Anchor(5)),
        Some(CallFailures {
            failing: 1,
            ephemeral: 0
        })
    );
    // The call site was reached, only the probe after it was not.
    assert_eq!(result.unreachable_anchors(), Some(BTreeSet::from([Anchor(6)])));
}

/// ```txt
/// r = f(p)  // contract "null -> null; !null -> !null"
/// if (r == null) probe(p) @1
/// ```
#[test]
fn ephemeral_tests() {
    let values = ValueFactory::new();
    let p = values.variable("p", ValueType::Ref);
    let call = super::instructions::Call {
        name: "f".to_owned(),
        arg_count: 1,
        contracts: parse_contracts("null -> null; !null -> !null", 1).unwrap(),
        return_type: ValueType::Ref,
        pure: true,
        anchor: None,
    };
    let graph = graph(vec![
        Push(p),
        Call(call),
        Push(values.null()),
        compare(Relation::Eq),
        ConditionalGoto {
            target: 8,
            when: false,
        },
        Push(p),
        Probe(Anchor(1)),
        Pop,
        Return { with_value: false },
    ]);

    let result = run(&values, &graph, EngineConfig::default());
    let facts = result.anchor(Anchor(1)).unwrap();
    assert!(facts.ephemeral_only);
    assert_eq!(facts.facts.get(NULLABILITY), Nullability::Null);
}

#[test]
fn closure_tests() {
    let values = ValueFactory::new();
    let x = values.variable("x", ValueType::Ref);
    let closure = InstructionGraph::new(
        vec![Push(x), Probe(Anchor(1)), Pop, Return { with_value: false }],
        vec![],
    )
    .unwrap();

    // x = null; closure { probe(x) @1 }
    let graph = InstructionGraph::new(
        vec![
            Push(values.null()),
            Assign(x),
            Closure(0),
            Return { with_value: false },
        ],
        vec![closure.clone()],
    )
    .unwrap();
    let result = run(&values, &graph, EngineConfig::default());
    assert!(result.is_ok());
    let facts = result.anchor(Anchor(1)).unwrap();
    assert_eq!(facts.constant(), Some(Constant::Null));

    // A closure that is never created.
    let graph = InstructionGraph::new(
        vec![Goto(2), Closure(0), Return { with_value: false }],
        vec![closure],
    )
    .unwrap();
    let result = run(&values, &graph, EngineConfig::default());
    assert!(result.is_ok());
    assert_eq!(result.unreachable_anchors(), Some(BTreeSet::from([Anchor(1)])));
}

#[derive(Default)]
struct Recorder {
    visited: Vec<usize>,
    returns: usize,
}

impl Listener for Recorder {
    fn before_instruction(&mut self, index: usize, _: &Instruction, _: &MemoryState) {
        self.visited.push(index);
    }

    fn on_return(&mut self, value: Option<ValueId>, _: &MemoryState) {
        assert!(value.is_some());
        self.returns += 1;
    }
}

#[test]
fn listener_tests() {
    let values = ValueFactory::new();
    let graph = graph(vec![
        Split(vec![1, 3]),
        Push(values.int(1)),
        Return { with_value: true },
        Push(values.int(2)),
        Return { with_value: true },
    ]);
    let mut recorder = Recorder::default();
    let result = Engine::new(&values, EngineConfig::default()).analyze(
        &graph,
        vec![MemoryState::new()],
        &mut recorder,
    );
    assert!(result.is_ok());
    assert_eq!(recorder.visited, vec![0, 1, 2, 3, 4]);
    assert_eq!(recorder.returns, 2);
    assert_eq!(result.returned().unwrap().facts.get(RANGE), LongRange::new(1, 2));
    assert_eq!(result.steps(), 5);
}

#[test]
fn cache_tests() {
    let values = ValueFactory::new();
    let graph = counting_loop(&values);
    let cache = RunCache::new();
    let strict = Engine::new(
        &values,
        EngineConfig {
            step_limit_per_instruction: 1,
            ..EngineConfig::default()
        },
    );

    let entry = || vec![MemoryState::new()];
    let first = strict.analyze_cached(&cache, "loop", 1, &graph, entry(), &mut NoOpListener);
    assert_eq!(first.outcome(), RunOutcome::TooComplex);
    assert_eq!(cache.len(), 1);

    // Same stamp: not analyzed again, even by a more generous engine.
    let generous = Engine::new(&values, EngineConfig::default());
    let second = generous.analyze_cached(&cache, "loop", 1, &graph, entry(), &mut NoOpListener);
    assert_eq!(second.outcome(), RunOutcome::TooComplex);
    assert_eq!(second.steps(), 0);

    // A new stamp invalidates the entry.
    let third = generous.analyze_cached(&cache, "loop", 2, &graph, entry(), &mut NoOpListener);
    assert!(third.is_ok());
    assert!(cache.is_empty());
    assert_eq!(cache.known_outcome("loop", 1), None);
}
