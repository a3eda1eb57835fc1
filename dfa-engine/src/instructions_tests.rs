use super::contracts::*;
use super::domains::Relation;
use super::error::GraphError;
use super::instructions::*;
use super::loops::LoopInfo;
use super::values::*;

#[test]
fn validation_tests() {
    use Instruction::*;

    assert_eq!(InstructionGraph::new(vec![], vec![]), Err(GraphError::Empty));
    assert_eq!(
        InstructionGraph::new(vec![Pop], vec![]),
        Err(GraphError::MissingReturn)
    );
    assert_eq!(
        InstructionGraph::new(vec![Goto(5), Return { with_value: false }], vec![]),
        Err(GraphError::TargetOutOfRange {
            index: 0,
            target: 5,
            len: 2
        })
    );
    assert_eq!(
        InstructionGraph::new(vec![Closure(0), Return { with_value: false }], vec![]),
        Err(GraphError::ClosureOutOfRange {
            index: 0,
            closure: 0,
            count: 0
        })
    );
    assert!(InstructionGraph::new(vec![Split(vec![0, 1]), Return { with_value: false }], vec![]).is_ok());
}

#[test]
fn successor_tests() {
    use Instruction::*;

    let graph = InstructionGraph::new(
        vec![
            ConditionalGoto {
                target: 3,
                when: true,
            },
            Split(vec![0, 3]),
            Throw,
            Return { with_value: false },
        ],
        vec![],
    )
    .unwrap();
    assert_eq!(graph.successors(0), vec![1, 3]);
    assert_eq!(graph.successors(1), vec![0, 3]);
    assert!(graph.successors(2).is_empty());
    assert!(graph.is_branching(0));
    assert!(graph.is_branching(1));
    assert!(!graph.is_branching(2));
}

#[test]
fn listing_tests() {
    use Instruction::*;

    let values = ValueFactory::new();
    let x = values.variable("x", ValueType::Ref);
    let call = super::instructions::Call {
        name: "check".to_owned(),
        arg_count: 1,
        contracts: parse_contracts("null -> fail; _ -> true", 1).unwrap(),
        return_type: ValueType::Bool,
        pure: true,
        anchor: Some(Anchor(7)),
    };
    let closure = InstructionGraph::new(vec![Return { with_value: false }], vec![]).unwrap();
    let graph = InstructionGraph::new(
        vec![
            Push(x),
            Push(values.null()),
            Binary(BinOp::Compare(Relation::Ne)),
            ConditionalGoto {
                target: 6,
                when: false,
            },
            Push(x),
            Call(call),
            Closure(0),
            Return { with_value: false },
        ],
        vec![closure],
    )
    .unwrap();

    let expected = "\
0: push x
1: push null
2: ne
3: if_false 6
4: push x
5: call check 1 pure : bool contract \"null -> fail; _ -> true\" @7
6: closure 0
7: return
closure 0 {
  0: return
}
";
    assert_eq!(graph.listing(&values), expected);
}

#[test]
fn loop_tests() {
    use Instruction::*;

    // 0 -> 1 -> 2 -> 3 -> 4 --+
    //      ^    |    |    |   |
    //      |    v    v    +---+
    //      |    5    5    |
    //      +--------------+
    let graph = InstructionGraph::new(
        vec![
            Dup,
            Dup,
            ConditionalGoto {
                target: 5,
                when: true,
            },
            Split(vec![4, 5]),
            Split(vec![4, 1]),
            Return { with_value: false },
        ],
        vec![],
    )
    .unwrap();
    let loops = LoopInfo::new(&graph);
    assert_eq!(loops.loop_count(), 1);
    assert!(!loops.in_loop(0));
    assert!(loops.in_loop(1));
    assert!(!loops.in_loop(5));
    let id = loops.loop_id(1);
    assert_eq!(loops.members(id), vec![1, 2, 3, 4]);
    assert!(loops.members(0).is_empty());

    // Two separate loops.
    let graph = InstructionGraph::new(
        vec![
            Split(vec![0, 1]),
            Dup,
            Split(vec![1, 3]),
            Return { with_value: false },
        ],
        vec![],
    )
    .unwrap();
    let loops = LoopInfo::new(&graph);
    assert_eq!(loops.loop_count(), 2);
    assert_ne!(loops.loop_id(0), loops.loop_id(1));
    assert_eq!(loops.loop_id(1), loops.loop_id(2));
    assert!(!loops.in_loop(3));
}
