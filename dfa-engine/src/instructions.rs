use core::fmt::Display;

use itertools::Itertools;

use crate::contracts::{Contract, print_contracts};
use crate::error::GraphError;
use crate::values::{BinOp, ValueFactory, ValueId, ValueType};

/// A caller-chosen marker for an expression (or a call site) whose facts are
/// collected during the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Anchor(pub u32);

impl Display for Anchor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A call with its argument count and the contracts known for the callee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub name: String,
    pub arg_count: usize,
    pub contracts: Vec<Contract>,
    pub return_type: ValueType,
    /// Pure calls do not invalidate anything known about the heap.
    pub pure: bool,
    pub anchor: Option<Anchor>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Push(ValueId),
    Pop,
    Dup,
    Swap,
    /// Pops a value and stores it into the variable.
    Assign(ValueId),
    /// Pops the right operand, then the left one, pushes the result.
    Binary(BinOp),
    Not,
    /// Pops a value and pushes a non-null box holding it.
    BoxValue,
    Goto(usize),
    /// Pops a condition and jumps when it equals `when`.
    ConditionalGoto { target: usize, when: bool },
    /// Continues at every target.
    Split(Vec<usize>),
    Call(Call),
    /// Forgets everything known about a variable.
    Flush(ValueId),
    /// Records the facts of the value on top of the stack.
    Probe(Anchor),
    /// Captures the current state as an entry state of a nested graph.
    Closure(usize),
    Return { with_value: bool },
    Throw,
}

impl Instruction {
    /// Renders the instruction in the listing syntax.
    pub fn render(&self, values: &ValueFactory) -> String {
        match self {
            Instruction::Push(v) => format!("push {}", values.display(*v)),
            Instruction::Pop => "pop".to_owned(),
            Instruction::Dup => "dup".to_owned(),
            Instruction::Swap => "swap".to_owned(),
            Instruction::Assign(v) => format!("assign {}", values.display(*v)),
            Instruction::Binary(op) => binop_name(*op).to_owned(),
            Instruction::Not => "not".to_owned(),
            Instruction::BoxValue => "box".to_owned(),
            Instruction::Goto(t) => format!("goto {t}"),
            Instruction::ConditionalGoto { target, when: true } => format!("if_true {target}"),
            Instruction::ConditionalGoto {
                target,
                when: false,
            } => format!("if_false {target}"),
            Instruction::Split(targets) => format!("split {}", targets.iter().join(" ")),
            Instruction::Call(call) => {
                let mut text = format!("call {} {}", call.name, call.arg_count);
                if call.pure {
                    text.push_str(" pure");
                }
                text.push_str(&format!(" : {}", call.return_type));
                if !call.contracts.is_empty() {
                    text.push_str(&format!(" contract \"{}\"", print_contracts(&call.contracts)));
                }
                if let Some(anchor) = call.anchor {
                    text.push_str(&format!(" {anchor}"));
                }
                text
            }
            Instruction::Flush(v) => format!("flush {}", values.display(*v)),
            Instruction::Probe(anchor) => format!("probe {}", anchor.0),
            Instruction::Closure(id) => format!("closure {id}"),
            Instruction::Return { with_value: true } => "return value".to_owned(),
            Instruction::Return { with_value: false } => "return".to_owned(),
            Instruction::Throw => "throw".to_owned(),
        }
    }
}

pub fn binop_name(op: BinOp) -> &'static str {
    use crate::domains::Relation;
    use crate::values::ArithOp;
    match op {
        BinOp::Arith(ArithOp::Add) => "add",
        BinOp::Arith(ArithOp::Sub) => "sub",
        BinOp::Arith(ArithOp::Mul) => "mul",
        BinOp::Compare(Relation::Eq) => "eq",
        BinOp::Compare(Relation::Ne) => "ne",
        BinOp::Compare(Relation::Lt) => "lt",
        BinOp::Compare(Relation::Le) => "le",
        BinOp::Compare(Relation::Gt) => "gt",
        BinOp::Compare(Relation::Ge) => "ge",
    }
}

/// A validated instruction sequence with the nested graphs of its closures.
/// Instruction `0` is the entry, control flow is explicit in the jumps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstructionGraph {
    instructions: Vec<Instruction>,
    closures: Vec<InstructionGraph>,
    parameters: Vec<ValueId>,
}

impl InstructionGraph {
    pub fn new(
        instructions: Vec<Instruction>,
        closures: Vec<InstructionGraph>,
    ) -> Result<Self, GraphError> {
        let len = instructions.len();
        match instructions.last() {
            None => return Err(GraphError::Empty),
            Some(Instruction::Return { .. }) => {}
            Some(_) => return Err(GraphError::MissingReturn),
        }
        for (index, instr) in instructions.iter().enumerate() {
            let targets: &[usize] = match instr {
                Instruction::Goto(t) | Instruction::ConditionalGoto { target: t, .. } => {
                    core::slice::from_ref(t)
                }
                Instruction::Split(targets) => targets,
                Instruction::Closure(closure) if *closure >= closures.len() => {
                    return Err(GraphError::ClosureOutOfRange {
                        index,
                        closure: *closure,
                        count: closures.len(),
                    });
                }
                _ => &[],
            };
            if let Some(&target) = targets.iter().find(|&&t| t >= len) {
                return Err(GraphError::TargetOutOfRange { index, target, len });
            }
        }
        Ok(Self {
            instructions,
            closures,
            parameters: Vec::new(),
        })
    }

    /// Declares the variables holding the procedure parameters, in order.
    pub fn with_parameters(mut self, parameters: Vec<ValueId>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn parameters(&self) -> &[ValueId] {
        &self.parameters
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn closures(&self) -> &[InstructionGraph] {
        &self.closures
    }

    pub fn successors(&self, index: usize) -> Vec<usize> {
        match &self.instructions[index] {
            Instruction::Goto(t) => vec![*t],
            Instruction::ConditionalGoto { target, .. } => vec![index + 1, *target],
            Instruction::Split(targets) => targets.clone(),
            Instruction::Return { .. } | Instruction::Throw => Vec::new(),
            _ => vec![index + 1],
        }
    }

    /// Instructions with more than one successor. Processed states are only
    /// remembered at these points.
    pub fn is_branching(&self, index: usize) -> bool {
        matches!(
            self.instructions[index],
            Instruction::ConditionalGoto { .. } | Instruction::Split(_)
        )
    }

    /// The textual listing, one numbered instruction per line, closures in
    /// their own sections after the body.
    pub fn listing(&self, values: &ValueFactory) -> String {
        let mut out = String::new();
        self.write_listing(values, &mut out, 0);
        out
    }

    fn write_listing(&self, values: &ValueFactory, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        for (index, instr) in self.instructions.iter().enumerate() {
            out.push_str(&format!("{indent}{index}: {}\n", instr.render(values)));
        }
        for (id, closure) in self.closures.iter().enumerate() {
            out.push_str(&format!("{indent}closure {id} {{\n"));
            closure.write_listing(values, out, depth + 1);
            out.push_str(&format!("{indent}}}\n"));
        }
    }
}
