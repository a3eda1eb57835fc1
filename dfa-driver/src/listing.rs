use std::collections::HashMap;

use dfa_engine::contracts::parse_contracts;
use dfa_engine::domains::Relation;
use dfa_engine::error::GraphError;
use dfa_engine::instructions::{Anchor, Call, Instruction, InstructionGraph};
use dfa_engine::values::{ArithOp, BinOp, ValueFactory, ValueId, ValueType};
use thiserror::Error;

/// A listing that could not be turned into an instruction graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[line {line}] {message}")]
pub struct ListingError {
    pub line: u32,
    pub message: String,
}

impl ListingError {
    fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// A graph under construction: the body or one of the closures.
struct Section {
    closure: Option<usize>,
    instructions: Vec<Instruction>,
    closures: Vec<InstructionGraph>,
}

impl Section {
    fn new(closure: Option<usize>) -> Self {
        Self {
            closure,
            instructions: Vec::new(),
            closures: Vec::new(),
        }
    }

    fn finish(self, line: u32) -> Result<InstructionGraph, ListingError> {
        InstructionGraph::new(self.instructions, self.closures).map_err(|error| {
            let error = match self.closure {
                Some(closure) => GraphError::InClosure {
                    closure,
                    source: Box::new(error),
                },
                None => error,
            };
            ListingError::new(line, error.to_string())
        })
    }
}

/// Parses the textual listing format, the same one
/// [`InstructionGraph::listing`] prints. Declarations come first:
///
/// ```txt
/// param p: ref
/// var i: int
/// field p.next: ref
/// 0: push p
/// 1: closure 0
/// 2: return
/// closure 0 {
///   0: return
/// }
/// ```
///
/// Lines starting with `#` are comments.
pub struct ListingParser<'v> {
    values: &'v ValueFactory,
    names: HashMap<String, ValueId>,
    parameters: Vec<ValueId>,
    sections: Vec<Section>,
    line: u32,
}

impl<'v> ListingParser<'v> {
    pub fn new(values: &'v ValueFactory) -> Self {
        Self {
            values,
            names: HashMap::new(),
            parameters: Vec::new(),
            sections: vec![Section::new(None)],
            line: 0,
        }
    }

    pub fn parse(mut self, source: &str) -> Result<InstructionGraph, ListingError> {
        for line in source.lines() {
            self.line += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.parse_line(line)?;
        }

        if self.sections.len() > 1 {
            let open = self.sections.last().and_then(|s| s.closure).unwrap_or(0);
            return Err(self.error(format!("closure {open} is not closed")));
        }
        let root = self.sections.pop().unwrap_or_else(|| Section::new(None));
        Ok(root.finish(self.line)?.with_parameters(self.parameters))
    }

    fn error(&self, message: impl Into<String>) -> ListingError {
        ListingError::new(self.line, message)
    }

    fn current(&mut self) -> &mut Section {
        // The root section is only removed at the very end.
        let last = self.sections.len() - 1;
        &mut self.sections[last]
    }

    fn parse_line(&mut self, line: &str) -> Result<(), ListingError> {
        if line == "}" {
            return self.close_closure();
        }
        if let Some(header) = line.strip_prefix("closure ").and_then(|h| h.strip_suffix('{')) {
            return self.open_closure(header.trim());
        }
        for (keyword, is_param) in [("param ", true), ("var ", false)] {
            if let Some(decl) = line.strip_prefix(keyword) {
                let var = self.declare_variable(decl)?;
                if is_param {
                    self.parameters.push(var);
                }
                return Ok(());
            }
        }
        if let Some(decl) = line.strip_prefix("field ") {
            return self.declare_field(decl);
        }

        let Some((index, instruction)) = line.split_once(':') else {
            return Err(self.error(format!("expected an instruction, found '{line}'")));
        };
        let expected = self.current().instructions.len();
        match index.trim().parse::<usize>() {
            Ok(index) if index == expected => {}
            _ => {
                return Err(self.error(format!(
                    "expected instruction number {expected}, found '{}'",
                    index.trim()
                )));
            }
        }
        let instruction = self.parse_instruction(instruction.trim())?;
        self.current().instructions.push(instruction);
        Ok(())
    }

    fn open_closure(&mut self, id: &str) -> Result<(), ListingError> {
        let expected = self.current().closures.len();
        match id.parse::<usize>() {
            Ok(id) if id == expected => {
                self.sections.push(Section::new(Some(id)));
                Ok(())
            }
            _ => Err(self.error(format!("expected closure {expected}, found '{id}'"))),
        }
    }

    fn close_closure(&mut self) -> Result<(), ListingError> {
        if self.sections.len() < 2 {
            return Err(self.error("unexpected '}'"));
        }
        let line = self.line;
        let closure = match self.sections.pop() {
            Some(section) => section.finish(line)?,
            None => return Err(self.error("unexpected '}'")),
        };
        self.current().closures.push(closure);
        Ok(())
    }

    /// `name: type`
    fn parse_declaration<'a>(&self, decl: &'a str) -> Result<(&'a str, ValueType), ListingError> {
        let Some((name, ty)) = decl.split_once(':') else {
            return Err(self.error(format!("expected 'name: type', found '{decl}'")));
        };
        let name = name.trim();
        if name.is_empty() || self.names.contains_key(name) {
            return Err(self.error(format!("invalid or duplicate name '{name}'")));
        }
        Ok((name, self.parse_type(ty.trim())?))
    }

    fn declare_variable(&mut self, decl: &str) -> Result<ValueId, ListingError> {
        let (name, ty) = self.parse_declaration(decl)?;
        if name.contains('.') {
            return Err(self.error(format!("'{name}' must be declared as a field")));
        }
        let var = self.values.variable(name, ty);
        self.names.insert(name.to_owned(), var);
        Ok(var)
    }

    fn declare_field(&mut self, decl: &str) -> Result<(), ListingError> {
        let (name, ty) = self.parse_declaration(decl)?;
        let Some((qualifier, field)) = name.rsplit_once('.') else {
            return Err(self.error(format!("field '{name}' needs a qualifier")));
        };
        let Some(&qualifier) = self.names.get(qualifier) else {
            return Err(self.error(format!("unknown qualifier '{qualifier}'")));
        };
        let var = self.values.field(qualifier, field, ty);
        self.names.insert(name.to_owned(), var);
        Ok(())
    }

    fn parse_type(&self, text: &str) -> Result<ValueType, ListingError> {
        match text {
            "bool" => Ok(ValueType::Bool),
            "int" => Ok(ValueType::Int),
            "ref" => Ok(ValueType::Ref),
            "any" => Ok(ValueType::Unknown),
            _ => Err(self.error(format!("unknown type '{text}'"))),
        }
    }

    fn parse_value(&self, text: &str) -> Result<ValueId, ListingError> {
        let values = self.values;
        match text {
            "null" => Ok(values.null()),
            "true" => Ok(values.bool(true)),
            "false" => Ok(values.bool(false)),
            "?" => Ok(values.unknown()),
            _ => {
                if let Ok(number) = text.parse::<i64>() {
                    return Ok(values.int(number));
                }
                self.names
                    .get(text)
                    .copied()
                    .ok_or_else(|| self.error(format!("undeclared value '{text}'")))
            }
        }
    }

    fn parse_number<T: core::str::FromStr>(&self, text: Option<&str>) -> Result<T, ListingError> {
        let text = text.unwrap_or_default();
        text.parse()
            .map_err(|_| self.error(format!("expected a number, found '{text}'")))
    }

    fn parse_instruction(&self, text: &str) -> Result<Instruction, ListingError> {
        if let Some(call) = text.strip_prefix("call ") {
            return self.parse_call(call);
        }
        let mut words = text.split_whitespace();
        let opcode = words.next().unwrap_or_default();
        let operand = words.next();
        let instruction = match opcode {
            "push" => Instruction::Push(self.parse_value(operand.unwrap_or_default())?),
            "assign" => Instruction::Assign(self.parse_value(operand.unwrap_or_default())?),
            "flush" => Instruction::Flush(self.parse_value(operand.unwrap_or_default())?),
            "pop" => Instruction::Pop,
            "dup" => Instruction::Dup,
            "swap" => Instruction::Swap,
            "not" => Instruction::Not,
            "box" => Instruction::BoxValue,
            "throw" => Instruction::Throw,
            "add" => Instruction::Binary(BinOp::Arith(ArithOp::Add)),
            "sub" => Instruction::Binary(BinOp::Arith(ArithOp::Sub)),
            "mul" => Instruction::Binary(BinOp::Arith(ArithOp::Mul)),
            "eq" => Instruction::Binary(BinOp::Compare(Relation::Eq)),
            "ne" => Instruction::Binary(BinOp::Compare(Relation::Ne)),
            "lt" => Instruction::Binary(BinOp::Compare(Relation::Lt)),
            "le" => Instruction::Binary(BinOp::Compare(Relation::Le)),
            "gt" => Instruction::Binary(BinOp::Compare(Relation::Gt)),
            "ge" => Instruction::Binary(BinOp::Compare(Relation::Ge)),
            "goto" => Instruction::Goto(self.parse_number(operand)?),
            "if_true" | "if_false" => Instruction::ConditionalGoto {
                target: self.parse_number(operand)?,
                when: opcode == "if_true",
            },
            "split" => {
                let targets = operand
                    .into_iter()
                    .chain(words.by_ref())
                    .map(|t| self.parse_number(Some(t)))
                    .collect::<Result<Vec<usize>, _>>()?;
                if targets.is_empty() {
                    return Err(self.error("split needs at least one target"));
                }
                Instruction::Split(targets)
            }
            "probe" => Instruction::Probe(Anchor(self.parse_number(operand)?)),
            "closure" => Instruction::Closure(self.parse_number(operand)?),
            "return" => match operand {
                None => Instruction::Return { with_value: false },
                Some("value") => Instruction::Return { with_value: true },
                Some(other) => return Err(self.error(format!("unexpected '{other}' after return"))),
            },
            _ => return Err(self.error(format!("unknown instruction '{opcode}'"))),
        };
        match words.next() {
            Some(extra) => Err(self.error(format!("unexpected '{extra}' after {opcode}"))),
            None => Ok(instruction),
        }
    }

    /// `name argc [pure] : type [contract "text"] [@anchor]`
    fn parse_call(&self, text: &str) -> Result<Instruction, ListingError> {
        let (head, contract, tail) = match text.split_once('"') {
            Some((head, rest)) => match rest.split_once('"') {
                Some((contract, tail)) => (head, Some(contract), tail),
                None => return Err(self.error("unterminated contract text")),
            },
            None => (text, None, ""),
        };

        let mut words = head.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| self.error("call needs a callee name"))?
            .to_owned();
        let arg_count: usize = self.parse_number(words.next())?;
        let mut pure = false;
        let mut return_type = None;
        let mut has_contract_keyword = false;
        let mut anchor = None;
        let mut words = words.chain(tail.split_whitespace());
        while let Some(word) = words.next() {
            match word {
                "pure" => pure = true,
                ":" => return_type = Some(self.parse_type(words.next().unwrap_or_default())?),
                "contract" => has_contract_keyword = true,
                _ => match word.strip_prefix('@') {
                    Some(id) if anchor.is_none() => {
                        anchor = Some(Anchor(self.parse_number(Some(id))?));
                    }
                    _ => return Err(self.error(format!("unexpected '{word}' in call"))),
                },
            }
        }
        if has_contract_keyword != contract.is_some() {
            return Err(self.error("expected 'contract \"...\"'"));
        }
        let contracts = match contract {
            Some(text) => parse_contracts(text, arg_count)
                .map_err(|e| self.error(format!("invalid contract of {name}: {e}")))?,
            None => Vec::new(),
        };

        Ok(Instruction::Call(Call {
            name,
            arg_count,
            contracts,
            return_type: return_type.ok_or_else(|| self.error("call needs ': type'"))?,
            pure,
            anchor,
        }))
    }
}

/// Parses a listing, interning its values into `values`.
pub fn parse_listing(source: &str, values: &ValueFactory) -> Result<InstructionGraph, ListingError> {
    ListingParser::new(values).parse(source)
}
