use std::collections::{HashMap, HashSet};

use log::debug;

use crate::config::EngineConfig;
use crate::contracts::*;
use crate::domains::Nullability;

/// Expressions of the statement trees contracts are inferred from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Param(usize),
    Null,
    Bool(bool),
    /// A freshly allocated object, never null.
    New,
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Call { callee: String, args: Vec<Expr> },
    /// Anything else: its value is unknown, evaluating it has no effect.
    Opaque,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stmt {
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    Return(Expr),
    Throw,
    /// An expression evaluated for its effects.
    Eval(Expr),
    /// A statement inference does not model; it gives up on the procedure.
    Unsupported,
}

/// A procedure contracts can be inferred for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Procedure {
    pub name: String,
    pub param_count: usize,
    pub return_type: ValueType,
    pub nullability: Option<Nullability>,
    pub body: Stmt,
    /// Contracts written by hand take precedence over inferred ones.
    pub declared: Option<Vec<Contract>>,
}

/// Inference gave up on a procedure.
struct Abandoned;

type Vector = Vec<ValueConstraint>;

/// Infers contracts for a set of procedures. Callees are inferred on demand;
/// a procedure whose inference is already in progress yields no contracts,
/// which breaks recursion. Results are memoized for the session.
pub struct InferenceSession<'a> {
    procedures: &'a HashMap<String, Procedure>,
    config: &'a EngineConfig,
    in_progress: HashSet<String>,
    inferred: HashMap<String, Vec<Contract>>,
}

impl<'a> InferenceSession<'a> {
    pub fn new(procedures: &'a HashMap<String, Procedure>, config: &'a EngineConfig) -> Self {
        Self {
            procedures,
            config,
            in_progress: HashSet::new(),
            inferred: HashMap::new(),
        }
    }

    pub fn infer(&mut self, name: &str) -> Vec<Contract> {
        if let Some(known) = self.inferred.get(name) {
            return known.clone();
        }
        let procedures = self.procedures;
        let Some(procedure) = procedures.get(name) else {
            return Vec::new();
        };
        if let Some(declared) = &procedure.declared {
            return declared.clone();
        }
        if !self.in_progress.insert(name.to_owned()) {
            debug!("inference of {name} is already in progress, assuming no contracts");
            return Vec::new();
        }

        let mut walker = Walker {
            session: self,
            procedure,
            emitted: Vec::new(),
        };
        let initial = vec![vec![ValueConstraint::Any; procedure.param_count]];
        let result = match walker.walk(&procedure.body, initial) {
            Ok(_) => {
                let emitted = walker.emitted;
                finish(procedure, emitted, self.config.max_inferred_contracts)
            }
            Err(Abandoned) => {
                debug!("inference of {name} abandoned");
                Vec::new()
            }
        };

        self.in_progress.remove(name);
        self.inferred.insert(name.to_owned(), result.clone());
        result
    }
}

/// Deduplicates, normalizes and filters the raw clauses of a procedure.
fn finish(procedure: &Procedure, emitted: Vec<Contract>, cap: usize) -> Vec<Contract> {
    let mut unique: Vec<Contract> = Vec::new();
    for contract in emitted {
        if !unique.contains(&contract) {
            unique.push(contract);
        }
    }
    let mut result: Vec<Contract> = normalize_contracts(&unique)
        .into_iter()
        .filter(|c| c.ret != ReturnConstraint::ANY)
        .filter(|c| c.ret.is_compatible_with(procedure.return_type, procedure.nullability))
        .collect();
    result.truncate(cap);
    result
}

struct Walker<'s, 'a> {
    session: &'s mut InferenceSession<'a>,
    procedure: &'a Procedure,
    emitted: Vec<Contract>,
}

impl Walker<'_, '_> {
    /// Walks a statement with the constraint vectors reaching it. Returns the
    /// vectors that continue after it.
    fn walk(&mut self, stmt: &Stmt, states: Vec<Vector>) -> Result<Vec<Vector>, Abandoned> {
        if states.len() > self.session.config.max_inference_vectors {
            return Err(Abandoned);
        }
        match stmt {
            Stmt::Block(stmts) => {
                let mut states = states;
                for stmt in stmts {
                    if states.is_empty() {
                        break;
                    }
                    states = self.walk(stmt, states)?;
                }
                Ok(states)
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let mut taken = Vec::new();
                let mut not_taken = Vec::new();
                for vector in &states {
                    for (vector, truth) in self.truth(cond, vector)? {
                        if truth {
                            taken.push(vector);
                        } else {
                            not_taken.push(vector);
                        }
                    }
                }
                let mut result = if taken.is_empty() {
                    Vec::new()
                } else {
                    self.walk(then, taken)?
                };
                match otherwise {
                    Some(otherwise) if !not_taken.is_empty() => {
                        result.extend(self.walk(otherwise, not_taken)?)
                    }
                    Some(_) => {}
                    None => result.extend(not_taken),
                }
                Ok(result)
            }
            Stmt::Return(expr) => {
                for vector in &states {
                    for (vector, ret) in self.returns(expr, vector)? {
                        if ret != ReturnConstraint::ANY {
                            self.emitted.push(Contract::new(vector, ret));
                        }
                    }
                }
                Ok(Vec::new())
            }
            Stmt::Throw => {
                for vector in states {
                    self.emitted.push(Contract::new(vector, ReturnConstraint::Fail));
                }
                Ok(Vec::new())
            }
            Stmt::Eval(Expr::Call { callee, args }) => {
                let mut continuing = Vec::new();
                for vector in &states {
                    for (vector, ret) in self.call(callee, args, vector)? {
                        if ret == ReturnConstraint::Fail {
                            self.emitted.push(Contract::new(vector, ret));
                        } else {
                            continuing.push(vector);
                        }
                    }
                }
                Ok(continuing)
            }
            Stmt::Eval(_) => Ok(states),
            Stmt::Unsupported => Err(Abandoned),
        }
    }

    /// Splits a vector by the truth of a condition.
    fn truth(&mut self, expr: &Expr, vector: &Vector) -> Result<Vec<(Vector, bool)>, Abandoned> {
        match expr {
            Expr::Bool(b) => Ok(vec![(vector.clone(), *b)]),
            Expr::Param(i) => split_param(vector, *i, ValueConstraint::True),
            Expr::Not(inner) => Ok(self
                .truth(inner, vector)?
                .into_iter()
                .map(|(v, t)| (v, !t))
                .collect()),
            Expr::And(a, b) => {
                let mut result = Vec::new();
                for (v, t) in self.truth(a, vector)? {
                    if t {
                        result.extend(self.truth(b, &v)?);
                    } else {
                        result.push((v, false));
                    }
                }
                Ok(result)
            }
            Expr::Or(a, b) => {
                let mut result = Vec::new();
                for (v, t) in self.truth(a, vector)? {
                    if t {
                        result.push((v, true));
                    } else {
                        result.extend(self.truth(b, &v)?);
                    }
                }
                Ok(result)
            }
            Expr::Eq(a, b) => equality(vector, a, b),
            Expr::Ne(a, b) => Ok(equality(vector, a, b)?
                .into_iter()
                .map(|(v, t)| (v, !t))
                .collect()),
            Expr::Call { callee, args } => {
                let mut result = Vec::new();
                for (v, ret) in self.call(callee, args, vector)? {
                    match ret {
                        ReturnConstraint::Value(ValueConstraint::True) => result.push((v, true)),
                        ReturnConstraint::Value(ValueConstraint::False) => result.push((v, false)),
                        ReturnConstraint::Fail => {
                            self.emitted.push(Contract::new(v, ReturnConstraint::Fail))
                        }
                        ReturnConstraint::Value(_) => return Err(Abandoned),
                    }
                }
                Ok(result)
            }
            Expr::Null | Expr::New | Expr::Opaque => Err(Abandoned),
        }
    }

    /// The possible returned values of an expression, per refined vector.
    fn returns(
        &mut self,
        expr: &Expr,
        vector: &Vector,
    ) -> Result<Vec<(Vector, ReturnConstraint)>, Abandoned> {
        let value = |v: &Vector, c: ValueConstraint| (v.clone(), ReturnConstraint::Value(c));
        match expr {
            Expr::Null => Ok(vec![value(vector, ValueConstraint::Null)]),
            Expr::New => Ok(vec![value(vector, ValueConstraint::NotNull)]),
            Expr::Bool(b) => Ok(vec![value(vector, bool_constraint(*b))]),
            Expr::Opaque => Ok(vec![(vector.clone(), ReturnConstraint::ANY)]),
            Expr::Param(i) if self.procedure.return_type != ValueType::Bool => {
                Ok(split_param(vector, *i, ValueConstraint::Null)?
                    .into_iter()
                    .map(|(v, is_null)| {
                        let c = if is_null {
                            ValueConstraint::Null
                        } else {
                            ValueConstraint::NotNull
                        };
                        (v, ReturnConstraint::Value(c))
                    })
                    .collect())
            }
            Expr::Call { callee, args } => self.call(callee, args, vector),
            _ => Ok(self
                .truth(expr, vector)?
                .into_iter()
                .map(|(v, t)| (v, ReturnConstraint::Value(bool_constraint(t))))
                .collect()),
        }
    }

    /// Applies the callee's contracts to the argument expressions, clause by
    /// clause, refining the caller's vector where arguments are parameters.
    fn call(
        &mut self,
        callee: &str,
        args: &[Expr],
        vector: &Vector,
    ) -> Result<Vec<(Vector, ReturnConstraint)>, Abandoned> {
        let contracts = self.session.infer(callee);
        let mut result = Vec::new();
        let mut remaining = vec![vector.clone()];
        for contract in &contracts {
            let mut next_remaining = Vec::new();
            for current in remaining {
                let mut prefix = current;
                let mut matches = true;
                for (arg, constraint) in args.iter().zip(&contract.params) {
                    if *constraint == ValueConstraint::Any {
                        continue;
                    }
                    match arg {
                        Expr::Param(j) => {
                            let Some(&known) = prefix.get(*j) else {
                                return Err(Abandoned);
                            };
                            if known == *constraint {
                                continue;
                            }
                            if !known.intersects(*constraint) {
                                matches = false;
                                break;
                            }
                            if known != ValueConstraint::Any {
                                return Err(Abandoned);
                            }
                            if let Some(negated) = constraint.negate() {
                                let mut residue = prefix.clone();
                                residue[*j] = negated;
                                next_remaining.push(residue);
                            }
                            prefix[*j] = *constraint;
                        }
                        literal => match literal_matches(literal, *constraint) {
                            Some(true) => {}
                            Some(false) => {
                                matches = false;
                                break;
                            }
                            None => return Err(Abandoned),
                        },
                    }
                }
                if matches {
                    result.push((prefix, contract.ret));
                } else {
                    next_remaining.push(prefix);
                }
            }
            remaining = next_remaining;
        }
        result.extend(remaining.into_iter().map(|v| (v, ReturnConstraint::ANY)));
        Ok(result)
    }
}

fn bool_constraint(b: bool) -> ValueConstraint {
    if b {
        ValueConstraint::True
    } else {
        ValueConstraint::False
    }
}

/// Splits a vector on whether parameter `i` satisfies `positive` (`Null` or
/// `True`). A parameter already constrained the other way is a type clash.
fn split_param(
    vector: &Vector,
    i: usize,
    positive: ValueConstraint,
) -> Result<Vec<(Vector, bool)>, Abandoned> {
    let Some(negative) = positive.negate() else {
        return Err(Abandoned);
    };
    match vector.get(i) {
        None => Err(Abandoned),
        Some(&c) if c == positive => Ok(vec![(vector.clone(), true)]),
        Some(&c) if c == negative => Ok(vec![(vector.clone(), false)]),
        Some(ValueConstraint::Any) => {
            let (mut yes, mut no) = (vector.clone(), vector.clone());
            yes[i] = positive;
            no[i] = negative;
            Ok(vec![(yes, true), (no, false)])
        }
        Some(_) => Err(Abandoned),
    }
}

fn equality(vector: &Vector, a: &Expr, b: &Expr) -> Result<Vec<(Vector, bool)>, Abandoned> {
    match (a, b) {
        (Expr::Param(i), Expr::Null) | (Expr::Null, Expr::Param(i)) => {
            split_param(vector, *i, ValueConstraint::Null)
        }
        (Expr::Param(i), Expr::Bool(t)) | (Expr::Bool(t), Expr::Param(i)) => {
            Ok(split_param(vector, *i, ValueConstraint::True)?
                .into_iter()
                .map(|(v, is_true)| (v, is_true == *t))
                .collect())
        }
        (Expr::Null, Expr::Null) => Ok(vec![(vector.clone(), true)]),
        (Expr::New, Expr::Null) | (Expr::Null, Expr::New) => Ok(vec![(vector.clone(), false)]),
        (Expr::Bool(x), Expr::Bool(y)) => Ok(vec![(vector.clone(), x == y)]),
        _ => Err(Abandoned),
    }
}

/// Whether a literal argument satisfies a constraint, `None` when the
/// argument is not a literal.
fn literal_matches(expr: &Expr, constraint: ValueConstraint) -> Option<bool> {
    let actual = match expr {
        Expr::Null => ValueConstraint::Null,
        Expr::New => ValueConstraint::NotNull,
        Expr::Bool(b) => bool_constraint(*b),
        _ => return None,
    };
    Some(actual == constraint || constraint == ValueConstraint::Any)
}
