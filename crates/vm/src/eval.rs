use crate::{
    error::EvalError,
    host::Host,
    value::{Exception, Value},
};
use alloc::rc::Rc;
use flowrite_compiler_core::{BinOp, CodeUnit, Label, Node, TryNode, VarId};

/// How a jump leaving a `finally`/`fault` body is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvalMode {
    /// Such a jump is an [`EvalError::JumpOutOfFinally`]; rewritten units
    /// never contain one.
    #[default]
    Strict,
    /// Such a jump replaces whatever completion was pending when the cleanup
    /// body started, including an exception in flight.
    Permissive,
}

#[derive(Debug, Clone)]
pub struct EvalOpts {
    pub mode: EvalMode,
    /// Maximum number of nodes evaluated before giving up; `None` for no limit
    pub step_limit: Option<u64>,
}

impl Default for EvalOpts {
    fn default() -> Self {
        Self {
            mode: EvalMode::Strict,
            step_limit: Some(1_000_000),
        }
    }
}

/// The reason why evaluation is leaving a node early.
#[derive(Debug)]
enum Unwind {
    /// A goto in flight towards its label.
    Jump { label: Label, value: Value },
    /// A language exception, catchable by handlers.
    Throw(Rc<Exception>),
    /// Evaluation failed; cleanup bodies do not run.
    Error(EvalError),
}

impl From<EvalError> for Unwind {
    fn from(err: EvalError) -> Self {
        Self::Error(err)
    }
}

type EvalResult = Result<Value, Unwind>;

/// Evaluate the body of `unit` and return its value.
pub fn run(unit: &CodeUnit, host: &mut dyn Host, opts: &EvalOpts) -> Result<Value, EvalError> {
    let locals = unit
        .locals
        .iter()
        .map(|(_, decl)| Value::from(&decl.ty.initial_value()))
        .collect();
    let mut frame = Frame {
        host,
        opts,
        locals,
        steps: 0,
    };
    let result = frame.eval(&unit.body);
    trace!("evaluated unit '{}' in {} steps", unit.name, frame.steps);
    match result {
        Ok(value) => Ok(value),
        Err(Unwind::Jump { label, .. }) => Err(EvalError::UndefinedLabel(label)),
        Err(Unwind::Throw(exc)) => Err(EvalError::Unhandled {
            kind: exc.kind.clone(),
            message: exc.message.clone(),
        }),
        Err(Unwind::Error(err)) => Err(err),
    }
}

struct Frame<'a> {
    host: &'a mut dyn Host,
    opts: &'a EvalOpts,
    locals: Vec<Value>,
    steps: u64,
}

impl Frame<'_> {
    fn load(&self, var: VarId) -> Result<Value, EvalError> {
        self.locals
            .get(var.idx())
            .cloned()
            .ok_or(EvalError::UnknownLocal(var.idx()))
    }

    fn store(&mut self, var: VarId, value: Value) -> Result<(), EvalError> {
        let slot = self
            .locals
            .get_mut(var.idx())
            .ok_or(EvalError::UnknownLocal(var.idx()))?;
        *slot = value;
        Ok(())
    }

    fn step(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        match self.opts.step_limit {
            Some(limit) if self.steps > limit => Err(EvalError::StepLimit(limit)),
            _ => Ok(()),
        }
    }

    fn eval(&mut self, node: &Node) -> EvalResult {
        self.step()?;
        match node {
            Node::Const(constant) => Ok(constant.into()),
            Node::Local(var) => Ok(self.load(*var)?),
            Node::Assign { target, value } => {
                let value = self.eval(value)?;
                self.store(*target, value.clone())?;
                Ok(value)
            }
            Node::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right)?)
            }
            Node::Not(value) => Ok(Value::Bool(!self.eval(value)?.is_truthy())),
            Node::If { test, then, orelse } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(then)
                } else if let Some(orelse) = orelse {
                    self.eval(orelse)
                } else {
                    Ok(Value::Nil)
                }
            }
            Node::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.host
                    .call(callee, &args)
                    .map_err(|exc| Unwind::Throw(Rc::new(exc)))
            }
            Node::Block(children) => self.eval_block(children),
            Node::Label { target, default } => match default {
                Some(default) => match self.eval(default) {
                    Err(Unwind::Jump { label, value }) if label == *target => Ok(value),
                    other => other,
                },
                None => Ok(Value::Nil),
            },
            Node::Goto { target, value } => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Nil,
                };
                Err(Unwind::Jump {
                    label: *target,
                    value,
                })
            }
            Node::Try(region) => self.eval_try(region),
            Node::Throw(value) => match self.eval(value)? {
                Value::Exception(exc) => Err(Unwind::Throw(exc)),
                other => Err(EvalError::NotAnException(other.type_name()).into()),
            },
            Node::Raise { kind, message } => Err(Unwind::Throw(Rc::new(Exception::new(
                kind.as_str(),
                message.as_str(),
            )))),
            Node::Switch {
                value,
                cases,
                default,
            } => {
                let selector = match self.eval(value)? {
                    Value::Int(selector) => selector,
                    other => {
                        return Err(EvalError::TypeMismatch {
                            expected: "int",
                            found: other.type_name(),
                        }
                        .into());
                    }
                };
                match cases.iter().find(|case| case.value == selector) {
                    Some(case) => self.eval(&case.body),
                    None => match default {
                        Some(default) => self.eval(default),
                        None => Ok(Value::Nil),
                    },
                }
            }
            Node::Loop { .. } => Err(EvalError::Unlowered("loop").into()),
            Node::Return(_) => Err(EvalError::Unlowered("return").into()),
        }
    }

    /// A jump to a label that is an immediate child resumes the block there,
    /// the label yielding the jump's value.
    fn eval_block(&mut self, children: &[Node]) -> EvalResult {
        let mut last = Value::Nil;
        let mut idx = 0;
        while let Some(child) = children.get(idx) {
            match self.eval(child) {
                Ok(value) => {
                    last = value;
                    idx += 1;
                }
                Err(Unwind::Jump { label, value }) => {
                    let position = children
                        .iter()
                        .position(|c| matches!(c, Node::Label { target, .. } if *target == label));
                    let Some(position) = position else {
                        return Err(Unwind::Jump { label, value });
                    };
                    trace!("jump to label {label} resumes block at {position}");
                    last = value;
                    idx = position + 1;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(last)
    }

    fn eval_try(&mut self, region: &TryNode) -> EvalResult {
        let mut outcome = self.eval(&region.body);
        if let Err(Unwind::Throw(exc)) = &outcome {
            let handler = region.handlers.iter().find(|handler| {
                handler
                    .kind
                    .as_deref()
                    .is_none_or(|kind| kind == exc.kind)
            });
            if let Some(handler) = handler {
                let exc = exc.clone();
                if let Some(var) = handler.variable {
                    self.store(var, Value::Exception(exc))?;
                }
                outcome = self.eval(&handler.body);
            }
        }
        if let Some(fault) = &region.fault {
            if matches!(outcome, Err(Unwind::Throw(_))) {
                outcome = self.cleanup(fault, outcome);
            }
        }
        if let Some(finally) = &region.finally {
            outcome = self.cleanup(finally, outcome);
        }
        outcome
    }

    /// Run a cleanup body while `pending` waits to complete.
    fn cleanup(&mut self, body: &Node, pending: EvalResult) -> EvalResult {
        if let Err(Unwind::Error(_)) = pending {
            return pending;
        }
        match self.eval(body) {
            Ok(_) => pending,
            Err(Unwind::Jump { label, value }) => match self.opts.mode {
                EvalMode::Strict => Err(EvalError::JumpOutOfFinally(label).into()),
                EvalMode::Permissive => {
                    trace!("jump to label {label} overrides pending completion");
                    Err(Unwind::Jump { label, value })
                }
            },
            Err(other) => Err(other),
        }
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let ints = |found: &Value| EvalError::TypeMismatch {
        expected: "int",
        found: found.type_name(),
    };
    let (a, b) = match (op, left, right) {
        (BinOp::Eq, _, _) => return Ok(Value::Bool(left == right)),
        (BinOp::Ne, _, _) => return Ok(Value::Bool(left != right)),
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            return Ok(Value::Str(format!("{a}{b}").into()));
        }
        (_, Value::Int(a), Value::Int(b)) => (*a, *b),
        (_, Value::Int(_), other) | (_, other, _) => return Err(ints(other)),
    };
    Ok(match op {
        BinOp::Add => Value::Int(a.wrapping_add(b)),
        BinOp::Sub => Value::Int(a.wrapping_sub(b)),
        BinOp::Mul => Value::Int(a.wrapping_mul(b)),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Le => Value::Bool(a <= b),
        BinOp::Eq | BinOp::Ne => unreachable!("handled above"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use flowrite_compiler_core::{CatchBlock, ValueType};

    fn eval_with(unit: &CodeUnit, mode: EvalMode) -> (Result<Value, EvalError>, Vec<String>) {
        let mut host = RecordingHost::new().fail_on("fail", "HostError");
        let opts = EvalOpts {
            mode,
            ..EvalOpts::default()
        };
        let result = run(unit, &mut host, &opts);
        let trace = host.trace().into_iter().map(str::to_owned).collect();
        (result, trace)
    }

    fn eval(unit: &CodeUnit) -> Result<Value, EvalError> {
        eval_with(unit, EvalMode::Strict).0
    }

    #[test]
    fn locals_start_at_their_type_default() {
        let mut unit = CodeUnit::new("f");
        let n = unit.local("n", ValueType::Int);
        unit.body = Node::add(Node::local(n), Node::int(2));
        assert_eq!(eval(&unit), Ok(Value::Int(2)));
    }

    #[test]
    fn jump_resumes_at_sibling_label_with_value() {
        let mut unit = CodeUnit::new("f");
        let end = unit.label_with("end", ValueType::Int);
        unit.body = Node::block([
            Node::goto_with(end, Node::int(7)),
            Node::call("skipped", []),
            Node::label(end),
        ]);
        let (result, trace) = eval_with(&unit, EvalMode::Strict);
        assert_eq!(result, Ok(Value::Int(7)));
        assert!(trace.is_empty());
    }

    #[test]
    fn backward_jump_loops_until_the_step_limit() {
        let mut unit = CodeUnit::new("f");
        let head = unit.label("head");
        unit.body = Node::block([Node::label(head), Node::goto(head)]);
        let mut host = RecordingHost::new();
        let opts = EvalOpts {
            step_limit: Some(100),
            ..EvalOpts::default()
        };
        assert_eq!(run(&unit, &mut host, &opts), Err(EvalError::StepLimit(100)));
    }

    #[test]
    fn labeled_default_catches_its_own_jumps() {
        let mut unit = CodeUnit::new("f");
        let ret = unit.label_with("return", ValueType::Any);
        unit.body = Node::label_with_default(
            ret,
            Node::block([
                Node::if_then(Node::bool(true), Node::goto_with(ret, Node::str("early"))),
                Node::str("late"),
            ]),
        );
        assert_eq!(eval(&unit), Ok(Value::from("early")));
    }

    #[test]
    fn jump_out_of_try_body_runs_finally() {
        let mut unit = CodeUnit::new("f");
        let end = unit.label("end");
        let x = unit.local("x", ValueType::Int);
        unit.body = Node::block([
            Node::try_finally(
                Node::block([
                    Node::assign(x, Node::int(1)),
                    Node::goto(end),
                    Node::assign(x, Node::int(2)),
                ]),
                Node::assign(x, Node::add(Node::local(x), Node::int(10))),
            ),
            Node::label(end),
            Node::local(x),
        ]);
        assert_eq!(eval(&unit), Ok(Value::Int(11)));
    }

    #[test]
    fn handlers_match_by_kind() {
        let mut unit = CodeUnit::new("f");
        let e = unit.local("e", ValueType::Exception);
        unit.body = Node::try_catch(
            Node::raise("Boom", "bad"),
            [
                CatchBlock::of_kind("Other", None, Node::str("other")),
                CatchBlock::of_kind("Boom", Some(e), Node::local(e)),
            ],
        );
        let value = eval(&unit).unwrap();
        assert_eq!(value, Value::Exception(Rc::new(Exception::new("Boom", "bad"))));
    }

    #[test]
    fn fault_runs_only_when_throwing() {
        let mut unit = CodeUnit::new("f");
        unit.body = Node::block([
            Node::try_fault(Node::call("ok", []), Node::call("not_run", [])),
            Node::try_catch(
                Node::try_fault(Node::call("fail", []), Node::call("fault", [])),
                [CatchBlock::all(None, Node::nil())],
            ),
        ]);
        let (result, trace) = eval_with(&unit, EvalMode::Strict);
        assert_eq!(result, Ok(Value::Nil));
        assert_eq!(trace, ["ok", "fail", "fault"]);
    }

    #[test]
    fn unhandled_exception_runs_finally_then_escapes() {
        let mut unit = CodeUnit::new("f");
        unit.body = Node::try_finally(Node::raise("Boom", "bad"), Node::call("cleanup", []));
        let (result, trace) = eval_with(&unit, EvalMode::Strict);
        assert_eq!(
            result,
            Err(EvalError::Unhandled {
                kind: "Boom".to_owned(),
                message: "bad".to_owned(),
            })
        );
        assert_eq!(trace, ["cleanup"]);
    }

    #[test]
    fn jump_out_of_finally_depends_on_mode() {
        let mut unit = CodeUnit::new("f");
        let end = unit.label("end");
        unit.body = Node::block([
            Node::try_finally(Node::raise("Boom", ""), Node::goto(end)),
            Node::str("skipped"),
            Node::label(end),
        ]);
        assert_eq!(
            eval_with(&unit, EvalMode::Strict).0,
            Err(EvalError::JumpOutOfFinally(end))
        );
        // the jump discards the exception in flight
        assert_eq!(eval_with(&unit, EvalMode::Permissive).0, Ok(Value::Nil));
    }

    #[test]
    fn jump_to_label_that_is_not_on_the_path() {
        let mut unit = CodeUnit::new("f");
        let nowhere = unit.label("nowhere");
        unit.body = Node::goto(nowhere);
        assert_eq!(eval(&unit), Err(EvalError::UndefinedLabel(nowhere)));
    }

    #[test]
    fn type_errors_are_not_exceptions() {
        let mut unit = CodeUnit::new("f");
        unit.body = Node::try_catch(
            Node::add(Node::int(1), Node::bool(true)),
            [CatchBlock::all(None, Node::nil())],
        );
        assert_eq!(
            eval(&unit),
            Err(EvalError::TypeMismatch {
                expected: "int",
                found: "bool",
            })
        );
        unit.body = Node::throw(Node::int(3));
        assert_eq!(eval(&unit), Err(EvalError::NotAnException("int")));
    }
}
