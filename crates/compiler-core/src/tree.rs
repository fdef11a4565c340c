//! Statement/expression nodes.
//!
//! Every node yields a value when evaluated. A [`Node::Block`] yields the
//! value of its last child, a [`Node::Label`] yields either its default or the
//! value carried by the jump that reached it.

use crate::{label::Label, unit::VarId};
use alloc::fmt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constant {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Eq,
    Ne,
    Lt,
    Le,
}

impl BinOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Const(Constant),
    Local(VarId),
    Assign {
        target: VarId,
        value: Box<Node>,
    },
    Binary {
        op: BinOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Not(Box<Node>),
    If {
        test: Box<Node>,
        then: Box<Node>,
        #[serde(default)]
        orelse: Option<Box<Node>>,
    },
    /// Call into the host; the callee is resolved outside this tree.
    Call {
        callee: String,
        #[serde(default)]
        args: Vec<Node>,
    },
    Block(Vec<Node>),
    /// Definition point of `target`. Falling into it yields `default`; a jump
    /// to it yields the jump's value.
    Label {
        target: Label,
        #[serde(default)]
        default: Option<Box<Node>>,
    },
    Goto {
        target: Label,
        #[serde(default)]
        value: Option<Box<Node>>,
    },
    Try(Box<TryNode>),
    /// Throw an existing exception value.
    Throw(Box<Node>),
    /// Create and throw a new exception.
    Raise {
        kind: String,
        #[serde(default)]
        message: String,
    },
    Switch {
        value: Box<Node>,
        cases: Vec<SwitchCase>,
        #[serde(default)]
        default: Option<Box<Node>>,
    },
    /// Structured loop; removed by lowering.
    Loop {
        body: Box<Node>,
        #[serde(default)]
        break_label: Option<Label>,
        #[serde(default)]
        continue_label: Option<Label>,
    },
    /// Structured return; removed by lowering.
    Return(Option<Box<Node>>),
}

/// A protected region. At most one of `finally` and `fault` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryNode {
    pub body: Node,
    #[serde(default)]
    pub handlers: Vec<CatchBlock>,
    /// Runs on every exit from `body` and the handlers.
    #[serde(default)]
    pub finally: Option<Node>,
    /// Runs only when `body` or a handler exits by throwing.
    #[serde(default)]
    pub fault: Option<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchBlock {
    /// Exception kind this handler accepts; `None` catches everything.
    #[serde(default)]
    pub kind: Option<String>,
    /// Local receiving the caught exception.
    #[serde(default)]
    pub variable: Option<VarId>,
    pub body: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: i64,
    pub body: Node,
}

impl Node {
    pub const fn nil() -> Self {
        Self::Const(Constant::Nil)
    }

    pub const fn int(value: i64) -> Self {
        Self::Const(Constant::Int(value))
    }

    pub const fn bool(value: bool) -> Self {
        Self::Const(Constant::Bool(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::Const(Constant::Str(value.into()))
    }

    pub const fn local(var: VarId) -> Self {
        Self::Local(var)
    }

    pub fn assign(target: VarId, value: Self) -> Self {
        Self::Assign {
            target,
            value: Box::new(value),
        }
    }

    pub fn binary(op: BinOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(left: Self, right: Self) -> Self {
        Self::binary(BinOp::Add, left, right)
    }

    pub fn not(value: Self) -> Self {
        Self::Not(Box::new(value))
    }

    pub fn if_then(test: Self, then: Self) -> Self {
        Self::If {
            test: Box::new(test),
            then: Box::new(then),
            orelse: None,
        }
    }

    pub fn if_else(test: Self, then: Self, orelse: Self) -> Self {
        Self::If {
            test: Box::new(test),
            then: Box::new(then),
            orelse: Some(Box::new(orelse)),
        }
    }

    pub fn call(callee: impl Into<String>, args: impl IntoIterator<Item = Self>) -> Self {
        Self::Call {
            callee: callee.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn block(children: impl IntoIterator<Item = Self>) -> Self {
        Self::Block(children.into_iter().collect())
    }

    pub const fn label(target: Label) -> Self {
        Self::Label {
            target,
            default: None,
        }
    }

    pub fn label_with_default(target: Label, default: Self) -> Self {
        Self::Label {
            target,
            default: Some(Box::new(default)),
        }
    }

    pub const fn goto(target: Label) -> Self {
        Self::Goto {
            target,
            value: None,
        }
    }

    pub fn goto_with(target: Label, value: Self) -> Self {
        Self::Goto {
            target,
            value: Some(Box::new(value)),
        }
    }

    pub fn try_finally(body: Self, finally: Self) -> Self {
        Self::Try(Box::new(TryNode {
            body,
            handlers: Vec::new(),
            finally: Some(finally),
            fault: None,
        }))
    }

    pub fn try_fault(body: Self, fault: Self) -> Self {
        Self::Try(Box::new(TryNode {
            body,
            handlers: Vec::new(),
            finally: None,
            fault: Some(fault),
        }))
    }

    pub fn try_catch(body: Self, handlers: impl IntoIterator<Item = CatchBlock>) -> Self {
        Self::Try(Box::new(TryNode {
            body,
            handlers: handlers.into_iter().collect(),
            finally: None,
            fault: None,
        }))
    }

    pub fn throw(value: Self) -> Self {
        Self::Throw(Box::new(value))
    }

    pub fn raise(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raise {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn switch(value: Self, cases: impl IntoIterator<Item = SwitchCase>) -> Self {
        Self::Switch {
            value: Box::new(value),
            cases: cases.into_iter().collect(),
            default: None,
        }
    }

    pub fn loop_(body: Self, break_label: Option<Label>, continue_label: Option<Label>) -> Self {
        Self::Loop {
            body: Box::new(body),
            break_label,
            continue_label,
        }
    }

    pub fn return_(value: Option<Self>) -> Self {
        Self::Return(value.map(Box::new))
    }

    /// Calls `f` on each direct child, in evaluation order.
    pub fn for_each_child<'a>(&'a self, mut f: impl FnMut(&'a Self)) {
        match self {
            Self::Const(_) | Self::Local(_) | Self::Raise { .. } => {}
            Self::Assign { value, .. } | Self::Not(value) | Self::Throw(value) => f(value),
            Self::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            Self::If { test, then, orelse } => {
                f(test);
                f(then);
                if let Some(orelse) = orelse {
                    f(orelse);
                }
            }
            Self::Call { args, .. } => args.iter().for_each(f),
            Self::Block(children) => children.iter().for_each(f),
            Self::Label { default, .. } => {
                if let Some(default) = default {
                    f(default);
                }
            }
            Self::Goto { value, .. } | Self::Return(value) => {
                if let Some(value) = value {
                    f(value);
                }
            }
            Self::Try(node) => {
                f(&node.body);
                for handler in &node.handlers {
                    f(&handler.body);
                }
                if let Some(finally) = &node.finally {
                    f(finally);
                }
                if let Some(fault) = &node.fault {
                    f(fault);
                }
            }
            Self::Switch {
                value,
                cases,
                default,
            } => {
                f(value);
                for case in cases {
                    f(&case.body);
                }
                if let Some(default) = default {
                    f(default);
                }
            }
            Self::Loop { body, .. } => f(body),
        }
    }

    /// True when the node contains no control flow and renders on one line.
    pub fn is_simple(&self) -> bool {
        match self {
            Self::Const(_) | Self::Local(_) | Self::Raise { .. } => true,
            Self::Not(value) | Self::Throw(value) => value.is_simple(),
            Self::Assign { value, .. } => value.is_simple(),
            Self::Binary { left, right, .. } => left.is_simple() && right.is_simple(),
            Self::Call { args, .. } => args.iter().all(Self::is_simple),
            Self::Goto { value, .. } => value.as_deref().is_none_or(Self::is_simple),
            Self::Label { default, .. } => default.is_none(),
            Self::If { .. }
            | Self::Block(_)
            | Self::Try(_)
            | Self::Switch { .. }
            | Self::Loop { .. }
            | Self::Return(_) => false,
        }
    }
}

impl CatchBlock {
    pub fn all(variable: Option<VarId>, body: Node) -> Self {
        Self {
            kind: None,
            variable,
            body,
        }
    }

    pub fn of_kind(kind: impl Into<String>, variable: Option<VarId>, body: Node) -> Self {
        Self {
            kind: Some(kind.into()),
            variable,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_in_evaluation_order() {
        let node = Node::binary(BinOp::Lt, Node::int(1), Node::int(2));
        let mut seen = Vec::new();
        node.for_each_child(|child| seen.push(child.clone()));
        assert_eq!(seen, vec![Node::int(1), Node::int(2)]);
    }

    #[test]
    fn simple_nodes() {
        let l = Label::new(0);
        assert!(Node::goto_with(l, Node::int(3)).is_simple());
        assert!(Node::label(l).is_simple());
        assert!(!Node::label_with_default(l, Node::nil()).is_simple());
        assert!(!Node::block([]).is_simple());
        assert!(!Node::goto_with(l, Node::block([])).is_simple());
    }
}
