//! Lowering of structured loops and returns into labels and jumps.
//!
//! ```text
//! loop break=B continue=C { body }   =>   C:  body  goto C  B:
//! return v                           =>   goto R with v
//! ```
//!
//! where `R` labels the end of the unit body, so falling off the end of the
//! body and returning from it both yield the unit's result.

use crate::NodeName;
use flowrite_compiler_core::{
    CatchBlock, CodeUnit, Label, LabelTable, Node, SwitchCase, TryNode, ValueType,
};
use std::mem;

/// Rewrite every [`Node::Loop`] and [`Node::Return`] in `unit`.
pub fn lower(unit: &mut CodeUnit) {
    let body = mem::replace(&mut unit.body, Node::nil());
    let mut lowering = Lowering {
        labels: &mut unit.labels,
        return_label: None,
    };
    let body = lowering.node(body);
    unit.body = match lowering.return_label {
        Some(ret) => Node::label_with_default(ret, body),
        None => body,
    };
    debug!("lowered unit '{}'", unit.name);
}

struct Lowering<'a> {
    labels: &'a mut LabelTable,
    return_label: Option<Label>,
}

impl Lowering<'_> {
    fn return_label(&mut self) -> Label {
        *self
            .return_label
            .get_or_insert_with(|| self.labels.add_synthetic("return", Some(ValueType::Any)))
    }

    fn boxed(&mut self, node: Box<Node>) -> Box<Node> {
        Box::new(self.node(*node))
    }

    fn opt(&mut self, node: Option<Box<Node>>) -> Option<Box<Node>> {
        node.map(|node| self.boxed(node))
    }

    fn node(&mut self, node: Node) -> Node {
        trace!("lowering {}", node.node_name());
        match node {
            Node::Loop {
                body,
                break_label,
                continue_label,
            } => {
                let head = continue_label
                    .unwrap_or_else(|| self.labels.add_synthetic("loop", None));
                let mut lowered = vec![Node::label(head), self.node(*body), Node::goto(head)];
                if let Some(exit) = break_label {
                    lowered.push(Node::label(exit));
                }
                Node::Block(lowered)
            }
            Node::Return(value) => {
                let ret = self.return_label();
                Node::Goto {
                    target: ret,
                    value: self.opt(value),
                }
            }
            node @ (Node::Const(_) | Node::Local(_) | Node::Raise { .. }) => node,
            Node::Assign { target, value } => Node::Assign {
                target,
                value: self.boxed(value),
            },
            Node::Binary { op, left, right } => Node::Binary {
                op,
                left: self.boxed(left),
                right: self.boxed(right),
            },
            Node::Not(value) => Node::Not(self.boxed(value)),
            Node::Throw(value) => Node::Throw(self.boxed(value)),
            Node::If { test, then, orelse } => Node::If {
                test: self.boxed(test),
                then: self.boxed(then),
                orelse: self.opt(orelse),
            },
            Node::Call { callee, args } => Node::Call {
                callee,
                args: args.into_iter().map(|arg| self.node(arg)).collect(),
            },
            Node::Block(children) => {
                Node::Block(children.into_iter().map(|child| self.node(child)).collect())
            }
            Node::Label { target, default } => Node::Label {
                target,
                default: self.opt(default),
            },
            Node::Goto { target, value } => Node::Goto {
                target,
                value: self.opt(value),
            },
            Node::Try(node) => {
                let TryNode {
                    body,
                    handlers,
                    finally,
                    fault,
                } = *node;
                Node::Try(Box::new(TryNode {
                    body: self.node(body),
                    handlers: handlers
                        .into_iter()
                        .map(|handler| CatchBlock {
                            body: self.node(handler.body),
                            ..handler
                        })
                        .collect(),
                    finally: finally.map(|node| self.node(node)),
                    fault: fault.map(|node| self.node(node)),
                }))
            }
            Node::Switch {
                value,
                cases,
                default,
            } => Node::Switch {
                value: self.boxed(value),
                cases: cases
                    .into_iter()
                    .map(|case| SwitchCase {
                        value: case.value,
                        body: self.node(case.body),
                    })
                    .collect(),
                default: self.opt(default),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contains_structured(node: &Node) -> bool {
        let mut found = matches!(node, Node::Loop { .. } | Node::Return(_));
        node.for_each_child(|child| found |= contains_structured(child));
        found
    }

    #[test]
    fn loop_becomes_labels_and_back_jump() {
        let mut unit = CodeUnit::new("f");
        let exit = unit.label_with("break", ValueType::Int);
        let next = unit.label("next");
        unit.body = Node::loop_(Node::goto_with(exit, Node::int(5)), Some(exit), Some(next));
        lower(&mut unit);
        assert_eq!(
            unit.body,
            Node::block([
                Node::label(next),
                Node::goto_with(exit, Node::int(5)),
                Node::goto(next),
                Node::label(exit),
            ])
        );
    }

    #[test]
    fn loop_without_labels_gets_a_synthetic_head() {
        let mut unit = CodeUnit::new("f");
        unit.body = Node::loop_(Node::nil(), None, None);
        lower(&mut unit);
        let Node::Block(children) = &unit.body else {
            panic!("expected a block, got {:?}", unit.body);
        };
        assert_eq!(children.len(), 3);
        let Node::Label { target, .. } = children[0] else {
            panic!("expected loop head label");
        };
        assert!(unit.labels[target].synthetic);
        assert_eq!(children[2], Node::goto(target));
    }

    #[test]
    fn return_targets_the_end_of_the_body() {
        let mut unit = CodeUnit::new("f");
        unit.body = Node::block([Node::return_(Some(Node::int(1))), Node::int(2)]);
        lower(&mut unit);
        let Node::Label {
            target,
            default: Some(body),
        } = &unit.body
        else {
            panic!("expected the body to be wrapped in the return label");
        };
        assert_eq!(unit.labels[*target].carries, Some(ValueType::Any));
        assert_eq!(
            **body,
            Node::block([Node::goto_with(*target, Node::int(1)), Node::int(2)])
        );
    }

    #[test]
    fn nested_structures_are_fully_lowered() {
        let mut unit = CodeUnit::new("f");
        let outer = unit.label("outer");
        let inner = unit.label("inner");
        unit.body = Node::try_finally(
            Node::loop_(
                Node::if_then(Node::bool(true), Node::return_(None)),
                Some(outer),
                None,
            ),
            Node::loop_(Node::goto(inner), Some(inner), None),
        );
        lower(&mut unit);
        assert!(!contains_structured(&unit.body));
    }

    #[test]
    fn unit_without_return_is_not_wrapped() {
        let mut unit = CodeUnit::new("f");
        unit.body = Node::int(3);
        lower(&mut unit);
        assert_eq!(unit.body, Node::int(3));
        assert!(unit.labels.is_empty());
    }
}
