//! Indented text listing of a [`CodeUnit`], used by the CLI and snapshot tests.

use crate::{
    label::Label,
    tree::{CatchBlock, Node},
    unit::{CodeUnit, VarId},
};
use alloc::fmt;
use itertools::Itertools;

const INDENT: &str = "  ";

impl fmt::Display for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "unit {}", self.name)?;
        for (_, decl) in self.locals.iter() {
            write!(f, "{INDENT}local {}: {}", decl.name, decl.ty)?;
            if decl.synthetic {
                f.write_str(" [synthetic]")?;
            }
            writeln!(f)?;
        }
        Printer { unit: self, f }.body(&self.body, 1)
    }
}

struct Printer<'a, 'b, 'c> {
    unit: &'a CodeUnit,
    f: &'b mut fmt::Formatter<'c>,
}

impl Printer<'_, '_, '_> {
    fn indent(&mut self, depth: usize) -> fmt::Result {
        for _ in 0..depth {
            self.f.write_str(INDENT)?;
        }
        Ok(())
    }

    fn label(&mut self, label: Label) -> fmt::Result {
        match self.unit.labels.get(label) {
            Some(decl) => write!(self.f, "{}#{label}", decl.name),
            None => write!(self.f, "?#{label}"),
        }
    }

    fn var(&mut self, var: VarId) -> fmt::Result {
        match self.unit.locals.get(var) {
            Some(decl) => self.f.write_str(&decl.name),
            None => write!(self.f, "?{}", var.idx()),
        }
    }

    /// A body prints a block's children directly at `depth`.
    fn body(&mut self, node: &Node, depth: usize) -> fmt::Result {
        match node {
            Node::Block(children) if children.is_empty() => {
                self.indent(depth)?;
                writeln!(self.f, "pass")
            }
            Node::Block(children) => children.iter().try_for_each(|c| self.node(c, depth)),
            _ => self.node(node, depth),
        }
    }

    /// `header value` on one line when `value` is simple, otherwise `header`
    /// followed by `value` as an indented body.
    fn headed(
        &mut self,
        node: &Node,
        depth: usize,
        header: impl FnOnce(&mut Self) -> fmt::Result,
    ) -> fmt::Result {
        self.indent(depth)?;
        header(self)?;
        if node.is_simple() {
            self.f.write_str(" ")?;
            self.inline(node)?;
            writeln!(self.f)
        } else {
            writeln!(self.f)?;
            self.body(node, depth + 1)
        }
    }

    fn node(&mut self, node: &Node, depth: usize) -> fmt::Result {
        if node.is_simple() {
            self.indent(depth)?;
            self.inline(node)?;
            return writeln!(self.f);
        }
        match node {
            Node::Assign { target, value } => self.headed(value, depth, |p| {
                p.var(*target)?;
                p.f.write_str(" =")
            }),
            Node::Not(value) => self.headed(value, depth, |p| p.f.write_str("not")),
            Node::Throw(value) => self.headed(value, depth, |p| p.f.write_str("throw")),
            Node::Binary { op, left, right } => {
                self.indent(depth)?;
                writeln!(self.f, "binary {}", op.as_str())?;
                self.node(left, depth + 1)?;
                self.node(right, depth + 1)
            }
            Node::Call { callee, args } => {
                self.indent(depth)?;
                writeln!(self.f, "call {callee}")?;
                args.iter().try_for_each(|arg| self.node(arg, depth + 1))
            }
            Node::Goto {
                target,
                value: Some(value),
            } => self.headed(value, depth, |p| {
                p.f.write_str("goto ")?;
                p.label(*target)?;
                p.f.write_str(" with")
            }),
            Node::Label {
                target,
                default: Some(default),
            } => {
                self.indent(depth)?;
                self.f.write_str("labeled ")?;
                self.label(*target)?;
                writeln!(self.f)?;
                self.body(default, depth + 1)
            }
            Node::Return(Some(value)) => self.headed(value, depth, |p| p.f.write_str("return")),
            Node::If { test, then, orelse } => {
                self.headed(test, depth, |p| p.f.write_str("if"))?;
                self.indent(depth)?;
                writeln!(self.f, "then:")?;
                self.body(then, depth + 1)?;
                if let Some(orelse) = orelse {
                    self.indent(depth)?;
                    writeln!(self.f, "else:")?;
                    self.body(orelse, depth + 1)?;
                }
                Ok(())
            }
            Node::Block(children) => {
                self.indent(depth)?;
                writeln!(self.f, "block:")?;
                children.iter().try_for_each(|c| self.node(c, depth + 1))
            }
            Node::Try(node) => {
                self.indent(depth)?;
                writeln!(self.f, "try:")?;
                self.body(&node.body, depth + 1)?;
                for handler in &node.handlers {
                    self.catch(handler, depth)?;
                }
                if let Some(finally) = &node.finally {
                    self.indent(depth)?;
                    writeln!(self.f, "finally:")?;
                    self.body(finally, depth + 1)?;
                }
                if let Some(fault) = &node.fault {
                    self.indent(depth)?;
                    writeln!(self.f, "fault:")?;
                    self.body(fault, depth + 1)?;
                }
                Ok(())
            }
            Node::Switch {
                value,
                cases,
                default,
            } => {
                self.headed(value, depth, |p| p.f.write_str("switch"))?;
                for case in cases {
                    self.indent(depth + 1)?;
                    writeln!(self.f, "case {}:", case.value)?;
                    self.body(&case.body, depth + 2)?;
                }
                if let Some(default) = default {
                    self.indent(depth + 1)?;
                    writeln!(self.f, "default:")?;
                    self.body(default, depth + 2)?;
                }
                Ok(())
            }
            Node::Loop {
                body,
                break_label,
                continue_label,
            } => {
                self.indent(depth)?;
                self.f.write_str("loop")?;
                if let Some(label) = break_label {
                    self.f.write_str(" break=")?;
                    self.label(*label)?;
                }
                if let Some(label) = continue_label {
                    self.f.write_str(" continue=")?;
                    self.label(*label)?;
                }
                writeln!(self.f, ":")?;
                self.body(body, depth + 1)
            }
            // simple forms were handled above
            Node::Const(_)
            | Node::Local(_)
            | Node::Label { .. }
            | Node::Goto { .. }
            | Node::Return(None)
            | Node::Raise { .. } => {
                self.indent(depth)?;
                self.inline(node)?;
                writeln!(self.f)
            }
        }
    }

    fn catch(&mut self, handler: &CatchBlock, depth: usize) -> fmt::Result {
        self.indent(depth)?;
        self.f.write_str("catch")?;
        if let Some(kind) = &handler.kind {
            write!(self.f, " {kind}")?;
        }
        if let Some(var) = handler.variable {
            self.f.write_str(" as ")?;
            self.var(var)?;
        }
        writeln!(self.f, ":")?;
        self.body(&handler.body, depth + 1)
    }

    fn operand(&mut self, node: &Node) -> fmt::Result {
        if matches!(node, Node::Binary { .. } | Node::Assign { .. }) {
            self.f.write_str("(")?;
            self.inline(node)?;
            self.f.write_str(")")
        } else {
            self.inline(node)
        }
    }

    fn inline(&mut self, node: &Node) -> fmt::Result {
        match node {
            Node::Const(value) => write!(self.f, "{value}"),
            Node::Local(var) => self.var(*var),
            Node::Assign { target, value } => {
                self.var(*target)?;
                self.f.write_str(" = ")?;
                self.inline(value)
            }
            Node::Binary { op, left, right } => {
                self.operand(left)?;
                write!(self.f, " {} ", op.as_str())?;
                self.operand(right)
            }
            Node::Not(value) => {
                self.f.write_str("!")?;
                self.operand(value)
            }
            Node::Call { callee, args } => {
                write!(self.f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.f.write_str(", ")?;
                    }
                    self.inline(arg)?;
                }
                self.f.write_str(")")
            }
            Node::Label { target, .. } => {
                self.label(*target)?;
                self.f.write_str(":")
            }
            Node::Goto { target, value } => {
                self.f.write_str("goto ")?;
                self.label(*target)?;
                if let Some(value) = value {
                    self.f.write_str(" with ")?;
                    self.inline(value)?;
                }
                Ok(())
            }
            Node::Throw(value) => {
                self.f.write_str("throw ")?;
                self.inline(value)
            }
            Node::Raise { kind, message } => write!(self.f, "raise {kind}({message:?})"),
            Node::Return(None) => self.f.write_str("return"),
            Node::Return(Some(value)) => {
                self.f.write_str("return ")?;
                self.inline(value)
            }
            Node::If { .. }
            | Node::Block(_)
            | Node::Try(_)
            | Node::Switch { .. }
            | Node::Loop { .. } => self.f.write_str("<...>"),
        }
    }
}

/// Comma-separated label names, for log lines.
pub fn label_list(unit: &CodeUnit, labels: impl IntoIterator<Item = Label>) -> String {
    labels
        .into_iter()
        .map(|label| match unit.labels.get(label) {
            Some(decl) => format!("{}#{label}", decl.name),
            None => format!("?#{label}"),
        })
        .join(", ")
}

#[cfg(test)]
mod tests {
    use crate::{CatchBlock, CodeUnit, Node, ValueType};

    #[test]
    fn renders_simple_unit() {
        let mut unit = CodeUnit::new("main");
        let end = unit.label("end");
        let x = unit.local("x", ValueType::Any);
        let unit = unit.with_body(Node::block([
            Node::assign(x, Node::int(1)),
            Node::try_finally(
                Node::block([Node::goto(end), Node::assign(x, Node::int(2))]),
                Node::assign(x, Node::add(Node::local(x), Node::int(10))),
            ),
            Node::label(end),
            Node::local(x),
        ]));
        insta::assert_snapshot!(unit.to_string(), @r"
        unit main
          local x: any
          x = 1
          try:
            goto end#0
            x = 2
          finally:
            x = x + 10
          end#0:
          x
        ");
    }

    #[test]
    fn renders_handlers_and_headed_values() {
        let mut unit = CodeUnit::new("f");
        let e = unit.local("e", ValueType::Exception);
        let out = unit.label_with("out", ValueType::Int);
        let unit = unit.with_body(Node::label_with_default(
            out,
            Node::try_catch(
                Node::raise("Boom", "bad"),
                [CatchBlock::of_kind("Boom", Some(e), Node::block([]))],
            ),
        ));
        insta::assert_snapshot!(unit.to_string(), @r#"
        unit f
          local e: exception
          labeled out#0
            try:
              raise Boom("bad")
            catch Boom as e:
              pass
        "#);
    }
}
