/* Checks a rewritten unit before it is handed to code generation.

The tree is scanned twice: once to find where each label is defined, then
once more to check every jump against the cleanup bodies enclosing it.
*/

use ahash::HashSet;
use crate::{
    NodeName,
    error::{InternalError, InternalResult},
};
use flowrite_compiler_core::{CodeUnit, Label, Node};

/// Verify that `unit` is fit for code generation:
///
/// * no `loop` or `return` node is left,
/// * no protected region has both a `finally` and a `fault` body,
/// * every label is defined exactly once and every jump target is defined,
/// * no jump inside a `finally`/`fault` body targets a label outside of it.
pub fn verify(unit: &CodeUnit) -> InternalResult<()> {
    let mut defined = HashSet::default();
    collect_definitions(&unit.body, &mut defined)?;
    for &label in &defined {
        if !unit.labels.contains(label) {
            return Err(InternalError::UndefinedLabel(label));
        }
    }
    let mut verifier = Verifier {
        defined: &defined,
        cleanups: Vec::new(),
    };
    verifier.scan(&unit.body)?;
    trace!("verified unit '{}'", unit.name);
    Ok(())
}

fn collect_definitions(node: &Node, defined: &mut HashSet<Label>) -> InternalResult<()> {
    if let Node::Label { target, .. } = node {
        if !defined.insert(*target) {
            return Err(InternalError::DuplicateLabel(*target));
        }
    }
    let mut result = Ok(());
    node.for_each_child(|child| {
        if result.is_ok() {
            result = collect_definitions(child, defined);
        }
    });
    result
}

struct Verifier<'a> {
    defined: &'a HashSet<Label>,
    /// Labels defined inside each enclosing cleanup body, innermost last.
    cleanups: Vec<HashSet<Label>>,
}

impl Verifier<'_> {
    fn scan(&mut self, node: &Node) -> InternalResult<()> {
        match node {
            Node::Loop { .. } | Node::Return(_) => {
                return Err(InternalError::Unlowered(node.node_name()));
            }
            Node::Goto { target, .. } => {
                if !self.defined.contains(target) {
                    return Err(InternalError::UndefinedLabel(*target));
                }
                if let Some(scope) = self.cleanups.last() {
                    if !scope.contains(target) {
                        return Err(InternalError::JumpOutOfCleanup(*target));
                    }
                }
            }
            Node::Try(region) => {
                if region.finally.is_some() && region.fault.is_some() {
                    return Err(InternalError::FinallyAndFault);
                }
                self.scan(&region.body)?;
                for handler in &region.handlers {
                    self.scan(&handler.body)?;
                }
                if let Some(cleanup) = region.finally.as_ref().or(region.fault.as_ref()) {
                    let mut scope = HashSet::default();
                    collect_definitions(cleanup, &mut scope)?;
                    self.cleanups.push(scope);
                    let result = self.scan(cleanup);
                    self.cleanups.pop();
                    result?;
                }
                return Ok(());
            }
            _ => {}
        }
        let mut result = Ok(());
        node.for_each_child(|child| {
            if result.is_ok() {
                result = self.scan(child);
            }
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrite_compiler_core::TryNode;

    #[test]
    fn accepts_jumps_within_a_cleanup_body() {
        let mut unit = CodeUnit::new("f");
        let end = unit.label("end");
        let skip = unit.label("skip");
        unit.body = Node::block([
            Node::try_finally(
                Node::goto(end),
                Node::block([Node::goto(skip), Node::call("never", []), Node::label(skip)]),
            ),
            Node::label(end),
        ]);
        assert_eq!(verify(&unit), Ok(()));
    }

    #[test]
    fn rejects_jump_out_of_finally() {
        let mut unit = CodeUnit::new("f");
        let end = unit.label("end");
        unit.body = Node::block([
            Node::try_finally(Node::nil(), Node::goto(end)),
            Node::label(end),
        ]);
        assert_eq!(verify(&unit), Err(InternalError::JumpOutOfCleanup(end)));
    }

    #[test]
    fn rejects_jump_out_of_nested_cleanup() {
        let mut unit = CodeUnit::new("f");
        let mid = unit.label("mid");
        unit.body = Node::try_fault(
            Node::nil(),
            Node::block([
                Node::try_finally(Node::nil(), Node::goto(mid)),
                Node::label(mid),
            ]),
        );
        assert_eq!(verify(&unit), Err(InternalError::JumpOutOfCleanup(mid)));
    }

    #[test]
    fn rejects_undefined_and_duplicate_labels() {
        let mut unit = CodeUnit::new("f");
        let end = unit.label("end");
        unit.body = Node::goto(end);
        assert_eq!(verify(&unit), Err(InternalError::UndefinedLabel(end)));

        unit.body = Node::block([Node::label(end), Node::label(end)]);
        assert_eq!(verify(&unit), Err(InternalError::DuplicateLabel(end)));
    }

    #[test]
    fn rejects_unlowered_and_malformed_nodes() {
        let mut unit = CodeUnit::new("f");
        unit.body = Node::block([Node::return_(None)]);
        assert_eq!(verify(&unit), Err(InternalError::Unlowered("return")));

        unit.body = Node::Try(Box::new(TryNode {
            body: Node::nil(),
            handlers: Vec::new(),
            finally: Some(Node::nil()),
            fault: Some(Node::nil()),
        }));
        assert_eq!(verify(&unit), Err(InternalError::FinallyAndFault));
    }
}
