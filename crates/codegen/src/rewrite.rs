//! Rewriting of jumps that leave `finally`/`fault` bodies.
//!
//! A jump may not leave a cleanup body directly. Such a jump instead records
//! which target it wants in the unit's flow variable (and its value in the
//! target's carrier local), then jumps to a label local to the protected
//! region. After the region completes, a switch on the flow variable resumes
//! the jump, one region boundary at a time:
//!
//! ```text
//! try { body } finally { goto L }
//! =>
//! $saved = nil
//! try { body }
//! catch as $saved { }
//! finally { $flow = 1; goto E   if $saved != nil { throw $saved }   E: }
//! F:
//! switch $flow { case 1: $flow = 0; goto L }
//! ```
//!
//! The catch-all captures a pending exception so that a jump out of the
//! cleanup body can discard it, as the source language requires.
//!
//! A cleanup body may run while an escape is pending in the flow variable.
//! Jumps that stay inside the body leave the variable alone, and a body that
//! contains flow writers of its own saves the variable on entry and restores
//! it on completion. Catching an exception abandons any escape started in the
//! protected code, so such handlers clear the variable first.

use ahash::HashSet;
use crate::{
    IndexMap, IndexSet, NodeName,
    error::{InternalError, InternalResult},
};
use flowrite_compiler_core::{
    BinOp, CatchBlock, CodeUnit, Label, LabelTable, LocalTable, Node, SwitchCase, TryNode,
    ValueType, VarId, label_list,
};
use std::mem;

/// Dispatch data of a label reached through the flow variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelInfo {
    /// Value the flow variable holds while a jump to this label is pending.
    pub flow_state: i64,
    /// Local transmitting the jump's value, for labels that carry one.
    pub carrier: Option<VarId>,
}

/// Assigns flow states and carriers to labels, in first-seen order.
#[derive(Debug, Default)]
pub struct LabelRegistry {
    infos: IndexMap<Label, LabelInfo>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: later calls for the same label return the first result.
    pub fn ensure(
        &mut self,
        target: Label,
        labels: &LabelTable,
        locals: &mut LocalTable,
    ) -> LabelInfo {
        if let Some(info) = self.infos.get(&target) {
            return *info;
        }
        let flow_state = self.infos.len() as i64 + 1;
        let carrier = labels.get(target).and_then(|decl| {
            decl.carries
                .map(|ty| locals.add_synthetic(format!("${}.{target}", decl.name), ty))
        });
        let info = LabelInfo {
            flow_state,
            carrier,
        };
        debug!("label {target} dispatched through flow state {flow_state}");
        self.infos.insert(target, info);
        info
    }

    pub fn get(&self, target: Label) -> Option<LabelInfo> {
        self.infos.get(&target).copied()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Label, LabelInfo)> + '_ {
        self.infos.iter().map(|(label, info)| (*label, *info))
    }
}

/// One frame of the block-context stack: the top-level region or a
/// protected region being rewritten.
#[derive(Debug, Default)]
struct BlockInfo {
    /// Set only while the frame's finally/fault body is visited.
    in_finally: bool,
    /// Labels defined directly in this region; jumps to them stay direct.
    label_defs: HashSet<Label>,
    /// Where jumps needing dispatch through this region go.
    flow_label: Option<Label>,
    /// Targets the region's dispatch switch must resume, in first-seen order.
    needed_labels: IndexSet<Label>,
}

impl BlockInfo {
    const fn has_flow(&self) -> bool {
        self.flow_label.is_some()
    }

    const fn forces_flow(&self) -> bool {
        self.in_finally || self.has_flow()
    }
}

/// What the rewriter added to a unit.
#[derive(Debug, Default)]
pub struct FlowSummary {
    /// The unit's flow variable, if any jump was rewritten.
    pub flow_variable: Option<VarId>,
    /// Labels dispatched through the flow variable.
    pub registry: LabelRegistry,
    /// Number of protected regions restructured for dispatch.
    pub restructured: usize,
}

/// Rewrite `unit` so that no jump leaves a finally or fault body.
///
/// The unit must already be lowered. Synthetic labels and locals introduced by
/// the rewrite are appended to the unit's tables.
pub fn rewrite(unit: &mut CodeUnit) -> InternalResult<FlowSummary> {
    let body = mem::replace(&mut unit.body, Node::nil());
    let mut rewriter = FlowRewriter::new(&mut unit.labels, &mut unit.locals);
    unit.body = rewriter.visit(body)?;
    if rewriter.blocks.len() != 1 {
        return Err(InternalError::BlockStackUnderflow);
    }
    let summary = FlowSummary {
        flow_variable: rewriter.flow_variable,
        registry: rewriter.registry,
        restructured: rewriter.restructured,
    };
    debug!(
        "rewrote unit '{}': {} dispatched label(s) [{}], {} restructured region(s)",
        unit.name,
        summary.registry.len(),
        label_list(unit, summary.registry.iter().map(|(label, _)| label)),
        summary.restructured,
    );
    Ok(summary)
}

struct FlowRewriter<'a> {
    labels: &'a mut LabelTable,
    locals: &'a mut LocalTable,
    registry: LabelRegistry,
    blocks: Vec<BlockInfo>,
    flow_variable: Option<VarId>,
    restructured: usize,
    /// Jumps sent through the flow variable so far.
    escapes: usize,
    /// Emitted code that writes the flow variable and then carries on in
    /// place: restructured regions and clearing handlers.
    clobbers: usize,
}

impl<'a> FlowRewriter<'a> {
    fn new(labels: &'a mut LabelTable, locals: &'a mut LocalTable) -> Self {
        Self {
            labels,
            locals,
            registry: LabelRegistry::new(),
            blocks: vec![BlockInfo::default()],
            flow_variable: None,
            restructured: 0,
            escapes: 0,
            clobbers: 0,
        }
    }

    fn current(&mut self) -> &mut BlockInfo {
        self.blocks
            .last_mut()
            .expect("the top-level frame is never popped")
    }

    fn flow_variable(&mut self) -> VarId {
        *self
            .flow_variable
            .get_or_insert_with(|| self.locals.add_synthetic("$flow", ValueType::Int))
    }

    /// Give frame `idx` a flow label if it has none yet.
    fn ensure_flow(&mut self, idx: usize) -> Label {
        if let Some(label) = self.blocks[idx].flow_label {
            return label;
        }
        let label = self.labels.add_synthetic("flow", None);
        let block = &mut self.blocks[idx];
        block.flow_label = Some(label);
        self.flow_variable();
        debug!("frame {idx} dispatches through flow label {label}");
        label
    }

    /// Whether the code being visited lies in some finally or fault body.
    fn in_cleanup(&self) -> bool {
        self.blocks.iter().any(|block| block.in_finally)
    }

    /// A goto that needs no dispatch. Inside a cleanup body an escape may be
    /// pending, so the flow variable is left as it is.
    fn direct_jump(&mut self, target: Label, value: Option<Box<Node>>) -> Node {
        if self.in_cleanup() {
            return Node::Goto { target, value };
        }
        self.resolved_jump(target, value)
    }

    /// `$flow = 0; goto target with value`
    fn resolved_jump(&mut self, target: Label, value: Option<Box<Node>>) -> Node {
        let flow = self.flow_variable();
        Node::block([Node::assign(flow, Node::int(0)), Node::Goto { target, value }])
    }

    /// `$flow = 0` ahead of `body`.
    fn clear_flow(&mut self, body: Node) -> Node {
        let flow = self.flow_variable();
        Node::block([Node::assign(flow, Node::int(0)), body])
    }

    /// Run a finally body with the flow variable cleared, then put back the
    /// escape that was pending when it started.
    fn preserve_flow(&mut self, body: Node) -> Node {
        let flow = self.flow_variable();
        let pending = self.locals.add_synthetic("$pending", ValueType::Int);
        Node::block([
            Node::assign(pending, Node::local(flow)),
            Node::assign(flow, Node::int(0)),
            body,
            Node::assign(flow, Node::local(pending)),
        ])
    }

    /// Innermost frame at or below `top` that a jump to `target` must be
    /// dispatched through, or `None` when the jump can be emitted directly.
    fn dispatch_frame(&self, target: Label, top: usize) -> Option<usize> {
        for idx in (0..top).rev() {
            let block = &self.blocks[idx];
            if block.label_defs.contains(&target) {
                return None;
            }
            if block.forces_flow() {
                return Some(idx);
            }
        }
        None
    }

    fn visit_goto(&mut self, target: Label, value: Option<Box<Node>>) -> InternalResult<Node> {
        let value = self.visit_opt(value)?;
        let Some(idx) = self.dispatch_frame(target, self.blocks.len()) else {
            trace!("goto {target} stays direct");
            return Ok(self.direct_jump(target, value));
        };
        let flow_label = self.ensure_flow(idx);
        self.blocks[idx].needed_labels.insert(target);
        let info = self.registry.ensure(target, self.labels, self.locals);
        let flow = self.flow_variable();
        self.escapes += 1;
        trace!("goto {target} dispatched through frame {idx}");

        let mut seq = Vec::with_capacity(3);
        match (info.carrier, value) {
            (Some(carrier), value) => {
                let value = value.map_or_else(Node::nil, |value| *value);
                seq.push(Node::assign(carrier, value));
            }
            // keep side effects of a value sent to a label that carries none
            (None, Some(value)) => seq.push(*value),
            (None, None) => {}
        }
        seq.push(Node::assign(flow, Node::int(info.flow_state)));
        seq.push(Node::goto(flow_label));
        Ok(Node::Block(seq))
    }

    /// Resume a pending jump after the region it was dispatched through. The
    /// flow variable and carrier already hold the jump's state.
    fn resolve_escape(&mut self, target: Label, info: LabelInfo) -> Node {
        match self.dispatch_frame(target, self.blocks.len()) {
            Some(idx) => {
                let flow_label = self.ensure_flow(idx);
                self.blocks[idx].needed_labels.insert(target);
                self.escapes += 1;
                Node::goto(flow_label)
            }
            None => {
                let value = info.carrier.map(|var| Box::new(Node::local(var)));
                self.resolved_jump(target, value)
            }
        }
    }

    /// One arm per label the finished frame dispatched.
    fn emit_switch(&mut self, block: &BlockInfo) -> InternalResult<Node> {
        let flow = self.flow_variable();
        let mut cases = Vec::with_capacity(block.needed_labels.len());
        for &target in &block.needed_labels {
            let info = self
                .registry
                .get(target)
                .ok_or(InternalError::UndefinedLabel(target))?;
            cases.push(SwitchCase {
                value: info.flow_state,
                body: self.resolve_escape(target, info),
            });
        }
        Ok(Node::switch(Node::local(flow), cases))
    }

    fn visit_try(&mut self, node: TryNode) -> InternalResult<Node> {
        let TryNode {
            body,
            handlers,
            finally,
            fault,
        } = node;
        if finally.is_some() && fault.is_some() {
            return Err(InternalError::FinallyAndFault);
        }

        // cleanup first, so jumps in it are known before the body is visited
        self.blocks.push(BlockInfo {
            in_finally: true,
            ..BlockInfo::default()
        });
        let clobbers = self.clobbers;
        let finally = finally.map(|node| self.visit(node)).transpose()?;
        let fault = fault.map(|node| self.visit(node)).transpose()?;
        let guard_cleanup = self.clobbers != clobbers;
        let labels = &mut *self.labels;
        let block = self
            .blocks
            .last_mut()
            .ok_or(InternalError::BlockStackUnderflow)?;
        block.in_finally = false;
        let cleanup_end = block.flow_label;
        if cleanup_end.is_some() {
            block.flow_label = Some(labels.add_synthetic("flow", None));
        }

        let writes = self.escapes + self.clobbers;
        let body = self.visit(body)?;
        // a caught exception abandons any escape started in the body
        let clear_handlers = !handlers.is_empty() && self.escapes + self.clobbers != writes;
        let handlers = handlers
            .into_iter()
            .map(|handler| {
                let body = self.visit(handler.body)?;
                let body = if clear_handlers {
                    self.clear_flow(body)
                } else {
                    body
                };
                Ok(CatchBlock { body, ..handler })
            })
            .collect::<InternalResult<Vec<_>>>()?;
        if clear_handlers {
            self.clobbers += 1;
        }
        let clear_on_catch = self.escapes + self.clobbers != writes;
        let block = self.blocks.pop().ok_or(InternalError::BlockStackUnderflow)?;

        let restructuring = cleanup_end.is_some();
        let finally = match finally {
            Some(finally) if guard_cleanup => Some(self.preserve_flow(finally)),
            finally => finally,
        };
        // a fault body only runs for an exception, which abandons pending escapes
        let fault = match fault {
            Some(fault) if guard_cleanup || (restructuring && clear_on_catch) => {
                Some(self.clear_flow(fault))
            }
            fault => fault,
        };

        match (cleanup_end, block.flow_label) {
            (Some(cleanup_end), Some(flow_label)) => self.restructure(
                &block,
                Protected {
                    body,
                    handlers,
                    finally,
                    fault,
                    clear_on_catch,
                },
                cleanup_end,
                flow_label,
            ),
            _ => Ok(Node::Try(Box::new(TryNode {
                body,
                handlers,
                finally,
                fault,
            }))),
        }
    }

    /// Replace a region whose cleanup body jumps out with a catch-all region
    /// followed by the flow dispatch switch.
    fn restructure(
        &mut self,
        block: &BlockInfo,
        region: Protected,
        cleanup_end: Label,
        flow_label: Label,
    ) -> InternalResult<Node> {
        let Protected {
            body,
            handlers,
            finally,
            fault,
            clear_on_catch,
        } = region;
        let body = if handlers.is_empty() {
            body
        } else {
            Node::try_catch(body, handlers)
        };
        let saved = self.locals.add_synthetic("$saved", ValueType::Exception);
        self.restructured += 1;
        self.clobbers += 1;

        let mut seq = Vec::with_capacity(4);
        let protected = match (finally, fault) {
            (Some(finally), None) => {
                // a region inside a loop must not see the previous iteration's exception
                seq.push(Node::assign(saved, Node::nil()));
                let capture = if clear_on_catch {
                    let flow = self.flow_variable();
                    Node::block([Node::assign(flow, Node::int(0))])
                } else {
                    Node::block([])
                };
                TryNode {
                    body,
                    handlers: vec![CatchBlock::all(Some(saved), capture)],
                    finally: Some(Node::block([
                        finally,
                        Node::if_then(
                            Node::binary(BinOp::Ne, Node::local(saved), Node::nil()),
                            Node::throw(Node::local(saved)),
                        ),
                        Node::label(cleanup_end),
                    ])),
                    fault: None,
                }
            }
            (None, Some(fault)) => TryNode {
                body,
                handlers: vec![CatchBlock::all(
                    Some(saved),
                    Node::block([fault, Node::throw(Node::local(saved)), Node::label(cleanup_end)]),
                )],
                finally: None,
                fault: None,
            },
            (Some(_), Some(_)) => return Err(InternalError::FinallyAndFault),
            (None, None) => return Err(InternalError::FlowWithoutCleanup),
        };
        seq.push(Node::Try(Box::new(protected)));
        seq.push(Node::label(flow_label));
        seq.push(self.emit_switch(block)?);
        Ok(Node::Block(seq))
    }

    fn boxed(&mut self, node: Box<Node>) -> InternalResult<Box<Node>> {
        Ok(Box::new(self.visit(*node)?))
    }

    fn visit_opt(&mut self, node: Option<Box<Node>>) -> InternalResult<Option<Box<Node>>> {
        node.map(|node| self.boxed(node)).transpose()
    }

    fn visit(&mut self, node: Node) -> InternalResult<Node> {
        trace!("rewriting {} at depth {}", node.node_name(), self.blocks.len());
        Ok(match node {
            Node::Block(children) => {
                // labels are scoped to the whole block, not just what follows them
                for child in &children {
                    if let Node::Label { target, .. } = child {
                        self.current().label_defs.insert(*target);
                    }
                }
                Node::Block(
                    children
                        .into_iter()
                        .map(|child| self.visit(child))
                        .collect::<InternalResult<_>>()?,
                )
            }
            Node::Label { target, default } => {
                self.current().label_defs.insert(target);
                Node::Label {
                    target,
                    default: self.visit_opt(default)?,
                }
            }
            Node::Goto { target, value } => self.visit_goto(target, value)?,
            Node::Try(node) => self.visit_try(*node)?,
            node @ (Node::Loop { .. } | Node::Return(_)) => {
                return Err(InternalError::Unlowered(node.node_name()));
            }
            node @ (Node::Const(_) | Node::Local(_) | Node::Raise { .. }) => node,
            Node::Assign { target, value } => Node::Assign {
                target,
                value: self.boxed(value)?,
            },
            Node::Binary { op, left, right } => Node::Binary {
                op,
                left: self.boxed(left)?,
                right: self.boxed(right)?,
            },
            Node::Not(value) => Node::Not(self.boxed(value)?),
            Node::Throw(value) => Node::Throw(self.boxed(value)?),
            Node::If { test, then, orelse } => Node::If {
                test: self.boxed(test)?,
                then: self.boxed(then)?,
                orelse: self.visit_opt(orelse)?,
            },
            Node::Call { callee, args } => Node::Call {
                callee,
                args: args
                    .into_iter()
                    .map(|arg| self.visit(arg))
                    .collect::<InternalResult<_>>()?,
            },
            Node::Switch {
                value,
                cases,
                default,
            } => Node::Switch {
                value: self.boxed(value)?,
                cases: cases
                    .into_iter()
                    .map(|case| {
                        Ok(SwitchCase {
                            value: case.value,
                            body: self.visit(case.body)?,
                        })
                    })
                    .collect::<InternalResult<_>>()?,
                default: self.visit_opt(default)?,
            },
        })
    }
}

/// Rewritten parts of a protected region awaiting restructuring.
struct Protected {
    body: Node,
    handlers: Vec<CatchBlock>,
    finally: Option<Node>,
    fault: Option<Node>,
    /// Whether the body or handlers wrote the flow variable, so an exception
    /// reaching the catch-all may have interrupted an escape.
    clear_on_catch: bool,
}
