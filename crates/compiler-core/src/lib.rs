//! Tree representation consumed and produced by the flowrite passes.
//!
//! A [`CodeUnit`] is one compiled unit (function, method or top-level body): its
//! label table, its local table and the body tree. Lowering, flow rewriting and
//! evaluation all operate on this shape.

extern crate alloc;

mod display;
pub mod label;
pub mod tree;
pub mod unit;

pub use display::label_list;
pub use label::{Label, LabelDecl, LabelTable};
pub use tree::{BinOp, CatchBlock, Constant, Node, SwitchCase, TryNode};
pub use unit::{CodeUnit, LocalDecl, LocalTable, ValueType, VarId};
