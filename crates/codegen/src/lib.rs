//! Lower flowrite code units and rewrite jumps that leave `finally`/`fault`
//! bodies into explicit flow-state dispatch.

#[macro_use]
extern crate log;

type IndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;
type IndexSet<T> = indexmap::IndexSet<T, ahash::RandomState>;

pub mod compile;
pub mod error;
pub mod lower;
pub mod rewrite;
pub mod verify;

pub use compile::{CompileOpts, CompiledUnit};
use flowrite_compiler_core::Node;

pub trait NodeName {
    /// Returns a short name for the node suitable for use in error messages.
    fn node_name(&self) -> &'static str;
}

impl NodeName for Node {
    fn node_name(&self) -> &'static str {
        match self {
            Node::Const(_) => "constant",
            Node::Local(_) => "local",
            Node::Assign { .. } => "assignment",
            Node::Binary { .. } | Node::Not(_) => "operator",
            Node::If { .. } => "conditional",
            Node::Call { .. } => "call",
            Node::Block(_) => "block",
            Node::Label { .. } => "label",
            Node::Goto { .. } => "goto",
            Node::Try(_) => "try",
            Node::Throw(_) | Node::Raise { .. } => "throw",
            Node::Switch { .. } => "switch",
            Node::Loop { .. } => "loop",
            Node::Return(_) => "return",
        }
    }
}
