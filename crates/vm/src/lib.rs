//! Tree-walking evaluator for lowered flowrite code units.
//!
//! This is the semantic reference for the flow rewriter: a unit evaluated
//! before rewriting (in [`EvalMode::Permissive`]) and after it (in
//! [`EvalMode::Strict`]) must produce the same result and the same sequence
//! of host calls.

extern crate alloc;
#[macro_use]
extern crate log;

pub mod error;
mod eval;
pub mod host;
pub mod value;

pub use error::EvalError;
pub use eval::{EvalMode, EvalOpts, run};
pub use host::{Host, HostCall, RecordingHost};
pub use value::{Exception, Value};
