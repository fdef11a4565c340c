use flowrite_compiler_core::Label;
use thiserror::Error;

/// Evaluation failures that are not language exceptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EvalError {
    #[error("jump to label {0} which is not defined on the jump's path")]
    UndefinedLabel(Label),
    #[error("jump to label {0} leaves a finally or fault body")]
    JumpOutOfFinally(Label),
    #[error("local {0} is not declared")]
    UnknownLocal(usize),
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("cannot throw a value of type {0}")]
    NotAnException(&'static str),
    #[error("unhandled exception {kind}: {message}")]
    Unhandled { kind: String, message: String },
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
    #[error("{0} node must be lowered before evaluation")]
    Unlowered(&'static str),
}
