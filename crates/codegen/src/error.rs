use flowrite_compiler_core::Label;
use std::fmt::{self, Display};
use thiserror::Error;

#[derive(Error, Debug)]
pub struct CodegenError {
    /// Name of the unit being compiled.
    pub unit: String,
    #[source]
    pub error: CodegenErrorType,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in unit '{}': {}", self.unit, self.error)
    }
}

/// Broken invariants handed over by an earlier compiler stage, or produced by
/// this one. None of these is recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InternalError {
    BlockStackUnderflow,
    UndefinedLabel(Label),
    DuplicateLabel(Label),
    JumpOutOfCleanup(Label),
    FinallyAndFault,
    FlowWithoutCleanup,
    Unlowered(&'static str),
}

impl Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockStackUnderflow => write!(f, "block context stack underflow"),
            Self::UndefinedLabel(label) => {
                write!(f, "label {label} is the target of a jump but is never defined")
            }
            Self::DuplicateLabel(label) => write!(f, "label {label} is defined more than once"),
            Self::JumpOutOfCleanup(label) => write!(
                f,
                "jump to label {label} leaves a finally or fault body after rewriting"
            ),
            Self::FinallyAndFault => {
                write!(f, "a protected region cannot have both a finally and a fault body")
            }
            Self::FlowWithoutCleanup => write!(
                f,
                "a protected region dispatches through the flow variable but has no cleanup body"
            ),
            Self::Unlowered(name) => write!(f, "{name} node must be lowered before this pass"),
        }
    }
}

impl std::error::Error for InternalError {}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodegenErrorType {
    Internal(InternalError),
}

impl std::error::Error for CodegenErrorType {}

impl fmt::Display for CodegenErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(err) => write!(f, "internal compiler error: {err}"),
        }
    }
}

impl From<InternalError> for CodegenErrorType {
    fn from(err: InternalError) -> Self {
        Self::Internal(err)
    }
}

pub(crate) type InternalResult<T> = Result<T, InternalError>;
