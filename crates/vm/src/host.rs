//! The boundary between evaluated code and the outside world.

use crate::value::{Exception, Value};
use ahash::HashMap;

/// Receives every [`Node::Call`](flowrite_compiler_core::Node::Call) made by
/// evaluated code. An `Err` is thrown into the evaluated code as a language
/// exception.
pub trait Host {
    fn call(&mut self, callee: &str, args: &[Value]) -> Result<Value, Exception>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCall {
    pub callee: String,
    pub args: Vec<Value>,
}

/// Records every call and answers with `nil`, or throws for callees
/// registered with [`RecordingHost::fail_on`].
#[derive(Debug, Default)]
pub struct RecordingHost {
    calls: Vec<HostCall>,
    failures: HashMap<String, String>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make calls to `callee` throw an exception of `kind`.
    #[must_use]
    pub fn fail_on(mut self, callee: impl Into<String>, kind: impl Into<String>) -> Self {
        self.failures.insert(callee.into(), kind.into());
        self
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    /// Callee names in call order.
    pub fn trace(&self) -> Vec<&str> {
        self.calls.iter().map(|call| call.callee.as_str()).collect()
    }
}

impl Host for RecordingHost {
    fn call(&mut self, callee: &str, args: &[Value]) -> Result<Value, Exception> {
        self.calls.push(HostCall {
            callee: callee.to_owned(),
            args: args.to_vec(),
        });
        match self.failures.get(callee) {
            Some(kind) => Err(Exception::new(kind.clone(), callee)),
            None => Ok(Value::Nil),
        }
    }
}
