//! What the debug server needs from the host virtual machine.

use std::fmt;

use serde::Serialize;

use crate::command::LineNo;
use crate::handle::ServerKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Line,
    Call,
    Return,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Line => write!(f, "line"),
            EventKind::Call => write!(f, "call"),
            EventKind::Return => write!(f, "return"),
        }
    }
}

/// Payload of a VM hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEvent {
    pub kind: EventKind,
    pub line: LineNo,
    pub source: String,
    pub function: String,
}

impl DebugEvent {
    pub fn new(
        kind: EventKind,
        line: LineNo,
        source: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            line,
            source: source.into(),
            function: function.into(),
        }
    }

    pub fn line(line: LineNo, source: impl Into<String>, function: impl Into<String>) -> Self {
        Self::new(EventKind::Line, line, source, function)
    }

    pub fn call(line: LineNo, source: impl Into<String>, function: impl Into<String>) -> Self {
        Self::new(EventKind::Call, line, source, function)
    }

    pub fn ret(line: LineNo, source: impl Into<String>, function: impl Into<String>) -> Self {
        Self::new(EventKind::Return, line, source, function)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: String,
}

impl Variable {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            value: value.into(),
        }
    }
}

/// One activation record, innermost first in [`DebugVm::stack_frames`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub function: String,
    pub source: String,
    /// `-1` when the VM has no line information.
    pub line: i64,
    pub locals: Vec<Variable>,
}

/// Result of evaluating an expression inside the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    #[serde(rename = "value_type")]
    pub type_name: String,
    pub value: String,
    #[serde(skip)]
    pub truthy: bool,
}

/// The host VM as seen by the debugger.
///
/// Implementations forward their hook callbacks to
/// [`crate::DebugServer::on_hook`] and their error handler to
/// [`crate::DebugServer::on_error`], or go through
/// [`crate::ServerRegistry`] when the server is reached from the user-data
/// slot.
pub trait DebugVm {
    /// Number of active call frames.
    fn call_depth(&self) -> usize;

    fn stack_frames(&self) -> Vec<StackFrame>;

    /// The innermost frame only. Override when walking the whole stack is
    /// costly.
    fn top_frame(&self) -> Option<StackFrame> {
        self.stack_frames().into_iter().next()
    }

    /// Evaluates `expression` in the frame at `level` (0 is innermost).
    fn evaluate(&mut self, expression: &str, level: usize) -> Result<Evaluation, String>;

    fn user_data(&self) -> Option<ServerKey> {
        None
    }

    fn set_user_data(&mut self, _key: Option<ServerKey>) {}
}
