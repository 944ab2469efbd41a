//! Wire format of the debug channel.
//!
//! Client to server: one command per `\n`-terminated line, see
//! [`crate::command::Command::parse`]. `\r` is ignored.
//!
//! ```text
//! READY                          client finished configuring, session is active
//! SETBP <source> <line> [cond]   add or replace a breakpoint
//! CLRBP <source> <line>          remove a breakpoint
//! SETWATCH <id> <expression>     add or replace a watch
//! CLRWATCH <id>                  remove a watch
//! EVAL <id>                      evaluate a watch in the current frame
//! GO | CONTINUE                  resume
//! STEPIN | STEPOVER | STEPOUT    resume until the next matching line
//! SUSPEND                        break at the next line
//! BACKTRACE                      send the stack again
//! DISCONNECT                     end the session
//! ```
//!
//! Server to client: one JSON object per line, tagged by `"type"`.
//!
//! ```text
//! {"type":"break","reason":{"kind":"breakpoint"},"location":{...},"stack":[...],"watches":[...]}
//! {"type":"watch","id":1,"expression":"a","value_type":"integer","value":"1"}
//! {"type":"breakpoint_set","source":"src.nut","line":10}
//! ```

use serde::Serialize;
use tracing::error;

use crate::command::{LineNo, WatchId};
use crate::controller::{BreakReason, Location};
use crate::vm::{Evaluation, StackFrame};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WatchResult {
    Value(Evaluation),
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchValue {
    pub id: WatchId,
    pub expression: String,
    #[serde(flatten)]
    pub result: WatchResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Attached,
    BreakpointSet {
        source: String,
        line: LineNo,
        #[serde(skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
    BreakpointCleared {
        source: String,
        line: LineNo,
        found: bool,
    },
    WatchSet {
        id: WatchId,
        expression: String,
    },
    WatchCleared {
        id: WatchId,
        found: bool,
    },
    Resumed {
        command: String,
    },
    Break {
        reason: BreakReason,
        location: Location,
        stack: Vec<StackFrame>,
        watches: Vec<WatchValue>,
    },
    Watch(WatchValue),
    Stack {
        stack: Vec<StackFrame>,
    },
    Error {
        message: String,
    },
}

impl Reply {
    /// Encodes the reply as a single `\n`-terminated line.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).unwrap_or_else(|e| {
            error!(error = %e, "Failed to encode reply");
            br#"{"type":"error","message":"encoding failure"}"#.to_vec()
        });
        line.push(b'\n');
        line
    }
}
