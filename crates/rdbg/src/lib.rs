//! A remote debug server embedded in a scripting virtual machine.
//!
//! The server listens on a TCP port, accepts one debugger client at a time
//! and talks to it in a line-oriented text protocol. The VM drives it from
//! its own thread through [`DebugServer::on_hook`], [`DebugServer::on_error`]
//! and [`DebugServer::poll_step`].
pub mod command;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod framer;
pub mod handle;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod serializer;
pub mod server;
pub mod trace;
pub mod vm;

pub use command::{Command, LineNo, WatchId};
pub use config::{PollStrategy, ServerConfig};
pub use connection::SessionState;
pub use controller::{BreakReason, ExecutionState, Location};
pub use error::{CompileError, DisconnectReason, InitError, ProtocolError, ServerError};
pub use handle::{ServerKey, ServerRegistry};
pub use registry::{Breakpoint, Watch};
pub use serializer::{JsonStrategy, SerializeStrategy, StateSerializer};
pub use server::DebugServer;
pub use trace::{TraceError, TraceVm};
pub use vm::{DebugEvent, DebugVm, EventKind, Evaluation, StackFrame, Variable};
