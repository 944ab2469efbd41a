use std::net::{SocketAddr, SocketAddrV4};

use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::config::ServerConfig;
use crate::connection::{ConnectionManager, SessionState};
use crate::controller::{ExecutionController, ExecutionState, Location};
use crate::error::{DisconnectReason, InitError, ProtocolError, Result, ServerError};
use crate::framer::Frame;
use crate::net::NetworkToken;
use crate::protocol::Reply;
use crate::registry::{Breakpoint, Registry, Watch};
use crate::serializer::{JsonStrategy, SerializeStrategy, SerializeTarget, SerializerHandle};
use crate::vm::{DebugEvent, DebugVm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Stay,
    Resume,
}

/// A debug server embedded in one VM.
///
/// All entry points run on the VM's thread and return only once the event
/// has been fully handled, including any time spent suspended.
#[derive(Debug)]
pub struct DebugServer {
    config: ServerConfig,
    connection: ConnectionManager,
    registry: Registry,
    controller: ExecutionController,
    serializer: SerializerHandle,
    network: NetworkToken,
    /// Break state raised while no client was active, sent after the next
    /// `READY`.
    pending_break: Option<Vec<u8>>,
    shut_down: bool,
}

impl DebugServer {
    /// Starts listening and binds `strategy` to `vm`. Any failure leaves no
    /// server behind.
    pub fn create(
        vm: &mut dyn DebugVm,
        config: ServerConfig,
        strategy: &dyn SerializeStrategy,
    ) -> Result<Self, InitError> {
        config.validate()?;
        let network = NetworkToken::acquire();
        let connection = ConnectionManager::start_listening(
            SocketAddrV4::new(config.bind_address, config.port),
            config.max_line_len,
        )?;
        let serializer = SerializerHandle::initialize(strategy, vm)?;

        info!(port = config.port, auto_update = config.auto_update, "Debug server created");
        Ok(Self {
            config,
            connection,
            registry: Registry::new(),
            controller: ExecutionController::new(),
            serializer,
            network,
            pending_break: None,
            shut_down: false,
        })
    }

    /// Default configuration on `port` with the JSON serializer.
    pub fn listen(vm: &mut dyn DebugVm, port: u16, auto_update: bool) -> Result<Self, InitError> {
        let config = ServerConfig::default().with_port(port).with_auto_update(auto_update);
        Self::create(vm, config, &JsonStrategy::default())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.local_addr()
    }

    pub fn session_state(&self) -> SessionState {
        self.connection.state()
    }

    pub fn execution_state(&self) -> &ExecutionState {
        self.controller.state()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn serializer(&self) -> &SerializerHandle {
        &self.serializer
    }

    pub fn has_pending_break(&self) -> bool {
        self.pending_break.is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shut_down {
            return Err(ServerError::Shutdown);
        }
        Ok(())
    }

    /// Blocks until a client has connected and sent `READY`.
    pub fn wait_for_attach(&mut self, vm: &mut dyn DebugVm) -> Result<()> {
        self.ensure_open()?;
        info!("Waiting for debugger to attach");

        while !self.connection.is_active() {
            match self.poll_step(vm) {
                Ok(()) => {}
                Err(ServerError::SessionEnded(reason)) => {
                    debug!(%reason, "Session ended before attach");
                }
                Err(e) => return Err(e),
            }
            if !self.connection.is_active() {
                self.config.poll.idle();
            }
        }

        info!("Debugger attached");
        Ok(())
    }

    /// One non-blocking unit of work: accept if needed, then dispatch every
    /// complete line already received.
    pub fn poll_step(&mut self, vm: &mut dyn DebugVm) -> Result<()> {
        self.ensure_open()?;
        if self.connection.state() == SessionState::Closed {
            self.connection.relisten().map_err(ServerError::Relisten)?;
        }
        if !self.connection.poll_accept(&mut self.registry) {
            return Ok(());
        }

        while self.connection.poll_readable() {
            match self.connection.receive_line() {
                Ok(Some(frame)) => {
                    self.handle_frame(vm, frame)?;
                }
                Ok(None) => break,
                Err(reason) => return Err(self.session_ended(reason)),
            }
        }
        Ok(())
    }

    /// Hook callback for line, call and return events.
    pub fn on_hook(&mut self, vm: &mut dyn DebugVm, event: DebugEvent) -> Result<()> {
        self.ensure_open()?;
        let depth = vm.call_depth();
        if self
            .controller
            .on_event(&event, depth, &self.registry, vm)
            .is_some()
        {
            self.break_execution(vm)?;
        }

        if self.config.auto_update {
            self.poll_step(vm)?;
        }
        Ok(())
    }

    /// Error handler for uncaught VM errors. Always suspends.
    pub fn on_error(&mut self, vm: &mut dyn DebugVm, message: &str) -> Result<()> {
        self.ensure_open()?;
        let location = vm
            .top_frame()
            .map(|frame| Location::new(frame.source, frame.line, frame.function))
            .unwrap_or_else(Location::unknown);

        error!(
            function = %location.function,
            source = %location.source,
            line = location.line,
            message = %message,
            "An error has occurred"
        );
        self.controller.on_error(message, location);
        self.break_execution(vm)
    }

    /// Sends the state block and serves the client until it resumes.
    ///
    /// A client that is connected but not yet `READY` is waited for. With
    /// no client at all the block is held for the next one and the VM goes
    /// on.
    fn break_execution(&mut self, vm: &mut dyn DebugVm) -> Result<()> {
        let ExecutionState::Suspended { reason, location } = self.controller.state().clone() else {
            return Ok(());
        };

        if self.pending_break.take().is_some() {
            debug!("Dropped an undelivered break");
        }
        if self.connection.state() == SessionState::Accepted {
            debug!(%reason, "Waiting for READY before breaking");
            self.await_ready(vm)?;
            if !matches!(self.controller.state(), ExecutionState::Suspended { .. }) {
                return Ok(());
            }
        }

        let watches = self.registry.watches().into_iter().cloned().collect::<Vec<_>>();
        let watch_refs = watches.iter().collect::<Vec<_>>();
        let state = self.serializer.serialize(
            vm,
            SerializeTarget::Break {
                reason: &reason,
                location: &location,
                watches: &watch_refs,
            },
        );

        if !self.connection.is_active() {
            warn!(
                %reason,
                source = %location.source,
                line = location.line,
                "No debugger attached, holding break"
            );
            self.pending_break = Some(state);
            self.controller.release();
            return Ok(());
        }
        self.send(&state)?;

        loop {
            if !self.connection.poll_readable() {
                self.config.poll.idle();
                continue;
            }

            match self.connection.receive_line() {
                Ok(Some(frame)) => {
                    if self.handle_frame(vm, frame)? == Flow::Resume {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(reason) => return Err(self.session_ended(reason)),
            }
        }
    }

    fn await_ready(&mut self, vm: &mut dyn DebugVm) -> Result<()> {
        while self.connection.state() == SessionState::Accepted {
            self.poll_step(vm)?;
            if !self.connection.is_active() {
                self.config.poll.idle();
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, vm: &mut dyn DebugVm, frame: Frame) -> Result<Flow> {
        match frame {
            Frame::Line(line) => self.dispatch(vm, Command::parse(&line)),
            Frame::Overlong { len } => {
                let e = ProtocolError::Overlong {
                    len,
                    limit: self.config.max_line_len,
                };
                warn!(error = %e, "Dropping line");
                Ok(Flow::Stay)
            }
        }
    }

    fn dispatch(&mut self, vm: &mut dyn DebugVm, command: Command) -> Result<Flow> {
        debug!(command = %command, "Received command");

        match command {
            Command::Ready => {
                self.connection.attach();
                self.reply(Reply::Attached)?;
                if let Some(state) = self.pending_break.take() {
                    info!("Delivering held break");
                    self.send(&state)?;
                }
            }
            Command::SetBreakpoint {
                source,
                line,
                condition,
            } => {
                self.registry.set_breakpoint(Breakpoint {
                    source: source.clone(),
                    line,
                    condition: condition.clone(),
                });
                self.reply(Reply::BreakpointSet {
                    source,
                    line,
                    condition,
                })?;
            }
            Command::ClearBreakpoint { source, line } => {
                let found = self.registry.clear_breakpoint(&source, line).is_some();
                self.reply(Reply::BreakpointCleared { source, line, found })?;
            }
            Command::SetWatch { id, expression } => {
                self.registry.set_watch(Watch::new(id, expression.clone()));
                self.reply(Reply::WatchSet { id, expression })?;
            }
            Command::ClearWatch { id } => {
                let found = self.registry.clear_watch(id).is_some();
                self.reply(Reply::WatchCleared { id, found })?;
            }
            Command::EvaluateWatch { id } => match self.registry.watch(id).cloned() {
                Some(watch) => {
                    let value = self.serializer.serialize(vm, SerializeTarget::Watch(&watch));
                    self.send(&value)?;
                }
                None => self.reply(Reply::Error {
                    message: format!("unknown watch id {}", id),
                })?,
            },
            Command::Continue | Command::StepInto | Command::StepOver | Command::StepOut => {
                self.controller.resume(&command, vm.call_depth());
                self.reply(Reply::Resumed {
                    command: command.to_string(),
                })?;
                return Ok(Flow::Resume);
            }
            Command::Suspend => self.controller.request_pause(),
            Command::Backtrace => {
                let stack = self.serializer.serialize(vm, SerializeTarget::Stack);
                self.send(&stack)?;
            }
            Command::Disconnect => {
                let reason = self.connection.disconnect(DisconnectReason::PeerRequested);
                return Err(self.session_ended(reason));
            }
            Command::Unknown(raw) => {
                warn!(error = %ProtocolError::UnknownCommand(raw), "Ignoring line");
            }
        }

        Ok(Flow::Stay)
    }

    fn reply(&mut self, reply: Reply) -> Result<()> {
        self.send(&reply.to_line())
    }

    fn send(&mut self, line: &[u8]) -> Result<()> {
        self.connection
            .send_line(line)
            .map_err(|reason| self.session_ended(reason))
    }

    fn session_ended(&mut self, reason: DisconnectReason) -> ServerError {
        self.controller.release();
        ServerError::SessionEnded(reason)
    }

    /// Closes the session or listener and releases the network token.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        info!("Shutting down debug server");
        self.connection.close();
        self.controller.release();
        self.network.release();
        self.shut_down = true;
    }
}

impl Drop for DebugServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
