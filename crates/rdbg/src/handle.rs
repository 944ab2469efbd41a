//! Lookup of servers from VM callbacks.
//!
//! A VM only carries a [`ServerKey`] in its user-data slot. The callback
//! trampolines resolve it here instead of casting raw pointers.

use slotmap::SlotMap;
use tracing::warn;

use crate::config::ServerConfig;
use crate::error::{InitError, Result, ServerError};
use crate::serializer::SerializeStrategy;
use crate::server::DebugServer;
use crate::vm::{DebugEvent, DebugVm};

slotmap::new_key_type! { pub struct ServerKey; }

#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: SlotMap<ServerKey, DebugServer>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server for `vm` and stores its key in the VM's user data.
    pub fn create(
        &mut self,
        vm: &mut dyn DebugVm,
        config: ServerConfig,
        strategy: &dyn SerializeStrategy,
    ) -> Result<ServerKey, InitError> {
        let server = DebugServer::create(vm, config, strategy)?;
        let key = self.servers.insert(server);
        vm.set_user_data(Some(key));
        Ok(key)
    }

    pub fn get(&self, key: ServerKey) -> Option<&DebugServer> {
        self.servers.get(key)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    fn resolve(&mut self, vm: &dyn DebugVm) -> Result<&mut DebugServer> {
        let Some(key) = vm.user_data() else {
            warn!("VM has no debug server attached");
            return Err(ServerError::Shutdown);
        };
        self.servers.get_mut(key).ok_or(ServerError::Shutdown)
    }

    /// Trampoline for the VM's per-line hook.
    pub fn debug_hook(&mut self, vm: &mut dyn DebugVm, event: DebugEvent) -> Result<()> {
        self.resolve(vm)?.on_hook(vm, event)
    }

    /// Trampoline for the VM's error handler.
    pub fn error_handler(&mut self, vm: &mut dyn DebugVm, message: &str) -> Result<()> {
        self.resolve(vm)?.on_error(vm, message)
    }

    pub fn poll_step(&mut self, vm: &mut dyn DebugVm) -> Result<()> {
        self.resolve(vm)?.poll_step(vm)
    }

    pub fn wait_for_attach(&mut self, vm: &mut dyn DebugVm) -> Result<()> {
        self.resolve(vm)?.wait_for_attach(vm)
    }

    /// Shuts the server down and forgets it. Returns `false` for a stale key.
    pub fn shutdown(&mut self, vm: &mut dyn DebugVm, key: ServerKey) -> bool {
        let Some(mut server) = self.servers.remove(key) else {
            return false;
        };
        server.shutdown();
        if vm.user_data() == Some(key) {
            vm.set_user_data(None);
        }
        true
    }
}
