use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, miette};
use rdbg::{JsonStrategy, PollStrategy, ServerConfig, ServerError, ServerRegistry, TraceVm};
use tracing::{info, warn};

#[derive(Parser, Debug, Default)]
#[command(name = "rdbg-run")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(after_help = "# Examples:\n\n\
    ## Wait for a debugger on port 4321, then replay:\n\
    rdbg-run trace.txt\n\n\
    ## Replay without waiting, polling the debugger on every event:\n\
    rdbg-run --no-wait --auto-update trace.txt\n\n\
    ## Load server settings from a file:\n\
    rdbg-run -c rdbg.toml trace.txt")]
#[command(
    about = "Replays a VM execution trace under the rdbg remote debug server.",
    long_about = None
)]
pub struct Cli {
    /// Port to listen on (0 picks a free port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind the listener to
    #[arg(short, long)]
    bind: Option<Ipv4Addr>,

    /// Server settings in TOML
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Poll the debugger connection after every hook event
    #[arg(short, long, default_value_t = false)]
    auto_update: bool,

    /// Start replaying without waiting for a debugger to attach
    #[arg(long, default_value_t = false)]
    no_wait: bool,

    /// Busy-poll instead of sleeping while suspended
    #[arg(long, default_value_t = false)]
    spin: bool,

    #[arg(value_name = "TRACE")]
    trace: PathBuf,
}

impl Cli {
    pub fn run(&self) -> miette::Result<()> {
        let config = self.server_config()?;
        let poll_between_steps = !config.auto_update;
        let script = fs::read_to_string(&self.trace).into_diagnostic()?;
        let mut vm = TraceVm::parse(&script).into_diagnostic()?;

        let mut registry = ServerRegistry::new();
        let key = registry
            .create(&mut vm, config, &JsonStrategy::default())
            .into_diagnostic()?;

        if let Some(addr) = registry.get(key).and_then(|server| server.local_addr()) {
            info!(%addr, trace = %self.trace.display(), "Debug server ready");
        }

        if !self.no_wait {
            registry.wait_for_attach(&mut vm).into_diagnostic()?;
        }

        loop {
            match Self::replay(&mut vm, &mut registry, poll_between_steps) {
                Ok(()) => break,
                Err(e) if e.is_session_ended() => {
                    warn!(error = %e, "Debugger went away, continuing");
                    if !self.no_wait && !vm.is_finished() {
                        registry.wait_for_attach(&mut vm).into_diagnostic()?;
                    }
                }
                Err(e) => return Err(miette!("{}", e)),
            }
        }

        registry.shutdown(&mut vm, key);
        info!("Trace finished");
        Ok(())
    }

    /// Steps the trace to the end. Without auto-update the hooks never
    /// touch the socket, so the debugger is polled between directives.
    fn replay(
        vm: &mut TraceVm,
        registry: &mut ServerRegistry,
        poll_between_steps: bool,
    ) -> Result<(), ServerError> {
        while vm.step_registered(registry)? {
            if poll_between_steps {
                registry.poll_step(vm)?;
            }
        }
        Ok(())
    }

    fn server_config(&self) -> miette::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path).into_diagnostic()?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(bind) = self.bind {
            config = config.with_bind_address(bind);
        }
        if self.auto_update {
            config = config.with_auto_update(true);
        }
        if self.spin {
            config = config.with_poll(PollStrategy::Spin);
        }
        Ok(config)
    }
}
