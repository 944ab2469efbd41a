use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use std::{fs, thread};

use serde::Deserialize;

use crate::error::InitError;

pub const DEFAULT_PORT: u16 = 4321;
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

/// How blocking loops wait between two non-blocking polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PollStrategy {
    /// Tight loop, lowest latency.
    Spin,
    /// Yield the thread to the scheduler.
    Yield,
    /// Sleep for a fixed interval.
    Sleep { interval_ms: u64 },
}

impl Default for PollStrategy {
    fn default() -> Self {
        PollStrategy::Sleep { interval_ms: 1 }
    }
}

impl PollStrategy {
    pub fn idle(&self) {
        match self {
            PollStrategy::Spin => std::hint::spin_loop(),
            PollStrategy::Yield => thread::yield_now(),
            PollStrategy::Sleep { interval_ms } => {
                thread::sleep(Duration::from_millis(*interval_ms))
            }
        }
    }
}

/// Server settings. Every field has a default so partial TOML files work.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_address: Ipv4Addr,
    pub port: u16,
    /// Run a poll step after every hook event.
    pub auto_update: bool,
    /// Capacity of the inbound line buffer.
    pub max_line_len: usize,
    pub poll: PollStrategy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
            auto_update: false,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            poll: PollStrategy::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, InitError> {
        let config: ServerConfig = toml::from_str(s).map_err(|e| InitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, InitError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| InitError::Config(format!("failed to read '{}': {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), InitError> {
        if self.max_line_len == 0 {
            return Err(InitError::Config("max_line_len must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_address(mut self, addr: Ipv4Addr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    pub fn with_poll(mut self, poll: PollStrategy) -> Self {
        self.poll = poll;
        self
    }
}
