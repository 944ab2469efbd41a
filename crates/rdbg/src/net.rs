//! Process-wide networking state.
//!
//! Some platforms need the socket layer started before first use and stopped
//! after last use. Each server holds one [`NetworkToken`]; the subsystem is
//! started when the first token is acquired and stopped when the last one is
//! released. Dropping a token releases it exactly once.

use std::sync::Mutex;

use tracing::{debug, info};

static USERS: Mutex<usize> = Mutex::new(0);

#[derive(Debug)]
pub struct NetworkToken {
    released: bool,
}

impl NetworkToken {
    pub fn acquire() -> Self {
        let mut users = USERS.lock().unwrap_or_else(|e| e.into_inner());
        if *users == 0 {
            info!("Starting network subsystem");
        }
        *users += 1;
        debug!(users = *users, "Network token acquired");
        Self { released: false }
    }

    /// Releases the token. Calling it again is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut users = USERS.lock().unwrap_or_else(|e| e.into_inner());
        *users = users.saturating_sub(1);
        debug!(users = *users, "Network token released");
        if *users == 0 {
            info!("Stopping network subsystem");
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for NetworkToken {
    fn drop(&mut self) {
        self.release();
    }
}
