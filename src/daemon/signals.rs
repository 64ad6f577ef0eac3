//! Flag-based signal handling: SIGTERM/SIGINT request shutdown, SIGHUP
//! requests a policy reload at the next scheduler tick.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};

use crate::core::errors::{EfmsError, Result};

pub struct SignalHandler {
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Register the handlers. Must be called once, before the scheduler
    /// loop starts.
    pub fn install() -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let reload = Arc::new(AtomicBool::new(false));

        for signal in [SIGTERM, SIGINT] {
            signal_hook::flag::register(signal, Arc::clone(&shutdown)).map_err(|e| {
                EfmsError::Runtime {
                    details: format!("failed to register signal {signal}: {e}"),
                }
            })?;
        }
        signal_hook::flag::register(SIGHUP, Arc::clone(&reload)).map_err(|e| {
            EfmsError::Runtime {
                details: format!("failed to register SIGHUP: {e}"),
            }
        })?;

        Ok(Self { shutdown, reload })
    }

    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Whether a reload was requested since the last check. Clears the flag.
    #[must_use]
    pub fn take_reload_request(&self) -> bool {
        self.reload.swap(false, Ordering::Relaxed)
    }
}
