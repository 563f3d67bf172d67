//! Interrupt handling for the loop controller.
//!
//! Ctrl-C only raises a flag. The process supervisor kills the in-flight
//! child, a waiting menu prompt gives up, and the loop terminates as
//! cancelled through its normal reporting path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Shared cancellation flag observed by the supervisor and the loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Install a Ctrl-C listener on a background thread and return its token.
pub fn install_interrupt_handler() -> Result<CancelToken> {
    let token = CancelToken::new();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;

    let listener = token.clone();
    thread::Builder::new()
        .name("ralph-signal".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        warn!(err = %err, "failed to listen for interrupt");
                        return;
                    }
                    if listener.is_cancelled() {
                        debug!("repeated interrupt, already stopping");
                        continue;
                    }
                    debug!("interrupt received, cancelling");
                    eprintln!("\nInterrupt received, stopping after the current step...");
                    listener.cancel();
                }
            });
        })
        .context("spawn signal thread")?;

    Ok(token)
}
