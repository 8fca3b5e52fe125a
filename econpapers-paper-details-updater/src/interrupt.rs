use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use log::{error, warn};
use tokio::runtime::Builder;

/// Raises `stop` on Ctrl-C from a dedicated listener thread. Later signals
/// only repeat the warning; shutdown always goes through the final checkpoint.
pub fn listen_for_interrupt(stop: Arc<AtomicBool>) -> io::Result<()> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Unable to listen for Ctrl-C: {}", e);
                        return;
                    }
                    if stop.swap(true, Ordering::SeqCst) {
                        warn!("Already stopping; waiting for the final checkpoint.");
                    } else {
                        warn!("Interrupt received: finishing in-flight requests, then checkpointing.");
                    }
                }
            })
        })?;
    Ok(())
}
