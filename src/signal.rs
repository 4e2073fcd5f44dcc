use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tokio::sync::watch;
use tracing::info;

/// Spawn a thread that sends `true` on `shutdown` at the first SIGINT or
/// SIGTERM.
pub fn spawn_shutdown_handler(shutdown: Arc<watch::Sender<bool>>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            let mut signals =
                Signals::new([SIGINT, SIGTERM]).expect("Failed to register shutdown signals");

            if let Some(sig) = signals.forever().next() {
                info!(sig, "received shutdown signal, withdrawing router advertisements");
                shutdown.send_replace(true);
            }
        })
        .expect("Failed to spawn signal handler thread")
}
