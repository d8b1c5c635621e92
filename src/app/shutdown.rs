use crate::domain::{AgentEvent, LifecycleSignal};
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Turns process termination signals into a page unload.
#[derive(Debug)]
pub struct SignalHandler {
    task: JoinHandle<()>,
}

impl SignalHandler {
    pub fn spawn(events: mpsc::Sender<AgentEvent>) -> Self {
        let task = tokio::spawn(async move {
            if !wait_for_signal().await {
                return;
            }
            if events
                .send(AgentEvent::Lifecycle(LifecycleSignal::BeforeUnload))
                .await
                .is_err()
            {
                error!("Failed to deliver unload signal: controller already stopped");
            }
        });
        Self { task }
    }

    /// Stops listening; the signal can no longer reach a stopped controller.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Resolves on SIGINT or SIGTERM. Returns false when no signal can be
/// listened for at all.
async fn wait_for_signal() -> bool {
    #[cfg(unix)]
    {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = signal::ctrl_c() => ctrl_c_received(result),
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, unloading");
                        true
                    }
                }
            }
            Err(e) => {
                error!("Failed to create SIGTERM handler: {}", e);
                ctrl_c_received(signal::ctrl_c().await)
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c_received(signal::ctrl_c().await)
    }
}

fn ctrl_c_received(result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => {
            info!("Received SIGINT (Ctrl+C), unloading");
            true
        }
        Err(err) => {
            error!("Failed to listen for SIGINT: {}", err);
            false
        }
    }
}
