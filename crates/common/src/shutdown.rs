//! Process-wide shutdown coordination
//!
//! The node owns one root [`CancellationToken`]. Every long-running
//! component (aggregator nodes, bulk writers, local aggregators) runs under
//! a child token so a root cancellation reaches all of them, while a single
//! component can still be stopped on its own.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Root cancellation scope of the node.
///
/// ```ignore
/// let shutdown = ShutdownController::with_ctrl_c();
/// app.start(shutdown.child_token()).await?;
/// shutdown.wait_for_shutdown().await;
/// app.stop().await;
/// ```
#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller that cancels itself on Ctrl+C
    pub fn with_ctrl_c() -> Self {
        let controller = Self::new();
        let token = controller.token.clone();

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, stopping oracle node");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
            }
        });

        controller
    }

    /// Scope for one component. Cancelled with the root, cancellable alone.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.token.cancel();
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }
}
