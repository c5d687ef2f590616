//! Session lifetime as seen from the console.

use tokio::sync::watch;
use traycam_core::machine::SessionSnapshot;

/// Resolve once the operator has completed the session or the driver has
/// stopped publishing snapshots.
pub async fn session_ended(snapshots: &mut watch::Receiver<SessionSnapshot>) {
    if snapshots.wait_for(|s| s.completed).await.is_err() {
        tracing::debug!("Session driver stopped publishing");
    }
}
