use crate::refresher::Refresher;
use internetdb_core::Schedule;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Runs an initial refresh, then one per schedule interval. Failures are
/// logged and retried at the next tick. With `never-update` only the
/// initial run happens.
pub fn spawn_schedule(refresher: Arc<Refresher>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = refresher.refresh().await {
                warn!(error = %e, "scheduled refresh failed, retrying at the next interval");
            }
            match refresher.settings().schedule {
                Schedule::Never => {
                    info!("refresh schedule is never-update, no further refreshes");
                    return;
                }
                Schedule::Every(interval) => {
                    info!(next_in_secs = interval.as_secs(), "next database refresh scheduled");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    })
}
