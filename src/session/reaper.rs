// session/reaper.rs - Background Expiry of Stale Sessions

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use super::engine::ConformanceEngine;

/// Periodically aborts sessions whose deadline has passed
///
/// Stops when dropped.
pub struct SessionReaper {
    handle: JoinHandle<()>,
}

impl SessionReaper {
    /// Start reaping on the current tokio runtime
    pub fn spawn(engine: ConformanceEngine, every: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);

            loop {
                ticker.tick().await;
                let expired = engine.abort_expired();
                if !expired.is_empty() {
                    debug!(count = expired.len(), "Reaped expired sessions");
                }
            }
        });

        info!("Started session reaper (interval: {:?})", every);
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
        info!("Stopped session reaper");
    }
}

impl Drop for SessionReaper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
