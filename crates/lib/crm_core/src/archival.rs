//! Archival job: moves deactivated users past the retention window out of the
//! live table.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::lifecycle::{default_retention, retention_cutoff};
use crate::models::ArchivedUser;
use crate::rbac::RbacResult;
use crate::store::RbacStore;

/// Archives deactivated users whose retention window has elapsed.
#[derive(Clone)]
pub struct ArchivalJob {
    store: Arc<dyn RbacStore>,
    retention: Duration,
}

impl ArchivalJob {
    pub fn new(store: Arc<dyn RbacStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Job with the default 60-day retention.
    pub fn with_default_retention(store: Arc<dyn RbacStore>) -> Self {
        Self::new(store, default_retention())
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Archive every deactivated user with `deactivated_at <= now - retention`.
    /// Running it again with the same `now` archives nothing.
    pub async fn run_once(&self, now: DateTime<Utc>) -> RbacResult<Vec<ArchivedUser>> {
        let cutoff = retention_cutoff(now, self.retention)?;
        let archived = self.store.archive_deactivated(cutoff, now).await?;
        if archived.is_empty() {
            debug!(cutoff = %cutoff, "archival run: nothing to archive");
        } else {
            info!(
                cutoff = %cutoff,
                count = archived.len(),
                "archival run: users archived"
            );
            for user in &archived {
                debug!(user_id = %user.id, email = %user.email, "archived");
            }
        }
        Ok(archived)
    }

    /// Run [`run_once`](Self::run_once) every `every` until `cancel` fires.
    /// The first run happens immediately. Failed runs are logged and retried
    /// on the next tick.
    pub fn spawn(self, every: std::time::Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(every = ?every, retention_days = self.retention.num_days(), "archival job started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once(Utc::now()).await {
                            error!(error = %e, "archival run failed");
                        }
                    }
                }
            }
            info!("archival job stopped");
        })
    }
}
