//! Broadcast engine
//!
//! Pushes one notification to every target concurrently: one task per
//! subscriber on the tokio runtime, then wait for all of them. A push that
//! fails never reaches the caller and never cancels its siblings; the client
//! is flagged in `LostClients` for the reaper instead. A push task that
//! panics counts as a failed push. There are no retries
//! and no per-push timeout, so a hanging peer holds up the whole call.

use std::collections::HashSet;
use std::sync::Arc;

use pushsub_transport::{ClientCallback, Payload};
use pushsub_utils::ClientId;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::reaper::LostClients;

/// What to push.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Plain,
    Data(Payload),
}

/// A subscriber with a resolved push handle, captured at broadcast start.
#[derive(Clone)]
pub struct Target {
    pub client_id: ClientId,
    pub callback: Arc<dyn ClientCallback>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<ClientId>,
}

pub struct BroadcastEngine {
    lost: Arc<LostClients>,
}

impl BroadcastEngine {
    pub fn new(lost: Arc<LostClients>) -> Self {
        Self { lost }
    }

    /// Push `notification` for `topic` to every target and wait until every
    /// attempt has finished.
    pub async fn broadcast(
        &self,
        topic: &str,
        notification: &Notification,
        targets: Vec<Target>,
    ) -> BroadcastReport {
        let mut tasks = JoinSet::new();
        let mut pending = HashSet::new();

        for target in targets {
            pending.insert(target.client_id.clone());
            let topic = topic.to_string();
            let notification = notification.clone();
            let lost = self.lost.clone();

            tasks.spawn(async move {
                let result = match notification {
                    Notification::Plain => target.callback.receive_notification(&topic).await,
                    Notification::Data(payload) => {
                        target
                            .callback
                            .receive_data_notification(payload, &topic)
                            .await
                    }
                };

                match result {
                    Ok(()) => {
                        debug!("Client {} notified on {topic}", target.client_id);
                        Ok(target.client_id)
                    }
                    Err(e) => {
                        warn!(
                            "Connection with client {} failed ({e}). Client will be removed...",
                            target.client_id
                        );
                        lost.mark(&target.client_id);
                        Err(target.client_id)
                    }
                }
            });
        }

        let mut report = BroadcastReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(client_id)) => {
                    pending.remove(&client_id);
                    report.delivered += 1;
                }
                Ok(Err(client_id)) => {
                    pending.remove(&client_id);
                    report.failed.push(client_id);
                }
                Err(e) => warn!("Push task for {topic} did not complete: {e}"),
            }
        }

        // tasks that never reported back panicked
        for client_id in pending {
            self.lost.mark(&client_id);
            report.failed.push(client_id);
        }
        report
    }
}
