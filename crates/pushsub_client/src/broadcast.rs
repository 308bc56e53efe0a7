//! Fan-out of inbound pushes to local subscribers.

use std::sync::Arc;

use pushsub_transport::Payload;
use tokio::task::JoinSet;
use tracing::warn;

use crate::subscriber::Subscriber;

/// Calls every subscriber concurrently and waits for all of them. A
/// subscriber that panics is logged and otherwise ignored; nothing is
/// retried and nothing is reported back to the server.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientBroadcastEngine;

impl ClientBroadcastEngine {
    /// Returns how many subscribers completed their callback.
    pub async fn fan_out(
        &self,
        topic: &str,
        payload: Option<Payload>,
        subscribers: Vec<Arc<dyn Subscriber>>,
    ) -> usize {
        let payload = payload.map(Arc::new);
        let mut tasks = JoinSet::new();

        for subscriber in subscribers {
            let topic = topic.to_string();
            let payload = payload.clone();
            tasks.spawn_blocking(move || match payload {
                Some(payload) => subscriber.on_data_notify(&payload, &topic),
                None => subscriber.on_notify(&topic),
            });
        }

        let mut completed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(()) => completed += 1,
                Err(e) => warn!("Subscriber for {topic} failed: {e}"),
            }
        }
        completed
    }
}
