//! Call contracts between server and clients.
//!
//! The server exposes `NotificationApi`; every client exposes a
//! `ClientCallback` the server pushes into. How a handle is obtained is the
//! transport's business (`CallbackResolver` on the server side,
//! `ClientTransport` on the client side).

use std::sync::Arc;

use async_trait::async_trait;
use pushsub_utils::{BrokerError, ClientId};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Opaque notification payload.
pub type Payload = serde_json::Value;

/// The three ways a topic can be deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "payload", rename_all = "snake_case")]
pub enum DeleteMode {
    /// Remove without telling anyone.
    Silent,
    /// Send a plain notification to every subscriber, then remove.
    Notify,
    /// Send the payload to every subscriber, then remove.
    WithPayload(Payload),
}

impl DeleteMode {
    pub fn from_flag(notify: bool) -> Self {
        if notify {
            DeleteMode::Notify
        } else {
            DeleteMode::Silent
        }
    }
}

/// Server-facing surface (client -> server).
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Allocates a new client id for the push endpoint at `endpoint`.
    async fn register_client(&self, endpoint: &str) -> Result<ClientId, BrokerError>;

    /// Idempotent; unknown ids are ignored.
    async fn unregister_client(&self, client_id: &str) -> Result<(), BrokerError>;

    async fn subscribe(&self, topic: &str, client_id: &str) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, topic: &str, client_id: &str) -> Result<(), BrokerError>;

    /// No-op for unknown topics.
    async fn delete_topic(&self, topic: &str, mode: DeleteMode) -> Result<(), BrokerError>;

    async fn notify_topic(&self, topic: &str) -> Result<(), BrokerError>;

    async fn data_notify_topic(&self, payload: Payload, topic: &str) -> Result<(), BrokerError>;

    async fn exists(&self, topic: &str) -> Result<bool, BrokerError>;

    /// 0 for unknown topics.
    async fn subscriber_count(&self, topic: &str) -> Result<usize, BrokerError>;
}

/// Client-facing surface (server -> client push).
#[async_trait]
pub trait ClientCallback: Send + Sync {
    async fn receive_notification(&self, topic: &str) -> Result<(), BrokerError>;

    async fn receive_data_notification(
        &self,
        payload: Payload,
        topic: &str,
    ) -> Result<(), BrokerError>;
}

/// Turns a registered client's endpoint into a callable push handle.
#[async_trait]
pub trait CallbackResolver: Send + Sync {
    async fn resolve(
        &self,
        endpoint: &str,
        client_id: &str,
    ) -> Result<Arc<dyn ClientCallback>, BrokerError>;
}

/// What a client needs from the network: a handle on the server and a place
/// to receive pushes.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn NotificationApi>, BrokerError>;

    /// Starts accepting pushes for `handler` until `shutdown` is cancelled.
    /// Returns the endpoint address to advertise to the server.
    async fn listen(
        &self,
        handler: Arc<dyn ClientCallback>,
        shutdown: CancellationToken,
    ) -> Result<String, BrokerError>;
}
