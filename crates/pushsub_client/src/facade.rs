//! Client facade
//!
//! `ClientFacade` is what the application talks to. It owns the local
//! subscription registry, the fan-out engine for inbound pushes, and a lazily
//! established connection to the server.
//!
//! The connection is set up on first use (or an explicit `connect`): start
//! listening for pushes, connect to the server, register the listening
//! endpoint. The attempt runs on its own task under `connect_timeout`.
//! Concurrent callers wait for that single attempt. A failed attempt is
//! remembered; every later call fails with `UnreachableServer` and nothing is
//! retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use pushsub_config::ClientSettings;
use pushsub_transport::{
    ClientCallback, ClientTransport, DeleteMode, NotificationApi, Payload, WsClientTransport,
};
use pushsub_utils::{BrokerError, ClientId};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::ClientBroadcastEngine;
use crate::registry::LocalSubscriptionRegistry;
use crate::subscriber::Subscriber;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Ready,
    Failed,
    Closed,
}

struct Connection {
    client_id: ClientId,
    endpoint: String,
    server: Arc<dyn NotificationApi>,
    listener: CancellationToken,
}

/// Inbound side: what the server's pushes land on.
/// The registry lock is only held for map operations, never across a call
/// to the server, so pushes are never blocked behind outgoing calls.
#[derive(Default)]
struct LocalDispatch {
    registry: Mutex<LocalSubscriptionRegistry>,
    engine: ClientBroadcastEngine,
}

impl LocalDispatch {
    fn registry(&self) -> MutexGuard<'_, LocalSubscriptionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn deliver(&self, topic: &str, payload: Option<Payload>) {
        let subscribers = self.registry().subscribers(topic);
        if subscribers.is_empty() {
            debug!("Push for {topic} has no local subscribers");
            return;
        }
        let completed = self.engine.fan_out(topic, payload, subscribers).await;
        debug!("Push for {topic} handled by {completed} subscriber(s)");
    }
}

#[async_trait]
impl ClientCallback for LocalDispatch {
    async fn receive_notification(&self, topic: &str) -> Result<(), BrokerError> {
        self.deliver(topic, None).await;
        Ok(())
    }

    async fn receive_data_notification(
        &self,
        payload: Payload,
        topic: &str,
    ) -> Result<(), BrokerError> {
        self.deliver(topic, Some(payload)).await;
        Ok(())
    }
}

pub struct ClientFacade {
    transport: Arc<dyn ClientTransport>,
    connect_timeout: Duration,
    connection: OnceCell<Result<Arc<Connection>, String>>,
    state: Mutex<ConnectionState>,
    closed: AtomicBool,
    local: Arc<LocalDispatch>,
    // serializes subscribe/unsubscribe so each topic is subscribed on the
    // server at most once
    membership: tokio::sync::Mutex<()>,
}

impl ClientFacade {
    pub fn new(transport: Arc<dyn ClientTransport>, connect_timeout: Duration) -> Self {
        Self {
            transport,
            connect_timeout,
            connection: OnceCell::new(),
            state: Mutex::new(ConnectionState::Uninitialized),
            closed: AtomicBool::new(false),
            local: Arc::new(LocalDispatch::default()),
            membership: tokio::sync::Mutex::new(()),
        }
    }

    /// A client speaking WebSocket, configured from `settings`.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        let transport = WsClientTransport::new(
            &settings.server_address,
            settings.port,
            settings.advertise_host.clone(),
        );
        Self::new(
            Arc::new(transport),
            Duration::from_secs(settings.connect_timeout_secs),
        )
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.lock_state() = state;
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    /// Server-assigned id, once registration has succeeded.
    pub fn client_id(&self) -> Option<ClientId> {
        match self.connection.get() {
            Some(Ok(connection)) => Some(connection.client_id.clone()),
            _ => None,
        }
    }

    /// Endpoint the server pushes to, once listening.
    pub fn endpoint(&self) -> Option<String> {
        match self.connection.get() {
            Some(Ok(connection)) => Some(connection.endpoint.clone()),
            _ => None,
        }
    }

    /// Establish the connection now instead of on first use.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<Arc<Connection>, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ClientClosed);
        }
        match self.connection.get_or_init(|| self.establish()).await {
            Ok(connection) => Ok(connection.clone()),
            Err(reason) => Err(BrokerError::UnreachableServer(reason.clone())),
        }
    }

    async fn establish(&self) -> Result<Arc<Connection>, String> {
        self.set_state(ConnectionState::Connecting);

        let listener = CancellationToken::new();
        let mut attempt = tokio::spawn(open_connection(
            self.transport.clone(),
            self.local.clone(),
            listener.clone(),
        ));

        let finished = tokio::time::timeout(self.connect_timeout, &mut attempt).await;
        let outcome = match finished {
            Ok(Ok(Ok(connection))) => Ok(Arc::new(connection)),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(e)) => Err(format!("connect task failed: {e}")),
            Err(_) => {
                attempt.abort();
                Err(format!("no answer within {:?}", self.connect_timeout))
            }
        };

        match outcome {
            Ok(connection) if self.closed.load(Ordering::SeqCst) => {
                // closed while connecting: undo the registration
                release(&connection).await;
                Err("client closed while connecting".to_string())
            }
            Ok(connection) => {
                self.set_state(ConnectionState::Ready);
                info!(
                    "Registered as {} listening on {}",
                    connection.client_id, connection.endpoint
                );
                Ok(connection)
            }
            Err(reason) => {
                listener.cancel();
                self.set_state(ConnectionState::Failed);
                warn!("Could not reach the notification server: {reason}");
                Err(reason)
            }
        }
    }

    /// Attach `subscriber` to `topic`. The first local subscriber of a topic
    /// subscribes this client on the server. Returns whether the subscriber
    /// was newly added.
    pub async fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<bool, BrokerError> {
        let connection = self.connection().await?;
        let _membership = self.membership.lock().await;
        let tracked = self.local.registry().has_topic(topic);
        if !tracked {
            connection
                .server
                .subscribe(topic, &connection.client_id)
                .await?;
            debug!("Subscribed {} to {topic}", connection.client_id);
        }
        Ok(self.local.registry().add(topic, subscriber))
    }

    /// Detach `subscriber` from `topic`. When the last local subscriber goes,
    /// the server subscription goes too. Returns true for a topic this client
    /// does not track, otherwise whether the subscriber was attached.
    pub async fn unsubscribe(
        &self,
        topic: &str,
        subscriber: &Arc<dyn Subscriber>,
    ) -> Result<bool, BrokerError> {
        let connection = self.connection().await?;
        let _membership = self.membership.lock().await;
        let removal = {
            let mut registry = self.local.registry();
            if !registry.has_topic(topic) {
                return Ok(true);
            }
            registry.remove(topic, subscriber)
        };
        if removal.topic_emptied {
            connection
                .server
                .unsubscribe(topic, &connection.client_id)
                .await?;
            debug!("Unsubscribed {} from {topic}", connection.client_id);
        }
        Ok(removal.removed)
    }

    pub async fn post_notification(&self, topic: &str) -> Result<(), BrokerError> {
        let connection = self.connection().await?;
        connection.server.notify_topic(topic).await
    }

    pub async fn post_data_notification(
        &self,
        payload: Payload,
        topic: &str,
    ) -> Result<(), BrokerError> {
        let connection = self.connection().await?;
        connection.server.data_notify_topic(payload, topic).await
    }

    pub async fn delete_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.delete_topic_as(topic, DeleteMode::Silent).await
    }

    pub async fn delete_topic_notify(&self, topic: &str, notify: bool) -> Result<(), BrokerError> {
        self.delete_topic_as(topic, DeleteMode::from_flag(notify))
            .await
    }

    pub async fn delete_topic_with_payload(
        &self,
        topic: &str,
        payload: Payload,
    ) -> Result<(), BrokerError> {
        self.delete_topic_as(topic, DeleteMode::WithPayload(payload))
            .await
    }

    async fn delete_topic_as(&self, topic: &str, mode: DeleteMode) -> Result<(), BrokerError> {
        let connection = self.connection().await?;
        connection.server.delete_topic(topic, mode).await
    }

    pub async fn exists(&self, topic: &str) -> Result<bool, BrokerError> {
        let connection = self.connection().await?;
        connection.server.exists(topic).await
    }

    pub async fn subscriber_count(&self, topic: &str) -> Result<usize, BrokerError> {
        let connection = self.connection().await?;
        connection.server.subscriber_count(topic).await
    }

    /// Hand a push for `topic` to the local subscribers.
    pub async fn receive_notification(&self, topic: &str) -> Result<(), BrokerError> {
        self.local.receive_notification(topic).await
    }

    pub async fn receive_data_notification(
        &self,
        payload: Payload,
        topic: &str,
    ) -> Result<(), BrokerError> {
        self.local.receive_data_notification(payload, topic).await
    }

    /// Topics with at least one local subscriber.
    pub fn local_topics(&self) -> Vec<String> {
        self.local.registry().topics()
    }

    /// Unregister from the server, stop listening and forget every local
    /// subscription. Failures talking to the server are logged, not returned.
    /// Calling it again does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(Ok(connection)) = self.connection.get() {
            release(connection).await;
        }
        self.local.registry().clear();
        self.set_state(ConnectionState::Closed);
        info!("Notification client closed");
    }
}

async fn open_connection(
    transport: Arc<dyn ClientTransport>,
    handler: Arc<LocalDispatch>,
    listener: CancellationToken,
) -> Result<Connection, BrokerError> {
    let endpoint = transport.listen(handler, listener.clone()).await?;
    let server = transport.connect().await?;
    let client_id = server.register_client(&endpoint).await?;
    Ok(Connection {
        client_id,
        endpoint,
        server,
        listener,
    })
}

async fn release(connection: &Connection) {
    if let Err(e) = connection
        .server
        .unregister_client(&connection.client_id)
        .await
    {
        warn!("Failed to unregister {}: {e}", connection.client_id);
    }
    connection.listener.cancel();
}
