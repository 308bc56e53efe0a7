//! Server facade
//!
//! `ServerFacade` is the only writer of the server registries and the object
//! the transport dispatches calls into. Concurrency notes:
//! - Registry state sits behind one `std::sync::Mutex`; it is never held
//!   across an `.await`. Remote work (handle resolution, pushes) runs after
//!   the lock is released, on data copied out while it was held.
//! - Broadcasts snapshot the subscriber list at start; subscribes and
//!   evictions that happen meanwhile do not affect the fan-out in flight.
//! - Clients flagged lost are skipped by every later broadcast until the
//!   reaper evicts them.
//!
//! Once `stop_server` has run, every call fails with `ServerStopped`; build a
//! new facade to start again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pushsub_transport::{CallbackResolver, DeleteMode, NotificationApi, Payload};
use pushsub_utils::{BrokerError, ClientId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::{BroadcastEngine, BroadcastReport, Notification, Target};
use crate::clients::ClientRegistry;
use crate::reaper::{self, LostClients};
use crate::topic::TopicRegistry;

#[derive(Debug, Default)]
struct BrokerState {
    topics: TopicRegistry,
    clients: ClientRegistry,
}

pub struct ServerFacade {
    state: Mutex<BrokerState>,
    lost: Arc<LostClients>,
    engine: BroadcastEngine,
    resolver: Arc<dyn CallbackResolver>,
    stopped: AtomicBool,
    shutdown: CancellationToken,
}

impl ServerFacade {
    pub fn new(resolver: Arc<dyn CallbackResolver>) -> Arc<Self> {
        let lost = Arc::new(LostClients::new());
        Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
            engine: BroadcastEngine::new(lost.clone()),
            lost,
            resolver,
            stopped: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self) -> Result<(), BrokerError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BrokerError::ServerStopped);
        }
        Ok(())
    }

    /// Cancelled when the server stops; listeners and the reaper watch it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn lost_clients(&self) -> &LostClients {
        &self.lost
    }

    pub fn client_count(&self) -> usize {
        self.state().clients.len()
    }

    pub fn is_registered(&self, client_id: &str) -> bool {
        self.state().clients.contains(client_id)
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.state().topics.names()
    }

    /// Drop a client record and strip it from every topic.
    fn remove_client(&self, client_id: &str) -> bool {
        let mut state = self.state();
        let removed = state.clients.unregister(client_id);
        let emptied = state.topics.remove_client(client_id);
        drop(state);

        for topic in &emptied {
            debug!("Topic {topic} removed: last subscriber {client_id} left");
        }
        match removed {
            Some(record) => {
                info!("Client {client_id} : {} is now deleted", record.endpoint);
                true
            }
            None => false,
        }
    }

    /// One reaper pass: evict every client flagged lost so far.
    pub fn reap_lost_clients(&self) -> usize {
        reaper::sweep(&self.lost, |client_id| {
            self.remove_client(client_id);
        })
    }

    /// Current push targets for `topic`, `None` if the topic does not exist.
    /// Clients without a resolved handle or already flagged lost are left out.
    fn targets(&self, topic: &str) -> Option<Vec<Target>> {
        let state = self.state();
        let subscribers = state.topics.subscribers(topic)?;
        let targets = subscribers
            .into_iter()
            .filter(|client_id| !self.lost.contains(client_id))
            .filter_map(|client_id| {
                let callback = state.clients.get(&client_id)?.callback()?;
                Some(Target {
                    client_id,
                    callback,
                })
            })
            .collect();
        Some(targets)
    }

    async fn broadcast(&self, topic: &str, notification: Notification) -> Option<BroadcastReport> {
        let targets = self.targets(topic)?;
        let report = self.engine.broadcast(topic, &notification, targets).await;
        debug!(
            "Broadcast on {topic}: {} delivered, {} failed",
            report.delivered,
            report.failed.len()
        );
        Some(report)
    }

    async fn remove_topic(&self, topic: &str, mode: DeleteMode) {
        match mode {
            DeleteMode::Silent => {}
            DeleteMode::Notify => {
                self.broadcast(topic, Notification::Plain).await;
            }
            DeleteMode::WithPayload(payload) => {
                self.broadcast(topic, Notification::Data(payload)).await;
            }
        }
        if self.state().topics.remove(topic).is_some() {
            info!("Topic {topic} deleted");
        }
    }

    /// Delete every topic (notifying as asked), clear all registries and
    /// cancel the shutdown token. Only the first call does anything.
    pub async fn stop_server(&self, notify: bool, payload: Option<Payload>) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let mode = match (notify, payload) {
            (false, _) => DeleteMode::Silent,
            (true, None) => DeleteMode::Notify,
            (true, Some(payload)) => DeleteMode::WithPayload(payload),
        };

        let topics = self.state().topics.names();
        for topic in topics {
            self.remove_topic(&topic, mode.clone()).await;
        }

        {
            let mut state = self.state();
            state.topics.clear();
            state.clients.clear();
        }
        self.lost.clear();
        self.shutdown.cancel();

        info!("Notification server state cleared");
    }
}

#[async_trait]
impl NotificationApi for ServerFacade {
    async fn register_client(&self, endpoint: &str) -> Result<ClientId, BrokerError> {
        self.ensure_running()?;
        let client_id = self.state().clients.register(endpoint);
        info!("Client with endpoint {endpoint} registered as {client_id}");
        Ok(client_id)
    }

    async fn unregister_client(&self, client_id: &str) -> Result<(), BrokerError> {
        self.ensure_running()?;
        if !self.remove_client(client_id) {
            debug!("Unregister for unknown client {client_id} ignored");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, client_id: &str) -> Result<(), BrokerError> {
        self.ensure_running()?;

        let (endpoint, cell) = {
            let state = self.state();
            let record = state
                .clients
                .get(client_id)
                .ok_or_else(|| BrokerError::UnregisteredClient(client_id.to_string()))?;
            (record.endpoint.clone(), record.callback_cell())
        };

        cell.get_or_try_init(|| self.resolver.resolve(&endpoint, client_id))
            .await?;

        let mut state = self.state();
        // the client may have been evicted while its handle was resolving
        if !state.clients.contains(client_id) {
            return Err(BrokerError::UnregisteredClient(client_id.to_string()));
        }
        if state.topics.subscribe(topic, client_id) {
            info!("Client {client_id} subscribed to topic {topic}");
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, client_id: &str) -> Result<(), BrokerError> {
        self.ensure_running()?;
        if self.state().topics.unsubscribe(topic, client_id) {
            info!("Client {client_id} unsubscribed from topic {topic}");
        }
        Ok(())
    }

    async fn delete_topic(&self, topic: &str, mode: DeleteMode) -> Result<(), BrokerError> {
        self.ensure_running()?;
        if !self.state().topics.exists(topic) {
            debug!("Delete of unknown topic {topic} ignored");
            return Ok(());
        }
        self.remove_topic(topic, mode).await;
        Ok(())
    }

    async fn notify_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.ensure_running()?;
        self.broadcast(topic, Notification::Plain).await;
        Ok(())
    }

    async fn data_notify_topic(&self, payload: Payload, topic: &str) -> Result<(), BrokerError> {
        self.ensure_running()?;
        self.broadcast(topic, Notification::Data(payload)).await;
        Ok(())
    }

    async fn exists(&self, topic: &str) -> Result<bool, BrokerError> {
        self.ensure_running()?;
        Ok(self.state().topics.exists(topic))
    }

    async fn subscriber_count(&self, topic: &str) -> Result<usize, BrokerError> {
        self.ensure_running()?;
        Ok(self.state().topics.subscriber_count(topic))
    }
}
