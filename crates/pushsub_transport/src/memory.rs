//! In-process transport
//!
//! `MemoryNetwork` lets a server and any number of clients run in the same
//! process without sockets. Clients "listen" by registering their callback
//! under a generated endpoint name (`memory:<n>`); the server resolves those
//! names back into handles. Endpoints can be marked unreachable, after which
//! every push to them fails with `BrokerError::PeerUnreachable`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use pushsub_utils::BrokerError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::rpc::{CallbackResolver, ClientCallback, ClientTransport, NotificationApi, Payload};

struct Endpoint {
    handler: Arc<dyn ClientCallback>,
    reachable: bool,
}

#[derive(Default)]
struct Endpoints {
    by_name: Mutex<HashMap<String, Endpoint>>,
}

impl Endpoints {
    fn handler(&self, name: &str) -> Result<Arc<dyn ClientCallback>, BrokerError> {
        let endpoints = self.by_name.lock().map_err(|_| poisoned())?;
        match endpoints.get(name) {
            Some(endpoint) if endpoint.reachable => Ok(endpoint.handler.clone()),
            Some(_) => Err(BrokerError::PeerUnreachable(format!("{name} is unreachable"))),
            None => Err(BrokerError::PeerUnreachable(format!("{name} is not listening"))),
        }
    }
}

fn poisoned() -> BrokerError {
    BrokerError::Protocol("memory network lock poisoned".to_string())
}

#[derive(Default)]
pub struct MemoryNetwork {
    server: Mutex<Option<Weak<dyn NotificationApi>>>,
    endpoints: Arc<Endpoints>,
    next_endpoint: AtomicU64,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `server` the target of every `connect`. Only a weak reference is
    /// kept, so the server may itself hold this network as its resolver.
    pub fn attach_server(&self, server: &Arc<dyn NotificationApi>) {
        if let Ok(mut slot) = self.server.lock() {
            *slot = Some(Arc::downgrade(server));
        }
    }

    /// Toggle whether pushes to `endpoint` succeed. Returns false if nothing
    /// listens there.
    pub fn set_reachable(&self, endpoint: &str, reachable: bool) -> bool {
        let Ok(mut endpoints) = self.endpoints.by_name.lock() else {
            return false;
        };
        match endpoints.get_mut(endpoint) {
            Some(entry) => {
                entry.reachable = reachable;
                true
            }
            None => false,
        }
    }

    pub fn is_listening(&self, endpoint: &str) -> bool {
        self.endpoints
            .by_name
            .lock()
            .map(|endpoints| endpoints.contains_key(endpoint))
            .unwrap_or(false)
    }
}

/// Push handle onto a memory endpoint. Reachability is checked on every call
/// so a peer can go away after it was resolved.
struct MemoryCallback {
    endpoint: String,
    endpoints: Arc<Endpoints>,
}

#[async_trait]
impl ClientCallback for MemoryCallback {
    async fn receive_notification(&self, topic: &str) -> Result<(), BrokerError> {
        let handler = self.endpoints.handler(&self.endpoint)?;
        handler.receive_notification(topic).await
    }

    async fn receive_data_notification(
        &self,
        payload: Payload,
        topic: &str,
    ) -> Result<(), BrokerError> {
        let handler = self.endpoints.handler(&self.endpoint)?;
        handler.receive_data_notification(payload, topic).await
    }
}

#[async_trait]
impl CallbackResolver for MemoryNetwork {
    async fn resolve(
        &self,
        endpoint: &str,
        client_id: &str,
    ) -> Result<Arc<dyn ClientCallback>, BrokerError> {
        // fail resolution the same way a refused connection would
        self.endpoints.handler(endpoint)?;
        debug!("Resolved memory endpoint {endpoint} for {client_id}");
        Ok(Arc::new(MemoryCallback {
            endpoint: endpoint.to_string(),
            endpoints: self.endpoints.clone(),
        }))
    }
}

#[async_trait]
impl ClientTransport for MemoryNetwork {
    async fn connect(&self) -> Result<Arc<dyn NotificationApi>, BrokerError> {
        self.server
            .lock()
            .map_err(|_| poisoned())?
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| BrokerError::PeerUnreachable("no server on the memory network".into()))
    }

    async fn listen(
        &self,
        handler: Arc<dyn ClientCallback>,
        shutdown: CancellationToken,
    ) -> Result<String, BrokerError> {
        let name = format!(
            "memory:{}",
            self.next_endpoint.fetch_add(1, Ordering::SeqCst)
        );
        self.endpoints.by_name.lock().map_err(|_| poisoned())?.insert(
            name.clone(),
            Endpoint {
                handler,
                reachable: true,
            },
        );

        let endpoints = self.endpoints.clone();
        let released = name.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            if let Ok(mut endpoints) = endpoints.by_name.lock() {
                endpoints.remove(&released);
            }
            debug!("Memory endpoint {released} closed");
        });

        Ok(name)
    }
}
