//! Registered clients
//!
//! A `ClientRecord` is created by `register_client` and holds the endpoint
//! the client advertised plus a lazily resolved push handle. The handle cell
//! is shared (`Arc<OnceCell<_>>`) so the facade can resolve it without
//! holding the registry lock, and concurrent first subscribes converge on a
//! single resolution.

use std::collections::HashMap;
use std::sync::Arc;

use pushsub_transport::ClientCallback;
use pushsub_utils::ClientId;
use tokio::sync::OnceCell;

/// Prefix of every generated client id. Ids come from a counter that starts
/// at zero on every server run, so they are not unique across restarts.
pub const CLIENT_ID_PREFIX: &str = "client-";

pub type CallbackCell = Arc<OnceCell<Arc<dyn ClientCallback>>>;

pub struct ClientRecord {
    pub client_id: ClientId,
    pub endpoint: String,
    callback: CallbackCell,
}

impl ClientRecord {
    fn new(client_id: ClientId, endpoint: &str) -> Self {
        Self {
            client_id,
            endpoint: endpoint.to_string(),
            callback: Arc::new(OnceCell::new()),
        }
    }

    /// The push handle, if it has been resolved yet.
    pub fn callback(&self) -> Option<Arc<dyn ClientCallback>> {
        self.callback.get().cloned()
    }

    pub fn callback_cell(&self) -> CallbackCell {
        self.callback.clone()
    }
}

impl std::fmt::Debug for ClientRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRecord")
            .field("client_id", &self.client_id)
            .field("endpoint", &self.endpoint)
            .field("resolved", &self.callback.initialized())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientRecord>,
    next_id: u64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `endpoint`. Always succeeds.
    pub fn register(&mut self, endpoint: &str) -> ClientId {
        let client_id = format!("{CLIENT_ID_PREFIX}{}", self.next_id);
        self.next_id += 1;
        self.clients
            .insert(client_id.clone(), ClientRecord::new(client_id.clone(), endpoint));
        client_id
    }

    pub fn unregister(&mut self, client_id: &str) -> Option<ClientRecord> {
        self.clients.remove(client_id)
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientRecord> {
        self.clients.get(client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Forget every client. The id counter keeps counting.
    pub fn clear(&mut self) {
        self.clients.clear();
    }
}
