//! JSON wire messages.
//!
//! Every call is one text frame carrying a `type`-tagged object and is
//! answered by exactly one `Reply` frame.

use pushsub_utils::{BrokerError, ClientId};
use serde::{Deserialize, Serialize};

use crate::rpc::{DeleteMode, Payload};

/// Calls a client makes on the server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerCall {
    #[serde(rename = "register_client")]
    RegisterClient { endpoint: String },
    #[serde(rename = "unregister_client")]
    UnregisterClient { client_id: ClientId },
    #[serde(rename = "subscribe")]
    Subscribe { topic: String, client_id: ClientId },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String, client_id: ClientId },
    #[serde(rename = "delete_topic")]
    DeleteTopic { topic: String, mode: DeleteMode },
    #[serde(rename = "notify_topic")]
    NotifyTopic { topic: String },
    #[serde(rename = "data_notify_topic")]
    DataNotifyTopic { payload: Payload, topic: String },
    #[serde(rename = "exists")]
    Exists { topic: String },
    #[serde(rename = "subscriber_count")]
    SubscriberCount { topic: String },
}

/// Pushes the server makes on a client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum PushCall {
    #[serde(rename = "notification")]
    Notification { topic: String },
    #[serde(rename = "data_notification")]
    DataNotification { payload: Payload, topic: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Reply {
    #[serde(rename = "registered")]
    Registered { client_id: ClientId },
    #[serde(rename = "done")]
    Done {},
    #[serde(rename = "exists")]
    Exists { exists: bool },
    #[serde(rename = "subscriber_count")]
    SubscriberCount { count: usize },
    #[serde(rename = "error")]
    Error { error: RemoteError },
}

/// A `BrokerError` as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    UnregisteredClient { client_id: ClientId },
    ServerStopped,
    ClientClosed,
    PeerUnreachable { message: String },
    Other { message: String },
}

impl Reply {
    pub fn from_error(err: BrokerError) -> Self {
        Reply::Error { error: err.into() }
    }

    /// Splits a reply into the answer and a rebuilt error.
    pub fn into_result(self) -> Result<Reply, BrokerError> {
        match self {
            Reply::Error { error } => Err(error.into()),
            other => Ok(other),
        }
    }
}

impl From<BrokerError> for RemoteError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::UnregisteredClient(client_id) => RemoteError::UnregisteredClient { client_id },
            BrokerError::ServerStopped => RemoteError::ServerStopped,
            BrokerError::ClientClosed => RemoteError::ClientClosed,
            BrokerError::PeerUnreachable(message) => RemoteError::PeerUnreachable { message },
            other => RemoteError::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<RemoteError> for BrokerError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::UnregisteredClient { client_id } => BrokerError::UnregisteredClient(client_id),
            RemoteError::ServerStopped => BrokerError::ServerStopped,
            RemoteError::ClientClosed => BrokerError::ClientClosed,
            RemoteError::PeerUnreachable { message } => BrokerError::PeerUnreachable(message),
            RemoteError::Other { message } => BrokerError::Protocol(message),
        }
    }
}

pub(crate) fn unexpected(reply: Reply) -> BrokerError {
    BrokerError::Protocol(format!("unexpected reply: {reply:?}"))
}
