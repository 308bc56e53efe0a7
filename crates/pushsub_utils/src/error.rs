//! Error taxonomy shared by the server, the client and the transports.
//!
//! The split that matters to callers is between a *logical rejection*
//! (`UnregisteredClient`, `ServerStopped`, `ClientClosed`) and a *transport
//! failure* (`PeerUnreachable`). Broadcast fan-out converts the latter into
//! lost-client bookkeeping instead of returning it.

use std::io;

use thiserror::Error;

/// Server-generated client identifier. Only unique for one server run.
pub type ClientId = String;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// `subscribe` was called with an id the server does not know.
    #[error("client {0} is not registered")]
    UnregisteredClient(ClientId),

    /// The client could not reach the server while connecting, or did not
    /// finish connecting in time.
    #[error("notification server unreachable: {0}")]
    UnreachableServer(String),

    /// A single remote call failed at the transport level.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// The server could not bind its listening endpoint.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("notification server has been stopped")]
    ServerStopped,

    #[error("client has been closed")]
    ClientClosed,

    /// A peer answered with something that does not fit the call protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    pub fn is_peer_unreachable(&self) -> bool {
        matches!(self, BrokerError::PeerUnreachable(_))
    }
}
