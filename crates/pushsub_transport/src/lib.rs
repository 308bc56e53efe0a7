//! pushsub_transport
//!
//! The remote-call layer between the notification server and its clients.
//! Calls are synchronous request/response; any call may fail with
//! `BrokerError::PeerUnreachable`.
//!
//! - `rpc`: the call contracts both sides program against
//! - `message`: JSON wire messages
//! - `websocket`: request/response over WebSockets (one JSON frame per call)
//! - `memory`: an in-process network for embedding server and clients in one
//!   process

pub mod memory;
pub mod message;
pub mod rpc;
pub mod websocket;


pub use memory::MemoryNetwork;
pub use message::{PushCall, RemoteError, Reply, ServerCall};
pub use rpc::{
    CallbackResolver, ClientCallback, ClientTransport, DeleteMode, NotificationApi, Payload,
};
pub use websocket::{RemoteServer, WsCallbackResolver, WsClientTransport};
