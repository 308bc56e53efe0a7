//! pushsub_client
//!
//! Client library for the notification server. Applications register
//! `Subscriber`s per topic with a `ClientFacade`; the facade keeps one server
//! subscription per topic no matter how many local subscribers share it, and
//! fans inbound pushes out to them.
//!
//! `AsyncClient` offers the same operations as spawned tasks.

pub mod async_client;
pub mod broadcast;
pub mod facade;
pub mod registry;
pub mod subscriber;

#[cfg(test)]
mod tests;

pub use async_client::AsyncClient;
pub use broadcast::ClientBroadcastEngine;
pub use facade::{ClientFacade, ConnectionState, DEFAULT_CONNECT_TIMEOUT};
pub use registry::LocalSubscriptionRegistry;
pub use subscriber::{Subscriber, SubscriberRef};
