//! pushsub_server
//!
//! The notification server: the subscription registries, concurrent
//! broadcast fan-out, eviction of unreachable clients, and the facade the
//! transport calls into.
//!
//! Public types:
//! - `ServerFacade`: the single entry point; owns all registry mutation.
//! - `NotificationServer`: binds a port, serves the facade over WebSockets,
//!   runs the reaper.
//!
//! `ServerFacade` works with any `CallbackResolver`, so it can also be driven
//! in-process through `pushsub_transport::MemoryNetwork`.

pub mod broadcast;
pub mod clients;
pub mod facade;
pub mod reaper;
pub mod server;
pub mod topic;

pub use broadcast::{BroadcastEngine, BroadcastReport, Notification};
pub use facade::ServerFacade;
pub use reaper::{LostClientReaper, LostClients};
pub use server::NotificationServer;
