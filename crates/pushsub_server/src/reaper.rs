//! Lost-client eviction
//!
//! `LostClients` collects ids whose push failed. `LostClientReaper` wakes on a
//! fixed interval and evicts them: it first snapshots-and-clears the set under
//! its lock, then unregisters each captured id without holding that lock. An
//! id flagged while a sweep is running waits for the next sweep.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pushsub_utils::ClientId;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::facade::ServerFacade;

pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct LostClients {
    ids: Mutex<HashSet<ClientId>>,
}

impl LostClients {
    pub fn new() -> Self {
        Self::default()
    }

    fn ids(&self) -> MutexGuard<'_, HashSet<ClientId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark(&self, client_id: &str) {
        self.ids().insert(client_id.to_string());
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.ids().contains(client_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    /// Atomically take every flagged id, leaving the set empty.
    pub fn drain(&self) -> Vec<ClientId> {
        std::mem::take(&mut *self.ids()).into_iter().collect()
    }

    pub fn clear(&self) {
        self.ids().clear();
    }
}

/// One eviction pass. Returns how many ids were handed to `evict`.
pub fn sweep(lost: &LostClients, mut evict: impl FnMut(&str)) -> usize {
    if lost.is_empty() {
        return 0;
    }
    let captured = lost.drain();
    for client_id in &captured {
        evict(client_id);
    }
    captured.len()
}

#[derive(Debug, Clone, Copy)]
pub struct LostClientReaper {
    interval: Duration,
}

impl Default for LostClientReaper {
    fn default() -> Self {
        Self::new(DEFAULT_REAPER_INTERVAL)
    }
}

impl LostClientReaper {
    /// `interval` must be non-zero.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run sweeps for `facade` until it stops or is dropped. The first sweep
    /// happens one interval after the call.
    pub fn spawn(self, facade: &Arc<ServerFacade>) -> JoinHandle<()> {
        let shutdown = facade.shutdown_token();
        let facade = Arc::downgrade(facade);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(facade) = facade.upgrade() else {
                    break;
                };
                let evicted = facade.reap_lost_clients();
                if evicted > 0 {
                    info!("Reaper evicted {evicted} lost client(s)");
                }
            }

            debug!("Reaper stopped");
        })
    }
}
