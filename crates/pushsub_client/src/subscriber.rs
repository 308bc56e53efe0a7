//! Application-side subscribers.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use pushsub_transport::Payload;

/// Something that wants to hear about topics. Callbacks run on the blocking
/// thread pool, concurrently with other subscribers of the same topic.
///
/// The same subscriber may be registered under several topics; the client
/// only keeps references and never drops it on the application's behalf.
pub trait Subscriber: Send + Sync {
    fn on_notify(&self, topic: &str);

    fn on_data_notify(&self, payload: &Payload, topic: &str);
}

/// A subscriber reference compared by identity: two refs are equal when they
/// point at the same object.
#[derive(Clone)]
pub struct SubscriberRef(Arc<dyn Subscriber>);

impl SubscriberRef {
    pub fn new(subscriber: Arc<dyn Subscriber>) -> Self {
        Self(subscriber)
    }

    pub fn get(&self) -> &Arc<dyn Subscriber> {
        &self.0
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for SubscriberRef {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for SubscriberRef {}

impl Hash for SubscriberRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl std::fmt::Debug for SubscriberRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubscriberRef({:p})", self.addr())
    }
}
