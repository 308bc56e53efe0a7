//! Local subscriptions
//!
//! `LocalSubscriptionRegistry` maps a topic to the in-process subscribers
//! interested in it. A topic key exists only while it has at least one
//! subscriber, which is exactly when this client is subscribed on the server.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::subscriber::{Subscriber, SubscriberRef};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// The subscriber was registered under the topic.
    pub removed: bool,
    /// The topic has no local subscribers left and was dropped.
    pub topic_emptied: bool,
}

#[derive(Debug, Default)]
pub struct LocalSubscriptionRegistry {
    topics: HashMap<String, HashSet<SubscriberRef>>,
}

impl LocalSubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Returns whether the reference was newly added.
    pub fn add(&mut self, topic: &str, subscriber: Arc<dyn Subscriber>) -> bool {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(SubscriberRef::new(subscriber))
    }

    pub fn remove(&mut self, topic: &str, subscriber: &Arc<dyn Subscriber>) -> Removal {
        let Some(subscribers) = self.topics.get_mut(topic) else {
            return Removal::default();
        };
        let removed = subscribers.remove(&SubscriberRef::new(subscriber.clone()));
        let topic_emptied = subscribers.is_empty();
        if topic_emptied {
            self.topics.remove(topic);
        }
        Removal {
            removed,
            topic_emptied,
        }
    }

    pub fn subscribers(&self, topic: &str) -> Vec<Arc<dyn Subscriber>> {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.iter().map(|s| s.get().clone()).collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, HashSet::len)
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}
