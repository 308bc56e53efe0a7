//! Topic management
//!
//! `TopicRegistry` maps a topic name to the ids of its subscribed clients.
//! There is no separate topic object: a topic exists exactly while its key is
//! present, and the key is dropped as soon as its subscriber list empties.
//!
//! Subscriber lists are `Vec`s with set semantics so iteration order is
//! stable; broadcasts copy the list out before pushing, so concurrent
//! mutation never disturbs a fan-out in flight.
//!
//! Concurrency note: callers must synchronize access (the facade keeps the
//! registry behind its state lock).

use std::collections::HashMap;

use pushsub_utils::ClientId;

#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, Vec<ClientId>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `client_id` to `topic`, creating the topic if needed. Returns
    /// false if it was already subscribed.
    pub fn subscribe(&mut self, topic: &str, client_id: &str) -> bool {
        let subscribers = self.topics.entry(topic.to_string()).or_default();
        if subscribers.iter().any(|id| id == client_id) {
            return false;
        }
        subscribers.push(client_id.to_string());
        true
    }

    /// Remove `client_id` from `topic`, dropping the topic once empty.
    /// Returns whether a membership was removed.
    pub fn unsubscribe(&mut self, topic: &str, client_id: &str) -> bool {
        let Some(subscribers) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|id| id != client_id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// Strip `client_id` from every topic. Returns the topics that became
    /// empty and were dropped.
    pub fn remove_client(&mut self, client_id: &str) -> Vec<String> {
        for subscribers in self.topics.values_mut() {
            subscribers.retain(|id| id != client_id);
        }
        let emptied: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, subscribers)| subscribers.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &emptied {
            self.topics.remove(name);
        }
        emptied
    }

    /// Drop a topic with all its subscriptions.
    pub fn remove(&mut self, topic: &str) -> Option<Vec<ClientId>> {
        self.topics.remove(topic)
    }

    /// Copy of the subscriber list, `None` for unknown topics.
    pub fn subscribers(&self, topic: &str) -> Option<Vec<ClientId>> {
        self.topics.get(topic).cloned()
    }

    pub fn exists(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }

    pub fn names(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}
