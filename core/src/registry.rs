use std::{collections::HashMap, sync::Arc};

use bus_api::{BusError, BusResult, MessageListener};
use parking_lot::RwLock;
use tracing::{debug, trace};

/// Listeners of one topic in dispatch order.
pub type Listeners = Arc<Vec<MessageListener>>;

/// Mapping from topic to its ordered listeners.
///
/// Each topic's vector sits behind an `Arc`. Mutations go through
/// [`Arc::make_mut`], so a dispatch holding a snapshot keeps its view while
/// the registry moves on to a fresh copy. The lock is never held while a
/// handler runs.
#[derive(Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Listeners>>,
    reject_duplicates: bool,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that refuses a second listener with the same id on a topic.
    pub fn rejecting_duplicates() -> Self {
        Self {
            reject_duplicates: true,
            ..Self::default()
        }
    }

    /// Append a listener to the topic, creating the topic if needed.
    pub fn create_consumer(&self, topic: &str, listener: MessageListener) -> BusResult<()> {
        let mut topics = self.topics.write();
        let list = topics.entry(topic.to_string()).or_default();
        if self.reject_duplicates && list.iter().any(|l| l.id == listener.id) {
            return Err(BusError::DuplicateListener {
                topic: topic.to_string(),
                listener_id: listener.id,
            });
        }
        debug!(topic, listener = %listener.id, "registering listener");
        Arc::make_mut(list).push(listener);
        Ok(())
    }

    /// Remove the first listener with a matching id. Returns whether one was
    /// removed; topics left empty are dropped.
    pub fn delete_consumer(&self, topic: &str, listener_id: &str) -> bool {
        let mut topics = self.topics.write();
        let Some(list) = topics.get_mut(topic) else {
            trace!(topic, listener = listener_id, "delete on unknown topic");
            return false;
        };
        let Some(index) = list.iter().position(|l| l.id == listener_id) else {
            trace!(topic, listener = listener_id, "delete matched no listener");
            return false;
        };
        Arc::make_mut(list).remove(index);
        debug!(topic, listener = listener_id, "removed listener");
        if list.is_empty() {
            topics.remove(topic);
        }
        true
    }

    /// Current listeners of a topic. Reading never creates the topic.
    pub fn snapshot(&self, topic: &str) -> Option<Listeners> {
        self.topics.read().get(topic).cloned()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, |l| l.len())
    }

    /// Topics that currently have at least one listener, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }
}
