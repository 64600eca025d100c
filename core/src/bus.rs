use std::sync::Arc;

use bus_api::{BusResult, EventBus, Message, MessageListener};
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    cache::KeyValueCache,
    config::BusConfig,
    dispatch::{Dispatcher, FailurePolicy},
    registry::TopicRegistry,
};

/// Identifier reported by [`InMemoryEventBus::event_bus_id`].
pub const EVENT_BUS_ID: &str = "InMemoryEventBus";

/// Event bus that delivers within the current process, with no networking.
///
/// Cloning yields another handle to the same registry and cache.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

struct Inner {
    instance_id: Uuid,
    registry: TopicRegistry,
    cache: KeyValueCache,
    dispatcher: Dispatcher,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_config(&BusConfig::default())
    }

    pub fn with_config(config: &BusConfig) -> Self {
        let registry = if config.reject_duplicate_ids {
            TopicRegistry::rejecting_duplicates()
        } else {
            TopicRegistry::new()
        };
        let instance_id = Uuid::new_v4();
        debug!(
            bus = %instance_id,
            failure_policy = %config.failure_policy,
            reject_duplicates = config.reject_duplicate_ids,
            "created event bus"
        );
        Self {
            inner: Arc::new(Inner {
                instance_id,
                registry,
                cache: KeyValueCache::new(),
                dispatcher: Dispatcher::new(config.failure_policy),
            }),
        }
    }

    /// Random id distinguishing this instance in logs.
    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.inner.dispatcher.policy()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.inner.registry.listener_count(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.registry.topics()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn create_consumer(&self, topic_id: &str, listener: MessageListener) -> BusResult<()> {
        self.inner.registry.create_consumer(topic_id, listener)
    }

    fn delete_consumer(&self, topic_id: &str, listener_id: &str) -> BusResult<()> {
        self.inner.registry.delete_consumer(topic_id, listener_id);
        Ok(())
    }

    fn publish_message(&self, message: &Message) -> BusResult<()> {
        let Some(listeners) = self.inner.registry.snapshot(&message.topic) else {
            trace!(bus = %self.inner.instance_id, topic = %message.topic, "no listeners for publish");
            return Ok(());
        };
        self.inner.dispatcher.broadcast(&listeners, message)?;
        Ok(())
    }

    fn send_message(&self, message: &Message) -> BusResult<()> {
        let Some(listeners) = self.inner.registry.snapshot(&message.topic) else {
            trace!(bus = %self.inner.instance_id, topic = %message.topic, "no listeners for send");
            return Ok(());
        };
        self.inner
            .dispatcher
            .deliver_one(&listeners, message, &mut rand::thread_rng())?;
        Ok(())
    }

    fn get_cache_value(&self, key: &str) -> BusResult<Option<Value>> {
        Ok(self.inner.cache.get(key))
    }

    fn set_cache_value(&self, key: &str, value: Value) -> BusResult<()> {
        self.inner.cache.set(key, value);
        Ok(())
    }

    fn event_bus_id(&self) -> &'static str {
        EVENT_BUS_ID
    }
}
