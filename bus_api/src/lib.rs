use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A message routed by topic. The id is only used for correlation in logs
/// and errors, never for deduplication.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub topic: String,
    pub payload: String,
}

impl Message {
    pub fn new(
        message_id: impl Into<String>,
        topic: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

type Handler = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// A named callback registered against a topic.
///
/// Clones share the same handler.
#[derive(Clone)]
pub struct MessageListener {
    pub id: String,
    handler: Handler,
}

impl MessageListener {
    /// Create a listener whose handler may fail.
    pub fn new<F>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            handler: Arc::new(handler),
        }
    }

    /// Create a listener from a handler that cannot fail.
    pub fn from_fn<F>(id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        Self::new(id, move |message| {
            handler(message);
            Ok(())
        })
    }

    /// Invoke the handler on the calling thread.
    pub fn handle(&self, message: &Message) -> anyhow::Result<()> {
        (self.handler)(message)
    }
}

impl fmt::Debug for MessageListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageListener")
            .field("id", &self.id)
            .field("handler", &"<fn>")
            .finish()
    }
}

/// A single handler failure collected while delivery continued.
#[derive(Debug)]
pub struct ListenerFailure {
    pub listener_id: String,
    pub error: anyhow::Error,
}

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("listener {listener_id} is already registered on topic {topic}")]
    DuplicateListener { topic: String, listener_id: String },
    #[error("listener {listener_id} failed on message {message_id}: {error:#}")]
    Listener {
        listener_id: String,
        message_id: String,
        error: anyhow::Error,
    },
    #[error("{} listener(s) failed on message {message_id}", .failures.len())]
    Delivery {
        message_id: String,
        failures: Vec<ListenerFailure>,
    },
}

/// Operations every bus implementation exposes to embedding code.
pub trait EventBus: Send + Sync {
    /// Register `listener` on `topic_id`. The listener is invoked with every
    /// message dispatched on that topic until it is deleted.
    fn create_consumer(&self, topic_id: &str, listener: MessageListener) -> BusResult<()>;

    /// Remove the first listener on `topic_id` whose id matches. Unknown
    /// topics and ids are not errors.
    fn delete_consumer(&self, topic_id: &str, listener_id: &str) -> BusResult<()>;

    /// Deliver the message to every listener on its topic, in registration order.
    fn publish_message(&self, message: &Message) -> BusResult<()>;

    /// Deliver the message to one listener on its topic, picked at random.
    fn send_message(&self, message: &Message) -> BusResult<()>;

    /// Look up a cached value. `Ok(None)` means the key was never set.
    fn get_cache_value(&self, key: &str) -> BusResult<Option<Value>>;

    /// Store a value, replacing any previous one.
    fn set_cache_value(&self, key: &str, value: Value) -> BusResult<()>;

    /// Identifies the implementation behind the trait.
    fn event_bus_id(&self) -> &'static str;
}
