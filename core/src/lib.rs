pub mod bus;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod script;

pub use bus::{InMemoryEventBus, EVENT_BUS_ID};
pub use bus_api::{BusError, BusResult, EventBus, ListenerFailure, Message, MessageListener};
pub use cache::KeyValueCache;
pub use config::BusConfig;
pub use dispatch::{Dispatcher, FailurePolicy};
pub use registry::TopicRegistry;
