use std::{fmt, str::FromStr};

use bus_api::{BusError, BusResult, ListenerFailure, Message, MessageListener};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

/// What happens to the rest of a delivery when a handler returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failing handler and return its error.
    #[default]
    Abort,
    /// Invoke every selected handler, then report all failures together.
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "continue" => Ok(Self::Continue),
            other => Err(format!("unknown failure policy {other:?}")),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => f.write_str("abort"),
            Self::Continue => f.write_str("continue"),
        }
    }
}

/// Runs handlers synchronously on the calling thread.
///
/// Panics raised by a handler are not caught and unwind into the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    policy: FailurePolicy,
}

impl Dispatcher {
    pub fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Deliver to every listener in order. Returns how many were invoked.
    pub fn broadcast(&self, listeners: &[MessageListener], message: &Message) -> BusResult<usize> {
        debug!(
            topic = %message.topic,
            message_id = %message.message_id,
            listeners = listeners.len(),
            "broadcasting message"
        );
        let mut failures = Vec::new();
        let mut invoked = 0;
        for listener in listeners {
            invoked += 1;
            if let Err(error) = listener.handle(message) {
                match self.policy {
                    FailurePolicy::Abort => {
                        return Err(BusError::Listener {
                            listener_id: listener.id.clone(),
                            message_id: message.message_id.clone(),
                            error,
                        })
                    }
                    FailurePolicy::Continue => {
                        warn!(
                            listener = %listener.id,
                            message_id = %message.message_id,
                            "listener failed: {error:#}"
                        );
                        failures.push(ListenerFailure {
                            listener_id: listener.id.clone(),
                            error,
                        });
                    }
                }
            }
        }
        if failures.is_empty() {
            Ok(invoked)
        } else {
            Err(BusError::Delivery {
                message_id: message.message_id.clone(),
                failures,
            })
        }
    }

    /// Deliver to one listener chosen uniformly at random. Returns the id of
    /// the chosen listener, or `None` when there was nobody to deliver to.
    pub fn deliver_one<R: Rng>(
        &self,
        listeners: &[MessageListener],
        message: &Message,
        rng: &mut R,
    ) -> BusResult<Option<String>> {
        let Some(index) = pick_index(listeners.len(), rng) else {
            return Ok(None);
        };
        let listener = &listeners[index];
        debug!(
            topic = %message.topic,
            message_id = %message.message_id,
            listener = %listener.id,
            "sending message to one listener"
        );
        if let Err(error) = listener.handle(message) {
            if self.policy == FailurePolicy::Continue {
                warn!(
                    listener = %listener.id,
                    message_id = %message.message_id,
                    "listener failed: {error:#}"
                );
                return Err(BusError::Delivery {
                    message_id: message.message_id.clone(),
                    failures: vec![ListenerFailure {
                        listener_id: listener.id.clone(),
                        error,
                    }],
                });
            }
            return Err(BusError::Listener {
                listener_id: listener.id.clone(),
                message_id: message.message_id.clone(),
                error,
            });
        }
        Ok(Some(listener.id.clone()))
    }
}

/// Uniform index over `[0, len)`, or `None` for an empty list.
pub fn pick_index<R: Rng>(len: usize, rng: &mut R) -> Option<usize> {
    if len == 0 {
        None
    } else {
        Some(rng.gen_range(0..len))
    }
}
