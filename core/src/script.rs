use std::sync::Arc;

use anyhow::Result;
use bus_api::{EventBus, Message, MessageListener};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

/// One line of a replay script.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptOp {
    Subscribe {
        topic: String,
        id: String,
        /// Register a handler that always errors.
        #[serde(default)]
        fail: bool,
    },
    Unsubscribe {
        topic: String,
        id: String,
    },
    Publish {
        topic: String,
        payload: String,
        #[serde(default)]
        message_id: Option<String>,
    },
    Send {
        topic: String,
        payload: String,
        #[serde(default)]
        message_id: Option<String>,
    },
    Set {
        key: String,
        value: Value,
    },
    Get {
        key: String,
    },
}

/// One line written back by the driver.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    Delivered {
        listener: String,
        topic: String,
        message_id: String,
        payload: String,
    },
    Value {
        key: String,
        found: bool,
        value: Value,
    },
    Error {
        line: usize,
        message: String,
    },
}

/// Counters reported once a script has been fully applied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScriptSummary {
    pub ops: usize,
    pub deliveries: usize,
    pub errors: usize,
}

/// Read the next non-blank line as raw bytes. Returns `None` at end of input.
///
/// Lines are not decoded here so that invalid UTF-8 stays a per-line error.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(line));
        }
    }
}

/// Write a single event as line-delimited JSON to the writer.
pub async fn write_event<W: AsyncWrite + Unpin>(writer: &mut W, event: &ScriptEvent) -> Result<()> {
    let s = serde_json::to_string(event)?;
    writer.write_all(s.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

type Inbox = Arc<Mutex<Vec<ScriptEvent>>>;

fn recording_listener(id: String, fail: bool, inbox: Inbox) -> MessageListener {
    let listener_id = id.clone();
    MessageListener::new(id, move |message| {
        inbox.lock().push(ScriptEvent::Delivered {
            listener: listener_id.clone(),
            topic: message.topic.clone(),
            message_id: message.message_id.clone(),
            payload: message.payload.clone(),
        });
        if fail {
            anyhow::bail!("listener {listener_id} is configured to fail");
        }
        Ok(())
    })
}

/// Apply every op read from `reader` to `bus`, writing deliveries, lookups
/// and per-line errors to `writer`. A bad line does not stop the run.
pub async fn run_script<B, R, W>(bus: &B, reader: &mut R, writer: &mut W) -> Result<ScriptSummary>
where
    B: EventBus + ?Sized,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let inbox: Inbox = Arc::default();
    let mut summary = ScriptSummary::default();
    let mut line_no = 0;

    while let Some(line) = read_line(reader).await? {
        line_no += 1;
        summary.ops += 1;
        let outcome = match String::from_utf8(line) {
            Ok(text) => match serde_json::from_str::<ScriptOp>(text.trim()) {
                Ok(op) => apply(bus, op, &inbox),
                Err(err) => Err(anyhow::Error::new(err).context("malformed op")),
            },
            Err(err) => Err(anyhow::Error::new(err).context("line is not valid UTF-8")),
        };

        let delivered: Vec<ScriptEvent> = std::mem::take(&mut *inbox.lock());
        summary.deliveries += delivered.len();
        for event in &delivered {
            write_event(writer, event).await?;
        }

        match outcome {
            Ok(Some(event)) => write_event(writer, &event).await?,
            Ok(None) => {}
            Err(err) => {
                warn!(line = line_no, "script op failed: {err:#}");
                summary.errors += 1;
                let event = ScriptEvent::Error {
                    line: line_no,
                    message: format!("{err:#}"),
                };
                write_event(writer, &event).await?;
            }
        }
    }

    info!(
        ops = summary.ops,
        deliveries = summary.deliveries,
        errors = summary.errors,
        "script finished"
    );
    Ok(summary)
}

fn apply<B: EventBus + ?Sized>(bus: &B, op: ScriptOp, inbox: &Inbox) -> Result<Option<ScriptEvent>> {
    match op {
        ScriptOp::Subscribe { topic, id, fail } => {
            bus.create_consumer(&topic, recording_listener(id, fail, inbox.clone()))?;
        }
        ScriptOp::Unsubscribe { topic, id } => {
            bus.delete_consumer(&topic, &id)?;
        }
        ScriptOp::Publish {
            topic,
            payload,
            message_id,
        } => {
            let message = Message::new(message_id.unwrap_or_else(new_message_id), topic, payload);
            bus.publish_message(&message)?;
        }
        ScriptOp::Send {
            topic,
            payload,
            message_id,
        } => {
            let message = Message::new(message_id.unwrap_or_else(new_message_id), topic, payload);
            bus.send_message(&message)?;
        }
        ScriptOp::Set { key, value } => {
            bus.set_cache_value(&key, value)?;
        }
        ScriptOp::Get { key } => {
            let value = bus.get_cache_value(&key)?;
            return Ok(Some(ScriptEvent::Value {
                key,
                found: value.is_some(),
                value: value.unwrap_or(Value::Null),
            }));
        }
    }
    Ok(None)
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
