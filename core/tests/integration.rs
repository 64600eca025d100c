use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Barrier, Mutex},
    thread,
};

use localbus::{
    BusConfig, BusError, EventBus, FailurePolicy, InMemoryEventBus, Message, MessageListener,
};
use serde_json::json;

struct LogWriter(Arc<Mutex<Vec<u8>>>);
impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
struct MakeLogWriter(Arc<Mutex<Vec<u8>>>);
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogWriter {
    type Writer = LogWriter;
    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

fn capture_logs<F: FnOnce()>(f: F) -> String {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(MakeLogWriter(buf.clone()))
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buf.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

fn recorder(id: &str, seen: &Arc<Mutex<Vec<String>>>) -> MessageListener {
    let seen = seen.clone();
    let id_owned = id.to_string();
    MessageListener::from_fn(id, move |m| {
        seen.lock()
            .unwrap()
            .push(format!("{}:{}", id_owned, m.payload));
    })
}

#[test]
fn orders_scenario_logs_dispatch() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let logs = capture_logs(|| {
        let bus = InMemoryEventBus::new();
        bus.create_consumer("orders", recorder("L1", &seen)).unwrap();
        bus.publish_message(&Message::new("m1", "orders", "p1"))
            .unwrap();
    });
    assert_eq!(*seen.lock().unwrap(), ["L1:p1"]);
    assert!(logs.contains("registering listener"), "logs: {logs}");
    assert!(logs.contains("broadcasting message"), "logs: {logs}");
    assert!(logs.contains("message_id=m1"), "logs: {logs}");
}

#[test]
fn isolated_failures_are_logged() {
    let cfg = BusConfig {
        failure_policy: FailurePolicy::Continue,
        ..BusConfig::default()
    };
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut result = None;
    let logs = capture_logs(|| {
        let bus = InMemoryEventBus::with_config(&cfg);
        bus.create_consumer(
            "orders",
            MessageListener::new("flaky", |_| anyhow::bail!("disk full")),
        )
        .unwrap();
        bus.create_consumer("orders", recorder("L2", &seen)).unwrap();
        result = Some(bus.publish_message(&Message::new("m2", "orders", "p2")));
    });
    assert_eq!(*seen.lock().unwrap(), ["L2:p2"]);
    assert!(matches!(result, Some(Err(BusError::Delivery { .. }))));
    assert!(logs.contains("WARN"), "logs: {logs}");
    assert!(logs.contains("disk full"), "logs: {logs}");
}

#[test]
fn delete_leaves_other_listeners_in_order() {
    let bus = InMemoryEventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for id in ["L1", "L2", "L3", "L4"] {
        bus.create_consumer("orders", recorder(id, &seen)).unwrap();
    }
    bus.delete_consumer("orders", "L2").unwrap();
    bus.delete_consumer("orders", "missing").unwrap();
    bus.publish_message(&Message::new("m1", "orders", "x"))
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), ["L1:x", "L3:x", "L4:x"]);
}

#[test]
fn concurrent_registration_loses_nothing() {
    let bus = InMemoryEventBus::new();
    let threads = 32;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let bus = bus.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                bus.create_consumer("shared", MessageListener::from_fn(format!("L{i}"), |_| {}))
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(bus.listener_count("shared"), threads);
}

#[test]
fn concurrent_mutation_during_dispatch() {
    let bus = InMemoryEventBus::new();
    let delivered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    for i in 0..8 {
        let d = delivered.clone();
        bus.create_consumer(
            "busy",
            MessageListener::from_fn(format!("stable-{i}"), move |_| {
                d.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }),
        )
        .unwrap();
    }

    let churn: Vec<_> = (0..4)
        .map(|t| {
            let bus = bus.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let id = format!("churn-{t}-{i}");
                    bus.create_consumer("busy", MessageListener::from_fn(id.clone(), |_| {}))
                        .unwrap();
                    bus.delete_consumer("busy", &id).unwrap();
                }
            })
        })
        .collect();
    let publishers: Vec<_> = (0..4)
        .map(|t| {
            let bus = bus.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let msg = Message::new(format!("{t}-{i}"), "busy", "x");
                    bus.publish_message(&msg).unwrap();
                    bus.send_message(&msg).unwrap();
                }
            })
        })
        .collect();
    for h in churn.into_iter().chain(publishers) {
        h.join().unwrap();
    }

    assert_eq!(bus.listener_count("busy"), 8);
    // every publish reaches all 8 stable listeners; sends may pick churn listeners
    let n = delivered.load(std::sync::atomic::Ordering::Relaxed);
    assert!(n >= 4 * 200 * 8, "delivered {n}");
}

#[test]
fn concurrent_cache_writes_persist() {
    let bus = InMemoryEventBus::new();
    let handles: Vec<_> = (0..16)
        .map(|t| {
            let bus = bus.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    bus.set_cache_value(&format!("CacheKey#{t}-{i}"), json!(format!("CacheValue#{t}-{i}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    for t in 0..16 {
        for i in 0..50 {
            assert_eq!(
                bus.get_cache_value(&format!("CacheKey#{t}-{i}")).unwrap(),
                Some(json!(format!("CacheValue#{t}-{i}")))
            );
        }
    }
}

#[test]
fn handler_panic_unwinds_to_caller() {
    let bus = InMemoryEventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.create_consumer("t", MessageListener::from_fn("boom", |_| panic!("handler exploded")))
        .unwrap();
    bus.create_consumer("t", recorder("after", &seen)).unwrap();

    let res = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = bus.publish_message(&Message::new("m1", "t", "x"));
    }));
    assert!(res.is_err());
    assert!(seen.lock().unwrap().is_empty());

    // the registry stays usable after the unwind
    bus.delete_consumer("t", "boom").unwrap();
    bus.publish_message(&Message::new("m2", "t", "y")).unwrap();
    assert_eq!(*seen.lock().unwrap(), ["after:y"]);
}

#[test]
fn usable_behind_trait_object() {
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.create_consumer("solo", recorder("only", &seen)).unwrap();
    bus.send_message(&Message::new("m1", "solo", "z")).unwrap();
    assert_eq!(*seen.lock().unwrap(), ["only:z"]);
    assert_eq!(bus.event_bus_id(), "InMemoryEventBus");
}
