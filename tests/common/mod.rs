//! Shared helpers for integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use storefront_live::{
    Callback, Delivery, Document, MemoryAuth, MemoryStore, Multiplexer, MuxConfig,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

pub fn order(id: &str, total: i64) -> Document {
    Document::new(id, serde_json::json!({ "total": total, "status": "paid" }))
}

/// Multiplexer over the given collaborators, already initialized.
pub async fn ready_mux(store: &Arc<MemoryStore>, auth: &Arc<MemoryAuth>) -> Multiplexer {
    let mux = Multiplexer::new(store.clone(), auth.clone(), MuxConfig::default());
    mux.init().await.unwrap();
    mux
}

/// Callback that forwards every delivery to a channel.
pub fn recorder() -> (Callback, UnboundedReceiver<Delivery>) {
    let (tx, rx) = unbounded_channel();
    let callback: Callback = Arc::new(move |delivery| {
        let _ = tx.send(delivery);
    });
    (callback, rx)
}

pub async fn next(rx: &mut UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("delivery timed out")
        .expect("channel closed")
}

/// Assert nothing arrives within `wait`.
pub async fn assert_quiet(rx: &mut UnboundedReceiver<Delivery>, wait: Duration) {
    if let Ok(Some(delivery)) = tokio::time::timeout(wait, rx.recv()).await {
        panic!("unexpected delivery: {:?}", delivery.map(|s| s.sequence));
    }
}

/// Let spawned tasks run on a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Records emitted log events for assertions.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCapture {
    /// Install for the current thread. Keep the guard alive for the test.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }

    pub fn count(&self, level: Level) -> usize {
        self.events.lock().iter().filter(|(l, _)| *l == level).count()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events
            .lock()
            .push((*event.metadata().level(), visitor.message));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}
