//! Lifecycle events and the observer registry.
//!
//! Events are plain values. Their JSON form is the one observers in other
//! processes expect:
//!
//! ```text
//! {"event":"connect","processID":4711}
//! {"event":"disconnect","processID":4711}
//! {"event":"query","sql":"SELECT $1","parms":[1],"processID":4711}
//! {"event":"results","elapsedTime":3,"sql":"SELECT $1","parms":[1],"data":[...],"processID":4711}
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::result::Row;

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    /// A connection was created.
    Connect {
        /// Backend process id of the new connection.
        #[serde(rename = "processID")]
        process_id: i32,
    },
    /// A connection was destroyed.
    Disconnect {
        /// Backend process id of the closed connection.
        #[serde(rename = "processID")]
        process_id: i32,
    },
    /// A statement ran successfully.
    Query {
        /// Statement text.
        sql: String,
        /// Bound parameters.
        #[serde(rename = "parms")]
        params: Vec<Value>,
        /// Backend process id of the connection that ran it.
        #[serde(rename = "processID")]
        process_id: i32,
    },
    /// Rows returned by a successful statement.
    Results {
        /// Driver call duration in milliseconds.
        #[serde(rename = "elapsedTime")]
        elapsed_ms: u64,
        /// Statement text.
        sql: String,
        /// Bound parameters.
        #[serde(rename = "parms")]
        params: Vec<Value>,
        /// Returned rows.
        data: Vec<Row>,
        /// Backend process id of the connection that ran it.
        #[serde(rename = "processID")]
        process_id: i32,
    },
}

impl Event {
    /// The kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect { .. } => EventKind::Connect,
            Self::Disconnect { .. } => EventKind::Disconnect,
            Self::Query { .. } => EventKind::Query,
            Self::Results { .. } => EventKind::Results,
        }
    }

    /// Backend process id the event refers to.
    #[must_use]
    pub fn process_id(&self) -> i32 {
        match self {
            Self::Connect { process_id }
            | Self::Disconnect { process_id }
            | Self::Query { process_id, .. }
            | Self::Results { process_id, .. } => *process_id,
        }
    }

    /// Render the event as its JSON payload.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Event discriminant used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`Event::Connect`].
    Connect,
    /// See [`Event::Disconnect`].
    Disconnect,
    /// See [`Event::Query`].
    Query,
    /// See [`Event::Results`].
    Results,
}

impl EventKind {
    /// Tag used in the JSON payload.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Query => "query",
            Self::Results => "results",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
enum Observer {
    Callback(Handler),
    Channel(mpsc::UnboundedSender<Event>),
}

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    observer: Observer,
}

/// Registry of event observers.
///
/// Observers run synchronously on the task that publishes the event. A
/// panicking observer is logged and skipped; it never affects the operation
/// that produced the event.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one kind of event.
    pub fn on<H>(&self, kind: EventKind, handler: H) -> SubscriptionId
    where
        H: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(kind, Observer::Callback(Arc::new(handler)))
    }

    /// Receive one kind of event through a channel.
    ///
    /// The subscription ends when the receiver is dropped.
    pub fn subscribe(&self, kind: EventKind) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(kind, Observer::Channel(tx));
        rx
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Whether anyone listens for this kind of event.
    #[must_use]
    pub fn has_observers(&self, kind: EventKind) -> bool {
        self.subscriptions.read().iter().any(|s| s.kind == kind)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Whether there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every observer of its kind.
    pub fn publish(&self, event: &Event) {
        let kind = event.kind();
        // Snapshot so observers may subscribe or unsubscribe while running.
        let observers: Vec<(SubscriptionId, Observer)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| (s.id, s.observer.clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, observer) in observers {
            match observer {
                Observer::Callback(handler) => {
                    if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                        tracing::error!(event = %kind, "event observer panicked");
                    }
                }
                Observer::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        closed.push(id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            tracing::trace!(count = closed.len(), "dropping closed event channels");
            self.subscriptions.write().retain(|s| !closed.contains(&s.id));
        }
    }

    fn register(&self, kind: EventKind, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription { id, kind, observer });
        tracing::trace!(event = %kind, "observer registered");
        id
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.len())
            .finish()
    }
}
