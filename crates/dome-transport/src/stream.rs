//! Persistent push channel abstraction.
//!
//! The transport owns connection mechanics (negotiation, heartbeats,
//! reconnects). The session only sees named events and connection-state
//! signals, delivered in order through the sink handed over at connect time.

use std::{collections::HashMap, sync::Arc};

use dome_core::{DomeError, SecurityHeaders};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

/// Inbound event carrying a support reply.
pub const EVENT_SUPPORT_RESPONSE: &str = "SupportResponse";
/// Outbound presence announcement carrying `(deviceId, pushToken)`.
pub const EVENT_PRESENCE: &str = "HelloMyNameIs";

/// Recomputes the security headers. Called on every fresh connection,
/// including transport-driven reconnects.
pub type HeaderSource = Arc<dyn Fn() -> SecurityHeaders + Send + Sync>;

/// Ordered channel the transport pushes signals into.
pub type SignalSink = mpsc::UnboundedSender<StreamSignal>;

/// Everything a streaming transport reports to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// A named event arrived with its arguments.
    Event { name: String, args: Vec<Value> },
    /// The connection (re)established.
    Connected,
    /// The connection dropped; the transport may reconnect on its own.
    Disconnected { reason: String },
    /// The connection failed in a way the transport will not recover from.
    Faulted { error: DomeError },
}

/// A persistent bidirectional event connection.
pub trait StreamingChannel: Send + Sync {
    /// Connect, resolving once the connection is established or failed.
    ///
    /// Signals start flowing into `sink` as soon as the connection is up, so
    /// no event can arrive before the receiver exists. A `Connected` signal is
    /// pushed for every established connection, the first one included.
    fn connect(
        &self,
        headers: HeaderSource,
        sink: SignalSink,
    ) -> BoxFuture<'_, Result<(), DomeError>>;

    /// Emit a named event. Fire-and-forget, no response correlation.
    fn send<'a>(
        &'a self,
        event: &'a str,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<(), DomeError>>;

    /// Tear the connection down. Idempotent.
    fn disconnect(&self) -> BoxFuture<'_, ()>;
}

type EventHandler<R> = Box<dyn Fn(&[Value]) -> Result<R, DomeError> + Send + Sync>;

/// Routes named events to the handler registered for them.
///
/// Handlers translate raw event arguments into `R`; the owner applies the
/// result, which keeps all state mutation in one place.
pub struct EventRouter<R> {
    handlers: HashMap<String, EventHandler<R>>,
}

impl<R> Default for EventRouter<R> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<R> EventRouter<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `event`, replacing any previous one.
    pub fn on(
        &mut self,
        event: impl Into<String>,
        handler: impl Fn(&[Value]) -> Result<R, DomeError> + Send + Sync + 'static,
    ) {
        self.handlers.insert(event.into(), Box::new(handler));
    }

    /// Run the handler for `event`. `None` when nothing is registered.
    pub fn route(&self, event: &str, args: &[Value]) -> Option<Result<R, DomeError>> {
        self.handlers.get(event).map(|handler| handler(args))
    }
}

impl<R> std::fmt::Debug for EventRouter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("events", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
