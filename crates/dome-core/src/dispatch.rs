use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::{
    error::DomeError,
    types::{ConversationEntry, SessionEvent, SessionState},
};

/// Broadcast event stream type used by async subscribers.
pub type EventStream = broadcast::Receiver<SessionEvent>;

pub type MessageHandler = Arc<dyn Fn(&ConversationEntry) + Send + Sync>;
pub type LogUpdatedHandler = Arc<dyn Fn(&[ConversationEntry]) + Send + Sync>;
pub type StateHandler = Arc<dyn Fn(SessionState) + Send + Sync>;
pub type FailureHandler = Arc<dyn Fn(&DomeError) + Send + Sync>;
pub type DiagnosticHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default, Clone)]
struct Handlers {
    message: Vec<MessageHandler>,
    log_updated: Vec<LogUpdatedHandler>,
    state: Vec<StateHandler>,
    failure: Vec<FailureHandler>,
    diagnostic: Vec<DiagnosticHandler>,
}

struct DispatcherInner {
    handlers: RwLock<Handlers>,
    closed: AtomicBool,
    event_tx: broadcast::Sender<SessionEvent>,
}

/// Fan-out of session notifications to application handlers.
///
/// Handlers run in registration order. A panicking handler is reported to
/// the diagnostic handlers and does not stop delivery to the next one. Once
/// [`EventDispatcher::close`] is called nothing is delivered anymore.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Create a dispatcher whose broadcast stream buffers `event_buffer` events.
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self {
            inner: Arc::new(DispatcherInner {
                handlers: RwLock::new(Handlers::default()),
                closed: AtomicBool::new(false),
                event_tx,
            }),
        }
    }

    /// Copy of this dispatcher's handlers behind a fresh broadcast stream.
    pub fn with_event_buffer(&self, event_buffer: usize) -> Self {
        let handlers = self.read_handlers().clone();
        let dispatcher = Self::new(event_buffer);
        *dispatcher.write_handlers() = handlers;
        dispatcher
    }

    pub fn on_message(&self, handler: impl Fn(&ConversationEntry) + Send + Sync + 'static) {
        self.write_handlers().message.push(Arc::new(handler));
    }

    pub fn on_log_updated(&self, handler: impl Fn(&[ConversationEntry]) + Send + Sync + 'static) {
        self.write_handlers().log_updated.push(Arc::new(handler));
    }

    pub fn on_state_changed(&self, handler: impl Fn(SessionState) + Send + Sync + 'static) {
        self.write_handlers().state.push(Arc::new(handler));
    }

    pub fn on_session_failed(&self, handler: impl Fn(&DomeError) + Send + Sync + 'static) {
        self.write_handlers().failure.push(Arc::new(handler));
    }

    pub fn on_diagnostic(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.write_handlers().diagnostic.push(Arc::new(handler));
    }

    /// Subscribe to every dispatched event as an async stream.
    pub fn subscribe(&self) -> EventStream {
        self.inner.event_tx.subscribe()
    }

    /// Stop all further delivery. Idempotent.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Deliver one event to the broadcast stream and the matching handlers.
    pub fn dispatch(&self, event: SessionEvent) {
        if self.is_closed() {
            return;
        }

        // Lagged or absent subscribers are handled by `broadcast`.
        let _ = self.inner.event_tx.send(event.clone());

        match &event {
            SessionEvent::StateChanged { state } => {
                let handlers = self.read_handlers().state.clone();
                self.run_each("state_changed", &handlers, |handler| handler(*state));
            }
            SessionEvent::Message(entry) => {
                let handlers = self.read_handlers().message.clone();
                self.run_each("message", &handlers, |handler| handler(entry));
            }
            SessionEvent::LogUpdated { entries } => {
                let handlers = self.read_handlers().log_updated.clone();
                self.run_each("log_updated", &handlers, |handler| handler(entries.as_slice()));
            }
            SessionEvent::SessionFailed { error } => {
                let handlers = self.read_handlers().failure.clone();
                self.run_each("session_failed", &handlers, |handler| handler(error));
            }
            SessionEvent::Diagnostic { message } => self.run_diagnostics(message),
        }
    }

    /// Report a non-fatal problem to diagnostic subscribers.
    pub fn diagnostic(&self, message: impl Into<String>) {
        self.dispatch(SessionEvent::Diagnostic {
            message: message.into(),
        });
    }

    fn run_each<H: ?Sized>(&self, kind: &str, handlers: &[Arc<H>], call: impl Fn(&H)) {
        for handler in handlers {
            if self.is_closed() {
                return;
            }
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call(&**handler))) {
                let message = format!("{kind} handler panicked: {}", panic_message(&*payload));
                warn!(handler = kind, "{message}");
                self.diagnostic(message);
            }
        }
    }

    fn run_diagnostics(&self, message: &str) {
        let handlers = self.read_handlers().diagnostic.clone();
        for handler in handlers {
            if self.is_closed() {
                return;
            }
            // Not re-reported, a panicking diagnostic handler would recurse.
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(message))) {
                error!(
                    panic = %panic_message(&*payload),
                    "diagnostic handler panicked"
                );
            }
        }
    }

    fn read_handlers(&self) -> std::sync::RwLockReadGuard<'_, Handlers> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_handlers(&self) -> std::sync::RwLockWriteGuard<'_, Handlers> {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::types::EntryKind;

    fn entry(id: &str) -> ConversationEntry {
        ConversationEntry {
            id: id.to_owned(),
            client_id: "dc-123".to_owned(),
            timestamp: None,
            kind: EntryKind::FromOperator,
            text: "hi".to_owned(),
            operator_id: None,
            ticket_id: None,
        }
    }

    #[test]
    fn calls_handlers_in_registration_order() {
        let dispatcher = EventDispatcher::new(8);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            dispatcher.on_message(move |_| order.lock().expect("lock").push(tag));
        }

        dispatcher.dispatch(SessionEvent::Message(entry("m1")));
        assert_eq!(
            *order.lock().expect("lock"),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn isolates_panicking_handler_and_reports_it() {
        let dispatcher = EventDispatcher::new(8);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let diagnostics = Arc::new(Mutex::new(Vec::new()));

        dispatcher.on_message(|_| panic!("app bug"));
        {
            let delivered = delivered.clone();
            dispatcher.on_message(move |entry| {
                delivered.lock().expect("lock").push(entry.id.clone())
            });
        }
        {
            let diagnostics = diagnostics.clone();
            dispatcher.on_diagnostic(move |message| {
                diagnostics.lock().expect("lock").push(message.to_owned())
            });
        }

        dispatcher.dispatch(SessionEvent::Message(entry("m1")));

        assert_eq!(*delivered.lock().expect("lock"), vec!["m1".to_owned()]);
        let diagnostics = diagnostics.lock().expect("lock");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("app bug"));
    }

    #[test]
    fn delivers_nothing_after_close() {
        let dispatcher = EventDispatcher::new(8);
        let count = Arc::new(Mutex::new(0));
        {
            let count = count.clone();
            dispatcher.on_log_updated(move |_| *count.lock().expect("lock") += 1);
        }

        dispatcher.dispatch(SessionEvent::LogUpdated { entries: vec![] });
        dispatcher.close();
        dispatcher.close();
        dispatcher.dispatch(SessionEvent::LogUpdated { entries: vec![] });

        assert_eq!(*count.lock().expect("lock"), 1);
        assert!(dispatcher.is_closed());
    }

    #[test]
    fn rebuffered_dispatcher_keeps_handlers() {
        let original = EventDispatcher::new(1);
        let states = Arc::new(Mutex::new(Vec::new()));
        {
            let states = states.clone();
            original.on_state_changed(move |state| states.lock().expect("lock").push(state));
        }

        let resized = original.with_event_buffer(64);
        resized.dispatch(SessionEvent::StateChanged {
            state: SessionState::Active,
        });
        assert_eq!(*states.lock().expect("lock"), vec![SessionState::Active]);
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let dispatcher = EventDispatcher::new(16);
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        dispatcher.dispatch(SessionEvent::StateChanged {
            state: SessionState::Active,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }
}
