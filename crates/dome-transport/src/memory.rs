use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dome_core::{DomeError, SecurityHeaders};
use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;

use crate::stream::{HeaderSource, SignalSink, StreamSignal, StreamingChannel};

#[derive(Default)]
struct MemoryState {
    sink: Option<SignalSink>,
    headers: Option<HeaderSource>,
    header_history: Vec<SecurityHeaders>,
    sent: Vec<(String, Vec<Value>)>,
    fail_next_connect: Option<DomeError>,
    disconnects: usize,
}

/// In-process [`StreamingChannel`] driven by hand.
///
/// Useful for tests and for embedding applications that want to exercise
/// their handlers without a server. Clones share the same connection.
#[derive(Clone, Default)]
pub struct InMemoryStreamingChannel {
    state: Arc<Mutex<MemoryState>>,
}

impl std::fmt::Debug for InMemoryStreamingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStreamingChannel")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl InMemoryStreamingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect` call fail with `error`.
    pub fn fail_next_connect(&self, error: DomeError) {
        self.lock().fail_next_connect = Some(error);
    }

    /// Push a named event to the connected session.
    ///
    /// Returns `false` when nothing is connected.
    pub fn deliver(&self, event: &str, args: Vec<Value>) -> bool {
        self.signal(StreamSignal::Event {
            name: event.to_owned(),
            args,
        })
    }

    /// Report a dropped connection the transport intends to recover from.
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.signal(StreamSignal::Disconnected {
            reason: reason.to_owned(),
        })
    }

    /// Simulate a transport-driven reconnect. Headers are recomputed.
    pub fn reconnect(&self) -> bool {
        let headers = self.lock().headers.clone();
        let Some(headers) = headers else {
            return false;
        };
        let fresh = headers();
        self.lock().header_history.push(fresh);
        self.signal(StreamSignal::Connected)
    }

    /// Report an unrecoverable fault.
    pub fn fault(&self, error: DomeError) -> bool {
        self.signal(StreamSignal::Faulted { error })
    }

    pub fn is_connected(&self) -> bool {
        self.lock().sink.is_some()
    }

    /// Headers computed for each connection, oldest first.
    pub fn header_history(&self) -> Vec<SecurityHeaders> {
        self.lock().header_history.clone()
    }

    /// Events emitted through [`StreamingChannel::send`].
    pub fn sent_events(&self) -> Vec<(String, Vec<Value>)> {
        self.lock().sent.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    fn signal(&self, signal: StreamSignal) -> bool {
        let state = self.lock();
        match &state.sink {
            Some(sink) => sink.send(signal).is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StreamingChannel for InMemoryStreamingChannel {
    fn connect(
        &self,
        headers: HeaderSource,
        sink: SignalSink,
    ) -> BoxFuture<'_, Result<(), DomeError>> {
        let result = {
            let mut state = self.lock();
            if let Some(error) = state.fail_next_connect.take() {
                Err(error)
            } else {
                state.header_history.push(headers());
                state.headers = Some(headers);
                // Receiver gone means the session already went away.
                let _ = sink.send(StreamSignal::Connected);
                state.sink = Some(sink);
                Ok(())
            }
        };
        async move { result }.boxed()
    }

    fn send<'a>(
        &'a self,
        event: &'a str,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<(), DomeError>> {
        let result = {
            let mut state = self.lock();
            if state.sink.is_none() {
                Err(DomeError::transport(
                    "stream_not_connected",
                    format!("cannot send '{event}' while disconnected"),
                ))
            } else {
                state.sent.push((event.to_owned(), args));
                Ok(())
            }
        };
        async move { result }.boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        {
            let mut state = self.lock();
            if state.sink.take().is_some() {
                state.disconnects += 1;
            }
            state.headers = None;
        }
        async {}.boxed()
    }
}
