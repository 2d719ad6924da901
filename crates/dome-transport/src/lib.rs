//! Network channels for the Dome Support client.
//!
//! The control channel is a request/response path to the vendor API; the
//! streaming channel is a persistent push path for live support replies.

/// Control-plane calls (register, history, send).
pub mod control;
/// HTTP seam and the `reqwest` adapter.
pub mod http;
/// In-process streaming transport.
pub mod memory;
/// Streaming channel trait, signals and event routing.
pub mod stream;

pub use control::{ControlChannel, DEFAULT_CONTROL_ENDPOINT, HttpControlChannel};
pub use http::{
    HttpRequest, HttpResponse, HttpTransport, HttpTransportError, HttpVerb, ReqwestHttpClient,
};
pub use memory::InMemoryStreamingChannel;
pub use stream::{
    EVENT_PRESENCE, EVENT_SUPPORT_RESPONSE, EventRouter, HeaderSource, SignalSink, StreamSignal,
    StreamingChannel,
};
