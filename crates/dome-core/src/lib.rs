//! Core contract shared by the Dome Support session runtime and transports.
//!
//! This crate defines the data model, error taxonomy, security header policy,
//! session lifecycle, conversation log merge rules and event fan-out.

/// Conversation log merge and ordering.
pub mod conversation;
/// Event fan-out to application handlers.
pub mod dispatch;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Authentication headers attached to every outbound call.
pub mod headers;
/// Server payload normalization (send receipts, push payloads, client ids).
pub mod normalization;
/// Session lifecycle state machine.
pub mod state_machine;
/// Data model shared across crates.
pub mod types;

pub use conversation::{ConversationLog, MergeOutcome};
pub use dispatch::{EventDispatcher, EventStream};
pub use error::{DomeError, DomeErrorCategory, classify_http_status};
pub use headers::{HEADER_API_ID, HEADER_API_KEY, HEADER_CLIENT, SecurityHeaders};
pub use normalization::{normalize_client_id, normalize_send_response, normalize_support_payload};
pub use state_machine::{SessionStateMachine, SessionTransition};
pub use types::{
    ClientId, ConversationEntry, Credentials, DeviceIdentity, EntryKind, SendReceipt,
    SessionEvent, SessionState,
};
