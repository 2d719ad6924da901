use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DomeError;

/// High-level session lifecycle state reported to the embedding application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Session has been built but nothing has been sent to the server yet.
    Uninitialized,
    /// `registerClient` is in flight.
    AcquiringIdentity,
    /// A client id is known and the history fetch is in flight.
    BootstrappingHistory,
    /// History is merged and the streaming channel is connecting.
    ActivatingStream,
    /// Streaming channel is up and live replies are being merged.
    Active,
    /// Session hit an unrecoverable error. Terminal.
    Failed,
    /// Session was disposed by its owner. Terminal.
    Closed,
}

impl SessionState {
    /// Whether no further transitions (except `Closed` from `Failed`) are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Check that a control-plane send is allowed in this state.
    ///
    /// Sending only needs a client id, so it stays available while the
    /// streaming side is failed; it is rejected before identity and after close.
    pub fn ensure_can_send(self) -> Result<(), DomeError> {
        match self {
            Self::BootstrappingHistory | Self::ActivatingStream | Self::Active | Self::Failed => {
                Ok(())
            }
            other => Err(DomeError::invalid_state(other, "send_message")),
        }
    }
}

/// Vendor API credentials. Both parts are required and immutable.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_id: String,
    api_key: String,
}

impl Credentials {
    /// Validate and build credentials.
    pub fn new(api_id: impl Into<String>, api_key: impl Into<String>) -> Result<Self, DomeError> {
        let api_id = api_id.into();
        let api_key = api_key.into();
        if api_id.trim().is_empty() {
            return Err(DomeError::validation("api_id_missing", "apiId must not be empty"));
        }
        if api_key.trim().is_empty() {
            return Err(DomeError::validation("api_key_missing", "apiKey must not be empty"));
        }
        Ok(Self { api_id, api_key })
    }

    pub fn api_id(&self) -> &str {
        &self.api_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

// The key never shows up in logs or panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Device identity presented once during client registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    device_id: String,
    push_token: String,
}

impl DeviceIdentity {
    /// Validate and build a device identity. An empty push token is allowed.
    pub fn new(
        device_id: impl Into<String>,
        push_token: Option<String>,
    ) -> Result<Self, DomeError> {
        let device_id = device_id.into();
        if device_id.trim().is_empty() {
            return Err(DomeError::validation(
                "device_id_missing",
                "deviceId must not be empty",
            ));
        }
        Ok(Self {
            device_id,
            push_token: push_token.unwrap_or_default(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn push_token(&self) -> &str {
        &self.push_token
    }
}

/// Server-issued identifier for one device+credentials pairing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap a server-issued id. Returns `None` for blank values.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a conversation entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryKind {
    /// Message written by the application user.
    FromUser,
    /// Reply from a support operator.
    FromOperator,
}

/// One immutable message record in the support conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ConversationEntry {
    /// Unique entry id, used as the deduplication key.
    pub id: String,
    /// Client the conversation belongs to.
    pub client_id: String,
    /// Server timestamp, missing on synthetic and legacy entries.
    /// Values without an offset are read as UTC.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Entry author.
    #[serde(rename = "Type")]
    pub kind: EntryKind,
    /// Message text.
    pub text: String,
    /// Operator that wrote the reply, if any.
    #[serde(default)]
    pub operator_id: Option<String>,
    /// Support ticket the entry is filed under, if any.
    #[serde(default)]
    pub ticket_id: Option<String>,
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|err| serde::de::Error::custom(format!("invalid timestamp '{raw}': {err}")))
}

/// Acknowledgement returned by a successful `sendMessage` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendReceipt {
    /// Server echoed the stored entry.
    Entry(ConversationEntry),
    /// Server only confirmed the send with an opaque token.
    Confirmed { token: String },
    /// Server accepted the send with an empty body.
    Accepted,
}

impl SendReceipt {
    /// The stored entry, when the server returned one.
    pub fn entry(&self) -> Option<&ConversationEntry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Confirmed { .. } | Self::Accepted => None,
        }
    }
}

/// Notification fanned out to session subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Lifecycle transition.
    StateChanged {
        /// New lifecycle state.
        state: SessionState,
    },
    /// A live entry pushed by the streaming channel was merged.
    Message(ConversationEntry),
    /// The conversation log changed; carries the full snapshot.
    LogUpdated {
        /// Snapshot in display order.
        entries: Vec<ConversationEntry>,
    },
    /// The session moved to `Failed` after becoming active.
    SessionFailed {
        /// Fault that ended the session.
        error: DomeError,
    },
    /// Non-fatal problem worth surfacing (handler panic, undecodable payload).
    Diagnostic {
        /// Human-readable description.
        message: String,
    },
}
