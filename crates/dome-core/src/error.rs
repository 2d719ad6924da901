use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionState;

/// Broad error category used for caller handling and startup policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DomeErrorCategory {
    /// Bad construction input, rejected before any network activity.
    Validation,
    /// Network or connection failure, non-2xx status, or timeout.
    Transport,
    /// Malformed or unexpected server payload.
    Protocol,
    /// Server rejected the credentials or headers. Not retryable as-is.
    AuthRejected,
    /// Operation attempted in a lifecycle state that does not allow it.
    SessionState,
}

/// Stable error payload returned across the public SDK boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct DomeError {
    /// High-level error category.
    pub category: DomeErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl DomeError {
    /// Construct a new error.
    pub fn new(
        category: DomeErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DomeErrorCategory::Validation, code, message)
    }

    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DomeErrorCategory::Transport, code, message)
    }

    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DomeErrorCategory::Protocol, code, message)
    }

    /// Build the standard error for a bounded wait that expired.
    pub fn timeout(operation: &str, after: std::time::Duration) -> Self {
        Self::transport(
            "timeout",
            format!("{operation} did not complete within {}ms", after.as_millis()),
        )
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SessionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            DomeErrorCategory::SessionState,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in state {current:?}"),
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> DomeErrorCategory {
    match status {
        401 | 403 => DomeErrorCategory::AuthRejected,
        _ => DomeErrorCategory::Transport,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), DomeErrorCategory::AuthRejected);
        assert_eq!(classify_http_status(403), DomeErrorCategory::AuthRejected);
        assert_eq!(classify_http_status(404), DomeErrorCategory::Transport);
        assert_eq!(classify_http_status(503), DomeErrorCategory::Transport);
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = DomeError::invalid_state(SessionState::Uninitialized, "send_message");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, DomeErrorCategory::SessionState);
    }

    #[test]
    fn timeouts_are_transport_errors() {
        let timeout = DomeError::timeout("register_client", std::time::Duration::from_secs(2));
        assert_eq!(timeout.code, "timeout");
        assert_eq!(timeout.category, DomeErrorCategory::Transport);
    }
}
