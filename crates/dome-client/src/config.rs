use std::time::Duration;

use dome_transport::DEFAULT_CONTROL_ENDPOINT;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_HISTORY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Tunables for one support session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base URL of the vendor API. Method names are joined onto it.
    pub control_endpoint: String,
    /// Per-request timeout of the built-in HTTP client.
    pub request_timeout: Duration,
    /// Upper bound on `registerClient`.
    pub identity_timeout: Duration,
    /// Upper bound on the startup `fetchHistory`.
    pub history_timeout: Duration,
    /// Upper bound on the streaming connect.
    pub connect_timeout: Duration,
    /// Go active with an empty log when the history fetch fails.
    pub best_effort_history: bool,
    /// Emit `HelloMyNameIs(deviceId, pushToken)` after every stream connect.
    pub announce_presence: bool,
    /// Capacity of the broadcast stream returned by `subscribe`.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            control_endpoint: DEFAULT_CONTROL_ENDPOINT.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
            history_timeout: DEFAULT_HISTORY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            best_effort_history: false,
            announce_presence: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_vendor_endpoint_and_startup_bounds() {
        let config = SessionConfig::default();
        assert_eq!(config.control_endpoint, "https://dome.support/api/");
        assert_eq!(config.identity_timeout, Duration::from_secs(15));
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert!(!config.best_effort_history);
        assert!(!config.announce_presence);
    }
}
