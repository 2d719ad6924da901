use crate::types::{ClientId, Credentials};

/// Header carrying the customer API id.
pub const HEADER_API_ID: &str = "X-DOME-APIID";
/// Header carrying the customer API key.
pub const HEADER_API_KEY: &str = "X-DOME-APIKEY";
/// Header carrying the server-issued client id, once known.
pub const HEADER_CLIENT: &str = "X-DOME-CLIENT";

/// Ordered authentication headers attached to every outbound call.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityHeaders {
    entries: Vec<(&'static str, String)>,
}

impl std::fmt::Debug for SecurityHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.entries.iter().map(|(name, _)| *name).collect();
        f.debug_struct("SecurityHeaders")
            .field("names", &names)
            .finish()
    }
}

impl SecurityHeaders {
    /// Compute the header set for the given credentials and optional client id.
    pub fn for_request(credentials: &Credentials, client_id: Option<&ClientId>) -> Self {
        let mut entries = vec![
            (HEADER_API_ID, credentials.api_id().to_owned()),
            (HEADER_API_KEY, credentials.api_key().to_owned()),
        ];
        if let Some(client_id) = client_id {
            entries.push((HEADER_CLIENT, client_id.as_str().to_owned()));
        }
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.entries.iter().map(|(name, value)| (*name, value.as_str()))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
