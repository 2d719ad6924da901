//! Request/response calls to the vendor API.

use dome_core::{
    ClientId, ConversationEntry, Credentials, DeviceIdentity, DomeError, DomeErrorCategory,
    SecurityHeaders, SendReceipt, classify_http_status, normalize_client_id,
    normalize_send_response,
};
use futures::{FutureExt, future::BoxFuture};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::{Url, form_urlencoded};

use crate::http::{HttpRequest, HttpTransport, HttpTransportError, HttpVerb};

/// Default control-plane endpoint.
pub const DEFAULT_CONTROL_ENDPOINT: &str = "https://dome.support/api/";

pub const METHOD_REGISTER_CLIENT: &str = "registerClient";
pub const METHOD_FETCH_HISTORY: &str = "fetchHistory";
pub const METHOD_SEND_MESSAGE: &str = "sendMessage";

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Control-plane calls the session layer depends on.
///
/// Implementations perform no retries; every failure is returned to the
/// caller as a [`DomeError`].
pub trait ControlChannel: Send + Sync {
    /// Register this device and obtain its client id.
    fn register_client<'a>(
        &'a self,
        device: &'a DeviceIdentity,
    ) -> BoxFuture<'a, Result<ClientId, DomeError>>;

    /// Fetch the stored conversation for a client.
    fn fetch_history<'a>(
        &'a self,
        client_id: &'a ClientId,
    ) -> BoxFuture<'a, Result<Vec<ConversationEntry>, DomeError>>;

    /// Send one user message.
    fn send_message<'a>(
        &'a self,
        client_id: &'a ClientId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<SendReceipt, DomeError>>;
}

/// [`ControlChannel`] over HTTP.
///
/// GET parameters travel as a percent-encoded query string, POST parameters
/// as a form-encoded body. Every call carries the security headers.
#[derive(Debug, Clone)]
pub struct HttpControlChannel<H> {
    http: H,
    endpoint: Url,
    credentials: Credentials,
}

impl<H: HttpTransport> HttpControlChannel<H> {
    pub fn new(http: H, endpoint: &str, credentials: Credentials) -> Result<Self, DomeError> {
        let mut endpoint = Url::parse(endpoint).map_err(|err| {
            DomeError::validation("invalid_endpoint", format!("'{endpoint}': {err}"))
        })?;
        // `Url::join` replaces the last segment unless the base ends in '/'.
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self {
            http,
            endpoint,
            credentials,
        })
    }

    /// Issue one call and return the decoded JSON body.
    pub async fn call(
        &self,
        method: &str,
        params: &[(&str, &str)],
        verb: HttpVerb,
        client_id: Option<&ClientId>,
    ) -> Result<Value, DomeError> {
        let request = self.build_request(method, params, verb, client_id)?;
        debug!(method, ?verb, "control call");

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|err| map_http_transport_error(method, err))?;

        if !response.is_success() {
            let body = String::from_utf8_lossy(&response.body);
            let snippet: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            let category = classify_http_status(response.status);
            let code = match category {
                DomeErrorCategory::AuthRejected => "auth_rejected",
                _ => "http_status",
            };
            return Err(DomeError::new(
                category,
                code,
                format!("{method} returned {}: {snippet}", response.status),
            ));
        }

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&response.body).map_err(|err| {
            DomeError::protocol(
                "response_decode_error",
                format!("{method} returned malformed JSON: {err}"),
            )
        })
    }

    /// Issue one call and decode the body into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
        verb: HttpVerb,
        client_id: Option<&ClientId>,
    ) -> Result<T, DomeError> {
        let body = self.call(method, params, verb, client_id).await?;
        serde_json::from_value(body).map_err(|err| {
            DomeError::protocol(
                "response_decode_error",
                format!("{method} returned an unexpected payload: {err}"),
            )
        })
    }

    fn build_request(
        &self,
        method: &str,
        params: &[(&str, &str)],
        verb: HttpVerb,
        client_id: Option<&ClientId>,
    ) -> Result<HttpRequest, DomeError> {
        let mut url = self.endpoint.join(method).map_err(|err| {
            DomeError::validation("invalid_method", format!("'{method}': {err}"))
        })?;

        let headers = SecurityHeaders::for_request(&self.credentials, client_id)
            .iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect();

        let body = match verb {
            HttpVerb::Get => {
                if !params.is_empty() {
                    url.query_pairs_mut().extend_pairs(params);
                }
                None
            }
            HttpVerb::Post => Some(
                form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params)
                    .finish(),
            ),
        };

        Ok(HttpRequest {
            verb,
            url: url.into(),
            headers,
            body,
        })
    }
}

impl<H: HttpTransport> ControlChannel for HttpControlChannel<H> {
    fn register_client<'a>(
        &'a self,
        device: &'a DeviceIdentity,
    ) -> BoxFuture<'a, Result<ClientId, DomeError>> {
        async move {
            let body = self
                .call(
                    METHOD_REGISTER_CLIENT,
                    &[
                        ("deviceId", device.device_id()),
                        ("pushToken", device.push_token()),
                    ],
                    HttpVerb::Post,
                    None,
                )
                .await?;
            normalize_client_id(body)
        }
        .boxed()
    }

    fn fetch_history<'a>(
        &'a self,
        client_id: &'a ClientId,
    ) -> BoxFuture<'a, Result<Vec<ConversationEntry>, DomeError>> {
        async move {
            let history: Option<Vec<ConversationEntry>> = self
                .call_as(
                    METHOD_FETCH_HISTORY,
                    &[("domeClientId", client_id.as_str())],
                    HttpVerb::Get,
                    Some(client_id),
                )
                .await?;
            Ok(history.unwrap_or_default())
        }
        .boxed()
    }

    fn send_message<'a>(
        &'a self,
        client_id: &'a ClientId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<SendReceipt, DomeError>> {
        async move {
            let body = self
                .call(
                    METHOD_SEND_MESSAGE,
                    &[("domeClientId", client_id.as_str()), ("text", text)],
                    HttpVerb::Post,
                    Some(client_id),
                )
                .await?;
            normalize_send_response(body)
        }
        .boxed()
    }
}

fn map_http_transport_error(method: &str, err: HttpTransportError) -> DomeError {
    match err {
        HttpTransportError::Timeout => {
            DomeError::transport("timeout", format!("{method} timed out"))
        }
        HttpTransportError::Request(message) => {
            DomeError::transport("request_failed", format!("{method}: {message}"))
        }
    }
}
