//! Minimal HTTP seam used by the control channel.
//!
//! The control channel only needs "send this request, give me status and
//! body"; the [`HttpTransport`] trait keeps the concrete client swappable so
//! tests can record calls without a network.

use std::time::Duration;

use futures::{FutureExt, future::BoxFuture};
use thiserror::Error;

/// Request verb supported by the vendor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerb {
    Get,
    Post,
}

/// A fully-built outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub verb: HttpVerb,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Form-encoded body for POST requests.
    pub body: Option<String>,
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below the HTTP status level.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpTransportError {
    /// The request did not complete within the client timeout.
    #[error("request timed out")]
    Timeout,
    /// Connection, TLS or I/O failure.
    #[error("request failed: {0}")]
    Request(String),
}

/// A minimal async HTTP client.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: HttpRequest)
    -> BoxFuture<'_, Result<HttpResponse, HttpTransportError>>;
}

/// A [`reqwest`]-backed implementation of [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a client whose requests fail with [`HttpTransportError::Timeout`]
    /// after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpTransportError> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| HttpTransportError::Request(err.to_string()))?;
        Ok(Self { inner })
    }
}

impl HttpTransport for ReqwestHttpClient {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> BoxFuture<'_, Result<HttpResponse, HttpTransportError>> {
        let mut builder = match request.verb {
            HttpVerb::Get => self.inner.get(request.url.as_str()),
            HttpVerb::Post => self.inner.post(request.url.as_str()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(body);
        }

        async move {
            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(map_reqwest_error)?
                .to_vec();
            Ok(HttpResponse { status, body })
        }
        .boxed()
    }
}

fn map_reqwest_error(err: reqwest::Error) -> HttpTransportError {
    if err.is_timeout() {
        HttpTransportError::Timeout
    } else {
        HttpTransportError::Request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range_is_2xx_only() {
        let ok = HttpResponse {
            status: 204,
            body: Vec::new(),
        };
        let redirect = HttpResponse {
            status: 302,
            body: Vec::new(),
        };
        assert!(ok.is_success());
        assert!(!redirect.is_success());
    }

    #[test]
    fn builds_client_with_timeout() {
        ReqwestHttpClient::with_timeout(Duration::from_secs(5)).expect("client should build");
    }
}
