//! # Transport
//!
//! Sends [`RenderedRequest`]s and decodes their JSON responses. The
//! [`Transport`] trait is the seam between request building and the network:
//! [`HttpTransport`] talks to the real API, tests substitute scripted
//! implementations.

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::template::RenderedRequest;

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport: Send + Sync {
    /// Sends `request` and reads the whole body. Only failures to obtain a
    /// response are errors here; status codes are judged by [`fetch`].
    fn send(&self, request: &RenderedRequest) -> Result<RawResponse>;
}

/// Sends `request`, requires a 2xx status, and decodes the body as `T`.
pub fn fetch<T: DeserializeOwned>(transport: &dyn Transport, request: &RenderedRequest) -> Result<T> {
    let response = transport.send(request)?;
    if !response.is_success() {
        return Err(Error::HttpStatus {
            code: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        });
    }
    Ok(serde_json::from_slice(&response.body)?)
}

#[cfg(feature = "reqwest")]
pub use http::HttpTransport;

#[cfg(feature = "reqwest")]
mod http {
    use reqwest::blocking::Client;

    use super::{RawResponse, Transport};
    use crate::client::BLOCKING_CLIENT;
    use crate::error::{Error, Result};
    use crate::template::{Method, RenderedRequest};

    /// [`Transport`] over blocking `reqwest`.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: Client,
    }

    impl HttpTransport {
        pub fn new() -> Self {
            Self::with_client(BLOCKING_CLIENT.clone())
        }

        pub fn with_client(client: Client) -> Self {
            Self { client }
        }
    }

    impl Default for HttpTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for HttpTransport {
        fn send(&self, request: &RenderedRequest) -> Result<RawResponse> {
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Patch => reqwest::Method::PATCH,
                Method::Put => reqwest::Method::PUT,
            };
            let mut builder = self.client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if !request.body.is_empty() {
                builder = builder.body(request.body.clone());
            }

            // Errors can carry the URL, and the introspection URL carries the token.
            let response = builder
                .send()
                .map_err(|e| Error::Transport(e.without_url().to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .map_err(|e| Error::Transport(e.without_url().to_string()))?;
            tracing::trace!(method = %request.method, status, len = body.len(), "response received");

            Ok(RawResponse {
                status,
                body: body.to_vec(),
            })
        }
    }
}
