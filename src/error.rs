//! # Error Types
//!
//! Every fallible call in the crate returns [`Result`]. Variants map onto the
//! stages of a request: rendering, sending, decoding, and polling the
//! resulting operation. None of them are retried internally.

use std::time::Duration;

/// Errors produced while talking to the Cloud SQL Admin API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bearer token could not be obtained or introspected.
    #[error("failed to acquire access token: {message}")]
    Credential {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// A request template is malformed or references a missing field.
    #[error("failed to render template `{template}`: {message}")]
    TemplateRender { template: String, message: String },

    /// The request never produced a response (connect, TLS, body read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The API answered with a non-success status.
    #[error("request returned HTTP {code}: {body}")]
    HttpStatus { code: u16, body: String },

    /// The response body was not the JSON shape we expected.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Polling was requested but there is no operation with a self link.
    #[error("no operation to wait for")]
    EmptyOperation,

    /// The operation reached DONE but reported errors.
    #[error("operation {name} ({operation_type}) failed: {message}")]
    OperationFailed {
        name: String,
        operation_type: String,
        message: String,
    },

    /// The poll deadline passed before the operation reached DONE.
    #[error("operation {name} still {status} after {elapsed:?}")]
    PollTimeout {
        name: String,
        status: String,
        elapsed: Duration,
    },

    /// The caller tripped the cancel token while polling.
    #[error("operation {name} cancelled while {status}")]
    Cancelled { name: String, status: String },

    /// The instance has no address tagged PRIMARY.
    #[error("instance {instance} has no PRIMARY ip address")]
    NoPublicIp { instance: String },

    /// A configuration value could not be parsed.
    #[error("invalid configuration {key}={value}: {message}")]
    Config {
        key: String,
        value: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn credential(message: impl Into<String>) -> Self {
        Error::Credential {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn credential_from(message: impl Into<String>, source: Error) -> Self {
        Error::Credential {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Status code for [`Error::HttpStatus`], `None` otherwise.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { code, .. } => Some(*code),
            _ => None,
        }
    }
}
