//! # Access Tokens
//!
//! A [`Credential`] is the bearer token every Admin API call carries, together
//! with what the OAuth2 introspection endpoint reported about it. Tokens come
//! from a [`CredentialProvider`]; by default that is the operator's `gcloud`
//! session.
//!
//! The credential is handed to the template engine explicitly for each request
//! so no other component ever sees the raw token string.

use std::fmt;
use std::process::Command;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::template::{Method, RequestTemplate, TOKEN_INFO_URL, TemplateEngine};
use crate::transport::{Transport, fetch};

/// Source of raw bearer tokens.
pub trait CredentialProvider: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// Runs `gcloud auth application-default print-access-token`.
#[derive(Debug, Clone)]
pub struct GcloudCli {
    program: String,
}

impl GcloudCli {
    pub fn new() -> Self {
        Self::with_program("gcloud")
    }

    /// Uses a different executable, e.g. an absolute path to the SDK.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GcloudCli {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for GcloudCli {
    fn access_token(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .args(["auth", "application-default", "print-access-token"])
            .output()
            .map_err(|e| Error::credential(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::credential(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// A fixed token, for scripts that already hold one.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Response of the OAuth2 `tokeninfo` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub issued_to: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Seconds until the token expires, counted from the introspection call.
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub verified_email: Option<bool>,
    #[serde(default)]
    pub access_type: Option<String>,
}

pub struct Credential {
    token: String,
    info: TokenInfo,
    expires_at: Mutex<DateTime<Utc>>,
}

impl Credential {
    /// Builds a credential issued at `issued_at`. Fails on an empty token.
    pub fn new(token: impl Into<String>, info: TokenInfo, issued_at: DateTime<Utc>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::credential("provider returned an empty token"));
        }
        let expires_at = expiry(issued_at, info.expires_in)?;
        Ok(Self {
            token,
            info,
            expires_at: Mutex::new(expires_at),
        })
    }

    /// Obtains a token from `provider` and introspects it at `token_info_url`.
    pub fn acquire(
        provider: &dyn CredentialProvider,
        transport: &dyn Transport,
        engine: &TemplateEngine,
        token_info_url: &str,
    ) -> Result<Self> {
        let token = provider.access_token().map_err(|e| match e {
            e @ Error::Credential { .. } => e,
            e => Error::credential_from("credential provider failed", e),
        })?;
        if token.is_empty() {
            return Err(Error::credential("provider returned an empty token"));
        }

        let template = RequestTemplate::new(
            TOKEN_INFO_URL,
            json!({ "token_info_url": token_info_url, "access_token": token }),
        );
        let request = engine
            .render(Method::Get, &template, None)
            .map_err(|e| Error::credential_from("failed to build introspection request", e))?;
        let issued_at = Utc::now();
        let info: TokenInfo = fetch(transport, &request)
            .map_err(|e| Error::credential_from("token introspection failed", e))?;

        tracing::debug!(
            email = info.email.as_deref().unwrap_or("-"),
            expires_in = info.expires_in,
            "access token acquired"
        );
        Self::new(token, info, issued_at)
    }

    pub fn info(&self) -> &TokenInfo {
        &self.info
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        *self.expires_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Recomputes the expiry as `issued_at + expires_in`.
    pub fn refresh_expiry(&self, issued_at: DateTime<Utc>) -> Result<()> {
        let expires_at = expiry(issued_at, self.info.expires_in)?;
        *self.expires_at.lock().unwrap_or_else(PoisonError::into_inner) = expires_at;
        Ok(())
    }

    pub(crate) fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("info", &self.info)
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

fn expiry(issued_at: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_seconds(expires_in)
        .and_then(|d| issued_at.checked_add_signed(d))
        .ok_or_else(|| Error::credential(format!("expires_in out of range: {}", expires_in)))
}
