//! # Configuration
//!
//! Endpoints and polling behaviour. [`Config::default`] talks to the public
//! Admin API and polls once a second with no deadline; [`Config::from_env`]
//! applies `CLOUDSQL_*` overrides on top.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::instance::WhitelistPolicy;
use crate::operation::PollOptions;

pub const DEFAULT_API_BASE: &str = "https://sqladmin.googleapis.com/sql/v1beta4";
pub const DEFAULT_TOKEN_INFO_URL: &str = "https://www.googleapis.com/oauth2/v1/tokeninfo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Admin API root, without a trailing slash.
    pub api_base: String,
    pub token_info_url: String,
    pub poll: PollOptions,
    pub whitelist_policy: WhitelistPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token_info_url: DEFAULT_TOKEN_INFO_URL.to_string(),
            poll: PollOptions::default(),
            whitelist_policy: WhitelistPolicy::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by environment variables:
    ///
    /// - `CLOUDSQL_API_BASE`
    /// - `CLOUDSQL_TOKEN_INFO_URL`
    /// - `CLOUDSQL_POLL_INTERVAL_MS`
    /// - `CLOUDSQL_POLL_TIMEOUT_SECS` (`0` disables the deadline)
    /// - `CLOUDSQL_PROGRESS` (`true`/`false`)
    /// - `CLOUDSQL_WHITELIST_POLICY` (`allow-duplicates`/`skip-existing`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("CLOUDSQL_API_BASE") {
            config.api_base = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("CLOUDSQL_TOKEN_INFO_URL") {
            config.token_info_url = v;
        }
        if let Some(v) = lookup("CLOUDSQL_POLL_INTERVAL_MS") {
            config.poll.interval = Duration::from_millis(parse("CLOUDSQL_POLL_INTERVAL_MS", &v)?);
        }
        if let Some(v) = lookup("CLOUDSQL_POLL_TIMEOUT_SECS") {
            let secs: u64 = parse("CLOUDSQL_POLL_TIMEOUT_SECS", &v)?;
            config.poll.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = lookup("CLOUDSQL_PROGRESS") {
            config.poll.progress = parse("CLOUDSQL_PROGRESS", &v)?;
        }
        if let Some(v) = lookup("CLOUDSQL_WHITELIST_POLICY") {
            config.whitelist_policy = parse("CLOUDSQL_WHITELIST_POLICY", &v)?;
        }
        Ok(config)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| Error::Config {
        key: key.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}
