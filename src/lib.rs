//! # gcloudsql
//!
//! Manages the security configuration of a Google Cloud SQL instance through
//! the Cloud SQL Admin API: SSL enforcement, the authorized networks ACL, and
//! user passwords.
//!
//! Every change is a long-running operation on Google's side. A
//! [`Connection`] submits the change and blocks until the operation is DONE,
//! one change at a time per connection.
//!
//! ```no_run
//! use gcloudsql::Connection;
//!
//! fn main() -> gcloudsql::Result<()> {
//!     let conn = Connection::new("my-project", "my-instance")?;
//!     conn.enable_ssl()?;
//!     conn.whitelist_ip("office", "203.0.113.0/24")?;
//!     println!("{}", conn.public_ip()?);
//!     Ok(())
//! }
//! ```
//!
//! HTTP goes through blocking `reqwest` (the `reqwest` feature, on by
//! default). Other transports plug in through [`transport::Transport`].

/// Shared blocking HTTP client. Enabled with the `reqwest` feature.
#[cfg(feature = "reqwest")]
pub mod client;

pub mod config;
pub mod connection;
pub mod credential;
pub mod error;
pub mod instance;
pub mod operation;
pub mod template;
pub mod transport;

pub use config::Config;
pub use connection::{Connection, ConnectionBuilder};
pub use credential::{Credential, CredentialProvider, GcloudCli, StaticToken, TokenInfo};
pub use error::{Error, Result};
pub use instance::{AuthorizedNetwork, SqlInstance, WhitelistPolicy};
pub use operation::{CancelToken, Operation, PollOptions};
