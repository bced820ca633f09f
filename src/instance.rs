//! # Instance Snapshot
//!
//! The subset of a Cloud SQL instance resource that the security operations
//! read: its addresses and the IP configuration (SSL requirement and the
//! authorized networks ACL). Unknown fields in API responses are ignored.
//!
//! The ACL is always sent to the API as a complete list, which replaces the
//! remote list wholesale. [`whitelist`] and [`blacklist`] compute that list
//! from the current one. There is no optimistic concurrency token, so edits
//! made by someone else between the fetch and the patch are overwritten.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `kind` tag of an authorized network entry.
pub const ACL_ENTRY_KIND: &str = "sql#aclEntry";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlInstance {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub database_version: String,
    #[serde(default)]
    pub ip_addresses: Vec<IpMapping>,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub self_link: String,
    #[serde(default)]
    pub connection_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub gce_zone: String,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpMapping {
    #[serde(default, rename = "type")]
    pub ip_type: String,
    #[serde(default)]
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub tier: String,
    #[serde(default)]
    pub ip_configuration: IpConfiguration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    #[serde(default)]
    pub authorized_networks: Vec<AuthorizedNetwork>,
    #[serde(default)]
    pub require_ssl: Option<bool>,
    #[serde(default)]
    pub ipv4_enabled: Option<bool>,
}

/// One ACL entry: a CIDR or address allowed to reach the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedNetwork {
    pub value: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "acl_entry_kind")]
    pub kind: String,
}

fn acl_entry_kind() -> String {
    ACL_ENTRY_KIND.to_string()
}

impl AuthorizedNetwork {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            name: name.into(),
            kind: acl_entry_kind(),
        }
    }
}

impl SqlInstance {
    /// Address of the `PRIMARY` mapping.
    pub fn public_ip(&self) -> Result<&str> {
        self.ip_addresses
            .iter()
            .find(|m| m.ip_type == "PRIMARY")
            .map(|m| m.ip_address.as_str())
            .ok_or_else(|| Error::NoPublicIp {
                instance: self.name.clone(),
            })
    }

    pub fn authorized_networks(&self) -> &[AuthorizedNetwork] {
        &self.settings.ip_configuration.authorized_networks
    }

    pub fn require_ssl(&self) -> Option<bool> {
        self.settings.ip_configuration.require_ssl
    }
}

/// What [`whitelist`] does when an entry with the same value already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WhitelistPolicy {
    /// Append regardless, leaving duplicates for the API to judge.
    #[default]
    AllowDuplicates,
    /// Leave the list unchanged if the value is already authorized.
    SkipExisting,
}

impl std::str::FromStr for WhitelistPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "allow-duplicates" => Ok(WhitelistPolicy::AllowDuplicates),
            "skip-existing" => Ok(WhitelistPolicy::SkipExisting),
            _ => Err("expected allow-duplicates or skip-existing".to_string()),
        }
    }
}

/// The list after authorizing `network`.
pub fn whitelist(
    current: &[AuthorizedNetwork],
    network: AuthorizedNetwork,
    policy: WhitelistPolicy,
) -> Vec<AuthorizedNetwork> {
    let mut networks = current.to_vec();
    let exists = networks.iter().any(|n| n.value == network.value);
    if !(exists && policy == WhitelistPolicy::SkipExisting) {
        networks.push(network);
    }
    networks
}

/// The list after removing every entry whose value is `value`.
pub fn blacklist(current: &[AuthorizedNetwork], value: &str) -> Vec<AuthorizedNetwork> {
    current
        .iter()
        .filter(|n| n.value != value)
        .cloned()
        .collect()
}
