// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// Common types for pemtunnel

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Default SSH port used when `ip_address` carries no explicit port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Local forwards always bind to the loopback interface
pub const LOCAL_BIND_ADDRESS: &str = "127.0.0.1";

/// One named local-forward tunnel definition, as stored in `tunnels.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TunnelConfig {
    /// Unique key within the store
    pub name: String,
    /// SSH server host or address, optionally `host:port`
    pub ip_address: String,
    /// Private key file name, resolved against the PEM directory
    pub pem_file_name: String,
    /// Local port bound on 127.0.0.1
    pub local_port: u16,
    /// Destination host as seen from the SSH server
    pub remote_host: String,
    /// Destination port on `remote_host`
    pub remote_port: u16,
    /// Opened in a browser once the tunnel is up (may be empty or `null`)
    #[serde(default, deserialize_with = "null_as_empty")]
    pub browser_url: String,
}

impl TunnelConfig {
    /// Check the fields a connect attempt relies on
    pub fn validate(&self) -> Result<()> {
        require("Name", &self.name)?;
        require("IpAddress", &self.ip_address)?;
        require("PemFileName", &self.pem_file_name)?;
        require("RemoteHost", &self.remote_host)?;

        if self.local_port == 0 {
            return Err(Error::Validation(
                "LocalPort must be between 1 and 65535".to_string(),
            ));
        }
        if self.remote_port == 0 {
            return Err(Error::Validation(
                "RemotePort must be between 1 and 65535".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the credential file against the configured PEM directory
    pub fn credential_path(&self, pem_directory: &Path) -> PathBuf {
        pem_directory.join(&self.pem_file_name)
    }

    /// SSH server host and port
    pub fn ssh_endpoint(&self) -> (String, u16) {
        let address = self.ip_address.trim();

        // Handles "1.2.3.4:2222" and "[::1]:2222"
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return (addr.ip().to_string(), addr.port());
        }

        // "host:port" with a single colon; bare IPv6 addresses have several
        if let Some((host, port)) = address.rsplit_once(':') {
            if !host.contains(':') {
                if let Ok(port) = port.parse::<u16>() {
                    return (host.to_string(), port);
                }
            }
        }

        (address.to_string(), DEFAULT_SSH_PORT)
    }

    /// Human-readable forwarding description, e.g. `127.0.0.1:8080 → db:5432`
    pub fn forward_description(&self) -> String {
        format!(
            "{} → {}",
            format_host_port(LOCAL_BIND_ADDRESS, self.local_port),
            format_host_port(&self.remote_host, self.remote_port)
        )
    }

    pub fn has_browser_url(&self) -> bool {
        !self.browser_url.trim().is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Format a host and port, bracketing IPv6 literals
pub fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Raw user input for the add/edit form, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelDraft {
    pub name: String,
    pub ip_address: String,
    pub pem_file_name: String,
    pub local_port: String,
    pub remote_host: String,
    pub remote_port: String,
    pub browser_url: String,
}

impl TunnelDraft {
    /// Pre-fill a draft from an existing definition (edit form)
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self {
            name: config.name.clone(),
            ip_address: config.ip_address.clone(),
            pem_file_name: config.pem_file_name.clone(),
            local_port: config.local_port.to_string(),
            remote_host: config.remote_host.clone(),
            remote_port: config.remote_port.to_string(),
            browser_url: config.browser_url.clone(),
        }
    }

    /// Validate the form and build a tunnel definition
    pub fn into_config(self) -> Result<TunnelConfig> {
        require("Name", &self.name)?;
        require("IpAddress", &self.ip_address)?;
        require("PemFileName", &self.pem_file_name)?;
        require("RemoteHost", &self.remote_host)?;

        let local_port = parse_port("LocalPort", &self.local_port)?;
        let remote_port = parse_port("RemotePort", &self.remote_port)?;

        Ok(TunnelConfig {
            name: self.name.trim().to_string(),
            ip_address: self.ip_address.trim().to_string(),
            pem_file_name: self.pem_file_name.trim().to_string(),
            local_port,
            remote_host: self.remote_host.trim().to_string(),
            remote_port,
            browser_url: self.browser_url.trim().to_string(),
        })
    }
}

fn parse_port(field: &str, value: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::Validation(format!(
            "{} must be a number between 1 and 65535 (got '{}')",
            field,
            value.trim()
        ))),
    }
}

/// Cross-cutting settings stored in `globalconfig.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct GlobalConfig {
    /// Base directory for `TunnelConfig::pem_file_name`
    #[serde(default)]
    pub pem_directory_path: String,
}

impl GlobalConfig {
    pub fn pem_directory(&self) -> PathBuf {
        PathBuf::from(&self.pem_directory_path)
    }
}

/// Outcome of a successful toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionResult {
    Connected { name: String },
    Disconnected { name: String },
}

impl ConnectionResult {
    pub fn name(&self) -> &str {
        match self {
            ConnectionResult::Connected { name } | ConnectionResult::Disconnected { name } => name,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionResult::Connected { .. })
    }
}

/// Events emitted by the lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelEvent {
    /// Connect attempt started
    Connecting { name: String, timestamp: DateTime<Utc> },

    /// Forwarding is running
    Connected { name: String, timestamp: DateTime<Utc> },

    /// Session torn down
    Disconnected { name: String, timestamp: DateTime<Utc> },

    /// Connect or disconnect failed
    Error {
        name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl TunnelEvent {
    pub fn name(&self) -> &str {
        match self {
            TunnelEvent::Connecting { name, .. }
            | TunnelEvent::Connected { name, .. }
            | TunnelEvent::Disconnected { name, .. }
            | TunnelEvent::Error { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TunnelConfig {
        TunnelConfig {
            name: "db".to_string(),
            ip_address: "10.0.0.5".to_string(),
            pem_file_name: "a.pem".to_string(),
            local_port: 5432,
            remote_host: "db.internal".to_string(),
            remote_port: 5432,
            browser_url: String::new(),
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        for field in [
            "Name",
            "IpAddress",
            "PemFileName",
            "LocalPort",
            "RemoteHost",
            "RemotePort",
            "BrowserUrl",
        ] {
            assert!(obj.contains_key(field), "missing {}", field);
        }

        let global = serde_json::to_value(GlobalConfig {
            pem_directory_path: "/keys".to_string(),
        })
        .unwrap();
        assert_eq!(global["PemDirectoryPath"], "/keys");
    }

    #[test]
    fn test_browser_url_optional() {
        let json = r#"{"Name":"web","IpAddress":"1.2.3.4","PemFileName":"k.pem",
            "LocalPort":8080,"RemoteHost":"localhost","RemotePort":80}"#;
        let config: TunnelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.browser_url, "");
        assert!(!config.has_browser_url());

        let json = r#"{"Name":"web","IpAddress":"1.2.3.4","PemFileName":"k.pem",
            "LocalPort":8080,"RemoteHost":"localhost","RemotePort":80,"BrowserUrl":null}"#;
        let config: TunnelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.browser_url, "");
    }

    #[test]
    fn test_credential_path() {
        let config = sample();
        assert_eq!(
            config.credential_path(Path::new("/keys")),
            PathBuf::from("/keys/a.pem")
        );
    }

    #[test]
    fn test_ssh_endpoint() {
        let mut config = sample();
        assert_eq!(config.ssh_endpoint(), ("10.0.0.5".to_string(), 22));

        config.ip_address = "bastion.example.com:2222".to_string();
        assert_eq!(
            config.ssh_endpoint(),
            ("bastion.example.com".to_string(), 2222)
        );

        config.ip_address = "[::1]:2200".to_string();
        assert_eq!(config.ssh_endpoint(), ("::1".to_string(), 2200));

        config.ip_address = "fe80::1".to_string();
        assert_eq!(config.ssh_endpoint(), ("fe80::1".to_string(), 22));
    }

    #[test]
    fn test_draft_validation() {
        let draft = TunnelDraft::from_config(&sample());
        assert_eq!(draft.clone().into_config().unwrap(), sample());

        let mut missing = draft.clone();
        missing.remote_host = "  ".to_string();
        let err = missing.into_config().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("RemoteHost"));

        let mut bad_port = draft.clone();
        bad_port.local_port = "eighty".to_string();
        assert!(bad_port.into_config().unwrap_err().is_validation());

        let mut zero_port = draft;
        zero_port.remote_port = "0".to_string();
        assert!(zero_port.into_config().is_err());
    }

    #[test]
    fn test_forward_description() {
        assert_eq!(
            sample().forward_description(),
            "127.0.0.1:5432 → db.internal:5432"
        );
        assert_eq!(format_host_port("::1", 22), "[::1]:22");
    }

    #[test]
    fn test_connection_result_serialization() {
        let result = ConnectionResult::Connected {
            name: "db".to_string(),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"status":"connected","name":"db"}"#);
        assert!(result.is_connected());
        assert_eq!(result.name(), "db");
    }
}
