// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// Error types for pemtunnel

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad user input (missing field, bad port, duplicate name)
    #[error("Invalid tunnel definition: {0}")]
    Validation(String),

    #[error("PEM file not found: {}", .0.display())]
    CredentialNotFound(PathBuf),

    #[error("Failed to load private key: {0}")]
    Credential(String),

    #[error("SSH connection error: {0}")]
    Connect(String),

    #[error("Local port {port} is unavailable: {reason}")]
    PortInUse { port: u16, reason: String },

    /// Teardown failed; the registry entry is left in place so it can be retried
    #[error("Failed to disconnect: {0}")]
    Disconnect(String),

    #[error("Tunnel '{0}' is already connected")]
    AlreadyConnected(String),

    #[error("Tunnel '{0}' is not connected")]
    NotConnected(String),

    /// A connect finished after shutdown started; its session was closed
    #[error("Shutting down; tunnel '{0}' was not kept open")]
    ShuttingDown(String),

    #[error("Tunnel not found: {0}")]
    TunnelNotFound(String),

    #[error("No browser URL specified for '{0}'")]
    NoBrowserUrl(String),

    #[error("Failed to open browser: {0}")]
    Browser(String),

    /// Corrupt JSON in one of the persisted files
    #[error("Failed to parse {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for errors caused by input the user can correct before retrying
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
