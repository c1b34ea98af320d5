// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// SSH collaborator interfaces used by the lifecycle manager.
// The russh-backed implementation lives in `client` and `forward`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::keys::PrivateKey;

#[cfg(test)]
use mockall::automock;

use pemtunnel_common::Result;

/// Login used for every tunnel; not configurable
pub const LOGIN_USER: &str = "ubuntu";

/// A loaded private key
#[derive(Clone)]
pub struct Credential {
    path: PathBuf,
    key: Arc<PrivateKey>,
}

impl Credential {
    pub fn new(path: impl Into<PathBuf>, key: PrivateKey) -> Self {
        Self {
            path: path.into(),
            key: Arc::new(key),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> Arc<PrivateKey> {
        self.key.clone()
    }
}

// Never print key material
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("path", &self.path)
            .field("algorithm", &self.key.algorithm())
            .finish()
    }
}

/// Opens authenticated SSH sessions
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Load a private key file; fails if the file is unreadable or malformed
    fn load_private_key(&self, path: &Path) -> Result<Credential>;

    /// Connect and authenticate with the given key
    async fn connect(
        &self,
        host: &str,
        port: u16,
        username: &str,
        credential: Credential,
    ) -> Result<Box<dyn SshSession>>;
}

/// An authenticated SSH transport
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SshSession: Send + Sync {
    /// Describe a local forward scoped to this session. Nothing is bound until `start`.
    fn local_forward(
        &self,
        bind_address: &str,
        bind_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Box<dyn ForwardHandle>>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// A local port forward
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ForwardHandle: Send + Sync {
    /// Bind the local port and begin relaying connections
    async fn start(&mut self) -> Result<()>;

    /// Stop accepting connections and release the port. Safe to call twice.
    async fn stop(&mut self);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_hides_key() {
        let credential = Credential::new("/keys/a.pem", test_keys::private_key());
        let debug = format!("{:?}", credential);
        assert!(debug.contains("/keys/a.pem"));
        assert!(!debug.contains("BEGIN OPENSSH"));
        assert_eq!(credential.path(), Path::new("/keys/a.pem"));
    }
}
