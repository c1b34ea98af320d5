// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - russh client
// Public key authentication and host key checks

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, AuthResult, Config, Handle};
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg};
use tracing::{debug, info, warn};

use pemtunnel_common::{format_host_port, Error, Result};

use crate::forward::LocalForward;
use crate::known_hosts::KnownHosts;
use crate::ssh::{Credential, ForwardHandle, SshConnector, SshSession};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_MAX: usize = 3;

/// Connects with russh, checking server keys against a known_hosts file
#[derive(Debug, Clone)]
pub struct RusshConnector {
    known_hosts_path: PathBuf,
}

impl RusshConnector {
    pub fn new(known_hosts_path: impl Into<PathBuf>) -> Self {
        Self {
            known_hosts_path: known_hosts_path.into(),
        }
    }

    fn client_config() -> Config {
        let mut config = Config::default();
        config.nodelay = true;
        config.keepalive_interval = Some(KEEPALIVE_INTERVAL);
        config.keepalive_max = KEEPALIVE_MAX;
        config
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    fn load_private_key(&self, path: &Path) -> Result<Credential> {
        // Encrypted keys are not supported; no passphrase is ever supplied
        let key = load_secret_key(path, None)
            .map_err(|e| Error::Credential(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded {} key from {}", key.algorithm(), path.display());
        Ok(Credential::new(path, key))
    }

    async fn connect(
        &self,
        host: &str,
        port: u16,
        username: &str,
        credential: Credential,
    ) -> Result<Box<dyn SshSession>> {
        let address = format_host_port(host, port);
        info!("Connecting to {}@{}", username, address);

        let handler = ClientHandler {
            host: host.to_string(),
            port,
            known_hosts_path: self.known_hosts_path.clone(),
        };

        let mut session = client::connect(
            Arc::new(Self::client_config()),
            (host.to_string(), port),
            handler,
        )
        .await
        .map_err(|e| Error::Connect(format!("Failed to connect to {}: {}", address, e)))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .map_err(|e| Error::Connect(e.to_string()))?
            .flatten();

        let auth = session
            .authenticate_publickey(
                username,
                PrivateKeyWithHashAlg::new(credential.key(), hash_alg),
            )
            .await
            .map_err(|e| Error::Connect(format!("Authentication failed: {}", e)))?;

        if let AuthResult::Failure { .. } = auth {
            if let Err(e) = session
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("Disconnect after rejected auth failed: {}", e);
            }
            return Err(Error::Connect(format!(
                "Server rejected key {} for {}@{}",
                credential.path().display(),
                username,
                address
            )));
        }

        info!("Authenticated to {}", address);
        Ok(Box::new(RusshSession {
            handle: Arc::new(session),
            address,
        }))
    }
}

pub(crate) struct ClientHandler {
    host: String,
    port: u16,
    known_hosts_path: PathBuf,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let mut known_hosts = KnownHosts::load(&self.known_hosts_path).map_err(to_russh)?;
        match known_hosts.verify_or_trust(&self.host, self.port, server_public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("{}", e);
                Err(to_russh(e))
            }
        }
    }
}

fn to_russh(error: Error) -> russh::Error {
    russh::Error::from(std::io::Error::other(error.to_string()))
}

/// An authenticated russh session
pub struct RusshSession {
    handle: Arc<Handle<ClientHandler>>,
    address: String,
}

#[async_trait]
impl SshSession for RusshSession {
    fn local_forward(
        &self,
        bind_address: &str,
        bind_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Box<dyn ForwardHandle>> {
        let bind_addr: SocketAddr = format_host_port(bind_address, bind_port)
            .parse()
            .map_err(|_| Error::Validation(format!("Invalid bind address: {}", bind_address)))?;

        Ok(Box::new(LocalForward::new(
            self.handle.clone(),
            bind_addr,
            remote_host.to_string(),
            remote_port,
        )))
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.handle.is_closed() {
            debug!("Session to {} already closed", self.address);
            return Ok(());
        }

        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| Error::Disconnect(format!("{}: {}", self.address, e)))?;

        info!("Disconnected from {}", self.address);
        Ok(())
    }
}
