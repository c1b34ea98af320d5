// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - Local port forwarding
// Accepts on 127.0.0.1 and relays each connection over a direct-tcpip channel

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use pemtunnel_common::{Error, Result};

use crate::client::ClientHandler;
use crate::ssh::ForwardHandle;

/// Consecutive channel-open failures before the session is considered dead
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Grace period for the accept loop to exit before it is aborted
const STOP_GRACE: Duration = Duration::from_millis(100);

pub(crate) struct LocalForward {
    handle: Arc<Handle<ClientHandler>>,
    bind_addr: SocketAddr,
    remote_host: String,
    remote_port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LocalForward {
    pub(crate) fn new(
        handle: Arc<Handle<ClientHandler>>,
        bind_addr: SocketAddr,
        remote_host: String,
        remote_port: u16,
    ) -> Self {
        Self {
            handle,
            bind_addr,
            remote_host,
            remote_port,
            shutdown_tx: None,
            task: None,
        }
    }
}

#[async_trait]
impl ForwardHandle for LocalForward {
    async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        let listener = bind_local(self.bind_addr).await?;
        info!(
            "Forwarding {} -> {}:{}",
            self.bind_addr, self.remote_host, self.remote_port
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(tokio::spawn(accept_loop(
            listener,
            self.handle.clone(),
            self.remote_host.clone(),
            self.remote_port,
            shutdown_rx,
        )));

        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                task.abort();
            }
            debug!("Stopped forward on {}", self.bind_addr);
        }
    }
}

impl Drop for LocalForward {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Bind the local end of a forward, reporting an occupied port as `PortInUse`
pub async fn bind_local(bind_addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(bind_addr).await.map_err(|e| {
        let reason = match e.kind() {
            std::io::ErrorKind::AddrInUse => format!("{} is already in use", bind_addr),
            std::io::ErrorKind::PermissionDenied => format!(
                "permission denied binding to {}; ports below 1024 require elevated privileges",
                bind_addr
            ),
            _ => format!("failed to bind to {}: {}", bind_addr, e),
        };
        Error::PortInUse {
            port: bind_addr.port(),
            reason,
        }
    })
}

async fn accept_loop(
    listener: TcpListener,
    handle: Arc<Handle<ClientHandler>>,
    remote_host: String,
    remote_port: u16,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut consecutive_failures = 0;

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };
        debug!("Accepted connection from {}", peer_addr);

        let channel = match handle
            .channel_open_direct_tcpip(
                remote_host.as_str(),
                remote_port.into(),
                peer_addr.ip().to_string(),
                peer_addr.port().into(),
            )
            .await
        {
            Ok(channel) => {
                consecutive_failures = 0;
                channel
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "Failed to open channel to {}:{} ({}/{}): {}",
                    remote_host, remote_port, consecutive_failures, MAX_CONSECUTIVE_FAILURES, e
                );
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    error!("SSH session appears dead; no longer accepting connections");
                    break;
                }
                continue;
            }
        };

        tokio::spawn(async move {
            if let Err(e) = relay(stream, channel).await {
                debug!("Forward connection from {} ended: {}", peer_addr, e);
            }
        });
    }
}

async fn relay(mut tcp_stream: TcpStream, channel: russh::Channel<client::Msg>) -> Result<()> {
    let mut channel_stream = channel.into_stream();
    let (sent, received) = copy_bidirectional(&mut tcp_stream, &mut channel_stream).await?;
    debug!("Forward connection closed: {} bytes out, {} bytes in", sent, received);
    Ok(())
}
