// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - Tunnel Lifecycle Manager
// Connects and disconnects tunnels, one active session per name

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use pemtunnel_common::{
    format_host_port, ConnectionResult, Error, Result, TunnelConfig, TunnelEvent,
    LOCAL_BIND_ADDRESS,
};

use crate::registry::{ActiveSession, ConnectionRegistry};
use crate::ssh::{SshConnector, SshSession, LOGIN_USER};

/// Default bound on establishing and authenticating a session
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

const EVENT_CAPACITY: usize = 100;

/// Manages all SSH tunnels
#[derive(Clone)]
pub struct TunnelManager {
    connector: Arc<dyn SshConnector>,
    registry: ConnectionRegistry,
    pem_directory: Arc<RwLock<PathBuf>>,
    event_tx: broadcast::Sender<TunnelEvent>,
    connect_timeout: Duration,
}

impl TunnelManager {
    pub fn new(connector: Arc<dyn SshConnector>, pem_directory: impl Into<PathBuf>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector,
            registry: ConnectionRegistry::new(),
            pem_directory: Arc::new(RwLock::new(pem_directory.into())),
            event_tx,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Subscribe to tunnel events
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.event_tx.subscribe()
    }

    pub async fn pem_directory(&self) -> PathBuf {
        self.pem_directory.read().await.clone()
    }

    /// Directory used to resolve key files on the next connect
    pub async fn set_pem_directory(&self, directory: impl Into<PathBuf>) {
        *self.pem_directory.write().await = directory.into();
    }

    /// Connect `config` if it is down, disconnect it if it is up
    pub async fn toggle(&self, config: &TunnelConfig) -> Result<ConnectionResult> {
        let _guard = self.registry.lock_name(&config.name).await;

        if self.registry.contains(&config.name).await {
            self.disconnect_locked(&config.name).await
        } else {
            self.connect_locked(config).await
        }
    }

    pub async fn connect(&self, config: &TunnelConfig) -> Result<ConnectionResult> {
        let _guard = self.registry.lock_name(&config.name).await;

        if self.registry.contains(&config.name).await {
            return Err(Error::AlreadyConnected(config.name.clone()));
        }
        self.connect_locked(config).await
    }

    pub async fn disconnect(&self, name: &str) -> Result<ConnectionResult> {
        let _guard = self.registry.lock_name(name).await;
        self.disconnect_locked(name).await
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        self.registry.contains(name).await
    }

    pub async fn active_names(&self) -> Vec<String> {
        self.registry.names().await
    }

    pub async fn connected_since(&self, name: &str) -> Option<DateTime<Utc>> {
        self.registry.connected_since(name).await
    }

    /// Tear down every session (best-effort). Connects still in flight are
    /// closed when they finish instead of being registered.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain().await;
        if sessions.is_empty() {
            return;
        }

        info!("Disconnecting {} tunnel(s)", sessions.len());
        for session in sessions {
            debug!("Closing '{}' ({})", session.name(), session.forward_description());
            match session.teardown().await {
                Ok(()) => self.emit(TunnelEvent::Disconnected {
                    name: session.name().to_string(),
                    timestamp: Utc::now(),
                }),
                Err(e) => debug!("Error disconnecting '{}' during shutdown: {}", session.name(), e),
            }
        }
    }

    async fn connect_locked(&self, config: &TunnelConfig) -> Result<ConnectionResult> {
        self.emit(TunnelEvent::Connecting {
            name: config.name.clone(),
            timestamp: Utc::now(),
        });

        match self.establish_and_register(config).await {
            Ok(()) => {
                info!("Tunnel '{}' connected: {}", config.name, config.forward_description());
                self.emit(TunnelEvent::Connected {
                    name: config.name.clone(),
                    timestamp: Utc::now(),
                });
                Ok(ConnectionResult::Connected {
                    name: config.name.clone(),
                })
            }
            Err(e) => {
                warn!("Failed to connect '{}': {}", config.name, e);
                self.emit_error(&config.name, &e);
                Err(e)
            }
        }
    }

    async fn establish_and_register(&self, config: &TunnelConfig) -> Result<()> {
        if self.registry.is_closed() {
            return Err(Error::ShuttingDown(config.name.clone()));
        }

        let session = Arc::new(self.establish(config).await?);
        if let Err(e) = self.registry.insert(session.clone()).await {
            // Never registered, so nothing else will close it
            if let Err(teardown) = session.teardown().await {
                debug!("Error closing unregistered session '{}': {}", config.name, teardown);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn establish(&self, config: &TunnelConfig) -> Result<ActiveSession> {
        config.validate()?;

        let key_path = config.credential_path(&self.pem_directory().await);
        if !key_path.exists() {
            return Err(Error::CredentialNotFound(key_path));
        }
        let credential = self.connector.load_private_key(&key_path)?;

        let (host, port) = config.ssh_endpoint();
        let mut session = tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(&host, port, LOGIN_USER, credential),
        )
        .await
        .map_err(|_| {
            Error::Connect(format!(
                "Connection to {} timed out after {}s",
                format_host_port(&host, port),
                self.connect_timeout.as_secs()
            ))
        })??;

        let forward = session.local_forward(
            LOCAL_BIND_ADDRESS,
            config.local_port,
            &config.remote_host,
            config.remote_port,
        );
        let mut forward = match forward {
            Ok(forward) => forward,
            Err(e) => {
                abandon(&config.name, session.as_mut()).await;
                return Err(e);
            }
        };

        if let Err(e) = forward.start().await {
            abandon(&config.name, session.as_mut()).await;
            return Err(e);
        }

        Ok(ActiveSession::new(
            config.name.clone(),
            config.forward_description(),
            session,
            forward,
        ))
    }

    async fn disconnect_locked(&self, name: &str) -> Result<ConnectionResult> {
        let active = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| Error::NotConnected(name.to_string()))?;

        info!("Disconnecting tunnel '{}'", name);
        if let Err(e) = active.teardown().await {
            // The entry stays registered; a later toggle retries the teardown
            let e = match e {
                Error::Disconnect(_) => e,
                other => Error::Disconnect(other.to_string()),
            };
            warn!("Failed to disconnect '{}': {}", name, e);
            self.emit_error(name, &e);
            return Err(e);
        }

        self.registry.remove(name).await;
        self.emit(TunnelEvent::Disconnected {
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        Ok(ConnectionResult::Disconnected {
            name: name.to_string(),
        })
    }

    fn emit(&self, event: TunnelEvent) {
        if let Err(e) = self.event_tx.send(event) {
            debug!("No subscribers for tunnel event: {}", e);
        }
    }

    fn emit_error(&self, name: &str, error: &Error) {
        self.emit(TunnelEvent::Error {
            name: name.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Close a session that never made it into the registry
async fn abandon(name: &str, session: &mut dyn SshSession) {
    if let Err(e) = session.disconnect().await {
        warn!("Failed to close half-open session for '{}': {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::{
        test_keys, Credential, ForwardHandle, MockForwardHandle, MockSshConnector,
        MockSshSession,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn config(name: &str) -> TunnelConfig {
        TunnelConfig {
            name: name.to_string(),
            ip_address: "10.0.0.5".to_string(),
            pem_file_name: "a.pem".to_string(),
            local_port: 8080,
            remote_host: "localhost".to_string(),
            remote_port: 80,
            browser_url: String::new(),
        }
    }

    fn pem_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pem"), test_keys::ED25519_KEY).unwrap();
        dir
    }

    fn working_forward() -> Box<dyn ForwardHandle> {
        let mut forward = MockForwardHandle::new();
        forward.expect_start().returning(|| Ok(()));
        forward.expect_stop().returning(|| ());
        Box::new(forward)
    }

    fn session_with(
        disconnects: Arc<AtomicUsize>,
        disconnect_result: fn() -> Result<()>,
    ) -> Box<dyn SshSession> {
        let mut session = MockSshSession::new();
        session
            .expect_local_forward()
            .returning(|_, _, _, _| Ok(working_forward()));
        session.expect_disconnect().returning(move || {
            disconnects.fetch_add(1, Ordering::SeqCst);
            disconnect_result()
        });
        Box::new(session)
    }

    fn connector(
        connects: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
        disconnect_result: fn() -> Result<()>,
    ) -> MockSshConnector {
        let mut connector = MockSshConnector::new();
        connector
            .expect_load_private_key()
            .returning(|path| Ok(Credential::new(path, test_keys::private_key())));
        connector.expect_connect().returning(move |_, _, user, _| {
            assert_eq!(user, LOGIN_USER);
            connects.fetch_add(1, Ordering::SeqCst);
            Ok(session_with(disconnects.clone(), disconnect_result))
        });
        connector
    }

    fn manager(connector: MockSshConnector, dir: &TempDir) -> TunnelManager {
        TunnelManager::new(Arc::new(connector), dir.path())
    }

    #[tokio::test]
    async fn test_missing_credential_leaves_registry_unchanged() {
        let dir = TempDir::new().unwrap();
        // No expectations: any call to the connector fails the test
        let manager = manager(MockSshConnector::new(), &dir);

        let err = manager.toggle(&config("db")).await.unwrap_err();
        match err {
            Error::CredentialNotFound(path) => assert_eq!(path, dir.path().join("a.pem")),
            other => panic!("expected CredentialNotFound, got {:?}", other),
        }
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_toggle_round_trip() {
        let dir = pem_dir();
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let manager = manager(
            connector(connects.clone(), disconnects.clone(), || Ok(())),
            &dir,
        );

        let result = manager.toggle(&config("db")).await.unwrap();
        assert_eq!(result, ConnectionResult::Connected { name: "db".into() });
        assert!(manager.is_connected("db").await);
        assert_eq!(manager.active_names().await, vec!["db"]);

        let result = manager.toggle(&config("db")).await.unwrap();
        assert_eq!(result, ConnectionResult::Disconnected { name: "db".into() });
        assert!(manager.registry().is_empty().await);

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_register_once() {
        let dir = pem_dir();
        let connects = Arc::new(AtomicUsize::new(0));
        let manager = manager(
            connector(connects.clone(), Arc::new(AtomicUsize::new(0)), || Ok(())),
            &dir,
        );

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(&config("db")).await }
        });
        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(&config("db")).await }
        });

        let results = [first.await.unwrap(), second.await.unwrap()];
        let connected = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(Error::AlreadyConnected(_))))
            .count();

        assert_eq!((connected, refused), (1, 1));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.registry().len().await, 1);
    }

    #[tokio::test]
    async fn test_bind_failure_closes_session() {
        let dir = pem_dir();
        let disconnects = Arc::new(AtomicUsize::new(0));

        let mut connector = MockSshConnector::new();
        connector
            .expect_load_private_key()
            .returning(|path| Ok(Credential::new(path, test_keys::private_key())));
        let counter = disconnects.clone();
        connector.expect_connect().returning(move |_, _, _, _| {
            let mut session = MockSshSession::new();
            session.expect_local_forward().returning(|_, port, _, _| {
                let mut forward = MockForwardHandle::new();
                forward.expect_start().returning(move || {
                    Err(Error::PortInUse {
                        port,
                        reason: "already in use".to_string(),
                    })
                });
                Ok(Box::new(forward) as Box<dyn ForwardHandle>)
            });
            let counter = counter.clone();
            session.expect_disconnect().returning(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(Box::new(session) as Box<dyn SshSession>)
        });

        let manager = manager(connector, &dir);
        let mut events = manager.subscribe();

        let err = manager.toggle(&config("db")).await.unwrap_err();
        assert!(matches!(err, Error::PortInUse { port: 8080, .. }));
        assert!(manager.registry().is_empty().await);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        assert!(matches!(events.recv().await.unwrap(), TunnelEvent::Connecting { .. }));
        assert!(matches!(events.recv().await.unwrap(), TunnelEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_failed_disconnect_keeps_entry() {
        let dir = pem_dir();
        let manager = manager(
            connector(
                Arc::new(AtomicUsize::new(0)),
                Arc::new(AtomicUsize::new(0)),
                || Err(Error::Disconnect("connection reset".to_string())),
            ),
            &dir,
        );

        manager.toggle(&config("db")).await.unwrap();
        let err = manager.toggle(&config("db")).await.unwrap_err();
        assert!(matches!(err, Error::Disconnect(_)));
        assert!(manager.is_connected("db").await);
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected() {
        let dir = pem_dir();
        let manager = manager(MockSshConnector::new(), &dir);
        assert!(matches!(
            manager.disconnect("db").await,
            Err(Error::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_events_for_connect_and_disconnect() {
        let dir = pem_dir();
        let manager = manager(
            connector(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)), || Ok(())),
            &dir,
        );
        let mut events = manager.subscribe();

        manager.toggle(&config("db")).await.unwrap();
        manager.toggle(&config("db")).await.unwrap();

        let kinds: Vec<&'static str> = (0..3)
            .map(|_| match events.try_recv().unwrap() {
                TunnelEvent::Connecting { .. } => "connecting",
                TunnelEvent::Connected { .. } => "connected",
                TunnelEvent::Disconnected { .. } => "disconnected",
                TunnelEvent::Error { .. } => "error",
            })
            .collect();
        assert_eq!(kinds, vec!["connecting", "connected", "disconnected"]);
    }

    #[tokio::test]
    async fn test_shutdown_clears_every_session() {
        let dir = pem_dir();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let manager = manager(
            connector(Arc::new(AtomicUsize::new(0)), disconnects.clone(), || {
                Err(Error::Disconnect("already gone".to_string()))
            }),
            &dir,
        );

        manager.connect(&config("db")).await.unwrap();
        manager.connect(&config("web")).await.unwrap();

        manager.shutdown().await;
        assert!(manager.registry().is_empty().await);
        assert_eq!(disconnects.load(Ordering::SeqCst), 2);
    }

    /// Connects only once the test releases the gate
    struct GatedConnector {
        gate: Arc<tokio::sync::Notify>,
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl SshConnector for GatedConnector {
        fn load_private_key(&self, path: &std::path::Path) -> Result<Credential> {
            Ok(Credential::new(path, test_keys::private_key()))
        }

        async fn connect(
            &self,
            _host: &str,
            _port: u16,
            _username: &str,
            _credential: Credential,
        ) -> Result<Box<dyn SshSession>> {
            self.gate.notified().await;
            Ok(session_with(self.disconnects.clone(), || Ok(())))
        }
    }

    #[tokio::test]
    async fn test_connect_finishing_after_shutdown_is_closed() {
        let dir = pem_dir();
        let gate = Arc::new(tokio::sync::Notify::new());
        let disconnects = Arc::new(AtomicUsize::new(0));
        let manager = TunnelManager::new(
            Arc::new(GatedConnector {
                gate: gate.clone(),
                disconnects: disconnects.clone(),
            }),
            dir.path(),
        );

        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(&config("db")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.shutdown().await;
        gate.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ShuttingDown(name) if name == "db"));
        assert!(manager.registry().is_empty().await);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        // Later connects are refused before dialing
        assert!(matches!(
            manager.connect(&config("web")).await,
            Err(Error::ShuttingDown(_))
        ));
    }

    #[tokio::test]
    async fn test_pem_directory_change_applies_to_next_connect() {
        let empty = TempDir::new().unwrap();
        let keys = pem_dir();
        let manager = manager(
            connector(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)), || Ok(())),
            &empty,
        );

        assert!(manager.toggle(&config("db")).await.is_err());
        manager.set_pem_directory(keys.path()).await;
        assert!(manager.toggle(&config("db")).await.unwrap().is_connected());
    }
}
