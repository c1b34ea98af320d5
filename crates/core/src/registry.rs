// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - Connection Registry
// Live sessions keyed by tunnel name

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use pemtunnel_common::{Error, Result};

use crate::ssh::{ForwardHandle, SshSession};

/// A connected tunnel: the SSH session and its running forward
pub struct ActiveSession {
    name: String,
    forward_description: String,
    connected_at: DateTime<Utc>,
    parts: Mutex<SessionParts>,
}

struct SessionParts {
    session: Box<dyn SshSession>,
    forward: Box<dyn ForwardHandle>,
}

impl ActiveSession {
    pub fn new(
        name: impl Into<String>,
        forward_description: impl Into<String>,
        session: Box<dyn SshSession>,
        forward: Box<dyn ForwardHandle>,
    ) -> Self {
        Self {
            name: name.into(),
            forward_description: forward_description.into(),
            connected_at: Utc::now(),
            parts: Mutex::new(SessionParts { session, forward }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn forward_description(&self) -> &str {
        &self.forward_description
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Stop the forward, then close the session
    pub async fn teardown(&self) -> Result<()> {
        let mut parts = self.parts.lock().await;
        parts.forward.stop().await;
        parts.session.disconnect().await
    }
}

type NameLocks = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Name-keyed map of live sessions.
///
/// Presence of a name is the only record that a tunnel is connected.
/// Callers serialise work on one name with [`ConnectionRegistry::lock_name`];
/// different names never wait on each other beyond a map access.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<ActiveSession>>>>,
    closed: Arc<AtomicBool>,
    name_locks: NameLocks,
}

/// Holds one tunnel name until dropped.
///
/// The lock entry is pruned on release when nobody else is waiting for it.
pub struct NameGuard {
    name: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: NameLocks,
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        self.guard.take();

        // Clones are only made under the map lock, so the count is stable here.
        // Two references means the map and this guard.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.name);
        }
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to one tunnel name for the lifetime of the guard
    pub async fn lock_name(&self, name: &str) -> NameGuard {
        let lock = {
            let mut locks = self.name_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;

        NameGuard {
            name: name.to_string(),
            lock,
            guard: Some(guard),
            locks: self.name_locks.clone(),
        }
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.sessions.read().await.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ActiveSession>> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Register a live session. A name can only hold one session, and
    /// nothing is registered once the registry has been drained.
    pub async fn insert(&self, session: Arc<ActiveSession>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown(session.name().to_string()));
        }
        if sessions.contains_key(session.name()) {
            return Err(Error::AlreadyConnected(session.name().to_string()));
        }
        debug!("Registered session '{}'", session.name());
        sessions.insert(session.name().to_string(), session);
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<ActiveSession>> {
        let removed = self.sessions.write().await.remove(name);
        if removed.is_some() {
            debug!("Unregistered session '{}'", name);
        }
        removed
    }

    /// Connected names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn connected_since(&self, name: &str) -> Option<DateTime<Utc>> {
        self.sessions
            .read()
            .await
            .get(name)
            .map(|s| s.connected_at())
    }

    /// Connection time of every live session
    pub async fn snapshot(&self) -> HashMap<String, DateTime<Utc>> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(name, s)| (name.clone(), s.connected_at()))
            .collect()
    }

    /// Take every session out of the registry and refuse later inserts
    pub async fn drain(&self) -> Vec<Arc<ActiveSession>> {
        let mut sessions = self.sessions.write().await;
        self.closed.store(true, Ordering::SeqCst);
        sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.name_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
