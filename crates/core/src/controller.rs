// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - Tunnel Controller
// The operations a front end can perform on tunnels

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use pemtunnel_common::{
    missing_credentials_warning, ConnectionResult, DataDir, EntryId, Error, Result,
    SettingsStore, TunnelConfig, TunnelDraft, TunnelRow, TunnelStore,
};

use crate::browser::{BrowserLauncher, SystemBrowser};
use crate::client::RusshConnector;
use crate::manager::TunnelManager;
use crate::ssh::SshConnector;

/// Owns the tunnel store, the settings and the lifecycle manager.
///
/// Tunnels are addressed by position because an import may repeat a name.
/// Only one entry per name can be connected; `owners` records which.
///
/// Store mutations take `&mut self`; connection changes only need `&self`
/// and may run concurrently for different tunnels.
pub struct TunnelController {
    tunnels: TunnelStore,
    settings: SettingsStore,
    manager: TunnelManager,
    browser: Arc<dyn BrowserLauncher>,
    owners: RwLock<HashMap<String, EntryId>>,
}

impl TunnelController {
    /// Load everything from `data_dir` using the russh client and the system browser.
    ///
    /// Returns the controller and any warnings to show the user once:
    /// corrupt files that were replaced by defaults, and missing PEM files.
    pub fn open(data_dir: &DataDir, connect_timeout: Duration) -> Result<(Self, Vec<String>)> {
        let connector = Arc::new(RusshConnector::new(data_dir.known_hosts_path()));
        Self::open_with(data_dir, connector, Arc::new(SystemBrowser), connect_timeout)
    }

    pub fn open_with(
        data_dir: &DataDir,
        connector: Arc<dyn SshConnector>,
        browser: Arc<dyn BrowserLauncher>,
        connect_timeout: Duration,
    ) -> Result<(Self, Vec<String>)> {
        let mut warnings = Vec::new();

        let (settings, settings_error) =
            SettingsStore::load_or_recover(data_dir.global_config_path())?;
        warnings.extend(settings_error.map(|e| e.to_string()));

        let (tunnels, tunnels_error) = TunnelStore::load_or_recover(data_dir.tunnels_path())?;
        warnings.extend(tunnels_error.map(|e| e.to_string()));

        let missing = settings.missing_credentials(tunnels.iter());
        if let Some(warning) = missing_credentials_warning(&missing) {
            warn!("{}", warning);
            warnings.push(warning);
        }

        info!(
            "Loaded {} tunnel(s) from {}",
            tunnels.len(),
            data_dir.root().display()
        );

        let manager = TunnelManager::new(connector, settings.pem_directory())
            .with_connect_timeout(connect_timeout);

        Ok((
            Self {
                tunnels,
                settings,
                manager,
                browser,
                owners: RwLock::new(HashMap::new()),
            },
            warnings,
        ))
    }

    pub fn manager(&self) -> &TunnelManager {
        &self.manager
    }

    pub fn tunnels(&self) -> &[TunnelConfig] {
        self.tunnels.tunnels()
    }

    /// Find a tunnel by name, or by `#N` (1-based position as listed).
    ///
    /// A name shared by several entries is refused; the error lists their positions.
    pub fn resolve(&self, reference: &str) -> Result<usize> {
        match self.tunnels.positions(reference).as_slice() {
            [index] => return Ok(*index),
            [] => {}
            many => {
                let positions: Vec<String> = many.iter().map(|i| format!("#{}", i + 1)).collect();
                return Err(Error::Validation(format!(
                    "{} tunnels are named '{}'; pick one by position ({})",
                    many.len(),
                    reference,
                    positions.join(", ")
                )));
            }
        }

        reference
            .strip_prefix('#')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| (1..=self.tunnels.len()).contains(n))
            .map(|n| n - 1)
            .ok_or_else(|| Error::TunnelNotFound(reference.to_string()))
    }

    pub fn get(&self, index: usize) -> Result<&TunnelConfig> {
        self.tunnels
            .get(index)
            .ok_or_else(|| Error::TunnelNotFound(format!("#{}", index + 1)))
    }

    fn entry(&self, index: usize) -> Result<(EntryId, TunnelConfig)> {
        match (self.tunnels.id_at(index), self.tunnels.get(index)) {
            (Some(id), Some(config)) => Ok((id, config.clone())),
            _ => Err(Error::TunnelNotFound(format!("#{}", index + 1))),
        }
    }

    /// One row per tunnel, in store order
    pub async fn rows(&self, show_details: bool) -> Vec<TunnelRow> {
        let connected = self.manager.registry().snapshot().await;
        let owners = self.owners.read().await;

        self.tunnels
            .entries()
            .enumerate()
            .map(|(index, (id, t))| {
                let since = connected
                    .get(&t.name)
                    .copied()
                    .filter(|_| owners.get(&t.name) == Some(&id));
                TunnelRow::from_config(index, t, since, show_details)
            })
            .collect()
    }

    /// True when this entry, not just its name, holds a live session
    pub async fn is_connected(&self, index: usize) -> bool {
        match self.entry(index) {
            Ok((id, config)) => self.owns(id, &config.name).await,
            Err(_) => false,
        }
    }

    async fn owns(&self, id: EntryId, name: &str) -> bool {
        let owner = self.owners.read().await.get(name).copied();
        owner == Some(id) && self.manager.is_connected(name).await
    }

    pub async fn toggle(&self, index: usize) -> Result<ConnectionResult> {
        let (id, config) = self.entry(index)?;
        if self.owns(id, &config.name).await {
            self.release(&config.name).await
        } else {
            self.claim(id, &config).await
        }
    }

    pub async fn connect(&self, index: usize) -> Result<ConnectionResult> {
        let (id, config) = self.entry(index)?;
        self.claim(id, &config).await
    }

    pub async fn disconnect(&self, index: usize) -> Result<ConnectionResult> {
        let (id, config) = self.entry(index)?;
        if !self.owns(id, &config.name).await {
            return Err(Error::NotConnected(config.name));
        }
        self.release(&config.name).await
    }

    /// Connect `config` on behalf of entry `id`. Fails with `AlreadyConnected`
    /// when another entry with the same name holds the session.
    async fn claim(&self, id: EntryId, config: &TunnelConfig) -> Result<ConnectionResult> {
        let result = self.manager.connect(config).await?;
        self.owners.write().await.insert(config.name.clone(), id);
        Ok(result)
    }

    async fn release(&self, name: &str) -> Result<ConnectionResult> {
        let result = self.manager.disconnect(name).await?;
        self.owners.write().await.remove(name);
        Ok(result)
    }

    pub fn add(&mut self, draft: TunnelDraft) -> Result<TunnelConfig> {
        let config = draft.into_config()?;
        self.tunnels.add(config.clone())?;
        info!("Added tunnel '{}'", config.name);
        Ok(config)
    }

    /// Replace a definition. Refused while that entry is connected.
    pub async fn edit(&mut self, index: usize, draft: TunnelDraft) -> Result<TunnelConfig> {
        let (id, current) = self.entry(index)?;
        let config = draft.into_config()?;

        if self.owns(id, &current.name).await {
            return Err(Error::Validation(format!(
                "Disconnect '{}' before editing it",
                current.name
            )));
        }

        self.tunnels.edit(index, config.clone())?;
        info!("Updated tunnel #{} '{}'", index + 1, config.name);
        Ok(config)
    }

    /// Remove a definition, disconnecting it first. Returns false if absent.
    pub async fn remove(&mut self, index: usize) -> Result<bool> {
        let Ok((id, config)) = self.entry(index) else {
            return Ok(false);
        };

        if self.owns(id, &config.name).await {
            match self.release(&config.name).await {
                Ok(_) | Err(Error::NotConnected(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let removed = self.tunnels.remove(index)?;
        info!("Removed tunnel '{}'", config.name);
        Ok(removed)
    }

    /// Append every definition in a JSON file. Returns how many were added.
    pub fn import(&mut self, path: &Path) -> Result<usize> {
        let count = self.tunnels.import_file(path)?;
        info!("Imported {} tunnel(s) from {}", count, path.display());
        Ok(count)
    }

    pub fn pem_directory(&self) -> PathBuf {
        self.settings.pem_directory()
    }

    pub async fn set_pem_directory(&mut self, directory: &Path) -> Result<()> {
        self.settings.set_pem_directory(directory)?;
        self.manager
            .set_pem_directory(self.settings.pem_directory())
            .await;
        Ok(())
    }

    /// Key files referenced by tunnels that do not exist
    pub fn missing_credentials(&self) -> Vec<PathBuf> {
        self.settings.missing_credentials(self.tunnels.iter())
    }

    /// Open a connected tunnel's browser URL
    pub async fn open_browser(&self, index: usize) -> Result<()> {
        let (id, config) = self.entry(index)?;

        if !self.owns(id, &config.name).await {
            return Err(Error::NotConnected(config.name));
        }
        if !config.has_browser_url() {
            return Err(Error::NoBrowserUrl(config.name));
        }

        self.browser.open(config.browser_url.trim())
    }

    /// Toggle, then open the browser URL if the tunnel came up and has one
    pub async fn open_after_connect(&self, index: usize) -> Result<ConnectionResult> {
        let result = self.toggle(index).await?;

        if result.is_connected() {
            let config = self.get(index)?;
            if config.has_browser_url() {
                if let Err(e) = self.browser.open(config.browser_url.trim()) {
                    warn!("Tunnel '{}' is up but the browser failed: {}", config.name, e);
                }
            }
        }

        Ok(result)
    }

    /// Disconnect everything
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        self.owners.write().await.clear();
    }
}
