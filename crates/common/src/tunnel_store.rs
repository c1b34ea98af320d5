// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - Tunnel Store Module
// In-memory tunnel definitions backed by tunnels.json

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::TunnelConfig;

/// Identity of one store entry for the lifetime of the process.
///
/// Names are not unique after an import, and positions shift on removal,
/// so connection ownership is tracked by this id. It is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

/// Ordered list of tunnel definitions, flushed to disk after every mutation.
///
/// Entries are addressed by position; several entries may share a name.
#[derive(Debug)]
pub struct TunnelStore {
    path: PathBuf,
    tunnels: Vec<TunnelConfig>,
    ids: Vec<EntryId>,
    next_id: u64,
}

impl TunnelStore {
    /// Load the store from `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tunnels = read_tunnels(&path)?;
        debug!("Loaded {} tunnel(s) from {}", tunnels.len(), path.display());
        Ok(Self::with_tunnels(path, tunnels))
    }

    /// Load the store, starting empty if the file is corrupt.
    /// The returned error (if any) should be shown to the user once.
    pub fn load_or_recover(path: impl Into<PathBuf>) -> Result<(Self, Option<Error>)> {
        let path = path.into();
        match read_tunnels(&path) {
            Ok(tunnels) => Ok((Self::with_tunnels(path, tunnels), None)),
            Err(e @ Error::Persistence { .. }) => {
                warn!("{}; starting with no tunnels", e);
                Ok((Self::with_tunnels(path, Vec::new()), Some(e)))
            }
            Err(e) => Err(e),
        }
    }

    fn with_tunnels(path: PathBuf, tunnels: Vec<TunnelConfig>) -> Self {
        let mut store = Self {
            path,
            tunnels: Vec::with_capacity(tunnels.len()),
            ids: Vec::with_capacity(tunnels.len()),
            next_id: 0,
        };
        for config in tunnels {
            store.push(config);
        }
        store
    }

    /// Write all tunnels to disk (full overwrite, pretty-printed)
    pub fn save(&self) -> Result<()> {
        write_tunnels(&self.path, &self.tunnels)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tunnels(&self) -> &[TunnelConfig] {
        &self.tunnels
    }

    pub fn iter(&self) -> impl Iterator<Item = &TunnelConfig> {
        self.tunnels.iter()
    }

    /// Every entry with its id, in store order
    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &TunnelConfig)> {
        self.ids.iter().copied().zip(self.tunnels.iter())
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TunnelConfig> {
        self.tunnels.get(index)
    }

    pub fn id_at(&self, index: usize) -> Option<EntryId> {
        self.ids.get(index).copied()
    }

    /// Positions of every entry named `name`
    pub fn positions(&self, name: &str) -> Vec<usize> {
        self.tunnels
            .iter()
            .enumerate()
            .filter(|(_, t)| t.name == name)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tunnels.iter().any(|t| t.name == name)
    }

    /// Append a new definition. Names must be unique for add.
    pub fn add(&mut self, config: TunnelConfig) -> Result<()> {
        if self.contains(&config.name) {
            return Err(duplicate(&config.name));
        }

        debug!("Adding tunnel '{}'", config.name);
        self.push(config);
        self.save()
    }

    /// Replace the definition at `index`, keeping its position and id
    pub fn edit(&mut self, index: usize, config: TunnelConfig) -> Result<()> {
        let current = self
            .tunnels
            .get(index)
            .ok_or_else(|| Error::TunnelNotFound(format!("#{}", index + 1)))?;

        if config.name != current.name && self.contains(&config.name) {
            return Err(duplicate(&config.name));
        }

        debug!("Updating tunnel #{} '{}'", index + 1, current.name);
        self.tunnels[index] = config;
        self.save()
    }

    /// Remove the definition at `index`. Returns false if there is none.
    pub fn remove(&mut self, index: usize) -> Result<bool> {
        if index >= self.tunnels.len() {
            return Ok(false);
        }

        let removed = self.tunnels.remove(index);
        self.ids.remove(index);
        self.save()?;
        debug!("Removed tunnel #{} '{}'", index + 1, removed.name);
        Ok(true)
    }

    /// Append every imported definition, without de-duplicating by name
    pub fn import_merge(&mut self, imported: Vec<TunnelConfig>) -> Result<usize> {
        let count = imported.len();
        for config in imported {
            self.push(config);
        }
        self.save()?;
        debug!("Imported {} tunnel(s)", count);
        Ok(count)
    }

    /// Read a JSON array of definitions from `path` and merge it
    pub fn import_file(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        let imported = read_tunnels(path)?;
        self.import_merge(imported)
    }

    fn push(&mut self, config: TunnelConfig) {
        self.tunnels.push(config);
        self.ids.push(EntryId(self.next_id));
        self.next_id += 1;
    }
}

fn duplicate(name: &str) -> Error {
    Error::Validation(format!("A tunnel named '{}' already exists", name))
}

fn read_tunnels(path: &Path) -> Result<Vec<TunnelConfig>> {
    if !path.exists() {
        debug!("Tunnels file does not exist: {}", path.display());
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    // A literal `null` is treated as "no tunnels"
    let tunnels: Option<Vec<TunnelConfig>> =
        serde_json::from_str(&contents).map_err(|e| Error::Persistence {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(tunnels.unwrap_or_default())
}

fn write_tunnels(path: &Path, tunnels: &[TunnelConfig]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(tunnels)?;
    fs::write(path, json)?;

    debug!("Saved {} tunnel(s) to {}", tunnels.len(), path.display());
    Ok(())
}
