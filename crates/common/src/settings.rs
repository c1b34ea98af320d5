// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - Global Settings Module
// Holds the PEM directory, persisted to globalconfig.json

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::{GlobalConfig, TunnelConfig};

/// Process-wide settings, saved on every change
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    config: GlobalConfig,
}

impl SettingsStore {
    /// Load settings, creating and persisting the defaults on first run
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            info!("No global configuration found, using defaults");
            info!("Configuration will be saved to: {}", path.display());
            let store = Self {
                path,
                config: GlobalConfig::default(),
            };
            store.save()?;
            return Ok(store);
        }

        let contents = fs::read_to_string(&path)?;
        let config: GlobalConfig =
            serde_json::from_str(&contents).map_err(|e| Error::Persistence {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { path, config })
    }

    /// Load settings, falling back to defaults (in memory) if the file is corrupt
    pub fn load_or_recover(path: impl Into<PathBuf>) -> Result<(Self, Option<Error>)> {
        let path = path.into();
        match Self::load(&path) {
            Ok(store) => Ok((store, None)),
            Err(e @ Error::Persistence { .. }) => {
                warn!("{}; using default settings", e);
                Ok((
                    Self {
                        path,
                        config: GlobalConfig::default(),
                    },
                    Some(e),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Write settings to disk (full overwrite, pretty-printed)
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn pem_directory(&self) -> PathBuf {
        self.config.pem_directory()
    }

    /// Change the PEM directory and persist immediately
    pub fn set_pem_directory(&mut self, directory: impl AsRef<Path>) -> Result<()> {
        self.config.pem_directory_path = directory.as_ref().to_string_lossy().into_owned();
        self.save()?;
        info!("PEM directory set to {}", self.config.pem_directory_path);
        Ok(())
    }

    /// Resolved credential paths that do not exist, in tunnel order
    pub fn missing_credentials<'a>(
        &self,
        tunnels: impl IntoIterator<Item = &'a TunnelConfig>,
    ) -> Vec<PathBuf> {
        let pem_directory = self.pem_directory();
        tunnels
            .into_iter()
            .map(|t| t.credential_path(&pem_directory))
            .filter(|path| !path.exists())
            .collect()
    }
}

/// Format the missing-credential list as one aggregated warning
pub fn missing_credentials_warning(missing: &[PathBuf]) -> Option<String> {
    if missing.is_empty() {
        return None;
    }

    let lines: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
    Some(format!(
        "The following PEM files are missing:\n{}",
        lines.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tunnel(name: &str, pem: &str) -> TunnelConfig {
        TunnelConfig {
            name: name.to_string(),
            ip_address: "10.0.0.5".to_string(),
            pem_file_name: pem.to_string(),
            local_port: 8080,
            remote_host: "localhost".to_string(),
            remote_port: 80,
            browser_url: String::new(),
        }
    }

    #[test]
    fn test_first_run_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("globalconfig.json");

        let store = SettingsStore::load(&path).unwrap();
        assert_eq!(store.config(), &GlobalConfig::default());
        assert!(path.exists());

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"PemDirectoryPath\": \"\""));
    }

    #[test]
    fn test_set_pem_directory_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("globalconfig.json");

        let mut store = SettingsStore::load(&path).unwrap();
        store.set_pem_directory("/keys").unwrap();

        let reloaded = SettingsStore::load(&path).unwrap();
        assert_eq!(reloaded.pem_directory(), PathBuf::from("/keys"));
    }

    #[test]
    fn test_corrupt_settings_recover_to_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("globalconfig.json");
        fs::write(&path, "not json").unwrap();

        let (store, warning) = SettingsStore::load_or_recover(&path).unwrap();
        assert_eq!(store.config(), &GlobalConfig::default());
        assert!(warning.is_some());
    }

    #[test]
    fn test_missing_credentials() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("present.pem"), "key").unwrap();

        let mut store = SettingsStore::load(dir.path().join("globalconfig.json")).unwrap();
        store.set_pem_directory(dir.path()).unwrap();

        let tunnels = vec![tunnel("a", "present.pem"), tunnel("b", "absent.pem")];
        let missing = store.missing_credentials(&tunnels);
        assert_eq!(missing, vec![dir.path().join("absent.pem")]);

        let warning = missing_credentials_warning(&missing).unwrap();
        assert!(warning.starts_with("The following PEM files are missing:"));
        assert!(warning.contains("absent.pem"));
        assert!(missing_credentials_warning(&[]).is_none());
    }
}
