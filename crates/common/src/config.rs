// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// File locations for pemtunnel's persisted state

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const TUNNELS_FILE_NAME: &str = "tunnels.json";
pub const GLOBAL_CONFIG_FILE_NAME: &str = "globalconfig.json";
pub const KNOWN_HOSTS_FILE_NAME: &str = "known_hosts";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "PEMTUNNEL_DATA_DIR";

/// Directory holding `tunnels.json`, `globalconfig.json` and `known_hosts`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory next to the running executable, like a portable install.
    /// Falls back to the user config directory when the executable path is unknown.
    pub fn beside_executable() -> Result<Self> {
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            return Ok(Self::new(dir));
        }

        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        Ok(Self::new(config_dir.join("pemtunnel")))
    }

    /// Explicit directory if given, otherwise the default location
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        match explicit {
            Some(dir) => Ok(Self::new(dir)),
            None => Self::beside_executable(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tunnels_path(&self) -> PathBuf {
        self.root.join(TUNNELS_FILE_NAME)
    }

    pub fn global_config_path(&self) -> PathBuf {
        self.root.join(GLOBAL_CONFIG_FILE_NAME)
    }

    pub fn known_hosts_path(&self) -> PathBuf {
        self.root.join(KNOWN_HOSTS_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_locations() {
        let dir = DataDir::new("/opt/pemtunnel");
        assert_eq!(dir.tunnels_path(), PathBuf::from("/opt/pemtunnel/tunnels.json"));
        assert_eq!(
            dir.global_config_path(),
            PathBuf::from("/opt/pemtunnel/globalconfig.json")
        );
        assert_eq!(
            dir.known_hosts_path(),
            PathBuf::from("/opt/pemtunnel/known_hosts")
        );
    }

    #[test]
    fn test_resolve_prefers_explicit() {
        let dir = DataDir::resolve(Some(PathBuf::from("/tmp/x"))).unwrap();
        assert_eq!(dir.root(), Path::new("/tmp/x"));

        let default = DataDir::resolve(None).expect("Should resolve a default directory");
        assert!(!default.root().as_os_str().is_empty());
    }
}
