// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - Known Hosts Module
// Trust-on-first-use host key store kept in the data directory

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use pemtunnel_common::{Error, Result, DEFAULT_SSH_PORT};

/// Outcome of checking a server key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyStatus {
    Trusted,
    /// Host never seen before
    Unknown,
    /// Host known with a different key
    Changed { line_number: usize, fingerprint: String },
}

#[derive(Debug, Clone)]
struct HostEntry {
    pattern: String,
    key_type: String,
    key_data: String,
    line_number: usize,
}

impl HostEntry {
    fn parse(line: &str, line_number: usize) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(pattern), Some(key_type), Some(key_data)) => Some(Self {
                pattern: pattern.to_string(),
                key_type: key_type.to_string(),
                key_data: key_data.to_string(),
                line_number,
            }),
            _ => {
                warn!("Ignoring malformed known_hosts line {}", line_number);
                None
            }
        }
    }

    fn matches_key(&self, key: &PublicKey) -> bool {
        self.key_type == key_type(key) && self.key_data == key.public_key_base64()
    }
}

/// Host keys accepted so far, one `pattern type base64` line each
#[derive(Debug)]
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<HostEntry>,
}

impl KnownHosts {
    /// Load the file at `path`; a missing file means no hosts are known yet
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!("No known_hosts file at {}", path.display());
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let contents = fs::read_to_string(&path)?;
        let entries: Vec<HostEntry> = contents
            .lines()
            .enumerate()
            .filter_map(|(index, line)| HostEntry::parse(line, index + 1))
            .collect();

        debug!("Loaded {} known host(s) from {}", entries.len(), path.display());
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyStatus {
        let pattern = host_pattern(host, port);
        let mut candidates = self.entries.iter().filter(|e| e.pattern == pattern).peekable();

        let Some(first) = candidates.peek().map(|e| e.line_number) else {
            return HostKeyStatus::Unknown;
        };

        if candidates.any(|e| e.matches_key(key)) {
            HostKeyStatus::Trusted
        } else {
            HostKeyStatus::Changed {
                line_number: first,
                fingerprint: fingerprint(key),
            }
        }
    }

    pub fn trust(&mut self, host: &str, port: u16, key: &PublicKey) {
        self.entries.push(HostEntry {
            pattern: host_pattern(host, port),
            key_type: key_type(key),
            key_data: key.public_key_base64(),
            line_number: self.entries.len() + 1,
        });
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = fs::File::create(&self.path)?;
        for entry in &self.entries {
            writeln!(file, "{} {} {}", entry.pattern, entry.key_type, entry.key_data)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Check `key` and record it on first sight. A changed key is an error.
    pub fn verify_or_trust(&mut self, host: &str, port: u16, key: &PublicKey) -> Result<()> {
        match self.check(host, port, key) {
            HostKeyStatus::Trusted => {
                debug!("Host key verified for {}", host_pattern(host, port));
                Ok(())
            }
            HostKeyStatus::Unknown => {
                self.trust(host, port, key);
                self.save()?;
                warn!(
                    "Permanently added {} key for {} ({})",
                    key_type(key),
                    host_pattern(host, port),
                    fingerprint(key)
                );
                Ok(())
            }
            HostKeyStatus::Changed {
                line_number,
                fingerprint,
            } => Err(Error::Connect(format!(
                "Host key for {} has changed (now {}). Remove line {} of {} if this is expected.",
                host_pattern(host, port),
                fingerprint,
                line_number,
                self.path.display()
            ))),
        }
    }
}

/// `host` on the default port, `[host]:port` otherwise
fn host_pattern(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

fn key_type(key: &PublicKey) -> String {
    key.algorithm().to_string()
}

/// `SHA256:<base64>` fingerprint, as printed by ssh-keygen
pub fn fingerprint(key: &PublicKey) -> String {
    let digest = Sha256::digest(key.public_key_bytes());
    format!("SHA256:{}", STANDARD.encode(digest).trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::parse_public_key_base64;
    use tempfile::TempDir;

    const SERVER_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIJ1FxsiWblbIyzMHcdDjxaUcH/TWxi6YR0x1URyE2UCJ";
    const OTHER_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAII9XkEv78jUagQrEilXOvu425bIxpPO9C10EgXREA2tA";

    fn key(data: &str) -> PublicKey {
        parse_public_key_base64(data).unwrap()
    }

    #[test]
    fn test_host_pattern() {
        assert_eq!(host_pattern("10.0.0.5", 22), "10.0.0.5");
        assert_eq!(host_pattern("10.0.0.5", 2222), "[10.0.0.5]:2222");
    }

    #[test]
    fn test_first_use_is_recorded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("known_hosts");

        let mut hosts = KnownHosts::load(&path).unwrap();
        assert!(hosts.is_empty());
        assert_eq!(hosts.check("10.0.0.5", 22, &key(SERVER_KEY)), HostKeyStatus::Unknown);

        hosts.verify_or_trust("10.0.0.5", 22, &key(SERVER_KEY)).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.trim(), format!("10.0.0.5 ssh-ed25519 {}", SERVER_KEY));

        let reloaded = KnownHosts::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.check("10.0.0.5", 22, &key(SERVER_KEY)),
            HostKeyStatus::Trusted
        );
    }

    #[test]
    fn test_changed_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("known_hosts");
        fs::write(
            &path,
            format!("# comment\n[10.0.0.5]:2222 ssh-ed25519 {}\n", SERVER_KEY),
        )
        .unwrap();

        let mut hosts = KnownHosts::load(&path).unwrap();
        match hosts.check("10.0.0.5", 2222, &key(OTHER_KEY)) {
            HostKeyStatus::Changed { line_number, fingerprint } => {
                assert_eq!(line_number, 2);
                assert!(fingerprint.starts_with("SHA256:"));
            }
            other => panic!("expected Changed, got {:?}", other),
        }

        assert!(hosts.verify_or_trust("10.0.0.5", 2222, &key(OTHER_KEY)).is_err());
        // The port is part of the identity
        assert_eq!(hosts.check("10.0.0.5", 22, &key(OTHER_KEY)), HostKeyStatus::Unknown);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("known_hosts");
        fs::write(&path, "only-two fields\n\nhost ssh-ed25519 AAAA\n").unwrap();

        let hosts = KnownHosts::load(&path).unwrap();
        assert_eq!(hosts.len(), 1);
    }
}
