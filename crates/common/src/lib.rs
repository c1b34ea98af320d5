// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - Common Library
// Tunnel definitions, settings, persistence and shared types

pub mod config;
pub mod error;
pub mod settings;
pub mod tunnel_store;
pub mod types;
pub mod view;

pub use config::DataDir;
pub use error::{Error, Result};
pub use settings::{missing_credentials_warning, SettingsStore};
pub use tunnel_store::{EntryId, TunnelStore};
pub use types::{
    format_host_port, ConnectionResult, GlobalConfig, TunnelConfig, TunnelDraft, TunnelEvent,
    DEFAULT_SSH_PORT, LOCAL_BIND_ADDRESS,
};
pub use view::{TunnelDetails, TunnelRow};

// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
