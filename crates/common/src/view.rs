// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

//! Row view models - tunnel data prepared for display

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::TunnelConfig;

/// Address details shown only when the details view is on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelDetails {
    pub ip_address: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    pub pem_file_name: String,
}

/// One tunnel prepared for a list/table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelRow {
    /// Position in the store; names may repeat after an import
    pub index: usize,
    pub name: String,
    pub connected: bool,
    pub connected_since: Option<DateTime<Utc>>,
    pub status_text: String,
    /// Label for the toggle action
    pub action_text: String,
    pub browser_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<TunnelDetails>,
}

impl TunnelRow {
    pub fn from_config(
        index: usize,
        config: &TunnelConfig,
        connected_since: Option<DateTime<Utc>>,
        show_details: bool,
    ) -> Self {
        let connected = connected_since.is_some();
        let details = show_details.then(|| TunnelDetails {
            ip_address: config.ip_address.clone(),
            local_port: config.local_port,
            remote_host: config.remote_host.clone(),
            remote_port: config.remote_port,
            pem_file_name: config.pem_file_name.clone(),
        });

        Self {
            index,
            name: config.name.clone(),
            connected,
            connected_since,
            status_text: Self::status_text_for(connected).to_string(),
            action_text: Self::action_text_for(connected).to_string(),
            browser_url: config
                .has_browser_url()
                .then(|| config.browser_url.clone()),
            details,
        }
    }

    pub fn status_text_for(connected: bool) -> &'static str {
        if connected {
            "Connected"
        } else {
            "Disconnected"
        }
    }

    pub fn action_text_for(connected: bool) -> &'static str {
        if connected {
            "Disconnect"
        } else {
            "Connect"
        }
    }
}
