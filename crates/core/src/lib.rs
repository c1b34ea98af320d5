// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - Core Library
// SSH sessions, local forwarding and the tunnel lifecycle

pub mod browser;
pub mod client;
pub mod controller;
mod forward;
pub mod known_hosts;
pub mod manager;
pub mod registry;
pub mod ssh;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use client::RusshConnector;
pub use controller::TunnelController;
pub use known_hosts::{HostKeyStatus, KnownHosts};
pub use manager::{TunnelManager, CONNECT_TIMEOUT};
pub use registry::{ActiveSession, ConnectionRegistry, NameGuard};
pub use ssh::{Credential, ForwardHandle, SshConnector, SshSession, LOGIN_USER};
