// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

use std::process::Command;

use tracing::info;

#[cfg(test)]
use mockall::automock;

use pemtunnel_common::{Error, Result};

/// Opens URLs for the user
#[cfg_attr(test, automock)]
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Hands the URL to the platform's default handler
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        #[cfg(target_os = "windows")]
        let mut command = {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", ""]);
            command
        };

        #[cfg(target_os = "macos")]
        let mut command = Command::new("open");

        #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
        let mut command = Command::new("xdg-open");

        command.arg(url);
        launch(command, url)?;
        info!("Opened {} in browser", url);
        Ok(())
    }
}

/// Run a short-lived opener to completion so no zombie is left behind
fn launch(mut command: Command, url: &str) -> Result<()> {
    let status = command
        .status()
        .map_err(|e| Error::Browser(format!("{}: {}", url, e)))?;

    if !status.success() {
        return Err(Error::Browser(format!("{}: opener exited with {}", url, status)));
    }
    Ok(())
}
