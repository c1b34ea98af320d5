// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// Menu-driven session: the tunnel list stays on screen between actions

use anyhow::Result;
use colored::Colorize;
use dialoguer::{Confirm, Input, Select};

use pemtunnel_common::{ConnectionResult, TunnelDraft, TunnelRow};
use pemtunnel_core::TunnelController;

use crate::{display, form, with_spinner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Toggle,
    ToggleAndOpen,
    OpenBrowser,
    Add,
    Edit,
    Remove,
    Import,
    PemDirectory,
    ToggleDetails,
    Quit,
}

impl Action {
    fn label(self, show_details: bool) -> &'static str {
        match self {
            Action::Toggle => "Connect / disconnect",
            Action::ToggleAndOpen => "Connect and open browser",
            Action::OpenBrowser => "Open browser",
            Action::Add => "Add tunnel",
            Action::Edit => "Edit tunnel",
            Action::Remove => "Remove tunnel",
            Action::Import => "Import tunnels from file",
            Action::PemDirectory => "Set PEM directory",
            Action::ToggleDetails if show_details => "Hide details",
            Action::ToggleDetails => "Show details",
            Action::Quit => "Quit",
        }
    }

    /// Actions that operate on an existing tunnel
    fn needs_tunnel(self) -> bool {
        matches!(
            self,
            Action::Toggle | Action::ToggleAndOpen | Action::OpenBrowser | Action::Edit | Action::Remove
        )
    }
}

const ACTIONS: [Action; 10] = [
    Action::Toggle,
    Action::ToggleAndOpen,
    Action::OpenBrowser,
    Action::Add,
    Action::Edit,
    Action::Remove,
    Action::Import,
    Action::PemDirectory,
    Action::ToggleDetails,
    Action::Quit,
];

pub async fn run(controller: &mut TunnelController) -> Result<()> {
    let mut show_details = false;

    loop {
        let rows = controller.rows(show_details).await;
        display::print_rows(&rows, show_details);

        let labels: Vec<&str> = ACTIONS.iter().map(|a| a.label(show_details)).collect();
        let Some(index) = Select::new()
            .with_prompt("Action")
            .items(&labels)
            .default(0)
            .interact_opt()?
        else {
            break;
        };

        let action = ACTIONS[index];
        if action == Action::Quit {
            break;
        }
        if action == Action::ToggleDetails {
            show_details = !show_details;
            continue;
        }

        if let Err(e) = perform(controller, action, &rows).await {
            println!("{} {}", "✗".red(), format!("{:#}", e).red());
        }
    }

    if !controller.manager().active_names().await.is_empty() {
        with_spinner("Disconnecting tunnels...", controller.shutdown()).await?;
    }
    Ok(())
}

async fn perform(controller: &mut TunnelController, action: Action, rows: &[TunnelRow]) -> Result<()> {
    let index = if action.needs_tunnel() {
        match pick_tunnel(rows)? {
            Some(index) => index,
            None => return Ok(()),
        }
    } else {
        0
    };

    match action {
        Action::Toggle => {
            let result = with_spinner(progress_message(rows, index), controller.toggle(index)).await?;
            report(&result?);
        }
        Action::ToggleAndOpen => {
            let result = with_spinner(
                progress_message(rows, index),
                controller.open_after_connect(index),
            )
            .await?;
            report(&result?);
        }
        Action::OpenBrowser => controller.open_browser(index).await?,
        Action::Add => {
            let draft = form::prompt_draft(TunnelDraft::default(), &controller.pem_directory())?;
            let config = controller.add(draft)?;
            println!("{} Added '{}'", "✓".green(), config.name);
        }
        Action::Edit => {
            let initial = TunnelDraft::from_config(controller.get(index)?);
            let draft = form::prompt_draft(initial, &controller.pem_directory())?;
            let config = controller.edit(index, draft).await?;
            println!("{} Saved '{}'", "✓".green(), config.name);
        }
        Action::Remove => {
            let name = controller.get(index)?.name.clone();
            let confirmed = Confirm::new()
                .with_prompt(format!("Remove tunnel '{}'?", name.yellow()))
                .default(false)
                .interact()?;
            if confirmed && controller.remove(index).await? {
                println!("{} Removed '{}'", "✓".green(), name);
            }
        }
        Action::Import => {
            let path: String = Input::new().with_prompt("File to import").interact_text()?;
            let path = crate::expand_path(&path);
            let count = controller.import(&path)?;
            println!("{} Imported {} tunnel(s)", "✓".green(), count);
        }
        Action::PemDirectory => {
            let current = controller.pem_directory().display().to_string();
            let path: String = Input::new()
                .with_prompt("PEM directory")
                .with_initial_text(current)
                .interact_text()?;
            crate::apply_pem_directory(controller, &path).await?;
        }
        Action::ToggleDetails | Action::Quit => {}
    }

    Ok(())
}

/// Position of the chosen tunnel in the store
fn pick_tunnel(rows: &[TunnelRow]) -> Result<Option<usize>> {
    if rows.is_empty() {
        println!("{}", "No tunnels configured.".yellow());
        return Ok(None);
    }

    let items: Vec<String> = rows
        .iter()
        .map(|row| format!("#{} {} ({})", row.index + 1, row.name, row.status_text))
        .collect();
    let selection = Select::new()
        .with_prompt("Tunnel")
        .items(&items)
        .default(0)
        .interact_opt()?;

    Ok(selection.map(|selected| rows[selected].index))
}

fn progress_message(rows: &[TunnelRow], index: usize) -> String {
    match rows.iter().find(|row| row.index == index) {
        Some(row) if row.connected => format!("Disconnecting '{}'...", row.name),
        Some(row) => format!("Connecting '{}'...", row.name),
        None => "Working...".to_string(),
    }
}

fn report(result: &ConnectionResult) {
    match result {
        ConnectionResult::Connected { name } => println!("{} '{}' connected", "✓".green(), name),
        ConnectionResult::Disconnected { name } => {
            println!("{} '{}' disconnected", "✓".green(), name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_label_flips() {
        assert_eq!(Action::ToggleDetails.label(false), "Show details");
        assert_eq!(Action::ToggleDetails.label(true), "Hide details");
    }

    #[test]
    fn test_progress_message_follows_the_picked_row() {
        let config = pemtunnel_common::TunnelConfig {
            name: "db".to_string(),
            ip_address: "10.0.0.5".to_string(),
            pem_file_name: "a.pem".to_string(),
            local_port: 8080,
            remote_host: "localhost".to_string(),
            remote_port: 80,
            browser_url: String::new(),
        };
        let rows = vec![
            TunnelRow::from_config(0, &config, Some(pemtunnel_common::Utc::now()), false),
            TunnelRow::from_config(1, &config, None, false),
        ];

        assert_eq!(progress_message(&rows, 0), "Disconnecting 'db'...");
        assert_eq!(progress_message(&rows, 1), "Connecting 'db'...");
    }

    #[test]
    fn test_only_tunnel_actions_pick_a_tunnel() {
        let picking: Vec<Action> = ACTIONS.iter().copied().filter(|a| a.needs_tunnel()).collect();
        assert_eq!(
            picking,
            vec![
                Action::Toggle,
                Action::ToggleAndOpen,
                Action::OpenBrowser,
                Action::Edit,
                Action::Remove
            ]
        );
    }
}
