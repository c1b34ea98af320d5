// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// pemtunnel - CLI
// Command-line front end for managing SSH local port forwards

mod display;
mod form;
mod interactive;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pemtunnel_common::config::DATA_DIR_ENV;
use pemtunnel_common::{missing_credentials_warning, DataDir, TunnelDraft};
use pemtunnel_core::{TunnelController, CONNECT_TIMEOUT};

#[derive(Parser)]
#[command(name = "pemtunnel")]
#[command(about = "Manage SSH local port forwarding tunnels", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding tunnels.json, globalconfig.json and known_hosts
    /// (default: next to the executable)
    #[arg(long, global = true, env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Seconds to wait for an SSH server to accept the connection
    #[arg(long, global = true, default_value_t = CONNECT_TIMEOUT.as_secs())]
    connect_timeout: u64,

    /// More log output (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List tunnels and their connection state
    List {
        /// Show server, ports and PEM file
        #[arg(short, long)]
        details: bool,

        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,
    },

    /// Add a tunnel
    Add,

    /// Edit a tunnel
    Edit {
        /// Tunnel name, or #N for the N-th row of `list`
        name: String,
    },

    /// Remove a tunnel
    Remove {
        /// Tunnel name, or #N for the N-th row of `list`
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Append the tunnels from a JSON file
    Import {
        /// File containing an array of tunnel definitions
        file: PathBuf,
    },

    /// Show or set the directory PEM files are read from
    PemDir {
        /// New directory
        path: Option<String>,
    },

    /// Report tunnels whose PEM file is missing
    Check,

    /// Connect tunnels and keep them up until Ctrl+C
    Up {
        /// Tunnel names, or #N for the N-th row of `list`
        #[arg(required = true)]
        names: Vec<String>,

        /// Open each tunnel's browser URL once it is connected
        #[arg(short, long)]
        open: bool,
    },

    /// Menu-driven mode (default when no command is given)
    Interactive,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let data_dir = DataDir::resolve(cli.data_dir)?;
    let (mut controller, warnings) =
        TunnelController::open(&data_dir, Duration::from_secs(cli.connect_timeout))
            .with_context(|| format!("Failed to load configuration from {}", data_dir.root().display()))?;

    for warning in &warnings {
        println!("{} {}", "Warning:".yellow().bold(), warning);
    }

    match cli.command.unwrap_or(Commands::Interactive) {
        Commands::List { details, json } => list_tunnels(&controller, details, json).await?,
        Commands::Add => add_tunnel(&mut controller)?,
        Commands::Edit { name } => edit_tunnel(&mut controller, &name).await?,
        Commands::Remove { name, yes } => remove_tunnel(&mut controller, &name, yes).await?,
        Commands::Import { file } => import_tunnels(&mut controller, &file)?,
        Commands::PemDir { path } => match path {
            Some(path) => apply_pem_directory(&mut controller, &path).await?,
            None => println!("{}", controller.pem_directory().display()),
        },
        Commands::Check => check_credentials(&controller),
        Commands::Up { names, open } => bring_up(&controller, &names, open).await?,
        Commands::Interactive => interactive::run(&mut controller).await?,
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "pemtunnel=error",
        1 => "pemtunnel=info",
        _ => "pemtunnel=debug,russh=info",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run `future` with a spinner on screen
pub(crate) async fn with_spinner<F: Future>(message: impl Into<String>, future: F) -> Result<F::Output> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));

    let output = future.await;
    spinner.finish_and_clear();
    Ok(output)
}

/// Expand `~` and environment variables in a user-supplied path
pub(crate) fn expand_path(input: &str) -> PathBuf {
    let trimmed = input.trim();
    match shellexpand::full(trimmed) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            warn!("Could not expand '{}': {}", trimmed, e);
            PathBuf::from(trimmed)
        }
    }
}

pub(crate) async fn apply_pem_directory(controller: &mut TunnelController, input: &str) -> Result<()> {
    let directory = expand_path(input);
    if !directory.is_dir() {
        println!(
            "{} {} is not a directory",
            "Warning:".yellow().bold(),
            directory.display()
        );
    }

    controller.set_pem_directory(&directory).await?;
    println!("{} PEM directory set to {}", "✓".green(), directory.display());
    check_credentials(controller);
    Ok(())
}

async fn list_tunnels(controller: &TunnelController, details: bool, json: bool) -> Result<()> {
    let rows = controller.rows(details).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        display::print_rows(&rows, details);
    }

    Ok(())
}

fn add_tunnel(controller: &mut TunnelController) -> Result<()> {
    println!("{}", "New tunnel".bold().green());
    let draft = form::prompt_draft(TunnelDraft::default(), &controller.pem_directory())?;
    let config = controller.add(draft)?;

    println!();
    println!("{} Added '{}': {}", "✓".green(), config.name, config.forward_description());
    Ok(())
}

async fn edit_tunnel(controller: &mut TunnelController, name: &str) -> Result<()> {
    let index = controller.resolve(name)?;
    if controller.is_connected(index).await {
        anyhow::bail!("Tunnel '{}' is connected; disconnect it before editing", name.yellow());
    }

    let initial = TunnelDraft::from_config(controller.get(index)?);
    println!("{}", format!("Editing '{}'", initial.name).bold().green());
    let draft = form::prompt_draft(initial, &controller.pem_directory())?;
    let config = controller.edit(index, draft).await?;

    println!();
    println!("{} Saved '{}': {}", "✓".green(), config.name, config.forward_description());
    Ok(())
}

async fn remove_tunnel(controller: &mut TunnelController, name: &str, yes: bool) -> Result<()> {
    let index = controller.resolve(name)?;

    if !yes {
        let confirm = Confirm::new()
            .with_prompt(format!("Are you sure you want to remove tunnel '{}'?", name.yellow()))
            .default(false)
            .interact()?;

        if !confirm {
            println!("{}", "Removal cancelled".dimmed());
            return Ok(());
        }
    }

    if controller.remove(index).await? {
        println!("{} Removed '{}'", "✓".green(), name);
    }
    Ok(())
}

fn import_tunnels(controller: &mut TunnelController, file: &Path) -> Result<()> {
    let count = controller
        .import(file)
        .with_context(|| format!("Failed to import {}", file.display()))?;
    println!("{} Imported {} tunnel(s) from {}", "✓".green(), count, file.display());
    check_credentials(controller);
    Ok(())
}

fn check_credentials(controller: &TunnelController) {
    let missing = controller.missing_credentials();
    match missing_credentials_warning(&missing) {
        Some(warning) => println!("{} {}", "Warning:".yellow().bold(), warning),
        None => println!("{} All PEM files present", "✓".green()),
    }
}

async fn bring_up(controller: &TunnelController, names: &[String], open: bool) -> Result<()> {
    let mut connected = 0;

    for name in names {
        let index = match controller.resolve(name) {
            Ok(index) => index,
            Err(e) => {
                println!("{} {}", "✗".red(), e.to_string().red());
                continue;
            }
        };

        let result =
            with_spinner(format!("Connecting '{}'...", name), controller.connect(index)).await?;
        match result {
            Ok(_) => {
                connected += 1;
                let config = controller.get(index)?;
                println!(
                    "{} {} {}",
                    "✓".green(),
                    name.bold(),
                    config.forward_description().dimmed()
                );
                if open && config.has_browser_url() {
                    if let Err(e) = controller.open_browser(index).await {
                        println!("{} {}", "Warning:".yellow().bold(), e);
                    }
                }
            }
            Err(e) => println!("{} {}: {}", "✗".red(), name.bold(), e.to_string().red()),
        }
    }

    if connected == 0 {
        anyhow::bail!("No tunnels connected");
    }

    println!();
    println!("{}", "Press Ctrl+C to disconnect".dimmed());
    wait_for_shutdown().await;

    with_spinner("Disconnecting...", controller.shutdown()).await?;
    println!("{} Disconnected", "✓".green());
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            },
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_up() {
        let cli = Cli::try_parse_from(["pemtunnel", "up", "db", "web", "--open"]).unwrap();
        match cli.command {
            Some(Commands::Up { names, open }) => {
                assert_eq!(names, vec!["db", "web"]);
                assert!(open);
            }
            _ => panic!("expected up"),
        }
        assert_eq!(cli.connect_timeout, 15);
    }

    #[test]
    fn test_up_requires_a_name() {
        assert!(Cli::try_parse_from(["pemtunnel", "up"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pemtunnel",
            "list",
            "--details",
            "--data-dir",
            "/tmp/tunnels",
            "--connect-timeout",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/tunnels")));
        assert_eq!(cli.connect_timeout, 5);
        assert!(matches!(cli.command, Some(Commands::List { details: true, json: false })));
    }

    #[test]
    fn test_expand_path_trims() {
        assert_eq!(expand_path("  /keys  "), PathBuf::from("/keys"));
    }
}
