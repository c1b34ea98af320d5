// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// Add/edit form for tunnel definitions

use std::fs;
use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use dialoguer::{Input, Select};

use pemtunnel_common::TunnelDraft;

const OTHER_FILE: &str = "Other...";

/// Prompt for every field, starting from `initial`, until the input is valid
pub fn prompt_draft(initial: TunnelDraft, pem_directory: &Path) -> Result<TunnelDraft> {
    let mut draft = initial;

    loop {
        draft = prompt_fields(&draft, pem_directory)?;
        match draft.clone().into_config() {
            Ok(_) => return Ok(draft),
            Err(e) => println!("{} {}", "✗".red(), e.to_string().red()),
        }
    }
}

fn prompt_fields(current: &TunnelDraft, pem_directory: &Path) -> Result<TunnelDraft> {
    Ok(TunnelDraft {
        name: text("Name", &current.name, false)?,
        ip_address: text("SSH server (IP or host[:port])", &current.ip_address, false)?,
        pem_file_name: pem_file(&current.pem_file_name, pem_directory)?,
        local_port: port("Local port", &current.local_port)?,
        remote_host: text("Remote host", &current.remote_host, false)?,
        remote_port: port("Remote port", &current.remote_port)?,
        browser_url: text("Browser URL (optional)", &current.browser_url, true)?,
    })
}

fn text(prompt: &str, initial: &str, allow_empty: bool) -> Result<String> {
    let value = Input::<String>::new()
        .with_prompt(prompt)
        .with_initial_text(initial)
        .allow_empty(allow_empty)
        .interact_text()?;
    Ok(value.trim().to_string())
}

fn port(prompt: &str, initial: &str) -> Result<String> {
    let value = Input::<String>::new()
        .with_prompt(prompt)
        .with_initial_text(initial)
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            match input.trim().parse::<u16>() {
                Ok(port) if port > 0 => Ok(()),
                _ => Err("Enter a port between 1 and 65535"),
            }
        })
        .interact_text()?;
    Ok(value.trim().to_string())
}

/// Offer the key files found in the PEM directory, or free text
fn pem_file(initial: &str, pem_directory: &Path) -> Result<String> {
    let mut candidates = key_files(pem_directory);
    if candidates.is_empty() {
        return text("PEM file name", initial, false);
    }

    let default = candidates
        .iter()
        .position(|name| name == initial)
        .unwrap_or(0);
    candidates.push(OTHER_FILE.to_string());

    let selection = Select::new()
        .with_prompt(format!("PEM file (in {})", pem_directory.display()))
        .items(&candidates)
        .default(default)
        .interact()?;

    if candidates[selection] == OTHER_FILE {
        text("PEM file name", initial, false)
    } else {
        Ok(candidates[selection].clone())
    }
}

/// `*.pem` files directly inside `dir`, sorted
fn key_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.to_ascii_lowercase().ends_with(".pem"))
        .collect();
    names.sort();
    names
}
