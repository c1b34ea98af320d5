// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 pemtunnel Contributors

// Table rendering for tunnel rows

use chrono::Local;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

use pemtunnel_common::{format_host_port, TunnelRow, LOCAL_BIND_ADDRESS};

fn header(title: &str) -> Cell {
    Cell::new(title).add_attribute(Attribute::Bold).fg(Color::Cyan)
}

pub fn rows_table(rows: &[TunnelRow], show_details: bool) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let mut headers = vec![header("#"), header("Name"), header("Status")];
    if show_details {
        headers.extend([
            header("Server"),
            header("Local"),
            header("Remote"),
            header("PEM File"),
        ]);
    }
    headers.push(header("Browser URL"));
    table.set_header(headers);

    for row in rows {
        let status = match row.connected_since {
            Some(since) => Cell::new(format!(
                "{} since {}",
                row.status_text,
                since.with_timezone(&Local).format("%H:%M:%S")
            ))
            .fg(Color::Green),
            None => Cell::new(&row.status_text).fg(Color::DarkGrey),
        };

        let mut cells = vec![
            Cell::new(row.index + 1).fg(Color::DarkGrey),
            Cell::new(&row.name).add_attribute(Attribute::Bold),
            status,
        ];
        if let Some(details) = &row.details {
            cells.extend([
                Cell::new(&details.ip_address),
                Cell::new(format_host_port(LOCAL_BIND_ADDRESS, details.local_port)),
                Cell::new(format_host_port(&details.remote_host, details.remote_port)),
                Cell::new(&details.pem_file_name),
            ]);
        }
        cells.push(Cell::new(row.browser_url.as_deref().unwrap_or("-")).fg(Color::DarkGrey));
        table.add_row(cells);
    }

    table
}

pub fn print_rows(rows: &[TunnelRow], show_details: bool) {
    if rows.is_empty() {
        println!("{}", "No tunnels configured.".yellow());
        println!("Create one with: {}", "pemtunnel add".cyan());
        return;
    }

    let connected = rows.iter().filter(|r| r.connected).count();

    println!();
    println!("{}", rows_table(rows, show_details));
    println!(
        "{} tunnel(s), {} connected",
        rows.len().to_string().cyan(),
        connected.to_string().green()
    );
    println!();
}
