//! Deskmate CLI
//!
//! Read-only views over a running server's HTTP endpoints: health,
//! the public lobby, and open sessions.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use console::style;
use serde::Deserialize;

use deskmate_protocol::{LobbyEntry, SessionView};

#[derive(Parser)]
#[command(name = "deskmate", version, about = "Deskmate - paired focus sessions")]
struct Cli {
    /// Server base URL
    #[arg(
        long,
        global = true,
        default_value = "http://127.0.0.1:4600",
        env = "DESKMATE_SERVER_URL"
    )]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether the server is up
    Status,
    /// Show who is waiting in the public lobby
    Lobby,
    /// List sessions that are negotiating or live
    Sessions,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Status => status(&client, &cli.server).await,
        Command::Lobby => lobby(&client, &cli.server).await,
        Command::Sessions => sessions(&client, &cli.server).await,
    }
}

async fn status(client: &reqwest::Client, server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    match client.get(&url).send().await {
        Ok(resp) => {
            let health: HealthResponse = resp
                .json()
                .await
                .with_context(|| format!("unexpected response from {}", url))?;
            println!();
            println!(
                "  {} Deskmate server v{} at {}",
                style("●").green(),
                health.version,
                server
            );
            println!("  Status: {}", health.status);
            println!();
        }
        Err(_) => {
            println!();
            println!("  {} No server at {}", style("●").red(), server);
            println!("  Start one with: deskmate-server");
            println!();
        }
    }
    Ok(())
}

async fn lobby(client: &reqwest::Client, server: &str) -> anyhow::Result<()> {
    let url = format!("{}/lobby", server);
    let entries: Vec<LobbyEntry> = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("could not reach {}", url))?
        .json()
        .await
        .context("unexpected lobby response")?;

    if entries.is_empty() {
        println!();
        println!("  Lobby is empty.");
        println!();
        return Ok(());
    }

    let now = unix_now();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Who", "Activity", "Duration", "Waiting"]);
    for entry in entries {
        let who = entry.display_name.unwrap_or_else(|| entry.user_id.clone());
        table.add_row(vec![
            Cell::new(who),
            Cell::new(entry.activity.as_str()),
            Cell::new(format!("{} min", entry.duration_min)),
            Cell::new(ago(now, entry.published_at)),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn sessions(client: &reqwest::Client, server: &str) -> anyhow::Result<()> {
    let url = format!("{}/sessions", server);
    let sessions: Vec<SessionView> = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("could not reach {}", url))?
        .json()
        .await
        .context("unexpected sessions response")?;

    if sessions.is_empty() {
        println!();
        println!("  No open sessions.");
        println!();
        return Ok(());
    }

    let now = unix_now();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        "Session",
        "Participants",
        "Activity",
        "Status",
        "Phase",
        "Age",
    ]);
    for session in sessions {
        let phase = session
            .phase
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(short_id(&session.id)),
            Cell::new(session.participants.join(", ")),
            Cell::new(session.activity.as_str()),
            Cell::new(session.status.as_str()),
            Cell::new(phase),
            Cell::new(ago(now, session.created_at)),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn ago(now: i64, then: i64) -> String {
    let secs = (now - then).max(0);
    if secs < 60 {
        format!("{}s ago", secs)
    } else {
        format!("{}m ago", secs / 60)
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
