//! Admin CLI for a running jbx session

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;

/// jbx session admin tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server base URL
    #[arg(short, long, default_value = "http://localhost:8080")]
    server: String,

    /// Admin token (or ADMIN_TOKEN env var)
    #[arg(short, long, env = "ADMIN_TOKEN")]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show session status
    Status,
    /// Pause playback
    Pause,
    /// Resume playback
    Resume,
    /// Skip the current track
    Skip,
    /// Kick a listener
    Kick {
        listener_id: String,
    },
    /// List connected listeners
    Listeners,
    /// Stop the session gracefully (plays the ending playlist)
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();

    let (method, path, body): (reqwest::Method, &str, Option<Value>) = match &args.command {
        Command::Status => (reqwest::Method::GET, "/admin/status", None),
        Command::Pause => (reqwest::Method::POST, "/admin/pause", None),
        Command::Resume => (reqwest::Method::POST, "/admin/resume", None),
        Command::Skip => (reqwest::Method::POST, "/admin/skip", None),
        Command::Kick { listener_id } => (
            reqwest::Method::POST,
            "/admin/kick",
            Some(serde_json::json!({ "listener_id": listener_id })),
        ),
        Command::Listeners => (reqwest::Method::GET, "/admin/listeners", None),
        Command::Stop => (reqwest::Method::POST, "/admin/stop", None),
    };

    let url = format!("{}{path}", args.server.trim_end_matches('/'));
    let mut request = client
        .request(method, &url)
        .header("x-admin-token", &args.token);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.context("request failed")?;
    let status = response.status();
    let body: Value = response.json().await.context("invalid response body")?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("server returned {status}");
    }
    Ok(())
}
