//! Listener CLI for a running jbx session

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;

/// jbx listener tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server base URL
    #[arg(short, long, default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join the session
    Join {
        /// Display name
        name: String,
        /// External user id for rejoin continuity
        #[arg(long, default_value = "")]
        external_id: String,
    },
    /// Request a track by id, URI, or URL
    Request {
        /// Listener id from a previous join
        #[arg(long)]
        listener_id: String,
        track: String,
    },
    /// Follow the notification stream, printing each event
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let base = args.server.trim_end_matches('/').to_string();

    match args.command {
        Command::Join { name, external_id } => {
            let body: Value = client
                .post(format!("{base}/join"))
                .json(&serde_json::json!({
                    "display_name": name,
                    "external_user_id": external_id,
                }))
                .send()
                .await
                .context("join failed")?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Request { listener_id, track } => {
            let body: Value = client
                .post(format!("{base}/request"))
                .json(&serde_json::json!({
                    "listener_id": listener_id,
                    "track": track,
                }))
                .send()
                .await
                .context("request failed")?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Watch => {
            let response = client
                .get(format!("{base}/notifications"))
                .send()
                .await
                .context("subscribe failed")?;
            anyhow::ensure!(
                response.status().is_success(),
                "server returned {}",
                response.status()
            );

            // Minimal SSE reader: accumulate lines, print each data
            // payload as pretty JSON
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.context("stream error")?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end().to_string();
                    buffer.drain(..=pos);

                    if let Some(data) = line.strip_prefix("data:") {
                        match serde_json::from_str::<Value>(data.trim()) {
                            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                            Err(_) => println!("{}", data.trim()),
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
