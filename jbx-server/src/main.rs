//! jbx session server entry point
//!
//! Startup sequence: load config, build the catalog client, validate
//! the configured playlists (with retries; the catalog may still be
//! waking up), start the session, and serve HTTP until a signal lands
//! or the session terminates on its own.

use clap::{Parser, Subcommand};
use jbx_server::catalog::{Catalog, SpotifyClient, SpotifyConfig};
use jbx_server::config::Config;
use jbx_server::filter::{DurationLimitFilter, Filter, KickedFilter, UserPendingFilter};
use jbx_server::server::{self, AppState};
use jbx_server::session::SessionManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// jbx participatory jukebox session server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/server.yaml")]
    config: PathBuf,

    /// Enable verbose (DEBUG) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Start,
    /// List available filters and exit
    ListFilters,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("jbx_server={log_level},jbx_common={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if matches!(args.command, Some(Command::ListFilters)) {
        print_filters();
        return Ok(());
    }

    info!(config = %args.config.display(), "loading config");
    let config = Arc::new(Config::load(&args.config)?);

    run(config).await
}

async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let catalog: Arc<dyn Catalog> = Arc::new(SpotifyClient::new(SpotifyConfig {
        client_id: config.catalog.client_id.clone(),
        client_secret: config.catalog.client_secret.clone(),
        refresh_token: config.catalog.refresh_token.clone(),
        market: config.catalog.market.clone(),
    })?);

    validate_playlists(&config, catalog.as_ref()).await?;

    let manager = SessionManager::new(Arc::clone(&config), Arc::clone(&catalog))?;

    let state = AppState {
        manager: Arc::clone(&manager),
        config: Arc::clone(&config),
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.addr).await?;
    info!(addr = %config.server.addr, "server listening");

    // The session runs independently of the HTTP surface
    {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if let Err(e) = manager.start().await {
                error!(error = %e, "failed to start session");
            }
        });
    }

    execute_hooks(&config.server.hooks.on_started, "on_started");

    let done = manager.done();
    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            if let Err(e) = manager.stop_immediate().await {
                error!(error = %e, "failed to stop session");
            }
        }
        _ = done.cancelled() => {
            info!("session ended, shutting down");
        }
    }

    manager.close();
    info!("server stopped");
    execute_hooks(&config.server.hooks.on_stopped, "on_stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Check that the configured opening and ending playlists exist.
/// Retried with exponential back-off; transient catalog hiccups at boot
/// should not kill the session.
async fn validate_playlists(config: &Config, catalog: &dyn Catalog) -> anyhow::Result<()> {
    const MAX_RETRIES: u32 = 5;
    const BASE_DELAY: Duration = Duration::from_secs(1);

    async fn validate_one(catalog: &dyn Catalog, name: &str, url: &str) -> anyhow::Result<()> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_DELAY * 2u32.pow(attempt - 1);
                info!(playlist = name, delay_secs = delay.as_secs(), "retrying playlist validation");
                tokio::time::sleep(delay).await;
            }
            match catalog.check_playlist_exists(url).await {
                Ok(()) => {
                    info!(playlist = name, "playlist validated");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        playlist = name,
                        attempt = attempt + 1,
                        max_attempts = MAX_RETRIES,
                        error = %e,
                        "playlist validation failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        anyhow::bail!(
            "{name} playlist ({url}) validation failed after {MAX_RETRIES} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )
    }

    if config.playlists.opening.playlist_url.is_empty() {
        info!("opening playlist not configured, session will start with BGM or user requests");
    } else {
        validate_one(catalog, "opening", &config.playlists.opening.playlist_url).await?;
    }

    if config.playlists.ending.playlist_url.is_empty() {
        info!("ending playlist not configured, session will end without one");
    } else {
        validate_one(catalog, "ending", &config.playlists.ending.playlist_url).await?;
    }

    Ok(())
}

/// Run lifecycle hook commands through the shell, logging failures.
fn execute_hooks(commands: &[String], stage: &str) {
    for command in commands {
        info!(stage, command = %command, "executing hook");
        match std::process::Command::new("sh").arg("-c").arg(command).status() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(stage, command = %command, %status, "hook exited non-zero"),
            Err(e) => error!(stage, command = %command, error = %e, "hook failed to run"),
        }
    }
}

/// Print the filters that can be toggled from configuration.
fn print_filters() {
    let filters: Vec<Box<dyn Filter>> = vec![
        Box::new(KickedFilter),
        Box::new(UserPendingFilter),
        Box::new(DurationLimitFilter::new()),
    ];

    println!("Available filters:");
    for filter in &filters {
        let codes: Vec<&str> = filter.return_codes().iter().map(|c| c.as_str()).collect();
        println!(
            "  {:<28} - {} [codes: {}]",
            filter.name(),
            filter.description(),
            codes.join(", ")
        );
    }
    println!("\nFilters requiring runtime dependencies (always active):");
    println!("  acceptance_done_filter       - acceptance gate and request deadline");
    println!("  market_filter                - market availability");
    println!("  duplicate_track_filter       - queue duplicate detection (config-gated)");
}
