mod cli;
mod http;

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use secrecy::SecretString;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leapgate_broker::CloudAuthenticator;
use leapgate_core::session::SocketConnector;
use leapgate_core::{SessionManager, StateStore};

use crate::cli::Cli;
use crate::http::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !cli.asset_dir.is_dir() {
        bail!(
            "asset directory {} does not exist; pass --asset-dir",
            cli.asset_dir.display()
        );
    }

    let store = Arc::new(
        StateStore::load(&cli.state_path)
            .with_context(|| format!("loading state from {}", cli.state_path.display()))?,
    );
    let minter = Arc::new(CloudAuthenticator::new(
        cli.username.clone(),
        SecretString::from(cli.password.clone()),
    )?);
    let sessions = SessionManager::new(Arc::clone(&store), minter, Arc::new(SocketConnector));

    let app = http::router(
        AppState {
            sessions: sessions.clone(),
            store,
        },
        &cli.asset_dir,
        cli.normalized_base_path().as_deref(),
    );

    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(addr = %cli.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown().await;
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    // Serve until interrupted; signal-handler registration failures are
    // treated as "no signal will ever arrive".
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
