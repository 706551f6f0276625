use anyhow::{Error, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stoppable::config::Config;
use stoppable::metrics::Metrics;
use stoppable::server::{self, Server};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// path to the config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    // load config from path
    let config = Config::load(args.config)?;

    // init tracing
    let _ = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let metrics = Metrics::new();
    let server = Server::bind(&config.server.addr, config.grace(), metrics).await?;
    let router = server::create_router(server.dependencies());
    server.serve(router);

    wait_for_shutdown_signal().await;

    info!(
        pending = server.pending_connections(),
        "start graceful shutdown"
    );
    match server.stop_async().await {
        Ok(true) => info!("shutdown complete, all connections drained"),
        Ok(false) => warn!("shutdown complete, grace period elapsed and connections were destroyed"),
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "shutdown failed");
            return Err(e.into());
        }
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            debug!("received Ctrl+C signal");
        },
        _ = terminate => {
            debug!("received SIGTERM signal");
        },
    }
}
