//! Standalone host running the `config`, `log` and `http` components.
//!
//! Route modules are discovered in the directories given with `--volume`.
//! A module named `status` (for example `routes/status.rs`) is served by the
//! built-in status provider; with no volumes the status router is mounted
//! directly.

use std::path::PathBuf;

use axum::routing::get;
use axum::{Extension, Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tessera_core::{ComponentHost, ConfigStore, HostHandle, Log};
use tessera_http::{Contribution, HttpComponent};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "tessera-http", about = "Serve discovered route modules over HTTP")]
struct Cli {
    /// Primary listening port.
    #[arg(short, long, env = "TESSERA_HTTP_PORT", default_value_t = 3000)]
    port: u16,

    /// Bind host; `0` or `0.0.0.0` listens on every interface.
    #[arg(short, long, env = "TESSERA_HTTP_BIND", default_value = "localhost")]
    bind: String,

    /// Route discovery directory. May be repeated.
    #[arg(long = "volume", value_name = "DIR")]
    volumes: Vec<PathBuf>,

    /// Default log filter, overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

async fn status(Extension(host): Extension<HostHandle>) -> Json<Value> {
    let listeners = host
        .get::<HttpComponent>(HttpComponent::NAME)
        .map_or(0, |http| http.listeners().len());
    Json(json!({ "status": "ok", "listeners": listeners }))
}

fn status_router() -> Router {
    Router::new().route("/", get(status))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, shutting down gracefully"),
            Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM, shutting down gracefully");
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigStore::new()
        .with_section("http", json!({ "port": cli.port, "bind": cli.bind }))
        .with_section(
            "log",
            json!({
                "level": cli.log_level,
                "format": if cli.log_json { "json" } else { "pretty" },
            }),
        );

    let host = ComponentHost::new();
    host.register(config);
    host.register(Log::new());

    let serve_status_directly = cli.volumes.is_empty();
    let http = host.register(HttpComponent::with_volumes(cli.volumes));
    http.provide("status", |_path| Ok(Contribution::router("status", status_router())));
    if serve_status_directly {
        http.extend(Contribution::router("status", status_router()));
    }

    host.up().await?;
    shutdown_signal().await;
    host.down().await?;
    Ok(())
}
