use axum::{routing::get, Router};
use clap::Parser;
use rdt_core::{
    logging::{init_logging, LogTarget},
    DEFAULT_NAMESPACE,
};
use rdt_server::{DevtoolsConfig, DevtoolsServer};
use std::net::SocketAddr;
use tracing::{error, info};

const DEFAULT_ADDR: &str = "127.0.0.1:5174";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    namespace: String,
    debug: bool,
    replay: usize,
    log_dir: String,
}

/// Development-time devtools endpoint: accepts event pushes and
/// open-source requests and streams pushed events to connected UIs.
#[derive(Parser, Debug)]
#[command(name = "rdt-server")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    namespace: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// Number of recent payloads replayed to a newly connected UI.
    #[arg(long, default_value_t = 64)]
    replay: usize,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&LogTarget {
        component: "server",
        debug: config.debug,
        log_dir: config.log_dir.clone(),
    });
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };
    if !addr.ip().is_loopback() {
        error!(event = "non_loopback_addr", addr = %config.addr);
        return;
    }

    let devtools = DevtoolsServer::new(DevtoolsConfig {
        namespace: config.namespace.clone(),
        replay_capacity: config.replay,
        ..DevtoolsConfig::default()
    });
    let host = Router::new().route("/health", get(|| async { "ok" }));
    let app = devtools.attach(host);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "bind_error", addr = %addr, error = %err);
            return;
        }
    };

    info!(
        event = "server_start",
        addr = %addr,
        namespace = %config.namespace,
        events = %devtools.config().events_path()
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "server_error", error = %err);
    }
    info!(event = "server_stop", published = devtools.hub().published());
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: resolve(&args.addr, "RDT_ADDR", DEFAULT_ADDR),
        namespace: resolve(&args.namespace, "RDT_NAMESPACE", DEFAULT_NAMESPACE),
        debug: args.debug || env_true("RDT_DEBUG"),
        replay: args.replay,
        log_dir: resolve(&args.log_dir, "RDT_LOG_DIR", ".rdt/logs"),
    }
}

fn resolve(flag: &str, key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_true(key: &str) -> bool {
    std::env::var(key)
        .map(|value| {
            matches!(
                value.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
