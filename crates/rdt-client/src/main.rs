use anyhow::{Context, Result};
use clap::Parser;
use rdt_client::{
    command_socket,
    socket::tool_url,
    subscriber::{events_url, run_event_stream},
    Action, CommandSender, DevtoolsStore, FocusController, FileStorage, InitialConfig, MemoryStorage, StorageKeys,
    StoreHandle,
};
use rdt_core::{
    logging::{init_logging, LogTarget},
    PluginSubtype, DEFAULT_NAMESPACE,
};
use serde_json::Value;
use std::{path::Path, path::PathBuf, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use url::Url;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5174";
const COMMAND_TERMINAL: u32 = 0;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Headless devtools client: follows the server's event stream into a
/// persisted store and relays stdin lines to the external tool.
#[derive(Parser, Debug)]
#[command(name = "rdt-client")]
struct Args {
    #[arg(long, default_value = "")]
    server_url: String,
    #[arg(long, default_value = "")]
    namespace: String,
    /// Port of the external tool's command socket.
    #[arg(long)]
    forge_port: Option<u16>,
    #[arg(long, default_value = "")]
    state_dir: String,
    /// JSON file with `settings` overrides and a `pinned` field list.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Connect the command socket regardless of the persisted setting.
    #[arg(long, default_value_t = false)]
    connect: bool,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let debug = args.debug || env_true("RDT_DEBUG");
    let _log_guard = init_logging(&LogTarget {
        component: "client",
        debug,
        log_dir: resolve(&args.log_dir, "RDT_LOG_DIR", ".rdt/logs"),
    });

    let namespace = resolve(&args.namespace, "RDT_NAMESPACE", DEFAULT_NAMESPACE);
    let raw_url = resolve(&args.server_url, "RDT_SERVER_URL", DEFAULT_SERVER_URL);
    let server_url = Url::parse(&raw_url).with_context(|| format!("invalid server url {raw_url}"))?;
    let state_dir = resolve(&args.state_dir, "RDT_STATE_DIR", ".rdt/state");

    let mut initial = match args.config.as_deref() {
        Some(path) => load_initial_config(path)?,
        None => InitialConfig::default(),
    };
    if let Some(port) = resolve_forge_port(args.forge_port)? {
        initial.settings.insert("port".to_string(), Value::from(port));
    }
    if args.connect {
        initial.settings.insert("connect".to_string(), Value::Bool(true));
        initial.pinned.push("connect".to_string());
    }

    let store = DevtoolsStore::hydrate(
        Arc::new(FileStorage::new(&state_dir)),
        Arc::new(MemoryStorage::new()),
        StorageKeys::for_namespace(&namespace),
        &initial,
    )
    .into_handle();
    let (port, connect) = {
        let store = store.lock().await;
        (store.settings().port, store.settings().connect)
    };
    info!(
        event = "client_start",
        server = %server_url,
        namespace = %namespace,
        state_dir = %state_dir,
        port = port,
        connect = connect
    );

    let events = events_url(&server_url, &namespace).context("building event stream url")?;
    let stream = tokio::spawn(run_event_stream(events, store.clone()));
    let (mut socket, sender) = command_socket(tool_url(port)?, store.clone());
    let socket_task = tokio::spawn(async move { socket.run().await });

    let mut focus = FocusController::default();
    let mut focus_changes = focus.subscribe();
    let focus_log = tokio::spawn(async move {
        while focus_changes.changed().await.is_ok() {
            let current = *focus_changes.borrow_and_update();
            info!(event = "timeline_focus", focus = ?current);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_line(&store, &sender, &mut focus, line.trim()).await,
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!(event = "stdin_error", error = %err);
                    stdin_open = false;
                }
            },
        }
    }

    drop(sender);
    focus.teardown();
    focus_log.abort();
    stream.abort();
    match tokio::time::timeout(SHUTDOWN_GRACE, socket_task).await {
        Ok(Ok(state)) => info!(event = "command_socket_final", state = ?state),
        Ok(Err(err)) => warn!(event = "command_socket_join_error", error = %err),
        Err(_) => warn!(event = "command_socket_shutdown_timeout"),
    }
    let timeline = store.lock().await.state().session.timeline.len();
    info!(event = "client_stop", timeline = timeline);
    Ok(())
}

async fn handle_line(
    store: &StoreHandle,
    sender: &CommandSender,
    focus: &mut FocusController,
    line: &str,
) {
    if line.is_empty() {
        return;
    }
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let sent = match verb {
        "purge" => {
            store.lock().await.dispatch(Action::PurgeTimeline);
            focus.focus_automatic();
            return;
        }
        "follow" => {
            focus.focus_automatic();
            return;
        }
        "focus" => {
            let entries = store.lock().await.state().session.timeline.len();
            match rest.trim().parse::<usize>() {
                Ok(index) if index < entries => focus.focus_manual(index),
                _ => warn!(event = "invalid_focus_index", input = %rest, entries = entries),
            }
            return;
        }
        "open" => sender.plugin(PluginSubtype::OpenFile, rest.trim(), None),
        "kill" => match rest.trim().parse::<u32>() {
            Ok(process_id) => sender.kill(COMMAND_TERMINAL, process_id),
            Err(err) => {
                warn!(event = "invalid_process_id", input = %rest, error = %err);
                return;
            }
        },
        _ => {
            let mut store = store.lock().await;
            store.dispatch(Action::AddTerminalHistory {
                id: COMMAND_TERMINAL,
                entry: line.to_string(),
            });
            let sent = sender.terminal_command(COMMAND_TERMINAL, line);
            if sent.is_ok() {
                store.dispatch(Action::ToggleTerminalLock {
                    id: COMMAND_TERMINAL,
                    locked: true,
                });
            }
            sent
        }
    };
    if let Err(err) = sent {
        warn!(event = "command_not_sent", verb = %verb, error = %err);
    }
}

fn load_initial_config(path: &Path) -> Result<InitialConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

fn resolve_forge_port(flag: Option<u16>) -> Result<Option<u16>> {
    if flag.is_some() {
        return Ok(flag);
    }
    match std::env::var("RDT_FORGE_PORT") {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid RDT_FORGE_PORT {value}")),
        _ => Ok(None),
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
