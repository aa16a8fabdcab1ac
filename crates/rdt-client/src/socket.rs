use crate::reconnect::{
    CloseOutcome, ConnectionState, ReconnectPolicy, ABNORMAL_CLOSE_CODE, CLEAN_SHUTDOWN_CODE,
};
use crate::reducer::Action;
use crate::store::StoreHandle;
use futures_util::{SinkExt, StreamExt};
use rdt_core::{
    decode_tool_message, encode_command, CommandMessage, PluginSubtype, ToolMessage, WireError,
    DEFAULT_MAX_PAYLOAD_BYTES,
};
use serde_json::{Map, Value};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("command socket is not open")]
    NotOpen,
    #[error("command socket outbound queue is full")]
    Full,
    #[error("command socket has shut down")]
    Closed,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("invalid command socket url: {0}")]
    Url(#[from] url::ParseError),
}

pub fn tool_url(port: u16) -> Result<Url, SocketError> {
    Ok(Url::parse(&format!("ws://localhost:{port}"))?)
}

/// Cheap handle for queueing commands. Commands issued while the socket is
/// not open are dropped.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
}

impl CommandSender {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn send(&self, message: &CommandMessage) -> Result<(), SocketError> {
        if !self.is_open() {
            debug!(event = "command_dropped", kind = message.kind(), reason = "not_open");
            return Err(SocketError::NotOpen);
        }
        let text = encode_command(message, DEFAULT_MAX_PAYLOAD_BYTES)?;
        self.tx.try_send(text).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SocketError::Full,
            mpsc::error::TrySendError::Closed(_) => SocketError::Closed,
        })
    }

    pub fn plugin(
        &self,
        subtype: PluginSubtype,
        path: impl Into<String>,
        data: Option<String>,
    ) -> Result<(), SocketError> {
        self.send(&CommandMessage::plugin(subtype, path, data))
    }

    pub fn terminal_command(
        &self,
        terminal_id: u32,
        command: impl Into<String>,
    ) -> Result<(), SocketError> {
        self.send(&CommandMessage::TerminalCommand {
            terminal_id,
            command: command.into(),
        })
    }

    pub fn kill(&self, terminal_id: u32, process_id: u32) -> Result<(), SocketError> {
        self.send(&CommandMessage::Kill {
            terminal_id,
            process_id,
        })
    }
}

enum SocketEnd {
    Closed(u16),
    /// Every [`CommandSender`] was dropped.
    Shutdown,
}

/// Long-lived connection to the external tool. Close codes drive a
/// [`ReconnectPolicy`]; its outcome is written back into the store.
pub struct CommandSocket {
    url: Url,
    store: StoreHandle,
    policy: ReconnectPolicy,
    open: Arc<AtomicBool>,
    outbound: mpsc::Receiver<String>,
}

pub fn command_socket(url: Url, store: StoreHandle) -> (CommandSocket, CommandSender) {
    let (tx, outbound) = mpsc::channel(OUTBOUND_CAPACITY);
    let open = Arc::new(AtomicBool::new(false));
    let socket = CommandSocket {
        url,
        store,
        policy: ReconnectPolicy::default(),
        open: open.clone(),
        outbound,
    };
    (socket, CommandSender { tx, open })
}

impl CommandSocket {
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Connects while the `connect` setting is on. Returns once the policy
    /// stops reconnecting, the setting is off, or every sender is gone.
    pub async fn run(&mut self) -> ConnectionState {
        loop {
            if !self.store.lock().await.settings().connect {
                debug!(event = "command_socket_disabled");
                return self.policy.state();
            }
            self.policy.connecting();
            debug!(event = "command_socket_connecting", url = %self.url);
            let end = match connect_async(self.url.as_str()).await {
                Ok((ws, _)) => {
                    self.policy.opened();
                    self.open.store(true, Ordering::SeqCst);
                    info!(event = "command_socket_open", url = %self.url);
                    let end = self.pump(ws).await;
                    self.open.store(false, Ordering::SeqCst);
                    end
                }
                Err(err) => {
                    warn!(event = "command_socket_connect_error", url = %self.url, error = %err);
                    SocketEnd::Closed(ABNORMAL_CLOSE_CODE)
                }
            };

            let code = match end {
                SocketEnd::Closed(code) => code,
                SocketEnd::Shutdown => {
                    self.policy.shut_down();
                    info!(event = "command_socket_shutdown");
                    return self.policy.state();
                }
            };
            let outcome = self.policy.on_close(code);
            info!(
                event = "command_socket_closed",
                code = code,
                retries = outcome.retries,
                state = ?outcome.state
            );
            self.apply(&outcome).await;
            if !outcome.reconnect {
                return outcome.state;
            }
        }
    }

    async fn pump(&mut self, mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> SocketEnd {
        loop {
            tokio::select! {
                incoming = ws.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_tool_message(&text).await,
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame
                            .map(|frame| u16::from(frame.code))
                            .unwrap_or(CLEAN_SHUTDOWN_CODE);
                        return SocketEnd::Closed(code);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(event = "command_socket_read_error", error = %err);
                        return SocketEnd::Closed(ABNORMAL_CLOSE_CODE);
                    }
                    None => return SocketEnd::Closed(ABNORMAL_CLOSE_CODE),
                },
                outgoing = self.outbound.recv() => match outgoing {
                    Some(text) => {
                        if let Err(err) = ws.send(Message::Text(text)).await {
                            warn!(event = "command_socket_send_error", error = %err);
                            return SocketEnd::Closed(ABNORMAL_CLOSE_CODE);
                        }
                    }
                    None => {
                        self.policy.closing();
                        let _ = ws.close(None).await;
                        return SocketEnd::Shutdown;
                    }
                },
            }
        }
    }

    async fn handle_tool_message(&self, text: &str) {
        let message = match decode_tool_message(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(event = "tool_message_dropped", error = %err);
                return;
            }
        };
        let actions = tool_actions(message);
        if actions.is_empty() {
            return;
        }
        let mut store = self.store.lock().await;
        for action in actions {
            store.dispatch(action);
        }
    }

    async fn apply(&self, outcome: &CloseOutcome) {
        let mut store = self.store.lock().await;
        if outcome.release_terminals {
            store.dispatch(Action::ReleaseTerminals);
        }
        if outcome.disable_connect {
            let mut patch = Map::new();
            patch.insert("connect".to_string(), Value::Bool(false));
            store.dispatch(Action::SetSettings(patch));
        }
    }
}

pub fn tool_actions(message: ToolMessage) -> Vec<Action> {
    match message {
        ToolMessage::TerminalOutput(output) => vec![Action::AddTerminalOutput {
            id: output.terminal_id,
            output: output.output,
        }],
        ToolMessage::TerminalProcessId(process) => vec![Action::SetProcessId {
            id: process.terminal_id,
            process_id: process.process_id,
        }],
        ToolMessage::TerminalExit(exit) => vec![
            Action::ToggleTerminalLock {
                id: exit.terminal_id,
                locked: false,
            },
            Action::SetProcessId {
                id: exit.terminal_id,
                process_id: None,
            },
        ],
        ToolMessage::Other(kind) => {
            debug!(event = "tool_message_ignored", kind = %kind);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::RETRY_COUNT;
    use crate::storage::MemoryStorage;
    use crate::store::{DevtoolsStore, InitialConfig, StorageKeys};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{
        accept_async,
        tungstenite::protocol::{frame::coding::CloseCode, CloseFrame},
    };

    fn connected_store() -> StoreHandle {
        let config = InitialConfig {
            settings: match json!({"connect": true}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            },
            pinned: Vec::new(),
        };
        DevtoolsStore::hydrate(
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryStorage::new()),
            StorageKeys::default(),
            &config,
        )
        .into_handle()
    }

    async fn listener() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        (listener, url)
    }

    #[tokio::test]
    async fn connect_failures_exhaust_retries_and_turn_connect_off() {
        let (listener, url) = listener().await;
        drop(listener);
        let store = connected_store();
        let (mut socket, _sender) = command_socket(url, store.clone());

        assert_eq!(socket.run().await, ConnectionState::ClosedGivenUp);
        assert_eq!(socket.policy().retries(), RETRY_COUNT);
        assert!(!store.lock().await.settings().connect);
    }

    #[tokio::test]
    async fn abnormal_peer_closes_stop_after_retry_count() {
        let (listener, url) = listener().await;
        let server = tokio::spawn(async move {
            let mut accepted = 0;
            while let Ok(Ok((stream, _))) =
                tokio::time::timeout(Duration::from_millis(500), listener.accept()).await
            {
                accepted += 1;
                let mut ws = accept_async(stream).await.expect("handshake");
                let _ = ws
                    .close(Some(CloseFrame {
                        code: CloseCode::from(4000),
                        reason: "".into(),
                    }))
                    .await;
            }
            accepted
        });
        let store = connected_store();
        let (mut socket, _sender) = command_socket(url, store.clone());

        assert_eq!(socket.run().await, ConnectionState::ClosedGivenUp);
        assert!(!store.lock().await.settings().connect);
        assert_eq!(server.await.expect("server"), RETRY_COUNT);
    }

    #[tokio::test]
    async fn clean_shutdown_releases_terminals_after_tool_messages() {
        let (listener, url) = listener().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            for message in [
                json!({"type": "terminal_process_id", "terminalId": 0, "processId": 77}),
                json!({"type": "terminal_output", "terminalId": 0, "output": "ready"}),
                json!({"type": "something_else"}),
            ] {
                ws.send(Message::Text(message.to_string())).await.expect("send");
            }
            let _ = ws.close(None).await;
        });

        let store = connected_store();
        store.lock().await.dispatch(Action::ToggleTerminalLock { id: 0, locked: true });
        let (mut socket, _sender) = command_socket(url, store.clone());

        assert_eq!(socket.run().await, ConnectionState::ClosedClean);
        assert_eq!(socket.policy().retries(), 0);
        let store = store.lock().await;
        let terminal = &store.state().session.terminals[0];
        assert_eq!(terminal.output, vec!["ready".to_string()]);
        assert!(!terminal.locked);
        assert_eq!(terminal.process_id, None);
        assert!(!store.settings().connect);
    }

    #[tokio::test]
    async fn commands_reach_the_tool_only_while_open() {
        let (listener, url) = listener().await;
        let (seen_tx, mut seen_rx) = mpsc::channel::<Value>(4);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let value: Value = serde_json::from_str(&text).expect("json");
                    let done = value["type"] == "kill";
                    seen_tx.send(value).await.expect("forward");
                    if done {
                        break;
                    }
                }
            }
            let _ = ws.close(None).await;
        });

        let store = connected_store();
        let (mut socket, sender) = command_socket(url, store.clone());
        assert!(matches!(
            sender.terminal_command(0, "ls"),
            Err(SocketError::NotOpen)
        ));

        let runner = tokio::spawn(async move { socket.run().await });
        tokio::time::timeout(Duration::from_secs(5), async {
            while !sender.is_open() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("socket opened");

        sender
            .plugin(PluginSubtype::OpenFile, "app/root.tsx", None)
            .expect("plugin");
        sender.kill(0, 77).expect("kill");

        let plugin = seen_rx.recv().await.expect("plugin message");
        assert_eq!(
            plugin,
            json!({"type": "plugin", "subtype": "open_file", "path": "app/root.tsx"})
        );
        let kill = seen_rx.recv().await.expect("kill message");
        assert_eq!(kill, json!({"type": "kill", "terminalId": 0, "processId": 77}));

        let state = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("runner finished")
            .expect("join");
        assert_eq!(state, ConnectionState::ClosedClean);
        assert!(!sender.is_open());
    }

    #[test]
    fn terminal_exit_unlocks_and_clears_process() {
        let actions = tool_actions(ToolMessage::TerminalExit(rdt_core::wire::TerminalExit {
            terminal_id: 3,
        }));
        assert_eq!(
            actions,
            vec![
                Action::ToggleTerminalLock {
                    id: 3,
                    locked: false
                },
                Action::SetProcessId {
                    id: 3,
                    process_id: None
                },
            ]
        );
    }
}
