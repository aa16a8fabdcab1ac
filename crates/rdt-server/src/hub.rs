use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use rdt_core::PushMessage;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Fans decoded push payloads out to every connected UI.
///
/// The most recent payloads are retained and replayed to a subscriber when
/// it connects, so a UI opened after a request still sees its events.
pub struct EventHub {
    sender: broadcast::Sender<Arc<str>>,
    recent: RwLock<VecDeque<Arc<str>>>,
    replay_capacity: usize,
    conn_counter: AtomicU64,
    published: AtomicU64,
}

impl EventHub {
    pub fn new(channel_capacity: usize, replay_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            sender,
            recent: RwLock::new(VecDeque::with_capacity(replay_capacity)),
            replay_capacity,
            conn_counter: AtomicU64::new(0),
            published: AtomicU64::new(0),
        }
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("ui-{id}")
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub async fn publish(&self, message: &PushMessage) -> bool {
        let encoded = match message.to_value().map(|value| value.to_string()) {
            Ok(value) => Arc::<str>::from(value),
            Err(err) => {
                warn!(event = "publish_encode_error", kind = message.kind(), error = %err);
                return false;
            }
        };
        self.publish_raw(encoded).await;
        true
    }

    async fn publish_raw(&self, encoded: Arc<str>) {
        let mut recent = self.recent.write().await;
        if self.replay_capacity > 0 {
            if recent.len() == self.replay_capacity {
                recent.pop_front();
            }
            recent.push_back(encoded.clone());
        }
        let delivered = self.sender.send(encoded).unwrap_or(0);
        self.published.fetch_add(1, Ordering::SeqCst);
        debug!(event = "event_published", subscribers = delivered);
    }

    /// Subscribes and returns the replay buffer as one atomic step, so no
    /// payload is missed or seen twice.
    pub async fn subscribe(&self) -> (Vec<Arc<str>>, broadcast::Receiver<Arc<str>>) {
        let recent = self.recent.read().await;
        let receiver = self.sender.subscribe();
        (recent.iter().cloned().collect(), receiver)
    }

    async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let conn_id = self.next_conn_id();
        let (snapshot, mut receiver) = self.subscribe().await;
        let (mut ws_sender, mut ws_receiver) = socket.split();
        info!(event = "ui_connected", conn_id = %conn_id, replay = snapshot.len());

        for payload in snapshot {
            if ws_sender
                .send(Message::Text(payload.to_string()))
                .await
                .is_err()
            {
                warn!(event = "snapshot_error", conn_id = %conn_id);
                return;
            }
        }

        loop {
            tokio::select! {
                incoming = ws_receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(event = "read_error", conn_id = %conn_id, error = %err);
                            break;
                        }
                    }
                }
                outgoing = receiver.recv() => {
                    match outgoing {
                        Ok(payload) => {
                            if ws_sender.send(Message::Text(payload.to_string())).await.is_err() {
                                warn!(event = "send_error", conn_id = %conn_id);
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(event = "ui_lagged", conn_id = %conn_id, skipped = skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        let _ = ws_sender.close().await;
        info!(event = "ui_disconnected", conn_id = %conn_id);
    }
}

pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<EventHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket).await;
    })
}
