use crate::reducer::Action;
use crate::store::{DevtoolsStore, StoreHandle};
use futures_util::StreamExt;
use rdt_core::{decode_push, PushMessage, DEFAULT_MAX_PAYLOAD_BYTES};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::{Position, Url};

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// WebSocket URL of the event stream served next to the push endpoint.
pub fn events_url(server: &Url, namespace: &str) -> Result<Url, url::ParseError> {
    let url = server.join(&format!("/{namespace}/events"))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    Url::parse(&format!("{scheme}{}", &url[Position::AfterScheme..]))
}

/// Feeds one stream payload into the store. Returns whether the state
/// changed.
pub fn apply_push(store: &mut DevtoolsStore, text: &str) -> bool {
    match decode_push(text.as_bytes(), DEFAULT_MAX_PAYLOAD_BYTES) {
        Ok(PushMessage::Timeline(event)) => store.dispatch(Action::SetTimelineEvent(event)),
        Ok(PushMessage::Server(event)) => store.dispatch(Action::SetServerInfo(event)),
        Ok(message @ PushMessage::Control(_)) => {
            debug!(event = "control_payload_ignored", kind = message.kind());
            false
        }
        Err(err) => {
            debug!(event = "stream_payload_dropped", error = %err);
            false
        }
    }
}

/// Stays subscribed for the life of the task, reconnecting with backoff.
pub async fn run_event_stream(url: Url, store: StoreHandle) {
    let mut backoff = Duration::from_secs(1);
    loop {
        let mut ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(err) => {
                warn!(event = "event_stream_connect_error", url = %url, error = %err);
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(1);
        info!(event = "event_stream_connected", url = %url);

        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let mut store = store.lock().await;
                    if apply_push(&mut store, &text) {
                        debug!(
                            event = "event_applied",
                            timeline = store.state().session.timeline.len()
                        );
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(event = "event_stream_read_error", error = %err);
                    break;
                }
            }
        }
        info!(event = "event_stream_disconnected", url = %url);
        tokio::time::sleep(backoff).await;
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}
