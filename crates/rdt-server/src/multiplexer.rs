use crate::hub::EventHub;
use crate::opener::{OpenSourceQuery, SourceOpener};
use crate::DevtoolsConfig;
use axum::{
    body::{to_bytes, Body},
    extract::{Query, Request, State},
    http::{header, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use rdt_core::{decode_push, PushMessage};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CLOSE_WINDOW_HTML: &str =
    "<!DOCTYPE html><html><head></head><body><script>window.close();</script></body></html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRoute {
    OpenSource,
    Push,
    PassThrough,
}

/// Single entry point sitting in front of the host application.
pub struct Multiplexer {
    config: DevtoolsConfig,
    hub: Arc<EventHub>,
    opener: Arc<dyn SourceOpener>,
}

impl Multiplexer {
    pub fn new(config: DevtoolsConfig, hub: Arc<EventHub>, opener: Arc<dyn SourceOpener>) -> Self {
        Self {
            config,
            hub,
            opener,
        }
    }

    pub fn config(&self) -> &DevtoolsConfig {
        &self.config
    }

    pub fn classify(&self, path: &str) -> RequestRoute {
        if path.contains(&self.config.open_source_marker()) {
            return RequestRoute::OpenSource;
        }
        if path.contains(&self.config.push_marker()) {
            return RequestRoute::Push;
        }
        RequestRoute::PassThrough
    }

    fn open_source(&self, uri: &Uri) -> Response {
        let query = Query::<OpenSourceQuery>::try_from_uri(uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        match query.into_request() {
            Some(request) => {
                info!(
                    event = "open_source",
                    source = %request.source,
                    line = request.line,
                    column = request.column
                );
                if let Err(err) = self.opener.open(&request) {
                    warn!(event = "open_source_error", source = %request.source, error = %err);
                }
            }
            None => warn!(event = "open_source_missing_source", uri = %uri),
        }
        (
            [(header::CONTENT_TYPE, "text/html")],
            CLOSE_WINDOW_HTML,
        )
            .into_response()
    }

    /// Buffers the whole body, then decodes it as one JSON document.
    /// Anything unreadable is dropped; the sender is acknowledged either way.
    async fn ingest(&self, body: Body) -> Response {
        match to_bytes(body, self.config.max_body_bytes).await {
            Ok(bytes) => {
                if let Some(message) = self.decode(&bytes) {
                    self.hub.publish(&message).await;
                }
            }
            Err(err) => warn!(event = "push_body_error", error = %err),
        }
        (StatusCode::OK, "OK").into_response()
    }

    fn decode(&self, bytes: &[u8]) -> Option<PushMessage> {
        match decode_push(bytes, self.config.max_body_bytes) {
            Ok(message) => {
                debug!(event = "push_received", kind = message.kind(), size = bytes.len());
                Some(message)
            }
            Err(err) => {
                warn!(event = "push_dropped", error = %err, size = bytes.len());
                None
            }
        }
    }
}

pub async fn dispatch(
    State(mux): State<Arc<Multiplexer>>,
    request: Request,
    next: Next,
) -> Response {
    match mux.classify(request.uri().path()) {
        RequestRoute::OpenSource => mux.open_source(request.uri()),
        RequestRoute::Push => mux.ingest(request.into_body()).await,
        RequestRoute::PassThrough => next.run(request).await,
    }
}
