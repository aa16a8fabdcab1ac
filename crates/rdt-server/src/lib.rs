//! Producer-side transport: one middleware in front of the host application
//! that takes event pushes and open-source requests, plus a WebSocket stream
//! feeding pushed events to connected UIs.

pub mod hub;
pub mod multiplexer;
pub mod opener;
pub mod pusher;

use axum::{middleware, routing::get, Router};
use rdt_core::{DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_NAMESPACE};
use std::sync::Arc;

pub use hub::EventHub;
pub use multiplexer::{Multiplexer, RequestRoute};
pub use opener::{EditorLauncher, OpenSourceRequest, SourceOpener};
pub use pusher::EventPusher;

#[derive(Clone, Debug)]
pub struct DevtoolsConfig {
    pub namespace: String,
    pub max_body_bytes: usize,
    pub channel_capacity: usize,
    pub replay_capacity: usize,
}

impl Default for DevtoolsConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_body_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            channel_capacity: 256,
            replay_capacity: 64,
        }
    }
}

impl DevtoolsConfig {
    pub fn push_marker(&self) -> String {
        format!("__{}", self.namespace)
    }

    pub fn open_source_marker(&self) -> String {
        format!("{}/open-source", self.namespace)
    }

    pub fn events_path(&self) -> String {
        format!("/{}/events", self.namespace)
    }
}

pub struct DevtoolsServer {
    mux: Arc<Multiplexer>,
    hub: Arc<EventHub>,
}

impl DevtoolsServer {
    pub fn new(config: DevtoolsConfig) -> Self {
        Self::with_opener(config, Arc::new(EditorLauncher::from_env()))
    }

    pub fn with_opener(config: DevtoolsConfig, opener: Arc<dyn SourceOpener>) -> Self {
        let hub = Arc::new(EventHub::new(
            config.channel_capacity,
            config.replay_capacity,
        ));
        let mux = Arc::new(Multiplexer::new(config, hub.clone(), opener));
        Self { mux, hub }
    }

    pub fn config(&self) -> &DevtoolsConfig {
        self.mux.config()
    }

    pub fn hub(&self) -> Arc<EventHub> {
        self.hub.clone()
    }

    /// Wraps `host`: devtools paths are answered here, everything else
    /// reaches the host router unchanged.
    pub fn attach(&self, host: Router) -> Router {
        Router::new()
            .route(&self.config().events_path(), get(hub::events_handler))
            .with_state(self.hub.clone())
            .fallback_service(host)
            .layer(middleware::from_fn_with_state(
                self.mux.clone(),
                multiplexer::dispatch,
            ))
    }
}
