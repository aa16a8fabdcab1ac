use crate::reducer::{reduce, Action};
use crate::settings::{apply_layer, Settings};
use crate::state::{DevtoolsState, SessionState};
use crate::storage::{read_json, write_json, Storage};
use rdt_core::DEFAULT_NAMESPACE;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Externally supplied starting configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitialConfig {
    /// Settings applied over defaults. Persisted settings win over these.
    pub settings: Map<String, Value>,
    /// Fields of `settings` that win over persisted values too.
    pub pinned: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub settings: String,
    pub state: String,
}

impl StorageKeys {
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            settings: format!("{namespace}_settings"),
            state: format!("{namespace}_state"),
        }
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::for_namespace(DEFAULT_NAMESPACE)
    }
}

/// Owns the state and writes it back after every change.
pub struct DevtoolsStore {
    state: DevtoolsState,
    durable: Arc<dyn Storage>,
    session: Arc<dyn Storage>,
    keys: StorageKeys,
}

pub type StoreHandle = Arc<Mutex<DevtoolsStore>>;

impl DevtoolsStore {
    pub fn hydrate(
        durable: Arc<dyn Storage>,
        session: Arc<dyn Storage>,
        keys: StorageKeys,
        config: &InitialConfig,
    ) -> Self {
        let mut settings = Settings::default().merged(&config.settings);
        if let Some(Value::Object(stored)) = read_json(durable.as_ref(), &keys.settings) {
            settings = settings.merged(&stored);
        }
        settings = settings.with_pinned(&config.settings, &config.pinned);

        let stored_state = read_json(session.as_ref(), &keys.state)
            .or_else(|| read_json(durable.as_ref(), &keys.state));
        let session_state = match stored_state {
            Some(Value::Object(stored)) => apply_layer(&SessionState::default(), &stored),
            _ => SessionState::default(),
        };
        debug!(
            event = "store_hydrated",
            timeline = session_state.timeline.len(),
            connect = settings.connect
        );

        Self {
            state: DevtoolsState {
                settings,
                session: session_state,
            },
            durable,
            session,
            keys,
        }
    }

    pub fn into_handle(self) -> StoreHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> &DevtoolsState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }

    pub fn snapshot(&self) -> DevtoolsState {
        self.state.clone()
    }

    /// Applies `action` and persists when the state changed. Returns whether
    /// it did.
    pub fn dispatch(&mut self, action: Action) -> bool {
        let kind = action.kind().to_string();
        let next = reduce(self.state.clone(), action);
        if next == self.state {
            debug!(event = "dispatch_unchanged", action = %kind);
            return false;
        }
        self.state = next;
        debug!(event = "dispatch", action = %kind);
        self.persist();
        true
    }

    /// Write failures are logged and otherwise ignored.
    fn persist(&self) {
        match serde_json::to_value(&self.state.settings) {
            Ok(settings) => {
                if let Err(err) = write_json(self.durable.as_ref(), &self.keys.settings, settings) {
                    warn!(event = "persist_error", key = %self.keys.settings, error = %err);
                }
            }
            Err(err) => warn!(event = "persist_error", key = %self.keys.settings, error = %err),
        }
        let session = match serde_json::to_value(&self.state.session) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "persist_error", key = %self.keys.state, error = %err);
                return;
            }
        };
        for storage in [&self.session, &self.durable] {
            if let Err(err) = write_json(storage.as_ref(), &self.keys.state, session.clone()) {
                warn!(event = "persist_error", key = %self.keys.state, error = %err);
            }
        }
    }
}
