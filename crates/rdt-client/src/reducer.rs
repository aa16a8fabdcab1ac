use crate::state::{record_server_event, DevtoolsState, Terminal};
use crate::timeline::correlate;
use rdt_core::{ServerEvent, TimelineEvent};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Every mutation of [`DevtoolsState`] goes through one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Shallow merge into settings.
    SetSettings(Map<String, Value>),
    SetTimelineEvent(TimelineEvent),
    PurgeTimeline,
    SetIsSubmitted,
    SetPersistOpen(bool),
    SetWholeState(Box<DevtoolsState>),
    SetServerInfo(ServerEvent),
    /// Removes the terminal with this id, or adds a new one when `None`.
    AddOrRemoveTerminal(Option<u32>),
    ToggleTerminalLock { id: u32, locked: bool },
    AddTerminalOutput { id: u32, output: String },
    AddTerminalHistory { id: u32, entry: String },
    SetProcessId { id: u32, process_id: Option<u32> },
    ReleaseTerminals,
    /// Anything unrecognised. Reducing it leaves the state untouched.
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockPayload {
    id: u32,
    locked: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputPayload {
    id: u32,
    output: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPayload {
    id: u32,
    entry: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessPayload {
    id: u32,
    #[serde(default)]
    process_id: Option<u32>,
}

impl Action {
    pub fn kind(&self) -> &str {
        match self {
            Action::SetSettings(_) => "SET_SETTINGS",
            Action::SetTimelineEvent(_) => "SET_TIMELINE_EVENT",
            Action::PurgeTimeline => "PURGE_TIMELINE",
            Action::SetIsSubmitted => "SET_IS_SUBMITTED",
            Action::SetPersistOpen(_) => "SET_PERSIST_OPEN",
            Action::SetWholeState(_) => "SET_WHOLE_STATE",
            Action::SetServerInfo(_) => "SET_SERVER_INFO",
            Action::AddOrRemoveTerminal(_) => "ADD_OR_REMOVE_TERMINAL",
            Action::ToggleTerminalLock { .. } => "TOGGLE_TERMINAL_LOCK",
            Action::AddTerminalOutput { .. } => "ADD_TERMINAL_OUTPUT",
            Action::AddTerminalHistory { .. } => "ADD_TERMINAL_HISTORY",
            Action::SetProcessId { .. } => "SET_PROCESS_ID",
            Action::ReleaseTerminals => "RELEASE_TERMINALS",
            Action::Unknown(kind) => kind,
        }
    }

    /// Decodes `{"type": ..., "payload": ...}`. Unknown types and payloads
    /// that do not fit their type become [`Action::Unknown`].
    pub fn from_json(value: Value) -> Action {
        let Value::Object(mut object) = value else {
            return Action::Unknown(String::new());
        };
        let kind = match object.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => return Action::Unknown(String::new()),
        };
        let payload = object.remove("payload").unwrap_or(Value::Null);
        match decode_payload(&kind, payload) {
            Ok(action) => action,
            Err(reason) => {
                debug!(event = "action_rejected", kind = %kind, reason = %reason);
                Action::Unknown(kind)
            }
        }
    }
}

fn decode_payload(kind: &str, payload: Value) -> Result<Action, String> {
    let action = match kind {
        "SET_SETTINGS" => match payload {
            Value::Object(patch) => Action::SetSettings(patch),
            _ => return Err("settings patch must be an object".to_string()),
        },
        "SET_TIMELINE_EVENT" => Action::SetTimelineEvent(typed(payload)?),
        "PURGE_TIMELINE" => Action::PurgeTimeline,
        "SET_IS_SUBMITTED" => Action::SetIsSubmitted,
        "SET_PERSIST_OPEN" => Action::SetPersistOpen(typed(payload)?),
        "SET_WHOLE_STATE" => Action::SetWholeState(Box::new(typed(payload)?)),
        "SET_SERVER_INFO" => Action::SetServerInfo(typed(payload)?),
        "ADD_OR_REMOVE_TERMINAL" => Action::AddOrRemoveTerminal(typed(payload)?),
        "TOGGLE_TERMINAL_LOCK" => {
            let LockPayload { id, locked } = typed(payload)?;
            Action::ToggleTerminalLock { id, locked }
        }
        "ADD_TERMINAL_OUTPUT" => {
            let OutputPayload { id, output } = typed(payload)?;
            Action::AddTerminalOutput { id, output }
        }
        "ADD_TERMINAL_HISTORY" => {
            let HistoryPayload { id, entry } = typed(payload)?;
            Action::AddTerminalHistory { id, entry }
        }
        "SET_PROCESS_ID" => {
            let ProcessPayload { id, process_id } = typed(payload)?;
            Action::SetProcessId { id, process_id }
        }
        "RELEASE_TERMINALS" => Action::ReleaseTerminals,
        other => return Err(format!("unknown action type {other}")),
    };
    Ok(action)
}

fn typed<T: DeserializeOwned>(payload: Value) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|err| err.to_string())
}

/// Pure transition function. Never fails; unknown actions hand the state
/// back as it was.
pub fn reduce(mut state: DevtoolsState, action: Action) -> DevtoolsState {
    match action {
        Action::SetSettings(patch) => state.settings = state.settings.merged(&patch),
        Action::SetTimelineEvent(event) => {
            correlate(&mut state.session.timeline, event);
        }
        Action::PurgeTimeline => state.session.timeline.clear(),
        Action::SetIsSubmitted => state.session.is_submitted = true,
        Action::SetPersistOpen(open) => state.session.persist_open = open,
        Action::SetWholeState(whole) => state = *whole,
        Action::SetServerInfo(event) => {
            record_server_event(&mut state.session.server_routes, event)
        }
        Action::AddOrRemoveTerminal(Some(id)) => {
            state.session.terminals.retain(|terminal| terminal.id != id)
        }
        Action::AddOrRemoveTerminal(None) => {
            let id = state.session.next_terminal_id();
            state.session.terminals.push(Terminal::new(id));
        }
        Action::ToggleTerminalLock { id, locked } => {
            if let Some(terminal) = state.session.terminal_mut(id) {
                terminal.locked = locked;
            }
        }
        Action::AddTerminalOutput { id, output } => {
            if let Some(terminal) = state.session.terminal_mut(id) {
                terminal.output.push(output);
            }
        }
        Action::AddTerminalHistory { id, entry } => {
            if let Some(terminal) = state.session.terminal_mut(id) {
                terminal.history.push(entry);
            }
        }
        Action::SetProcessId { id, process_id } => {
            if let Some(terminal) = state.session.terminal_mut(id) {
                terminal.process_id = process_id;
            }
        }
        Action::ReleaseTerminals => {
            state.session.terminals.iter_mut().for_each(Terminal::release)
        }
        Action::Unknown(_) => {}
    }
    state
}
