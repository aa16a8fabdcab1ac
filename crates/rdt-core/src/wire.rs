use crate::capture::ServerEvent;
use crate::events::{EventKind, TimelineEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Discriminator carried by every privileged command sent to the external tool.
pub const PLUGIN_MESSAGE_TYPE: &str = "plugin";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("payload exceeds max size: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("payload encode failed: {0}")]
    Encode(String),
    #[error("payload decode failed: {0}")]
    Decode(String),
    #[error("payload has unexpected shape for type {kind}: {reason}")]
    Shape { kind: String, reason: String },
}

/// Anything accepted on the push endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Timeline(TimelineEvent),
    Server(ServerEvent),
    /// Valid JSON that is not a known event, forwarded untouched.
    Control(Value),
}

impl PushMessage {
    pub fn kind(&self) -> &str {
        match self {
            PushMessage::Timeline(event) => event.kind().as_str(),
            PushMessage::Server(event) => event.kind.as_str(),
            PushMessage::Control(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("control"),
        }
    }

    pub fn to_value(&self) -> Result<Value, WireError> {
        let value = match self {
            PushMessage::Timeline(event) => serde_json::to_value(event),
            PushMessage::Server(event) => serde_json::to_value(event),
            PushMessage::Control(value) => Ok(value.clone()),
        };
        value.map_err(|err| WireError::Encode(err.to_string()))
    }
}

/// Decodes a fully buffered push body.
///
/// The body is one JSON document. Known `type` tags are decoded into typed
/// events; other JSON is passed through as [`PushMessage::Control`].
pub fn decode_push(bytes: &[u8], max_bytes: usize) -> Result<PushMessage, WireError> {
    if bytes.len() > max_bytes {
        return Err(WireError::Oversized {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| WireError::Decode(err.to_string()))?;
    classify_push(value)
}

pub fn classify_push(value: Value) -> Result<PushMessage, WireError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);
    match kind.as_deref() {
        Some("loader") | Some("action") => serde_json::from_value(value)
            .map(PushMessage::Server)
            .map_err(|err| shape_error(kind.as_deref(), err)),
        Some(tag) if tag.parse::<EventKind>().is_ok() => serde_json::from_value(value)
            .map(PushMessage::Timeline)
            .map_err(|err| shape_error(kind.as_deref(), err)),
        _ => Ok(PushMessage::Control(value)),
    }
}

fn shape_error(kind: Option<&str>, err: serde_json::Error) -> WireError {
    WireError::Shape {
        kind: kind.unwrap_or_default().to_string(),
        reason: err.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginSubtype {
    ReadFile,
    OpenFile,
    DeleteFile,
    WriteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCommand {
    pub subtype: PluginSubtype,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Outbound message on the command socket. The `type` tag is always present
/// so the tool can tell control traffic apart from anything else it receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandMessage {
    Plugin(PluginCommand),
    TerminalCommand {
        #[serde(rename = "terminalId")]
        terminal_id: u32,
        command: String,
    },
    Kill {
        #[serde(rename = "terminalId")]
        terminal_id: u32,
        #[serde(rename = "processId")]
        process_id: u32,
    },
}

impl CommandMessage {
    pub fn plugin(subtype: PluginSubtype, path: impl Into<String>, data: Option<String>) -> Self {
        CommandMessage::Plugin(PluginCommand {
            subtype,
            path: path.into(),
            data,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CommandMessage::Plugin(_) => PLUGIN_MESSAGE_TYPE,
            CommandMessage::TerminalCommand { .. } => "terminal_command",
            CommandMessage::Kill { .. } => "kill",
        }
    }
}

pub fn encode_command(message: &CommandMessage, max_bytes: usize) -> Result<String, WireError> {
    let encoded =
        serde_json::to_string(message).map_err(|err| WireError::Encode(err.to_string()))?;
    if encoded.len() > max_bytes {
        return Err(WireError::Oversized {
            size: encoded.len(),
            max: max_bytes,
        });
    }
    Ok(encoded)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutput {
    pub terminal_id: u32,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalProcess {
    pub terminal_id: u32,
    #[serde(default)]
    pub process_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExit {
    pub terminal_id: u32,
}

/// Inbound message from the external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolMessage {
    TerminalOutput(TerminalOutput),
    TerminalProcessId(TerminalProcess),
    TerminalExit(TerminalExit),
    Other(String),
}

/// Decodes a text frame from the external tool. Payloads of a known `type`
/// that fail to decode are rejected; unknown types come back as `Other`.
pub fn decode_tool_message(text: &str) -> Result<ToolMessage, WireError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| WireError::Decode(err.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WireError::Decode("missing type".to_string()))?;
    let message = match kind.as_str() {
        "terminal_output" => ToolMessage::TerminalOutput(
            serde_json::from_value(value).map_err(|err| shape_error(Some(kind.as_str()), err))?,
        ),
        "terminal_process_id" => ToolMessage::TerminalProcessId(
            serde_json::from_value(value).map_err(|err| shape_error(Some(kind.as_str()), err))?,
        ),
        "terminal_exit" => ToolMessage::TerminalExit(
            serde_json::from_value(value).map_err(|err| shape_error(Some(kind.as_str()), err))?,
        ),
        _ => ToolMessage::Other(kind),
    };
    Ok(message)
}
