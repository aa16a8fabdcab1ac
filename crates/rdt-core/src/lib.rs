//! Shared model for the devtools channel: timeline events, execution
//! capture, route tree reconstruction, and the JSON wire formats spoken on
//! the push endpoint and the command socket.

pub mod capture;
pub mod events;
pub mod logging;
pub mod route_tree;
pub mod wire;

pub use capture::{
    begin_execution, CaptureError, CapturedExecution, ExecutionHandle, ExecutionKind,
    ExecutionTracker, Headers, ServerEvent,
};
pub use events::{EventKind, FetcherEvent, RedirectEvent, SubmissionEvent, TimelineEvent};
pub use route_tree::{
    build_tree, find_error_boundary, resolve_url, ErrorBoundaryOwner, RouteTable,
    RouteTableEntry, RouteTreeNode,
};
pub use wire::{
    decode_push, decode_tool_message, encode_command, CommandMessage,
    PluginCommand, PluginSubtype, PushMessage, ToolMessage, WireError,
    DEFAULT_MAX_PAYLOAD_BYTES,
};

/// Default namespace for endpoint markers and storage keys.
pub const DEFAULT_NAMESPACE: &str = "rdt";
