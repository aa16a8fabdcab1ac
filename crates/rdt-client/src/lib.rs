//! Consumer side of the devtools channel: a reducer-driven store hydrated
//! from durable and session storage, the timeline correlator, the command
//! socket to the external tool and the event-stream subscriber.

pub mod focus;
pub mod reconnect;
pub mod reducer;
pub mod settings;
pub mod socket;
pub mod state;
pub mod storage;
pub mod store;
pub mod subscriber;
pub mod timeline;

pub use focus::{FocusController, TimelineFocus};
pub use reconnect::{
    CloseOutcome, ConnectionState, ReconnectPolicy, ABNORMAL_CLOSE_CODE, CLEAN_SHUTDOWN_CODE,
    RETRY_COUNT,
};
pub use reducer::{reduce, Action};
pub use settings::{Position, Settings};
pub use socket::{command_socket, CommandSender, CommandSocket, SocketError};
pub use state::{DevtoolsState, ExecutionStats, ServerRouteInfo, SessionState, Terminal};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
pub use store::{DevtoolsStore, InitialConfig, StorageKeys, StoreHandle};
pub use timeline::{correlate, Placement};
