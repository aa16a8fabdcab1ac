use crate::settings::Settings;
use rdt_core::{CapturedExecution, ExecutionKind, ServerEvent, TimelineEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Executions kept per route and kind; older ones are dropped first.
pub const MAX_ROUTE_EXECUTIONS: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevtoolsState {
    pub settings: Settings,
    pub session: SessionState,
}

/// Everything that is not a user preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    pub timeline: Vec<TimelineEvent>,
    pub is_submitted: bool,
    pub persist_open: bool,
    pub terminals: Vec<Terminal>,
    pub server_routes: BTreeMap<String, ServerRouteInfo>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            timeline: Vec::new(),
            is_submitted: false,
            persist_open: false,
            terminals: vec![Terminal::new(0)],
            server_routes: BTreeMap::new(),
        }
    }
}

impl SessionState {
    pub fn terminal_mut(&mut self, id: u32) -> Option<&mut Terminal> {
        self.terminals.iter_mut().find(|terminal| terminal.id == id)
    }

    pub fn next_terminal_id(&self) -> u32 {
        self.terminals
            .iter()
            .map(|terminal| terminal.id + 1)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Terminal {
    pub id: u32,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
}

impl Terminal {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            locked: false,
            history: Vec::new(),
            output: Vec::new(),
            process_id: None,
        }
    }

    pub fn release(&mut self) {
        self.locked = false;
        self.process_id = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub lowest: f64,
    pub highest: f64,
    pub average: f64,
}

impl ExecutionStats {
    pub fn of(executions: &[CapturedExecution]) -> Option<ExecutionStats> {
        let first = executions.first()?.execution_time;
        let (lowest, highest, total) = executions.iter().fold(
            (first, first, 0.0),
            |(lowest, highest, total), execution| {
                (
                    lowest.min(execution.execution_time),
                    highest.max(execution.execution_time),
                    total + execution.execution_time,
                )
            },
        );
        Some(ExecutionStats {
            lowest,
            highest,
            average: total / executions.len() as f64,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerRouteInfo {
    pub loaders: Vec<CapturedExecution>,
    pub actions: Vec<CapturedExecution>,
    pub loader_stats: Option<ExecutionStats>,
    pub action_stats: Option<ExecutionStats>,
}

impl ServerRouteInfo {
    pub fn record(&mut self, kind: ExecutionKind, execution: CapturedExecution) {
        let (executions, stats) = match kind {
            ExecutionKind::Loader => (&mut self.loaders, &mut self.loader_stats),
            ExecutionKind::Action => (&mut self.actions, &mut self.action_stats),
        };
        executions.push(execution);
        if executions.len() > MAX_ROUTE_EXECUTIONS {
            let excess = executions.len() - MAX_ROUTE_EXECUTIONS;
            executions.drain(..excess);
        }
        *stats = ExecutionStats::of(executions);
    }
}

pub(crate) fn record_server_event(
    routes: &mut BTreeMap<String, ServerRouteInfo>,
    event: ServerEvent,
) {
    routes
        .entry(event.route_id)
        .or_default()
        .record(event.kind, event.data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdt_core::Headers;
    use serde_json::Value;

    fn execution(id: &str, time: f64) -> CapturedExecution {
        CapturedExecution {
            id: id.to_string(),
            execution_time: time,
            request_data: Value::Null,
            response_data: Value::Null,
            request_headers: Headers::new(),
            response_headers: Headers::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn route_info_caps_executions_and_tracks_stats() {
        let mut info = ServerRouteInfo::default();
        for n in 0..25 {
            info.record(ExecutionKind::Loader, execution(&format!("e{n}"), n as f64));
        }
        assert_eq!(info.loaders.len(), MAX_ROUTE_EXECUTIONS);
        assert_eq!(info.loaders[0].id, "e5");
        let stats = info.loader_stats.expect("stats");
        assert_eq!(stats.lowest, 5.0);
        assert_eq!(stats.highest, 24.0);
        assert_eq!(stats.average, 14.5);
        assert!(info.actions.is_empty());
        assert!(info.action_stats.is_none());
    }

    #[test]
    fn session_defaults_to_one_terminal() {
        let session = SessionState::default();
        assert_eq!(session.terminals, vec![Terminal::new(0)]);
        assert_eq!(session.next_terminal_id(), 1);
    }
}
