use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("execution {id} was already completed")]
    DoubleCompletion { id: String },
}

/// Header map with lower-cased names. Decoding normalizes names too, so
/// captured executions read back from the wire or from storage stay lookupable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().trim().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// One finished loader/action execution, ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedExecution {
    pub id: String,
    /// Wall-clock duration in milliseconds.
    pub execution_time: f64,
    #[serde(default)]
    pub request_data: Value,
    #[serde(default)]
    pub response_data: Value,
    #[serde(default)]
    pub request_headers: Headers,
    #[serde(default)]
    pub response_headers: Headers,
    /// Unix milliseconds at completion.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Loader,
    Action,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::Loader => "loader",
            ExecutionKind::Action => "action",
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server execution as pushed to the devtools endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub kind: ExecutionKind,
    pub route_id: String,
    pub data: CapturedExecution,
}

/// Starts timing an execution that is not tracked by any [`ExecutionTracker`].
pub fn begin_execution(id: impl Into<String>) -> ExecutionHandle {
    ExecutionHandle {
        id: id.into(),
        started: Instant::now(),
        completed: false,
        tracker: None,
    }
}

/// Counts in-flight executions per id. Overlapping executions sharing an id
/// are tracked independently.
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    in_flight: Mutex<HashMap<String, usize>>,
}

impl ExecutionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn begin(self: &Arc<Self>, id: impl Into<String>) -> ExecutionHandle {
        let id = id.into();
        if let Ok(mut in_flight) = self.in_flight.lock() {
            *in_flight.entry(id.clone()).or_default() += 1;
        }
        ExecutionHandle {
            id,
            started: Instant::now(),
            completed: false,
            tracker: Some(self.clone()),
        }
    }

    /// Starts an execution under a freshly generated id.
    pub fn begin_new(self: &Arc<Self>) -> ExecutionHandle {
        self.begin(uuid::Uuid::new_v4().to_string())
    }

    pub fn in_flight(&self, id: &str) -> usize {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.get(id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn in_flight_total(&self) -> usize {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.values().sum())
            .unwrap_or(0)
    }

    fn release(&self, id: &str) {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return;
        };
        if let Some(count) = in_flight.get_mut(id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(id);
            }
        }
    }
}

/// Live timer for a single execution. Dropping it without calling
/// [`ExecutionHandle::end`] leaves the execution unreported.
#[derive(Debug)]
pub struct ExecutionHandle {
    id: String,
    started: Instant,
    completed: bool,
    tracker: Option<Arc<ExecutionTracker>>,
}

impl ExecutionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn end(
        &mut self,
        request_data: Value,
        response_data: Value,
        request_headers: Headers,
        response_headers: Headers,
    ) -> Result<CapturedExecution, CaptureError> {
        if self.completed {
            error!(event = "execution_double_completion", id = %self.id);
            return Err(CaptureError::DoubleCompletion {
                id: self.id.clone(),
            });
        }
        self.completed = true;
        let execution_time = self.started.elapsed().as_secs_f64() * 1000.0;
        if let Some(tracker) = self.tracker.take() {
            tracker.release(&self.id);
        }
        Ok(CapturedExecution {
            id: self.id.clone(),
            execution_time,
            request_data,
            response_data,
            request_headers,
            response_headers,
            timestamp: Utc::now().timestamp_millis(),
        })
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.release(&self.id);
        }
    }
}
