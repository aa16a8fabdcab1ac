use rdt_core::{
    CaptureError, CapturedExecution, ExecutionHandle, ExecutionKind, Headers, ServerEvent,
    TimelineEvent,
};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const PUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Producer side of the push endpoint. Every push is fire-and-forget: a
/// failed delivery is logged and dropped.
#[derive(Debug, Clone)]
pub struct EventPusher {
    client: reqwest::Client,
    endpoint: Url,
}

impl EventPusher {
    pub fn new(base: &Url, namespace: &str) -> Result<Self, url::ParseError> {
        let endpoint = base.join(&format!("/__{namespace}"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn push_execution(
        &self,
        kind: ExecutionKind,
        route_id: &str,
        execution: CapturedExecution,
    ) -> bool {
        let event = ServerEvent {
            kind,
            route_id: route_id.to_string(),
            data: execution,
        };
        self.post(kind.as_str(), &event).await
    }

    /// Completes `handle` and pushes the result. Completing a handle twice is
    /// a wiring bug and is returned to the caller instead of being dropped.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &self,
        kind: ExecutionKind,
        route_id: &str,
        handle: &mut ExecutionHandle,
        request_data: Value,
        response_data: Value,
        request_headers: Headers,
        response_headers: Headers,
    ) -> Result<bool, CaptureError> {
        let execution = handle.end(request_data, response_data, request_headers, response_headers)?;
        Ok(self.push_execution(kind, route_id, execution).await)
    }

    pub async fn push_timeline(&self, event: &TimelineEvent) -> bool {
        self.post(event.kind().as_str(), event).await
    }

    async fn post<T: Serialize>(&self, kind: &str, body: &T) -> bool {
        let result = self
            .client
            .post(self.endpoint.clone())
            .timeout(PUSH_TIMEOUT)
            .json(body)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(event = "push_sent", kind = kind);
                true
            }
            Ok(response) => {
                warn!(event = "push_rejected", kind = kind, status = %response.status());
                false
            }
            Err(err) => {
                warn!(event = "push_error", kind = kind, error = %err);
                false
            }
        }
    }
}
