use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Navigation and submission events shown on the timeline.
///
/// The JSON form is tagged by `type` (`"FORM_SUBMISSION"`, ...) with the
/// remaining fields in camelCase, matching what the browser side emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineEvent {
    Redirect(RedirectEvent),
    FetcherRedirect(RedirectEvent),
    FormSubmission(SubmissionEvent),
    FetcherSubmit(FetcherEvent),
    FetcherResponse(FetcherEvent),
    ActionRedirect(SubmissionEvent),
    ActionResponse(SubmissionEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedirectEvent {
    pub id: String,
    pub to: String,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default = "default_redirect_method")]
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEvent {
    pub id: String,
    pub to: String,
    pub from: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FetcherEvent {
    pub id: String,
    pub to: String,
    pub from: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

fn default_redirect_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Redirect,
    FetcherRedirect,
    FormSubmission,
    FetcherSubmit,
    FetcherResponse,
    ActionRedirect,
    ActionResponse,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Redirect,
        EventKind::FetcherRedirect,
        EventKind::FormSubmission,
        EventKind::FetcherSubmit,
        EventKind::FetcherResponse,
        EventKind::ActionRedirect,
        EventKind::ActionResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Redirect => "REDIRECT",
            EventKind::FetcherRedirect => "FETCHER_REDIRECT",
            EventKind::FormSubmission => "FORM_SUBMISSION",
            EventKind::FetcherSubmit => "FETCHER_SUBMIT",
            EventKind::FetcherResponse => "FETCHER_RESPONSE",
            EventKind::ActionRedirect => "ACTION_REDIRECT",
            EventKind::ActionResponse => "ACTION_RESPONSE",
        }
    }

    /// The request-phase kind a response-phase kind resolves, if any.
    pub fn request_counterpart(&self) -> Option<EventKind> {
        match self {
            EventKind::FetcherResponse => Some(EventKind::FetcherSubmit),
            EventKind::ActionResponse | EventKind::ActionRedirect => {
                Some(EventKind::FormSubmission)
            }
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == input)
            .ok_or_else(|| format!("Unknown event type: {input}"))
    }
}

impl TimelineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TimelineEvent::Redirect(_) => EventKind::Redirect,
            TimelineEvent::FetcherRedirect(_) => EventKind::FetcherRedirect,
            TimelineEvent::FormSubmission(_) => EventKind::FormSubmission,
            TimelineEvent::FetcherSubmit(_) => EventKind::FetcherSubmit,
            TimelineEvent::FetcherResponse(_) => EventKind::FetcherResponse,
            TimelineEvent::ActionRedirect(_) => EventKind::ActionRedirect,
            TimelineEvent::ActionResponse(_) => EventKind::ActionResponse,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TimelineEvent::Redirect(event) | TimelineEvent::FetcherRedirect(event) => &event.id,
            TimelineEvent::FormSubmission(event)
            | TimelineEvent::ActionRedirect(event)
            | TimelineEvent::ActionResponse(event) => &event.id,
            TimelineEvent::FetcherSubmit(event) | TimelineEvent::FetcherResponse(event) => {
                &event.id
            }
        }
    }

    /// Key used to pair a request-phase event with its response.
    ///
    /// Fetcher events correlate on `key`, falling back to `id` when the
    /// fetcher was not given an explicit key. Everything else uses `id`.
    pub fn correlation_key(&self) -> &str {
        match self {
            TimelineEvent::FetcherSubmit(event) | TimelineEvent::FetcherResponse(event) => {
                event.key.as_deref().unwrap_or(&event.id)
            }
            other => other.id(),
        }
    }

    pub fn response_data(&self) -> Option<&Value> {
        match self {
            TimelineEvent::Redirect(_) | TimelineEvent::FetcherRedirect(_) => None,
            TimelineEvent::FormSubmission(event)
            | TimelineEvent::ActionRedirect(event)
            | TimelineEvent::ActionResponse(event) => event.response_data.as_ref(),
            TimelineEvent::FetcherSubmit(event) | TimelineEvent::FetcherResponse(event) => {
                event.response_data.as_ref()
            }
        }
    }

    /// True when `self` is the response-phase event resolving `request`.
    pub fn resolves(&self, request: &TimelineEvent) -> bool {
        self.kind().request_counterpart() == Some(request.kind())
            && self.correlation_key() == request.correlation_key()
    }

    /// Builds the entry that replaces `request` on the timeline once `self`
    /// resolves it. Request-side fields the response did not repeat are kept.
    pub fn merged_over(&self, request: &TimelineEvent) -> TimelineEvent {
        let mut merged = self.clone();
        match (&mut merged, request) {
            (
                TimelineEvent::ActionResponse(resolved) | TimelineEvent::ActionRedirect(resolved),
                TimelineEvent::FormSubmission(pending),
            ) => {
                if resolved.data.is_none() {
                    resolved.data = pending.data.clone();
                }
                if resolved.enc_type.is_none() {
                    resolved.enc_type = pending.enc_type.clone();
                }
            }
            (TimelineEvent::FetcherResponse(resolved), TimelineEvent::FetcherSubmit(pending)) => {
                if resolved.data.is_none() {
                    resolved.data = pending.data.clone();
                }
                if resolved.key.is_none() {
                    resolved.key = pending.key.clone();
                }
            }
            _ => {}
        }
        merged
    }
}
