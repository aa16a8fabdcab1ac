use rdt_core::TimelineEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// A pending request at this index was upgraded in place.
    Merged(usize),
    Appended(usize),
}

/// Inserts `event`, upgrading the newest pending request it resolves rather
/// than appending. Positions of existing entries never change.
pub fn correlate(timeline: &mut Vec<TimelineEvent>, event: TimelineEvent) -> Placement {
    let matched = timeline
        .iter()
        .rposition(|entry| event.resolves(entry));
    match matched {
        Some(index) => {
            let merged = event.merged_over(&timeline[index]);
            timeline[index] = merged;
            Placement::Merged(index)
        }
        None => {
            timeline.push(event);
            Placement::Appended(timeline.len() - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdt_core::{FetcherEvent, RedirectEvent, SubmissionEvent};
    use serde_json::json;

    fn submission(id: &str, response: Option<serde_json::Value>) -> SubmissionEvent {
        SubmissionEvent {
            id: id.to_string(),
            to: "/login".to_string(),
            from: "/".to_string(),
            method: "POST".to_string(),
            data: Some(json!({"user": "ada"})),
            response_data: response,
            enc_type: None,
        }
    }

    fn fetcher(id: &str, key: Option<&str>, response: Option<serde_json::Value>) -> FetcherEvent {
        FetcherEvent {
            id: id.to_string(),
            to: "/api".to_string(),
            from: "/".to_string(),
            method: "POST".to_string(),
            key: key.map(str::to_string),
            data: None,
            response_data: response,
        }
    }

    fn redirect(id: &str) -> TimelineEvent {
        TimelineEvent::Redirect(RedirectEvent {
            id: id.to_string(),
            to: "/next".to_string(),
            search: String::new(),
            hash: String::new(),
            method: "GET".to_string(),
        })
    }

    #[test]
    fn response_upgrades_matching_submission_in_place() {
        let mut timeline = vec![
            TimelineEvent::FormSubmission(submission("x", None)),
            redirect("r1"),
        ];
        let placement = correlate(
            &mut timeline,
            TimelineEvent::ActionResponse(submission("x", Some(json!({"ok": true})))),
        );
        assert_eq!(placement, Placement::Merged(0));
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].response_data(), Some(&json!({"ok": true})));
        assert_eq!(timeline[1], redirect("r1"));
    }

    #[test]
    fn uncorrelated_events_append() {
        let mut timeline = vec![redirect("r1")];
        assert_eq!(correlate(&mut timeline, redirect("r2")), Placement::Appended(1));
        assert_eq!(
            correlate(
                &mut timeline,
                TimelineEvent::ActionResponse(submission("nobody", Some(json!(1))))
            ),
            Placement::Appended(2)
        );
        assert_eq!(timeline.len(), 3);
    }

    #[test]
    fn fetcher_response_matches_by_key() {
        let mut timeline = vec![
            TimelineEvent::FetcherSubmit(fetcher("a", Some("like"), None)),
            TimelineEvent::FetcherSubmit(fetcher("b", Some("save"), None)),
        ];
        let placement = correlate(
            &mut timeline,
            TimelineEvent::FetcherResponse(fetcher("z", Some("like"), Some(json!("done")))),
        );
        assert_eq!(placement, Placement::Merged(0));
        assert_eq!(timeline[0].response_data(), Some(&json!("done")));
        assert_eq!(timeline[1].response_data(), None);
    }

    #[test]
    fn newest_pending_request_wins() {
        let mut timeline = vec![
            TimelineEvent::FormSubmission(submission("x", None)),
            TimelineEvent::FormSubmission(submission("x", None)),
        ];
        let placement = correlate(
            &mut timeline,
            TimelineEvent::ActionRedirect(submission("x", None)),
        );
        assert_eq!(placement, Placement::Merged(1));
        assert!(matches!(timeline[0], TimelineEvent::FormSubmission(_)));
    }
}
