use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

pub const DEFAULT_REVERT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineFocus {
    /// Follow the newest entry.
    Automatic,
    Manual(usize),
}

/// Tracks which timeline entry is focused. A manual focus falls back to
/// automatic after a quiet period; each new manual focus restarts it.
pub struct FocusController {
    focus: Arc<watch::Sender<TimelineFocus>>,
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Default for FocusController {
    fn default() -> Self {
        Self::new(DEFAULT_REVERT_DELAY)
    }
}

impl FocusController {
    pub fn new(delay: Duration) -> Self {
        let (focus, _) = watch::channel(TimelineFocus::Automatic);
        Self {
            focus: Arc::new(focus),
            delay,
            pending: None,
        }
    }

    pub fn current(&self) -> TimelineFocus {
        *self.focus.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimelineFocus> {
        self.focus.subscribe()
    }

    /// Must be called inside a Tokio runtime.
    pub fn focus_manual(&mut self, index: usize) {
        self.cancel_pending();
        self.focus.send_replace(TimelineFocus::Manual(index));
        let focus = self.focus.clone();
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            focus.send_replace(TimelineFocus::Automatic);
            debug!(event = "timeline_focus_reverted");
        }));
    }

    pub fn focus_automatic(&mut self) {
        self.cancel_pending();
        self.focus.send_replace(TimelineFocus::Automatic);
    }

    /// Cancels the pending revert, leaving the current focus as is.
    pub fn teardown(&mut self) {
        self.cancel_pending();
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

impl Drop for FocusController {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn manual_focus_reverts_after_delay() {
        let mut controller = FocusController::default();
        controller.focus_manual(3);
        assert_eq!(controller.current(), TimelineFocus::Manual(3));

        sleep(Duration::from_secs(4)).await;
        assert_eq!(controller.current(), TimelineFocus::Manual(3));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.current(), TimelineFocus::Automatic);
    }

    #[tokio::test(start_paused = true)]
    async fn new_manual_focus_restarts_the_delay() {
        let mut controller = FocusController::new(Duration::from_secs(5));
        controller.focus_manual(1);
        sleep(Duration::from_secs(4)).await;
        controller.focus_manual(2);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(controller.current(), TimelineFocus::Manual(2));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.current(), TimelineFocus::Automatic);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_pending_revert() {
        let mut controller = FocusController::default();
        let receiver = controller.subscribe();
        controller.focus_manual(7);
        controller.teardown();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(controller.current(), TimelineFocus::Manual(7));
        assert_eq!(*receiver.borrow(), TimelineFocus::Manual(7));
    }

    #[tokio::test(start_paused = true)]
    async fn returning_to_automatic_drops_the_pending_revert() {
        let mut controller = FocusController::default();
        let mut receiver = controller.subscribe();
        controller.focus_manual(2);
        controller.focus_automatic();
        assert_eq!(controller.current(), TimelineFocus::Automatic);
        receiver.borrow_and_update();

        sleep(Duration::from_secs(10)).await;
        assert!(!receiver.has_changed().expect("sender alive"));
    }
}
