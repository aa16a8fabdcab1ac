//! Retry policy for the command socket, kept free of any I/O so it can be
//! driven directly with close codes. Reconnects are immediate.

/// Consecutive non-clean closes tolerated before giving up.
pub const RETRY_COUNT: u32 = 2;

/// Close code the external tool sends when it shuts down on purpose. This is
/// a contract with that tool, not general WebSocket semantics: 1005 normally
/// only means "no status code was present".
pub const CLEAN_SHUTDOWN_CODE: u16 = 1005;

/// Reported when the connection dropped or could not be established.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    ClosedClean,
    ClosedRetrying,
    ClosedGivenUp,
}

/// What the socket owner has to do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOutcome {
    pub state: ConnectionState,
    pub code: u16,
    pub retries: u32,
    /// Connect again right away.
    pub reconnect: bool,
    /// Turn the `connect` setting off.
    pub disable_connect: bool,
    /// Unlock every terminal and forget its process.
    pub release_terminals: bool,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    state: ConnectionState,
    retries: u32,
    max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(RETRY_COUNT)
    }
}

impl ReconnectPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: ConnectionState::Idle,
            retries: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Leaves the retry count alone; only [`reset`](Self::reset) and a clean
    /// shutdown clear it.
    pub fn opened(&mut self) {
        self.state = ConnectionState::Open;
    }

    pub fn closing(&mut self) {
        self.state = ConnectionState::Closing;
    }

    /// Local teardown: no retry accounting, no settings side effects.
    pub fn shut_down(&mut self) {
        self.state = ConnectionState::ClosedClean;
    }

    /// Back to `Idle` with a fresh retry budget, e.g. after the user turns
    /// `connect` on again.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Idle;
        self.retries = 0;
    }

    pub fn on_close(&mut self, code: u16) -> CloseOutcome {
        if code == CLEAN_SHUTDOWN_CODE {
            self.retries = 0;
            self.state = ConnectionState::ClosedClean;
            return CloseOutcome {
                state: self.state,
                code,
                retries: self.retries,
                reconnect: false,
                disable_connect: true,
                release_terminals: true,
            };
        }

        self.retries = self.retries.saturating_add(1);
        let given_up = self.retries >= self.max_retries;
        self.state = if given_up {
            ConnectionState::ClosedGivenUp
        } else {
            ConnectionState::ClosedRetrying
        };
        CloseOutcome {
            state: self.state,
            code,
            retries: self.retries,
            reconnect: !given_up,
            disable_connect: given_up,
            release_terminals: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gives_up_after_retry_count_abnormal_closes() {
        let mut policy = ReconnectPolicy::default();
        policy.connecting();
        policy.opened();
        let first = policy.on_close(ABNORMAL_CLOSE_CODE);
        assert_eq!(first.state, ConnectionState::ClosedRetrying);
        assert!(first.reconnect);
        assert!(!first.disable_connect);

        policy.connecting();
        let last = policy.on_close(4000);
        assert_eq!(last.retries, RETRY_COUNT);
        assert_eq!(last.state, ConnectionState::ClosedGivenUp);
        assert!(!last.reconnect);
        assert!(last.disable_connect);
        assert!(!last.release_terminals);
    }

    #[test]
    fn clean_shutdown_resets_retries_and_releases_terminals() {
        let mut policy = ReconnectPolicy::default();
        policy.on_close(ABNORMAL_CLOSE_CODE);
        assert_eq!(policy.retries(), 1);

        let outcome = policy.on_close(CLEAN_SHUTDOWN_CODE);
        assert_eq!(outcome.retries, 0);
        assert_eq!(policy.retries(), 0);
        assert_eq!(outcome.state, ConnectionState::ClosedClean);
        assert!(outcome.disable_connect);
        assert!(outcome.release_terminals);
        assert!(!outcome.reconnect);
    }

    #[test]
    fn opening_does_not_refill_the_budget() {
        let mut policy = ReconnectPolicy::default();
        policy.on_close(1001);
        policy.connecting();
        policy.opened();
        assert_eq!(policy.state(), ConnectionState::Open);
        assert_eq!(policy.retries(), 1);
        policy.closing();
        assert_eq!(policy.on_close(1001).state, ConnectionState::ClosedGivenUp);

        policy.reset();
        assert_eq!(policy.state(), ConnectionState::Idle);
        assert_eq!(policy.retries(), 0);
    }
}
