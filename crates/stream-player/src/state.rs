//! Cross-thread player state: lifecycle, stop flag, session id and last error.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use stream_player_types::PlaybackState;

use crate::progress::Progress;

/// State shared between the driver and the decode worker of the current session.
///
/// `Error` is sticky: [`PlayerShared::set_unless_error`] never replaces it, and
/// only [`PlayerShared::begin_session`] (a fresh `play`) clears it.
#[derive(Debug, Default)]
pub struct PlayerShared {
    state: AtomicU8,
    stop_requested: AtomicBool,
    session: AtomicU64,
    last_error: Mutex<String>,
    pub progress: Progress,
}

impl PlayerShared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition to `next` unless the player is in `Error`.
    ///
    /// Returns `false` when the error state blocked the transition.
    pub fn set_unless_error(&self, next: PlaybackState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur != PlaybackState::Error as u8).then_some(next as u8)
            })
            .is_ok()
    }

    /// Move `from` to `to` atomically; no-op if the state is anything else.
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Start a new session: clears the error and stop flag, enters `Buffering`.
    ///
    /// Returns the new session id; workers of older sessions stop writing
    /// shared state once this changes.
    pub fn begin_session(&self) -> u64 {
        let id = self.session.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        self.set_last_error(String::new());
        self.stop_requested.store(false, Ordering::Release);
        self.state
            .store(PlaybackState::Buffering as u8, Ordering::Release);
        id
    }

    /// Bump the session id without touching the lifecycle (seek restarts).
    pub fn renew_session(&self) -> u64 {
        self.session.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub fn is_current(&self, session: u64) -> bool {
        self.session.load(Ordering::Acquire) == session
    }

    /// Record a failure of `session`; ignored if a newer session took over.
    pub fn fail_session(&self, session: u64, message: impl Into<String>) {
        if !self.is_current(session) {
            tracing::debug!(session, "ignoring failure from superseded session");
            return;
        }
        self.fail(message);
    }

    /// Record a failure of whatever is running now: error text, `Error`, stop.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(error = %message, "playback failed");
        self.set_last_error(message);
        self.state.store(PlaybackState::Error as u8, Ordering::Release);
        self.request_stop();
    }

    pub fn last_error(&self) -> String {
        match self.last_error.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_last_error(&self, message: String) {
        match self.last_error.lock() {
            Ok(mut g) => *g = message,
            Err(poisoned) => *poisoned.into_inner() = message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_session_enters_buffering_and_clears_error() {
        let shared = PlayerShared::new();
        shared.fail("boom");
        assert_eq!(shared.state(), PlaybackState::Error);
        assert!(shared.stop_requested());

        let id = shared.begin_session();
        assert!(shared.is_current(id));
        assert_eq!(shared.state(), PlaybackState::Buffering);
        assert!(shared.last_error().is_empty());
        assert!(!shared.stop_requested());
    }

    #[test]
    fn error_is_sticky_against_set_unless_error() {
        let shared = PlayerShared::new();
        shared.fail("network down");
        assert!(!shared.set_unless_error(PlaybackState::Stopped));
        assert_eq!(shared.state(), PlaybackState::Error);
        assert_eq!(shared.last_error(), "network down");
    }

    #[test]
    fn stale_session_failure_is_ignored() {
        let shared = PlayerShared::new();
        let old = shared.begin_session();
        let _new = shared.begin_session();
        shared.fail_session(old, "late failure");
        assert_eq!(shared.state(), PlaybackState::Buffering);
        assert!(shared.last_error().is_empty());
    }

    #[test]
    fn transition_requires_expected_state() {
        let shared = PlayerShared::new();
        assert!(!shared.transition(PlaybackState::Paused, PlaybackState::Playing));
        assert_eq!(shared.state(), PlaybackState::Idle);
        shared.begin_session();
        assert!(shared.transition(PlaybackState::Buffering, PlaybackState::Paused));
        assert_eq!(shared.state(), PlaybackState::Paused);
    }

    #[test]
    fn renew_session_supersedes_without_state_change() {
        let shared = PlayerShared::new();
        let first = shared.begin_session();
        let second = shared.renew_session();
        assert!(!shared.is_current(first));
        assert!(shared.is_current(second));
        assert_eq!(shared.state(), PlaybackState::Buffering);
    }
}
