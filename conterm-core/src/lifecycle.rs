//! Session lifecycle
//!
//! `Uninitialized -> Running -> Draining -> Closed`. The lifecycle owns the
//! session once it is running and is the only place that tears it down.

use std::fmt;

use conterm_pty::Session;
use log::{debug, warn};
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Uninitialized,
    Running,
    Draining,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a running session started shutting down
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DrainReason {
    /// The child exited and the channel reported end-of-stream
    EndOfStream,
    UserQuit,
    /// Unrecoverable read or write failure
    ChannelError(String),
}

#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
    session: Option<Session>,
    reason: Option<DrainReason>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            session: None,
            reason: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }

    /// Reason recorded when draining began
    pub fn drain_reason(&self) -> Option<&DrainReason> {
        self.reason.as_ref()
    }

    /// Take ownership of a freshly created session
    pub fn start(&mut self, session: Session) -> Result<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(Error::InvalidState(self.state));
        }
        self.session = Some(session);
        self.transition(LifecycleState::Running);
        Ok(())
    }

    /// The running session
    pub fn session(&self) -> Result<&Session> {
        match (&self.session, self.state) {
            (Some(session), LifecycleState::Running) => Ok(session),
            _ => Err(Error::InvalidState(self.state)),
        }
    }

    pub fn session_mut(&mut self) -> Result<&mut Session> {
        match (&mut self.session, self.state) {
            (Some(session), LifecycleState::Running) => Ok(session),
            _ => Err(Error::InvalidState(self.state)),
        }
    }

    /// Leave `Running`. Returns `false` if the session was not running; the
    /// first recorded reason wins.
    pub fn begin_drain(&mut self, reason: DrainReason) -> bool {
        if self.state != LifecycleState::Running {
            return false;
        }
        debug!("Draining session: {:?}", reason);
        self.reason = Some(reason);
        self.transition(LifecycleState::Draining);
        true
    }

    /// Release the session and reach `Closed`.
    ///
    /// A running session drains first, as a user quit. Closing twice is a
    /// no-op. The state is `Closed` even if releasing the session failed.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Closed => return Ok(()),
            LifecycleState::Running => {
                self.begin_drain(DrainReason::UserQuit);
            }
            LifecycleState::Uninitialized | LifecycleState::Draining => {}
        }

        let result = match self.session.take() {
            Some(mut session) => session.close(),
            None => Ok(()),
        };
        self.transition(LifecycleState::Closed);
        result.map_err(Error::from)
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("Lifecycle {} -> {}", self.state, next);
        self.state = next;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conterm_pty::scripted::ScriptedPty;
    use conterm_pty::WindowSize;

    fn running() -> (Lifecycle, conterm_pty::scripted::ScriptHandle) {
        let (pty, handle) = ScriptedPty::new(WindowSize::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle
            .start(Session::from_pty(Box::new(pty), WindowSize::default()))
            .unwrap();
        (lifecycle, handle)
    }

    #[test]
    fn test_full_transition_sequence() {
        let (mut lifecycle, handle) = running();
        assert_eq!(lifecycle.state(), LifecycleState::Running);
        assert!(lifecycle.session().is_ok());

        assert!(lifecycle.begin_drain(DrainReason::EndOfStream));
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
        assert!(lifecycle.session().is_err());

        lifecycle.close().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert_eq!(lifecycle.drain_reason(), Some(&DrainReason::EndOfStream));
        assert_eq!(handle.close_calls(), 1);
    }

    #[test]
    fn test_double_close_is_noop() {
        let (mut lifecycle, handle) = running();
        lifecycle.close().unwrap();
        lifecycle.close().unwrap();
        drop(lifecycle);
        assert_eq!(handle.close_calls(), 1);
    }

    #[test]
    fn test_close_while_running_records_quit() {
        let (mut lifecycle, _handle) = running();
        lifecycle.close().unwrap();
        assert_eq!(lifecycle.drain_reason(), Some(&DrainReason::UserQuit));
    }

    #[test]
    fn test_first_drain_reason_wins() {
        let (mut lifecycle, _handle) = running();
        assert!(lifecycle.begin_drain(DrainReason::ChannelError("gone".into())));
        assert!(!lifecycle.begin_drain(DrainReason::UserQuit));
        assert_eq!(
            lifecycle.drain_reason(),
            Some(&DrainReason::ChannelError("gone".into()))
        );
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (mut lifecycle, _handle) = running();
        let (pty, _) = ScriptedPty::new(WindowSize::default());
        let err = lifecycle
            .start(Session::from_pty(Box::new(pty), WindowSize::default()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(LifecycleState::Running)));
    }

    #[test]
    fn test_uninitialized_closes_directly() {
        let mut lifecycle = Lifecycle::new();
        assert!(!lifecycle.begin_drain(DrainReason::UserQuit));
        lifecycle.close().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
        assert!(lifecycle.drain_reason().is_none());
    }

    #[test]
    fn test_drop_closes_session() {
        let (lifecycle, handle) = running();
        drop(lifecycle);
        assert!(handle.is_closed());
    }
}
