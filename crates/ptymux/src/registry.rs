//! Fixed set of sessions and the active slot

use crate::config::validate_session_count;
use crate::session::Session;
use crate::MuxError;
use ptymux_pty::{ChildCommand, PtyError};
use std::time::Duration;
use tracing::{info, warn};

/// Index after `index` in `0..len`, wrapping to the start
pub fn next_index(index: usize, len: usize) -> usize {
    (index + 1) % len
}

/// Index before `index` in `0..len`, wrapping to the end
pub fn previous_index(index: usize, len: usize) -> usize {
    (index + len - 1) % len
}

/// The sessions of one multiplexer, addressed by slot index
///
/// The set is populated once at creation and never resized. Exactly one slot
/// is active.
#[derive(Debug)]
pub struct Registry {
    sessions: Vec<Session>,
    active: usize,
}

impl Registry {
    /// Start `count` sessions running `command`
    ///
    /// If any slot fails, the sessions already started are terminated and
    /// reaped before the error is returned.
    pub fn create(
        count: usize,
        command: &ChildCommand,
        history_capacity: usize,
    ) -> Result<Self, MuxError> {
        let registry = Self::create_with(count, |index| {
            Session::spawn(index, command, history_capacity)
        })?;
        info!(count, program = command.program(), "sessions created");
        Ok(registry)
    }

    pub(crate) fn create_with<F>(count: usize, mut spawn: F) -> Result<Self, MuxError>
    where
        F: FnMut(usize) -> Result<Session, PtyError>,
    {
        validate_session_count(count)?;

        let mut sessions: Vec<Session> = Vec::with_capacity(count);
        for index in 0..count {
            match spawn(index) {
                Ok(session) => sessions.push(session),
                Err(source) => {
                    warn!(session = index, error = %source, "session creation failed, rolling back");
                    shutdown_sessions(&mut sessions, Duration::from_secs(1));
                    return Err(MuxError::CreateSessions { index, source });
                }
            }
        }

        Ok(Self {
            sessions,
            active: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> &Session {
        &self.sessions[self.active]
    }

    pub fn active_mut(&mut self) -> &mut Session {
        &mut self.sessions[self.active]
    }

    pub fn get(&self, index: usize) -> Option<&Session> {
        self.sessions.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Session> {
        self.sessions.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut()
    }

    pub fn next_index(&self) -> usize {
        next_index(self.active, self.len())
    }

    pub fn previous_index(&self) -> usize {
        previous_index(self.active, self.len())
    }

    /// Make `index` active; returns false if it already is or is out of range
    pub fn select(&mut self, index: usize) -> bool {
        if index == self.active || index >= self.len() {
            return false;
        }
        self.active = index;
        true
    }

    /// Whether every session has been reaped
    pub fn all_reaped(&self) -> bool {
        self.sessions.iter().all(|s| s.exit_status().is_some())
    }

    /// Terminate, close and reap every session, returning their exit statuses
    ///
    /// Sessions already reaped keep their recorded status, so calling this
    /// again is harmless.
    pub fn shutdown(&mut self, grace: Duration) -> Vec<i32> {
        shutdown_sessions(&mut self.sessions, grace)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.all_reaped() {
            self.shutdown(Duration::from_secs(1));
        }
    }
}

fn shutdown_sessions(sessions: &mut [Session], grace: Duration) -> Vec<i32> {
    for session in sessions.iter() {
        session.terminate();
    }
    for session in sessions.iter_mut() {
        session.close();
    }
    sessions
        .iter_mut()
        .map(|session| session.wait_for_exit(grace))
        .collect()
}
