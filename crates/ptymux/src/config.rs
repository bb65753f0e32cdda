//! Multiplexer configuration

use crate::keys::KeyMap;
use crate::MuxError;
use ptymux_pty::ChildCommand;
use std::time::Duration;

/// Largest number of sessions one multiplexer runs
pub const MAX_SESSIONS: usize = 9;

/// Sessions started when no count is given
pub const DEFAULT_SESSIONS: usize = 2;

/// Bytes of output retained per session
pub const DEFAULT_HISTORY_CAPACITY: usize = 64 * 1024;

/// Program launched in every session
pub const DEFAULT_PROGRAM: &str = "/bin/sh";

/// How long shutdown waits after SIGTERM before sending SIGKILL
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct MuxConfig {
    pub sessions: usize,
    pub command: ChildCommand,
    pub history_capacity: usize,
    pub keymap: KeyMap,
    pub shutdown_grace: Duration,
}

impl MuxConfig {
    /// Default configuration with `sessions` slots
    pub fn with_sessions(sessions: usize) -> Self {
        Self {
            sessions,
            ..Self::default()
        }
    }

    /// Check that the session count lies in `1..=MAX_SESSIONS`
    pub fn validate(&self) -> Result<(), MuxError> {
        validate_session_count(self.sessions)
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            sessions: DEFAULT_SESSIONS,
            command: ChildCommand::new(DEFAULT_PROGRAM),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            keymap: KeyMap::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

pub(crate) fn validate_session_count(count: usize) -> Result<(), MuxError> {
    if (1..=MAX_SESSIONS).contains(&count) {
        Ok(())
    } else {
        Err(MuxError::InvalidSessionCount(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MuxConfig::default();
        assert_eq!(config.sessions, 2);
        assert_eq!(config.command.program(), "/bin/sh");
        assert_eq!(config.history_capacity, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_count_bounds() {
        for count in 1..=MAX_SESSIONS {
            assert!(MuxConfig::with_sessions(count).validate().is_ok());
        }
        assert!(matches!(
            MuxConfig::with_sessions(0).validate(),
            Err(MuxError::InvalidSessionCount(0))
        ));
        assert!(matches!(
            MuxConfig::with_sessions(10).validate(),
            Err(MuxError::InvalidSessionCount(10))
        ));
    }
}
