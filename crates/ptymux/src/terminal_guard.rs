//! RAII guard for the operator's terminal mode

use crate::MuxError;
use crossterm::{cursor, execute};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};
use std::io;
use std::os::unix::io::{AsFd, OwnedFd};
use tracing::debug;

/// Holds the terminal in raw mode and restores the captured settings when dropped.
///
/// Raw mode turns off line buffering, echo and signal keys, so every
/// keystroke (Ctrl-C included) reaches the multiplexer as a byte.
pub struct TerminalGuard {
    tty: OwnedFd,
    original: Option<Termios>,
    cursor_hidden: bool,
    // Marker to ensure this type is !Send and !Sync
    _marker: std::marker::PhantomData<*const ()>,
}

impl TerminalGuard {
    /// Put the terminal on stdin into raw mode and hide the cursor.
    pub fn acquire() -> Result<Self, MuxError> {
        let tty = io::stdin().as_fd().try_clone_to_owned()?;
        let mut guard = Self::enter_raw_mode(tty)?;
        execute!(io::stdout(), cursor::Hide)?;
        guard.cursor_hidden = true;
        Ok(guard)
    }

    /// Capture the settings of `tty`, then switch it to raw mode.
    pub fn enter_raw_mode(tty: OwnedFd) -> Result<Self, MuxError> {
        let original = tcgetattr(&tty).map_err(MuxError::TerminalMode)?;

        let mut raw = original.clone();
        cfmakeraw(&mut raw);
        tcsetattr(&tty, SetArg::TCSANOW, &raw).map_err(MuxError::TerminalMode)?;
        debug!("terminal switched to raw mode");

        Ok(Self {
            tty,
            original: Some(original),
            cursor_hidden: false,
            _marker: std::marker::PhantomData,
        })
    }

    /// Check if raw mode is currently in effect
    pub fn is_raw_mode(&self) -> bool {
        self.original.is_some()
    }

    /// Restore the captured settings. Only the first call has an effect.
    pub fn restore(&mut self) -> Result<(), MuxError> {
        if self.cursor_hidden {
            self.cursor_hidden = false;
            let _ = execute!(io::stdout(), cursor::Show);
        }
        if let Some(original) = self.original.take() {
            tcsetattr(&self.tty, SetArg::TCSANOW, &original).map_err(MuxError::TerminalMode)?;
            debug!("terminal mode restored");
        }
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        // Always try to restore terminal state
        let _ = self.restore();
    }
}
