//! ptymux: several interactive sessions behind one terminal
//!
//! Each session is a child process on its own pseudo-terminal. A single
//! readiness loop routes the operator's keystrokes to the active session,
//! keeps a bounded history of every session's output, and repaints the
//! screen when the operator switches sessions.

pub mod cli;
pub mod config;
pub mod history;
pub mod keys;
pub mod mux;
pub mod registry;
pub mod render;
pub mod session;
pub mod signals;
pub mod terminal_guard;

pub use config::MuxConfig;
pub use history::History;
pub use keys::{Action, KeyDecoder, KeyMap};
pub use mux::{Multiplexer, MuxState};
pub use ptymux_pty::{ChildCommand, PtyError};
pub use registry::Registry;
pub use render::Renderer;
pub use session::{Output, Session};
pub use terminal_guard::TerminalGuard;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Session count {0} is outside 1..={max}", max = config::MAX_SESSIONS)]
    InvalidSessionCount(usize),

    #[error("Failed to create session {index}: {source}")]
    CreateSessions {
        index: usize,
        #[source]
        source: PtyError,
    },

    #[error("Failed to switch terminal mode: {0}")]
    TerminalMode(#[source] nix::Error),

    #[error("Readiness wait failed: {0}")]
    Poll(#[source] nix::Error),

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] nix::Error),

    #[error("Terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session {0} is closed")]
    Closed(usize),

    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),
}
