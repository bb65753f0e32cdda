//! PTY handling for ptymux
//!
//! Allocates pseudo-terminal pairs and runs child processes on their peer
//! side. The controller side stays with the caller, which owns both the
//! returned stream and the child handle.

pub mod process;
pub mod pty;

pub use process::{spawn, ChildCommand, ChildProcess};
pub use pty::{allocate, Controller};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate PTY: {0}")]
    AllocationFailed(String),

    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Process signal error: {0}")]
    Signal(#[source] nix::Error),

    #[error("Process wait error: {0}")]
    Wait(#[source] nix::Error),

    #[error("PTY I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
