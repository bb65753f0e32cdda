//! Low-level PTY allocation
//!
//! Provides the controller side of a pseudo-terminal pair on Unix-like systems

use crate::PtyError;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use tracing::debug;

/// Controller side of a PTY
///
/// The descriptor is non-blocking and close-on-exec. It is closed when the
/// value is dropped.
#[derive(Debug)]
pub struct Controller {
    file: File,
}

impl Controller {
    /// Read whatever output the child has produced so far
    ///
    /// Returns `ErrorKind::WouldBlock` when nothing is available.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    /// Write input for the child
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        (&self.file).write(data)
    }
}

impl AsFd for Controller {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for Controller {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Allocate a new PTY pair
///
/// Returns the controller stream and the path of the peer device. The peer
/// is not opened here; the child opens it by path so that it becomes the
/// child's controlling terminal.
pub fn allocate() -> Result<(Controller, PathBuf), PtyError> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)
        .map_err(|e| PtyError::AllocationFailed(format!("posix_openpt failed: {e}")))?;

    grantpt(&master).map_err(|e| PtyError::AllocationFailed(format!("grantpt failed: {e}")))?;
    unlockpt(&master)
        .map_err(|e| PtyError::AllocationFailed(format!("unlockpt failed: {e}")))?;

    let peer_path = peer_name(&master)
        .map_err(|e| PtyError::AllocationFailed(format!("ptsname failed: {e}")))?;

    // SAFETY: the descriptor was just released by `PtyMaster` and has no other owner.
    let fd = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };

    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(|e| {
        PtyError::AllocationFailed(format!("Failed to set non-blocking: {e}"))
    })?;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(|e| {
        PtyError::AllocationFailed(format!("Failed to set close-on-exec: {e}"))
    })?;

    debug!(fd = fd.as_raw_fd(), peer = %peer_path, "allocated pty");

    Ok((
        Controller {
            file: File::from(fd),
        },
        PathBuf::from(peer_path),
    ))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn peer_name(master: &PtyMaster) -> nix::Result<String> {
    nix::pty::ptsname_r(master)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn peer_name(master: &PtyMaster) -> nix::Result<String> {
    // SAFETY: the multiplexer is single-threaded, so the static buffer behind
    // ptsname(3) cannot be overwritten before it is copied.
    unsafe { nix::pty::ptsname(master) }
}
