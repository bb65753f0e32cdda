//! Process signal handling for the multiplexer
//!
//! Termination signals set a flag and write a byte to a wake-up pipe that the
//! loop includes in its readiness set, so a signal arriving just before the
//! wait still ends it. SIGCHLD is caught the same way so that a child exiting
//! interrupts the wait and gets reaped.

use crate::MuxError;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::OnceLock;

static TERMINATE: AtomicBool = AtomicBool::new(false);

/// Write end of the wake-up pipe, -1 until `install` has run
static WAKE_WRITE: AtomicI32 = AtomicI32::new(-1);

static WAKE_READ: OnceLock<OwnedFd> = OnceLock::new();

fn wake() {
    let fd = WAKE_WRITE.load(Ordering::SeqCst);
    if fd >= 0 {
        // SAFETY: write(2) is async-signal-safe. A full pipe already means a
        // wake-up is pending, so a failed write is ignored.
        unsafe {
            libc::write(fd, [1u8].as_ptr().cast(), 1);
        }
    }
}

extern "C" fn note_terminate(_: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
    wake();
}

extern "C" fn note_child(_: libc::c_int) {
    wake();
}

fn wake_pipe() -> Result<(OwnedFd, OwnedFd), MuxError> {
    let (read_end, write_end) = nix::unistd::pipe().map_err(MuxError::Signals)?;
    for fd in [read_end.as_raw_fd(), write_end.as_raw_fd()] {
        fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(MuxError::Signals)?;
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(MuxError::Signals)?;
    }
    Ok((read_end, write_end))
}

/// Install the handlers. Handlers are registered without SA_RESTART so that
/// a blocked `poll` returns EINTR.
pub fn install() -> Result<(), MuxError> {
    if WAKE_READ.get().is_none() {
        let (read_end, write_end) = wake_pipe()?;
        if WAKE_READ.set(read_end).is_ok() {
            WAKE_WRITE.store(write_end.into_raw_fd(), Ordering::SeqCst);
        }
    }

    let terminate = SigAction::new(
        SigHandler::Handler(note_terminate),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let child = SigAction::new(
        SigHandler::Handler(note_child),
        SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );

    // SAFETY: both handlers only touch atomics and call write(2).
    unsafe {
        for signal in [Signal::SIGTERM, Signal::SIGHUP] {
            sigaction(signal, &terminate).map_err(MuxError::Signals)?;
        }
        sigaction(Signal::SIGCHLD, &child).map_err(MuxError::Signals)?;
    }
    Ok(())
}

/// Whether a termination signal has arrived
pub fn termination_requested() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}

/// Read end of the wake-up pipe, once `install` has run
pub(crate) fn wake_fd() -> Option<BorrowedFd<'static>> {
    WAKE_READ.get().map(|fd| fd.as_fd())
}

/// Empty the wake-up pipe after the loop has seen it ready
pub(crate) fn clear_wake() {
    let Some(fd) = WAKE_READ.get() else {
        return;
    };
    let mut buf = [0u8; 64];
    while matches!(nix::unistd::read(fd.as_raw_fd(), &mut buf), Ok(n) if n > 0) {}
}
