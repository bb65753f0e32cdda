//! Child processes running on the peer side of a PTY

use crate::PtyError;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};
use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use tracing::debug;

/// Program and arguments to run in each session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    program: String,
    args: Vec<String>,
}

impl ChildCommand {
    /// Create a command for `program`, looked up through `PATH` when it has no slash
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Step of the child-side setup that failed, as reported over the status pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ChildStage {
    Setsid = 1,
    OpenPeer = 2,
    ControllingTerminal = 3,
    Redirect = 4,
    Exec = 5,
}

impl ChildStage {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Setsid),
            2 => Some(Self::OpenPeer),
            3 => Some(Self::ControllingTerminal),
            4 => Some(Self::Redirect),
            5 => Some(Self::Exec),
            _ => None,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Setsid => "setsid failed",
            Self::OpenPeer => "failed to open pty peer",
            Self::ControllingTerminal => "failed to acquire controlling terminal",
            Self::Redirect => "failed to redirect standard streams",
            Self::Exec => "exec failed",
        }
    }
}

/// Stage byte followed by a native-endian errno
const REPORT_LEN: usize = 1 + std::mem::size_of::<i32>();

/// Handle to a spawned child process
///
/// The handle can signal the child and collect its exit status, either
/// without blocking or by waiting for it.
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send `signal` to the child
    pub fn signal(&self, signal: Signal) -> Result<(), PtyError> {
        kill(self.pid, signal).map_err(PtyError::Signal)
    }

    /// Ask the child to terminate with `SIGTERM`
    pub fn terminate(&self) -> Result<(), PtyError> {
        self.signal(Signal::SIGTERM)
    }

    /// Collect the exit status if the child has terminated, without blocking
    pub fn try_wait(&self) -> Result<Option<i32>, PtyError> {
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) => return Ok(exit_status(status)),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PtyError::Wait(e)),
            }
        }
    }

    /// Block until the child terminates and return its exit status
    pub fn wait(&self) -> Result<i32, PtyError> {
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    if let Some(code) = exit_status(status) {
                        return Ok(code);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PtyError::Wait(e)),
            }
        }
    }
}

/// Map a wait status to the exit code convention used by shells
fn exit_status(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}

/// Spawn `command` with the PTY peer at `peer_path` as its terminal
///
/// The child starts a new session, opens the peer (which makes it the
/// controlling terminal), binds it to stdin, stdout and stderr, and execs the
/// command. Returns once the exec has succeeded; if any step in the child
/// fails, the child is reaped and the failure is returned.
pub fn spawn(command: &ChildCommand, peer_path: &Path) -> Result<ChildProcess, PtyError> {
    let program = CString::new(command.program())
        .map_err(|_| PtyError::SpawnFailed("program contains a NUL byte".to_string()))?;
    let mut args = vec![program.clone()];
    for arg in command.args() {
        args.push(
            CString::new(arg.as_str())
                .map_err(|_| PtyError::SpawnFailed(format!("argument {arg:?} contains a NUL byte")))?,
        );
    }
    let mut argv: Vec<*const libc::c_char> = args.iter().map(|arg| arg.as_ptr()).collect();
    argv.push(std::ptr::null());

    let peer = CString::new(peer_path.as_os_str().as_bytes())
        .map_err(|_| PtyError::SpawnFailed("peer path contains a NUL byte".to_string()))?;

    let (status_read, status_write) =
        pipe().map_err(|e| PtyError::SpawnFailed(format!("status pipe failed: {e}")))?;
    for fd in [status_read.as_raw_fd(), status_write.as_raw_fd()] {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| PtyError::SpawnFailed(format!("status pipe failed: {e}")))?;
    }

    // SAFETY: the child only calls async-signal-safe functions before exec or _exit.
    match unsafe { fork() }.map_err(|e| PtyError::SpawnFailed(format!("Fork failed: {e}")))? {
        ForkResult::Child => unsafe {
            exec_child(&peer, &program, &argv, status_write.as_raw_fd())
        },
        ForkResult::Parent { child } => {
            drop(status_write);

            let mut report = Vec::with_capacity(REPORT_LEN);
            if let Err(e) = File::from(status_read).read_to_end(&mut report) {
                discard_child(child);
                return Err(PtyError::SpawnFailed(format!(
                    "{}: status pipe failed: {e}",
                    command.program()
                )));
            }

            if report.is_empty() {
                debug!(pid = child.as_raw(), program = command.program(), "spawned child");
                return Ok(ChildProcess { pid: child });
            }

            discard_child(child);

            let stage = ChildStage::from_byte(report[0])
                .map(ChildStage::describe)
                .unwrap_or("child setup failed");
            let reason = if report.len() >= REPORT_LEN {
                let mut errno = [0u8; REPORT_LEN - 1];
                errno.copy_from_slice(&report[1..REPORT_LEN]);
                Errno::from_raw(i32::from_ne_bytes(errno)).desc()
            } else {
                "unknown error"
            };
            Err(PtyError::SpawnFailed(format!(
                "{}: {stage}: {reason}",
                command.program()
            )))
        }
    }
}

/// Kill a child whose setup did not complete and collect it, so it neither
/// keeps running nor lingers as a zombie
fn discard_child(pid: Pid) {
    let _ = kill(pid, Signal::SIGKILL);
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            Err(e) => {
                debug!(pid = pid.as_raw(), error = %e, "failed to collect child");
                break;
            }
            Ok(_) => break,
        }
    }
}

/// Child side of `spawn`. Never returns.
unsafe fn exec_child(
    peer: &CStr,
    program: &CStr,
    argv: &[*const libc::c_char],
    status_fd: RawFd,
) -> ! {
    if libc::setsid() < 0 {
        report_and_exit(status_fd, ChildStage::Setsid);
    }

    let fd = libc::open(peer.as_ptr(), libc::O_RDWR);
    if fd < 0 {
        report_and_exit(status_fd, ChildStage::OpenPeer);
    }

    // Opening the peer already made it the controlling terminal on Linux;
    // BSDs need the explicit ioctl.
    if libc::ioctl(fd, libc::TIOCSCTTY as _, 0) < 0 {
        report_and_exit(status_fd, ChildStage::ControllingTerminal);
    }

    for target in 0..=2 {
        if libc::dup2(fd, target) < 0 {
            report_and_exit(status_fd, ChildStage::Redirect);
        }
    }
    if fd > 2 {
        libc::close(fd);
    }

    libc::execvp(program.as_ptr(), argv.as_ptr());
    report_and_exit(status_fd, ChildStage::Exec)
}

unsafe fn report_and_exit(status_fd: RawFd, stage: ChildStage) -> ! {
    let errno = Errno::last_raw();
    let mut report = [0u8; REPORT_LEN];
    report[0] = stage as u8;
    report[1..].copy_from_slice(&errno.to_ne_bytes());
    libc::write(status_fd, report.as_ptr().cast(), report.len());
    libc::_exit(127)
}
