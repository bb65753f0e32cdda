//! One child process, its PTY controller, and its retained output

use crate::history::History;
use crate::SessionError;
use nix::sys::signal::Signal;
use ptymux_pty::{allocate, spawn, ChildCommand, ChildProcess, Controller, PtyError};
use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval between non-blocking reaps while waiting out the shutdown grace
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const DRAIN_CHUNK: usize = 4096;

/// Result of one read from a session's controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// `n` bytes were read into the buffer and appended to history
    Bytes(usize),
    /// Nothing available right now
    Idle,
    /// The stream reached end of file or failed; the session is now exited
    Closed,
}

/// A child process running on its own PTY
pub struct Session {
    index: usize,
    process: ChildProcess,
    /// Open iff the session has not exited
    controller: Option<Controller>,
    /// Recorded once the process has been reaped
    exit_status: Option<i32>,
    history: History,
}

impl Session {
    /// Allocate a PTY and start `command` on it
    pub fn spawn(
        index: usize,
        command: &ChildCommand,
        history_capacity: usize,
    ) -> Result<Self, PtyError> {
        let (controller, peer_path) = allocate()?;
        // The controller is dropped, and so closed, if the spawn fails.
        let process = spawn(command, &peer_path)?;

        debug!(
            session = index,
            pid = process.pid().as_raw(),
            peer = %peer_path.display(),
            "session started"
        );

        Ok(Self {
            index,
            process,
            controller: Some(controller),
            exit_status: None,
            history: History::new(history_capacity),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn process(&self) -> &ChildProcess {
        &self.process
    }

    /// Controller stream, present while the session is live
    pub fn controller(&self) -> Option<&Controller> {
        self.controller.as_ref()
    }

    pub fn is_exited(&self) -> bool {
        self.controller.is_none()
    }

    /// Exit status once the process has been reaped
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn append_output(&mut self, bytes: &[u8]) {
        self.history.append(bytes);
    }

    /// Read whatever the child has written and append it to history
    pub fn pump_output(&mut self, buf: &mut [u8]) -> Output {
        let Some(controller) = &self.controller else {
            return Output::Closed;
        };

        let n = loop {
            match controller.read(buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Output::Idle,
                Err(e) => {
                    // EIO is how the controller reports that the peer went away.
                    debug!(session = self.index, error = %e, "session stream closed");
                    break 0;
                }
            }
        };

        if n == 0 {
            self.mark_exited();
            return Output::Closed;
        }

        self.append_output(&buf[..n]);
        Output::Bytes(n)
    }

    /// Write one operator byte to the child
    ///
    /// A failed write does not mark the session exited; a dying child is
    /// noticed through its stream or by `reap`.
    pub fn forward_input(&mut self, byte: u8) -> Result<(), SessionError> {
        let controller = self
            .controller
            .as_ref()
            .ok_or(SessionError::Closed(self.index))?;

        loop {
            match controller.write(&[byte]) {
                Ok(1) => return Ok(()),
                Ok(_) => return Err(SessionError::Io(ErrorKind::WriteZero.into())),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SessionError::Io(e)),
            }
        }
    }

    /// Collect the exit status without blocking
    ///
    /// Returns true when this call recorded the status. The session is then
    /// exited and its stream closed.
    pub fn reap(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }

        match self.process.try_wait() {
            Ok(Some(status)) => self.record_exit(status),
            Ok(None) => return false,
            Err(e) => {
                warn!(session = self.index, error = %e, "failed to query child status");
                self.record_exit(-1);
            }
        }
        true
    }

    /// Close the stream after end of file and try to collect the status
    pub fn mark_exited(&mut self) {
        self.close();
        self.reap();
    }

    /// Close the controller stream. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.controller.take().is_some() {
            debug!(session = self.index, "closed session stream");
        }
    }

    /// Send SIGTERM unless the process has already been reaped
    pub fn terminate(&self) {
        if self.exit_status.is_some() {
            return;
        }
        if let Err(e) = self.process.terminate() {
            debug!(session = self.index, error = %e, "failed to signal child");
        }
    }

    /// Block until the process has terminated and return its status
    ///
    /// If the process outlives `grace` it is sent SIGKILL first.
    pub fn wait_for_exit(&mut self, grace: Duration) -> i32 {
        let deadline = Instant::now() + grace;
        while self.exit_status.is_none() && Instant::now() < deadline {
            if !self.reap() {
                thread::sleep(WAIT_POLL_INTERVAL);
            }
        }

        if let Some(status) = self.exit_status {
            return status;
        }

        warn!(session = self.index, "child ignored SIGTERM, sending SIGKILL");
        if let Err(e) = self.process.signal(Signal::SIGKILL) {
            warn!(session = self.index, error = %e, "failed to kill child");
        }
        let status = self.process.wait().unwrap_or_else(|e| {
            warn!(session = self.index, error = %e, "failed to wait for child");
            -1
        });
        self.record_exit(status);
        status
    }

    fn record_exit(&mut self, status: i32) {
        debug!(session = self.index, status, "session exited");
        self.exit_status = Some(status);
        self.drain_output();
        self.close();
    }

    /// Move output still buffered in the PTY into history
    ///
    /// The child may exit with more output queued than one read returns.
    /// Stops at end of file, when nothing is left, or once a full history's
    /// worth has been read.
    fn drain_output(&mut self) {
        let Some(controller) = &self.controller else {
            return;
        };

        let mut buf = [0u8; DRAIN_CHUNK];
        let mut drained = 0;
        while drained < self.history.capacity() {
            match controller.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.history.append(&buf[..n]);
                    drained += n;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }

        if drained > 0 {
            debug!(session = self.index, bytes = drained, "drained final output");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("index", &self.index)
            .field("pid", &self.process.pid())
            .field("exited", &self.is_exited())
            .field("exit_status", &self.exit_status)
            .field("history_len", &self.history.len())
            .finish()
    }
}
