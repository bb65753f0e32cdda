//! The multiplexer loop
//!
//! A single thread waits for readiness on the operator's input and on every
//! live session's controller, then dispatches whatever became ready. The
//! readiness wait is the only place the loop blocks.

use crate::config::MuxConfig;
use crate::keys::{Action, KeyDecoder};
use crate::registry::Registry;
use crate::render::Renderer;
use crate::session::Output;
use crate::{signals, MuxError};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::AsFd;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bytes read from a ready stream in one go
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Running,
    ShuttingDown,
    Terminated,
}

/// Routes operator input to the active session and session output to the screen
pub struct Multiplexer<W: Write> {
    registry: Registry,
    renderer: Renderer<W>,
    input: File,
    decoder: KeyDecoder,
    state: MuxState,
    shutdown_grace: Duration,
}

impl<W: Write> Multiplexer<W> {
    /// Build a multiplexer reading keystrokes from `input` and drawing to `out`
    pub fn new(registry: Registry, input: File, out: W, config: &MuxConfig) -> Self {
        let decoder = KeyDecoder::new(config.keymap, registry.len());
        Self {
            registry,
            renderer: Renderer::new(out),
            input,
            decoder,
            state: MuxState::Running,
            shutdown_grace: config.shutdown_grace,
        }
    }

    pub fn state(&self) -> MuxState {
        self.state
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn renderer(&self) -> &Renderer<W> {
        &self.renderer
    }

    /// Run until the operator quits, input ends, or a termination signal arrives
    ///
    /// Returns the exit status of every session. Sessions are shut down on
    /// the error path too.
    pub fn run(&mut self) -> Result<Vec<i32>, MuxError> {
        info!(sessions = self.registry.len(), "multiplexer running");

        if let Err(e) = self.renderer.redraw(&self.registry) {
            self.shutdown();
            return Err(e.into());
        }

        while self.state == MuxState::Running {
            self.check_termination();
            if self.state != MuxState::Running {
                break;
            }
            if let Err(e) = self.poll_once() {
                self.shutdown();
                return Err(e);
            }
        }

        Ok(self.shutdown())
    }

    /// One loop iteration, waiting as long as it takes for something to become ready
    pub fn poll_once(&mut self) -> Result<(), MuxError> {
        self.wait_and_dispatch(PollTimeout::NONE)
    }

    /// One loop iteration with a bounded wait
    pub fn poll_with_timeout(&mut self, timeout: Duration) -> Result<(), MuxError> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        self.wait_and_dispatch(PollTimeout::from(millis))
    }

    fn wait_and_dispatch(&mut self, timeout: PollTimeout) -> Result<(), MuxError> {
        if self.state != MuxState::Running {
            return Ok(());
        }

        let wake = signals::wake_fd();
        let (polled, input_ready, woken, ready_sessions) = {
            let mut owners = Vec::with_capacity(self.registry.len());
            let mut fds = Vec::with_capacity(self.registry.len() + 2);
            fds.push(PollFd::new(self.input.as_fd(), PollFlags::POLLIN));
            if let Some(fd) = wake {
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
            }
            let first_session = fds.len();
            for session in self.registry.iter() {
                if let Some(controller) = session.controller() {
                    fds.push(PollFd::new(controller.as_fd(), PollFlags::POLLIN));
                    owners.push(session.index());
                }
            }

            let polled = poll(&mut fds, timeout);
            let input_ready = is_ready(&fds[0]);
            let woken = wake.is_some() && is_ready(&fds[1]);
            let ready_sessions: Vec<usize> = owners
                .iter()
                .zip(&fds[first_session..])
                .filter(|(_, fd)| is_ready(fd))
                .map(|(index, _)| *index)
                .collect();
            (polled, input_ready, woken, ready_sessions)
        };

        match polled {
            Ok(_) => {}
            // A signal arrived; SIGCHLD in particular means something may need reaping.
            Err(Errno::EINTR) => {
                self.check_termination();
                self.reap_sessions()?;
                return Ok(());
            }
            Err(e) => return Err(MuxError::Poll(e)),
        }

        if woken {
            signals::clear_wake();
            self.check_termination();
            if self.state != MuxState::Running {
                return Ok(());
            }
        }

        if input_ready {
            self.read_input()?;
            if self.state != MuxState::Running {
                return Ok(());
            }
        }

        for index in ready_sessions {
            self.handle_session_ready(index)?;
        }

        self.reap_sessions()?;
        Ok(())
    }

    fn check_termination(&mut self) {
        if signals::termination_requested() && self.state == MuxState::Running {
            info!("termination signal received");
            self.state = MuxState::ShuttingDown;
        }
    }

    fn read_input(&mut self) -> io::Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        match self.input.read(&mut buf) {
            Ok(0) => {
                info!("operator input closed");
                self.state = MuxState::ShuttingDown;
                Ok(())
            }
            Ok(n) => self.handle_input(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => Ok(()),
            Err(e) => {
                warn!(error = %e, "operator input failed");
                self.state = MuxState::ShuttingDown;
                Ok(())
            }
        }
    }

    /// Dispatch operator bytes in order
    ///
    /// Forwarded bytes go to whichever session is active when they are
    /// decoded. Bytes after a quit are discarded.
    pub fn handle_input(&mut self, bytes: &[u8]) -> io::Result<()> {
        for &byte in bytes {
            let Some(action) = self.decoder.feed(byte) else {
                continue;
            };

            match action {
                Action::Quit => {
                    info!("quit requested");
                    self.state = MuxState::ShuttingDown;
                    return Ok(());
                }
                Action::Next => {
                    let index = self.registry.next_index();
                    self.switch_active(index)?;
                }
                Action::Previous => {
                    let index = self.registry.previous_index();
                    self.switch_active(index)?;
                }
                Action::Select(index) => {
                    self.switch_active(index)?;
                }
                Action::Forward(byte) => {
                    let session = self.registry.active_mut();
                    if let Err(e) = session.forward_input(byte) {
                        debug!(session = session.index(), error = %e, "keystroke dropped");
                    }
                }
            }
        }
        Ok(())
    }

    /// Make `index` the active session and repaint
    ///
    /// Returns false, without redrawing, if `index` is already active or
    /// names no session.
    pub fn switch_active(&mut self, index: usize) -> io::Result<bool> {
        if !self.registry.select(index) {
            return Ok(false);
        }
        debug!(session = index, "switched active session");
        self.renderer.redraw(&self.registry)?;
        Ok(true)
    }

    /// Read from a session whose controller is ready
    pub fn handle_session_ready(&mut self, index: usize) -> io::Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        let Some(session) = self.registry.get_mut(index) else {
            return Ok(());
        };
        let output = session.pump_output(&mut buf);
        let is_active = index == self.registry.active_index();

        match output {
            Output::Bytes(n) if is_active => self.renderer.stream(&buf[..n]),
            Output::Bytes(_) | Output::Idle => Ok(()),
            Output::Closed => {
                info!(session = index, "session stream closed");
                if is_active {
                    self.renderer.redraw(&self.registry)?;
                }
                Ok(())
            }
        }
    }

    /// Collect exit statuses of finished children without blocking
    pub fn reap_sessions(&mut self) -> io::Result<()> {
        let active = self.registry.active_index();
        let mut redraw = false;
        for session in self.registry.iter_mut() {
            if session.reap() {
                info!(session = session.index(), status = ?session.exit_status(), "session reaped");
                redraw |= session.index() == active;
            }
        }
        if redraw {
            self.renderer.redraw(&self.registry)?;
        }
        Ok(())
    }

    /// Terminate and reap every session
    ///
    /// Blocks until all children are gone. Safe to call more than once.
    pub fn shutdown(&mut self) -> Vec<i32> {
        if self.state != MuxState::Terminated {
            info!(sessions = self.registry.len(), "shutting down");
        }
        self.state = MuxState::ShuttingDown;
        let statuses = self.registry.shutdown(self.shutdown_grace);
        self.state = MuxState::Terminated;
        statuses
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().map_or(false, |revents| {
        revents.intersects(
            PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DEFAULT_PREFIX;
    use ptymux_pty::ChildCommand;
    use std::time::Instant;

    fn mux(count: usize) -> (Multiplexer<Vec<u8>>, File) {
        let (read_end, write_end) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).unwrap();
        let config = MuxConfig {
            sessions: count,
            command: ChildCommand::new("cat"),
            ..MuxConfig::default()
        };
        let registry = Registry::create(count, &config.command, 1024).unwrap();
        let mux = Multiplexer::new(registry, File::from(read_end), Vec::new(), &config);
        (mux, File::from(write_end))
    }

    #[test]
    fn test_switch_to_same_index_is_silent() {
        let (mut mux, _input) = mux(2);
        assert!(!mux.switch_active(0).unwrap());
        assert!(!mux.switch_active(7).unwrap());
        assert!(mux.renderer().get_ref().is_empty());
        assert_eq!(mux.registry().active_index(), 0);
        mux.shutdown();
    }

    #[test]
    fn test_next_and_previous_wrap() {
        let (mut mux, _input) = mux(3);
        mux.handle_input(&[DEFAULT_PREFIX, b'p']).unwrap();
        assert_eq!(mux.registry().active_index(), 2);
        mux.handle_input(&[DEFAULT_PREFIX, b'n']).unwrap();
        assert_eq!(mux.registry().active_index(), 0);
        mux.handle_input(&[DEFAULT_PREFIX, b'n', DEFAULT_PREFIX, b'n']).unwrap();
        assert_eq!(mux.registry().active_index(), 2);
        mux.shutdown();
    }

    #[test]
    fn test_quit_stops_dispatch() {
        let (mut mux, _input) = mux(2);
        mux.handle_input(&[DEFAULT_PREFIX, b'q', DEFAULT_PREFIX, b'2']).unwrap();
        assert_eq!(mux.state(), MuxState::ShuttingDown);
        assert_eq!(mux.registry().active_index(), 0);

        let statuses = mux.shutdown();
        assert_eq!(statuses.len(), 2);
        assert_eq!(mux.state(), MuxState::Terminated);
    }

    #[test]
    fn test_input_eof_shuts_down() {
        let (mut mux, input) = mux(1);
        drop(input);

        let deadline = Instant::now() + Duration::from_secs(3);
        while mux.state() == MuxState::Running {
            assert!(Instant::now() < deadline, "loop never saw end of input");
            mux.poll_with_timeout(Duration::from_millis(100)).unwrap();
        }
        assert_eq!(mux.state(), MuxState::ShuttingDown);
        mux.shutdown();
    }

    #[test]
    fn test_is_ready_flags() {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        let mut fds = [PollFd::new(read_end.as_fd(), PollFlags::POLLIN)];
        assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 0);
        assert!(!is_ready(&fds[0]));

        drop(write_end);
        assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 1);
        assert!(is_ready(&fds[0]));
    }
}
