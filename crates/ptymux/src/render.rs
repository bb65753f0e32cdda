//! Screen output for the operator's terminal

use crate::registry::Registry;
use crate::session::Session;
use crossterm::{
    cursor, queue,
    style::{Attribute, Print, SetAttribute},
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};

/// Marker shown in the header for a live session
pub const LIVE_MARKER: char = '+';
/// Marker shown in the header for an exited session
pub const EXITED_MARKER: char = 'x';

/// Header line listing every session, with the active one bracketed
///
/// Slots are numbered from 1 to match the selection keys.
pub fn header_line(registry: &Registry) -> String {
    let mut line = String::from("ptymux");
    for session in registry.iter() {
        let marker = if session.is_exited() {
            EXITED_MARKER
        } else {
            LIVE_MARKER
        };
        let slot = session.index() + 1;
        if session.index() == registry.active_index() {
            line.push_str(&format!(" [{slot}{marker}]"));
        } else {
            line.push_str(&format!("  {slot}{marker} "));
        }
    }
    line
}

/// Banner shown above the history of an exited session
pub fn exit_banner(session: &Session) -> Option<String> {
    if !session.is_exited() {
        return None;
    }
    let slot = session.index() + 1;
    Some(match session.exit_status() {
        Some(status) => format!("[session {slot} exited with status {status}]"),
        None => format!("[session {slot} exited]"),
    })
}

/// Writes redraws and live output to the physical terminal
pub struct Renderer<W: Write> {
    out: W,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Repaint the whole screen for the active session
    ///
    /// Clears the screen, draws the header, the exit banner if the active
    /// session has exited, and then replays its retained history verbatim.
    pub fn redraw(&mut self, registry: &Registry) -> io::Result<()> {
        let active = registry.active();

        queue!(
            self.out,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0),
            SetAttribute(Attribute::Reverse),
            Print(header_line(registry)),
            SetAttribute(Attribute::Reset),
            Print("\r\n"),
        )?;

        if let Some(banner) = exit_banner(active) {
            queue!(self.out, Print(banner), Print("\r\n"))?;
        }

        let (front, back) = active.history().as_slices();
        self.out.write_all(front)?;
        self.out.write_all(back)?;
        self.out.flush()
    }

    /// Pass live output from the active session straight through
    pub fn stream(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptymux_pty::ChildCommand;
    use std::time::Duration;

    #[test]
    fn test_header_marks_active_and_exited() {
        let mut registry = Registry::create(3, &ChildCommand::new("cat"), 64).unwrap();
        assert_eq!(header_line(&registry), "ptymux [1+]  2+   3+ ");

        registry.select(1);
        registry.get_mut(2).unwrap().close();
        assert_eq!(header_line(&registry), "ptymux  1+  [2+]  3x ");

        registry.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn test_banner_only_for_exited() {
        let mut registry = Registry::create(1, &ChildCommand::new("cat"), 64).unwrap();
        assert_eq!(exit_banner(registry.active()), None);

        registry.active_mut().close();
        assert_eq!(
            exit_banner(registry.active()).as_deref(),
            Some("[session 1 exited]")
        );

        registry.shutdown(Duration::from_secs(2));
        let banner = exit_banner(registry.active()).unwrap();
        assert!(banner.starts_with("[session 1 exited with status "), "{banner}");
    }

    #[test]
    fn test_redraw_replays_history() {
        let mut registry = Registry::create(2, &ChildCommand::new("cat"), 64).unwrap();
        registry.active_mut().append_output(b"first line\r\nsecond");

        let mut renderer = Renderer::new(Vec::new());
        renderer.redraw(&registry).unwrap();

        let screen = String::from_utf8_lossy(renderer.get_ref()).into_owned();
        assert!(screen.contains("[1+]"));
        assert!(screen.ends_with("first line\r\nsecond"), "{screen:?}");
        assert!(!screen.contains("exited"));

        registry.shutdown(Duration::from_secs(2));
    }

    #[test]
    fn test_stream_passes_bytes_through() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.stream(b"\x1b[1mlive\x1b[0m").unwrap();
        assert_eq!(renderer.into_inner(), b"\x1b[1mlive\x1b[0m");
    }
}
