//! Operator key bindings
//!
//! Multiplexer commands are introduced by a prefix byte so that ordinary
//! typing, digits included, still reaches the active session.

/// Default prefix, Ctrl-A
pub const DEFAULT_PREFIX: u8 = 0x01;

/// What the loop should do with one operator byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Next,
    Previous,
    Select(usize),
    Forward(u8),
}

/// Byte assignments for the multiplexer commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMap {
    pub prefix: u8,
    pub quit: u8,
    pub next: u8,
    pub previous: u8,
}

impl Default for KeyMap {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX,
            quit: b'q',
            next: b'n',
            previous: b'p',
        }
    }
}

/// Turns the operator's byte stream into actions
///
/// The decoder remembers a pending prefix across reads, so a prefix and its
/// command may arrive in separate chunks.
#[derive(Debug, Clone)]
pub struct KeyDecoder {
    keymap: KeyMap,
    slots: usize,
    pending_prefix: bool,
}

impl KeyDecoder {
    /// Decoder for a multiplexer with `slots` sessions
    pub fn new(keymap: KeyMap, slots: usize) -> Self {
        Self {
            keymap,
            slots,
            pending_prefix: false,
        }
    }

    pub fn keymap(&self) -> &KeyMap {
        &self.keymap
    }

    /// Whether the last byte fed was an unconsumed prefix
    pub fn is_pending(&self) -> bool {
        self.pending_prefix
    }

    /// Feed one byte; returns `None` while a prefix is waiting for its command
    pub fn feed(&mut self, byte: u8) -> Option<Action> {
        if !self.pending_prefix {
            if byte == self.keymap.prefix {
                self.pending_prefix = true;
                return None;
            }
            return Some(Action::Forward(byte));
        }

        self.pending_prefix = false;
        let action = match byte {
            b if b == self.keymap.prefix => Action::Forward(b),
            b if b == self.keymap.quit => Action::Quit,
            b if b == self.keymap.next => Action::Next,
            b if b == self.keymap.previous => Action::Previous,
            b'1'..=b'9' if usize::from(byte - b'1') < self.slots => {
                Action::Select(usize::from(byte - b'1'))
            }
            other => Action::Forward(other),
        };
        Some(action)
    }
}
