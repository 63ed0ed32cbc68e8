//! Vocabulary of the daemon's telnet-style CLI.
//!
//! The daemon exposes a line-oriented control interface on a local TCP port.
//! Interaction is shell-like: a command goes out, response lines come back,
//! and a prompt marks the end of the response.
//!
//! # Wire Format
//!
//! Outbound commands are ASCII text terminated by CRLF (`0x0D 0x0A`).
//!
//! Inbound data is line-oriented text ending in a prompt of the form
//! `localhost:<id><marker>`, where `<id>` is 1-4 alphanumeric characters and
//! `<marker>` identifies the session mode:
//!
//! ```text
//! localhost:ab12>          default mode
//! localhost:ab12#          privileged mode
//! localhost:ab12(config)#  config mode
//! ```
//!
//! Modes are switched with the auxiliary commands `enable`, `disable`,
//! `configure terminal` and `exit`; `logout` ends the session.

use std::fmt;

/// Session mode of the daemon CLI.
///
/// The session is in exactly one mode at a time; each command declares the
/// modes it may run in via a [`ModeSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Unprivileged mode, prompt marker `>`
    Default,
    /// Privileged mode, prompt marker `#`
    Privileged,
    /// Configuration mode, prompt marker `(config)#`
    Config,
}

impl Mode {
    /// Parse a mode name as found in manage descriptors (`"DEFAULT"`,
    /// `"PRIVILEGED"`, `"CONFIG"`). Unknown names are `None`.
    pub fn parse(value: &str) -> Option<Mode> {
        match value {
            "DEFAULT" => Some(Mode::Default),
            "PRIVILEGED" => Some(Mode::Privileged),
            "CONFIG" => Some(Mode::Config),
            _ => None,
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Mode::Default => 1 << 0,
            Mode::Privileged => 1 << 1,
            Mode::Config => 1 << 2,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Default => "DEFAULT",
            Mode::Privileged => "PRIVILEGED",
            Mode::Config => "CONFIG",
        };
        write!(f, "{name}")
    }
}

/// Set of session modes, used to declare where a command may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeSet(u8);

impl ModeSet {
    /// The empty set.
    pub const EMPTY: ModeSet = ModeSet(0);

    /// Set containing a single mode.
    pub const fn only(mode: Mode) -> ModeSet {
        ModeSet(mode.bit())
    }

    /// Set containing the given modes.
    pub const fn of(modes: &[Mode]) -> ModeSet {
        let mut bits = 0;
        let mut i = 0;
        while i < modes.len() {
            bits |= modes[i].bit();
            i += 1;
        }
        ModeSet(bits)
    }

    /// Parse a `|`-separated list of mode names, e.g. `"DEFAULT|PRIVILEGED"`.
    /// Unknown tokens are skipped.
    pub fn parse_field(values: &str) -> ModeSet {
        let mut set = ModeSet::EMPTY;
        for token in values.split('|') {
            if let Some(mode) = Mode::parse(token.trim()) {
                set.insert(mode);
            }
        }
        set
    }

    pub fn contains(self, mode: Mode) -> bool {
        self.0 & mode.bit() != 0
    }

    pub fn insert(&mut self, mode: Mode) {
        self.0 |= mode.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A single CLI command together with the session modes that permit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    modes: ModeSet,
}

impl Command {
    pub fn new(text: impl Into<String>, modes: ModeSet) -> Command {
        Command {
            text: text.into(),
            modes,
        }
    }

    /// Command permitted in exactly one mode.
    pub fn with_mode(text: impl Into<String>, mode: Mode) -> Command {
        Command::new(text, ModeSet::only(mode))
    }

    /// The command text as sent on the wire (without line terminator).
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn modes(&self) -> ModeSet {
        self.modes
    }

    /// Whether the command may run in the given session mode. An unknown
    /// session mode (`None`) never permits anything.
    pub fn allowed_in(&self, mode: Option<Mode>) -> bool {
        mode.is_some_and(|mode| self.modes.contains(mode))
    }
}

/// Queue ordering of a scheduled job. More urgent priorities sort first;
/// jobs of equal priority run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Highest,
    High,
    Default,
    Low,
    Lowest,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Default
    }
}
