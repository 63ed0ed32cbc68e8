//! Byte-level framing of the daemon's line protocol.
//!
//! Commands go out as ASCII lines terminated by CRLF. Responses are read
//! byte-at-a-time until a complete prompt line appears; see [`PromptReader`]
//! for the exact line handling.

use std::io::{BufRead, Write};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::error;

use crate::protocol::Mode;

/// Full-line prompt grammar; the capture group is the mode marker.
static PROMPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^localhost:[0-9A-Za-z]{1,4}(>|#|\(config\)#)$").expect("prompt pattern")
});

/// Framing and transport errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command is not ASCII: {0:?}")]
    NonAscii(String),
}

/// Send one command line: ASCII bytes followed by CRLF, then flush.
pub fn write_command(writer: &mut impl Write, text: &str) -> Result<(), CodecError> {
    if !text.is_ascii() {
        return Err(CodecError::NonAscii(text.to_string()));
    }
    writer.write_all(text.as_bytes())?;
    writer.write_all(b"\r\n")?;
    writer.flush()?;
    Ok(())
}

/// Read the response block for the previously sent command.
///
/// Blocks until a complete prompt line arrives. Returns the response lines
/// and the session mode named by the prompt marker (`None` when the marker
/// was not recognized). End of stream before a prompt is an I/O error.
pub fn read_until_prompt(
    reader: &mut impl BufRead,
) -> Result<(Vec<String>, Option<Mode>), CodecError> {
    let mut parser = PromptReader::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if let Step::Prompt(mode) = parser.push(byte[0]) {
            return Ok((parser.into_lines(), mode));
        }
    }
}

/// Outcome of feeding one byte to [`PromptReader::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More bytes needed.
    Continue,
    /// The running line completed a prompt. Carries the mode the marker
    /// names, or `None` for an unrecognized marker (session mode unchanged).
    Prompt(Option<Mode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    /// Saw a CR; the next byte decides between a CRLF line ending and a
    /// literal CR.
    GotCr,
}

/// Incremental parser for a prompt-terminated response block.
///
/// Line handling:
/// - CRLF and lone LF both terminate a line; a bare CR not followed by LF
///   is kept as a literal character.
/// - The first terminated line is discarded: it echoes the command (or the
///   previous prompt) and is not part of the response.
/// - After every `>` or `#` the running line is tested against the prompt
///   grammar. A match ends the read; the prompt line itself is never a
///   response line.
#[derive(Debug)]
pub struct PromptReader {
    lines: Vec<String>,
    buf: String,
    state: State,
    echo_discarded: bool,
}

impl PromptReader {
    pub fn new() -> PromptReader {
        PromptReader {
            lines: Vec::new(),
            buf: String::new(),
            state: State::Normal,
            echo_discarded: false,
        }
    }

    /// Feed one byte of input.
    pub fn push(&mut self, byte: u8) -> Step {
        if self.state == State::GotCr && byte != 0x0A {
            self.buf.push('\r');
            self.state = State::Normal;
        }

        match byte {
            0x0D => self.state = State::GotCr,
            0x0A => {
                self.state = State::Normal;
                self.end_line();
            }
            b'>' | b'#' => {
                self.buf.push(byte as char);
                if let Some(marker) = prompt_marker(&self.buf) {
                    return Step::Prompt(mode_for_marker(marker));
                }
            }
            _ => self.buf.push(byte as char),
        }

        Step::Continue
    }

    /// The response lines accumulated so far.
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    fn end_line(&mut self) {
        let line = std::mem::take(&mut self.buf);
        if self.echo_discarded {
            self.lines.push(line);
        } else {
            self.echo_discarded = true;
        }
    }
}

impl Default for PromptReader {
    fn default() -> Self {
        Self::new()
    }
}

fn prompt_marker(line: &str) -> Option<&str> {
    PROMPT
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn mode_for_marker(marker: &str) -> Option<Mode> {
    match marker {
        ">" => Some(Mode::Default),
        "#" => Some(Mode::Privileged),
        "(config)#" => Some(Mode::Config),
        _ => {
            error!("found unsupported prompt marker: {marker:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(input: &str) -> (Vec<String>, Option<Mode>) {
        let mut reader = Cursor::new(input.as_bytes().to_vec());
        read_until_prompt(&mut reader).unwrap()
    }

    #[test]
    fn discards_echo_and_resolves_privileged_prompt() {
        let (lines, mode) = read_all("somegarbage\r\nline one\r\nline two\r\nlocalhost:1234#");
        assert_eq!(lines, vec!["line one", "line two"]);
        assert_eq!(mode, Some(Mode::Privileged));
    }

    #[test]
    fn resolves_default_and_config_markers() {
        let (lines, mode) = read_all("echo\r\nout\r\nlocalhost:ab12>");
        assert_eq!(lines, vec!["out"]);
        assert_eq!(mode, Some(Mode::Default));

        let (lines, mode) = read_all("echo\r\nlocalhost:ab12(config)#");
        assert!(lines.is_empty());
        assert_eq!(mode, Some(Mode::Config));
    }

    #[test]
    fn prompt_with_no_preceding_line() {
        // Fresh connection: the server may send the prompt immediately.
        let (lines, mode) = read_all("localhost:1a2b>");
        assert!(lines.is_empty());
        assert_eq!(mode, Some(Mode::Default));
    }

    #[test]
    fn bare_cr_is_kept_literally() {
        let (lines, mode) = read_all("echo\r\nfoo\rbar\r\nlocalhost:1>");
        assert_eq!(lines, vec!["foo\rbar"]);
        assert_eq!(mode, Some(Mode::Default));
    }

    #[test]
    fn lone_lf_terminates_a_line() {
        let (lines, mode) = read_all("echo\nfirst\nsecond\r\nlocalhost:a12b#");
        assert_eq!(lines, vec!["first", "second"]);
        assert_eq!(mode, Some(Mode::Privileged));
    }

    #[test]
    fn prompt_like_text_mid_line_is_a_response_line() {
        let (lines, mode) = read_all("echo\r\nsee localhost:12# here\r\nlocalhost:12#");
        assert_eq!(lines, vec!["see localhost:12# here"]);
        assert_eq!(mode, Some(Mode::Privileged));
    }

    #[test]
    fn overlong_id_is_not_a_prompt() {
        let mut parser = PromptReader::new();
        for byte in b"localhost:12345#" {
            assert_eq!(parser.push(*byte), Step::Continue);
        }
    }

    #[test]
    fn prompt_detection_per_byte() {
        let mut parser = PromptReader::new();
        for byte in b"localhost:7" {
            assert_eq!(parser.push(*byte), Step::Continue);
        }
        assert_eq!(parser.push(b'#'), Step::Prompt(Some(Mode::Privileged)));
    }

    #[test]
    fn write_appends_crlf_and_flushes() {
        let mut buf = Vec::new();
        write_command(&mut buf, "show info").unwrap();
        assert_eq!(buf, b"show info\r\n");
    }

    #[test]
    fn write_rejects_non_ascii() {
        let mut buf = Vec::new();
        let err = write_command(&mut buf, "caf\u{e9}").unwrap_err();
        assert!(matches!(err, CodecError::NonAscii(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn eof_before_prompt_is_an_error() {
        let mut reader = Cursor::new(Vec::<u8>::new());
        assert!(read_until_prompt(&mut reader).is_err());

        let mut reader = Cursor::new(b"partial output without a prompt\r\n".to_vec());
        assert!(read_until_prompt(&mut reader).is_err());
    }
}
