//! Connection state for the daemon CLI session.

use std::io::BufReader;
use std::net::{Shutdown, TcpStream};

use tracing::{error, warn};

use crate::codec::{self, CodecError};
use crate::protocol::Mode;

const COMMAND_LOGOUT: &str = "logout";

/// Live connection to the daemon CLI: one stream, buffered for reads and
/// cloned for writes.
struct Link {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

/// Connection state owned by the scheduler's worker.
///
/// At most one link is live at a time. It is established lazily before a job
/// runs and torn down on disconnect or when the connection details change.
/// The mode tracks the last recognized prompt and is `None` until one has
/// been read.
pub(crate) struct Session {
    link: Option<Link>,
    mode: Option<Mode>,
}

impl Session {
    pub fn new() -> Session {
        Session {
            link: None,
            mode: None,
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Make sure a link to `localhost:<port>` is up. Returns `false` when no
    /// port is configured or the connect attempt fails; the caller skips the
    /// current job in that case.
    pub fn ensure(&mut self, port: Option<u16>) -> bool {
        if self.link.is_none() {
            let Some(port) = port else {
                warn!("no connection details configured");
                return false;
            };
            if let Err(e) = self.connect(port) {
                error!("error while connecting to daemon CLI: {e}");
            }
        }
        self.is_connected()
    }

    /// Best-effort logout, then drop the link. The mode becomes unknown.
    pub fn cut(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = codec::write_command(&mut link.writer, COMMAND_LOGOUT) {
                warn!("error while logging out from daemon CLI: {e}");
            }
            let _ = link.writer.shutdown(Shutdown::Both);
        }
        self.mode = None;
    }

    /// Extra handle on the live stream, so a read in progress can be shut
    /// down without waiting on the session lock.
    pub fn interrupt_handle(&self) -> Option<TcpStream> {
        self.link
            .as_ref()
            .and_then(|link| link.writer.try_clone().ok())
    }

    /// Send one command over the live link.
    pub fn send(&mut self, text: &str) -> Result<(), CodecError> {
        let link = self.link.as_mut().ok_or_else(not_connected)?;
        codec::write_command(&mut link.writer, text)
    }

    /// Read the response block for the last sent command, updating the
    /// session mode from the prompt.
    pub fn read_response(&mut self) -> Result<Vec<String>, CodecError> {
        let link = self.link.as_mut().ok_or_else(not_connected)?;
        let (lines, mode) = codec::read_until_prompt(&mut link.reader)?;
        if let Some(mode) = mode {
            self.mode = Some(mode);
        }
        Ok(lines)
    }

    fn connect(&mut self, port: u16) -> Result<(), CodecError> {
        let stream = TcpStream::connect(("localhost", port))?;
        let writer = stream.try_clone()?;
        let mut link = Link {
            reader: BufReader::new(stream),
            writer,
        };

        // The greeting prompt tells us the starting mode. A failed read
        // leaves the mode unknown but keeps the link.
        match codec::read_until_prompt(&mut link.reader) {
            Ok((_, mode)) => {
                if let Some(mode) = mode {
                    self.mode = Some(mode);
                }
            }
            Err(e) => error!("error while reading the greeting prompt: {e}"),
        }

        self.link = Some(link);
        Ok(())
    }
}

fn not_connected() -> CodecError {
    CodecError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "not connected to the daemon CLI",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn ensure_learns_mode_from_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"ready\r\nlocalhost:ab12#").unwrap();
            // hold the socket open until the client logs out
            let mut buf = [0u8; 128];
            let _ = stream.read(&mut buf);
        });

        let mut session = Session::new();
        assert!(session.ensure(Some(port)));
        assert_eq!(session.mode(), Some(Mode::Privileged));

        session.cut();
        assert_eq!(session.mode(), None);
        assert!(!session.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn ensure_without_configured_port_fails() {
        let mut session = Session::new();
        assert!(!session.ensure(None));
    }

    #[test]
    fn ensure_fails_on_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut session = Session::new();
        assert!(!session.ensure(Some(port)));
        assert!(!session.is_connected());
    }

    #[test]
    fn send_and_read_require_a_link() {
        let mut session = Session::new();
        assert!(session.send("show info").is_err());
        assert!(session.read_response().is_err());
    }
}
