//! Full-duplex line channel (C1, §4.1): CRLF-terminated reads with an idle
//! timeout and consecutive-timeout counter, CRLF-appending writes, and raw
//! byte reads for the DATA phase.
//!
//! A trait over the concrete stream type lets tests substitute an
//! in-memory double for a real `TcpStream`/`UnixStream`.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use kopano_core::{Error, Result};

/// The read/write surface a [`Channel`] needs from its underlying socket.
/// Implemented for both TCP and Unix-domain listener sockets so the same
/// session driver in [`crate::session`] works for either transport.
pub trait RawStream: io::Read + io::Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl RawStream for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

impl RawStream for UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }
}

/// Outcome of one `read_line` attempt, distinguishing a clean idle timeout
/// (recoverable, counted) from an actual I/O or protocol failure.
#[derive(Debug)]
pub enum ReadOutcome {
    Line(String),
    Timeout,
    Closed,
}

/// A CRLF-oriented session channel with the idle-timeout policy of §4.1:
/// 60s per read by default, and the caller is responsible for closing the
/// session after `max_consecutive_timeouts` timeouts in a row.
pub struct Channel<S: RawStream> {
    reader: BufReader<S>,
    idle_timeout: Duration,
    max_line_length: usize,
    consecutive_timeouts: u32,
}

impl<S: RawStream> Channel<S> {
    #[must_use]
    pub fn new(stream: S, idle_timeout: Duration, max_line_length: usize) -> Self {
        let _ = stream.set_read_timeout(Some(idle_timeout));
        Self { reader: BufReader::new(stream), idle_timeout, max_line_length, consecutive_timeouts: 0 }
    }

    /// Consecutive timeouts observed so far on this channel, for the
    /// session driver's "10 in a row" close policy.
    #[must_use]
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Reads one CRLF-terminated line, stripping the terminator. Lines
    /// longer than `max_line_length` are rejected with `BadValue`.
    pub fn read_line(&mut self) -> Result<ReadOutcome> {
        let mut raw = Vec::new();
        match self.reader.read_until(b'\n', &mut raw) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(_) => {
                self.consecutive_timeouts = 0;
                if raw.len() > self.max_line_length {
                    return Err(Error::BadValue(format!("line exceeds {} bytes", self.max_line_length)));
                }
                while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                let line = String::from_utf8_lossy(&raw).into_owned();
                Ok(ReadOutcome::Line(line))
            }
            Err(e) if is_timeout(&e) => {
                self.consecutive_timeouts += 1;
                Ok(ReadOutcome::Timeout)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Reads exactly `n` raw bytes (used for any future fixed-length
    /// binary reads; DATA bodies are read line-by-line instead).
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf).map_err(Error::Io)?;
        Ok(buf)
    }

    /// Writes `line` followed by a CRLF.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes()).map_err(Error::Io)?;
        stream.write_all(b"\r\n").map_err(Error::Io)?;
        stream.flush().map_err(Error::Io)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// An in-memory duplex double: reads come from a fixed buffer, writes
    /// land in a growable one. Never actually times out.
    struct MemoryStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl io::Read for MemoryStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }
    impl io::Write for MemoryStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    impl RawStream for MemoryStream {
        fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    fn channel(input: &str) -> Channel<MemoryStream> {
        Channel::new(
            MemoryStream { input: Cursor::new(input.as_bytes().to_vec()), output: Vec::new() },
            Duration::from_secs(60),
            65536,
        )
    }

    #[test]
    fn read_line_strips_crlf() {
        let mut ch = channel("LHLO test\r\n");
        match ch.read_line().unwrap() {
            ReadOutcome::Line(l) => assert_eq!(l, "LHLO test"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn read_line_reports_closed_at_eof() {
        let mut ch = channel("");
        assert!(matches!(ch.read_line().unwrap(), ReadOutcome::Closed));
    }

    #[test]
    fn oversized_line_is_rejected() {
        let mut ch = Channel::new(
            MemoryStream { input: Cursor::new(b"x".repeat(100).to_vec()), output: Vec::new() },
            Duration::from_secs(60),
            10,
        );
        assert!(matches!(ch.read_line(), Err(Error::BadValue(_))));
    }

    #[test]
    fn write_line_appends_crlf() {
        let mut ch = channel("");
        ch.write_line("220 2.1.5 LMTP server is ready").unwrap();
        assert_eq!(ch.reader.get_ref().output, b"220 2.1.5 LMTP server is ready\r\n");
    }
}
