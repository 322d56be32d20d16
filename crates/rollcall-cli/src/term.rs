//! Terminal raw mode for the lifetime of a session, and a log writer that
//! stays readable while it is on.

use crossterm::terminal;
use std::io::{self, IsTerminal, Write};

/// Raw mode until dropped.
///
/// Keys are not echoed and Ctrl-C arrives as a key event instead of SIGINT,
/// so the session can end through its normal quit path.
pub struct RawMode(());

impl RawMode {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// `MakeWriter` for the log subscriber: stderr, with CRLF line endings
/// while raw mode has output post-processing switched off.
pub fn stderr() -> LogWriter<io::Stderr> {
    let stderr = io::stderr();
    let crlf = stderr.is_terminal() && terminal::is_raw_mode_enabled().unwrap_or(false);
    LogWriter { inner: stderr, crlf }
}

pub struct LogWriter<W> {
    inner: W,
    crlf: bool,
}

impl<W: Write> Write for LogWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.crlf {
            return self.inner.write(buf);
        }
        for (i, line) in buf.split(|&b| b == b'\n').enumerate() {
            if i > 0 {
                self.inner.write_all(b"\r\n")?;
            }
            self.inner.write_all(line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
