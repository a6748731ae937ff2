//! Per-invocation output capture.
//!
//! Handlers never write to the process's stdout/stderr for capture purposes.
//! Each invocation gets its own [`OutputSink`], so any number of capturing
//! invocations can run at once without seeing each other's text.

use std::fmt;
use std::io;

use parking_lot::Mutex;

/// Which logical stream a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Output target handed to a handler for the duration of one call.
///
/// A disabled sink accepts and drops every write. Bytes are kept raw and
/// decoded once when the sink is consumed, so a character split across
/// writes survives intact.
#[derive(Debug, Default)]
pub struct OutputSink {
    enabled: bool,
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
}

impl OutputSink {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn write_str(&self, stream: Stream, text: &str) {
        self.write_bytes(stream, text.as_bytes());
    }

    /// Write raw bytes. Invalid UTF-8 is replaced when the text is read.
    pub fn write_bytes(&self, stream: Stream, bytes: &[u8]) {
        if !self.enabled || bytes.is_empty() {
            return;
        }
        match stream {
            Stream::Stdout => self.stdout.lock().extend_from_slice(bytes),
            Stream::Stderr => self.stderr.lock().extend_from_slice(bytes),
        }
    }

    pub fn print(&self, text: impl AsRef<str>) {
        self.write_str(Stream::Stdout, text.as_ref());
    }

    /// Print a line to stdout, like Python's `print`.
    pub fn println(&self, text: impl AsRef<str>) {
        self.print(text);
        self.print("\n");
    }

    pub fn eprint(&self, text: impl AsRef<str>) {
        self.write_str(Stream::Stderr, text.as_ref());
    }

    pub fn eprintln(&self, text: impl AsRef<str>) {
        self.eprint(text);
        self.eprint("\n");
    }

    /// Writer for the stdout buffer, usable with `write!`.
    pub fn stdout(&self) -> StreamWriter<'_> {
        StreamWriter {
            sink: self,
            stream: Stream::Stdout,
        }
    }

    /// Writer for the stderr buffer, usable with `write!`.
    pub fn stderr(&self) -> StreamWriter<'_> {
        StreamWriter {
            sink: self,
            stream: Stream::Stderr,
        }
    }

    /// Consume the sink, returning `(stdout, stderr)`.
    pub fn into_parts(self) -> (String, String) {
        (
            decode_lossy(self.stdout.into_inner()),
            decode_lossy(self.stderr.into_inner()),
        )
    }

    /// Consume the sink, returning the captured text.
    ///
    /// Enabled sinks always join the two buffers with a single newline, even
    /// when one or both are empty. Disabled sinks return an empty string.
    pub fn into_text(self) -> String {
        if !self.enabled {
            return String::new();
        }
        let (mut stdout, stderr) = self.into_parts();
        stdout.reserve(stderr.len() + 1);
        stdout.push('\n');
        stdout.push_str(&stderr);
        stdout
    }
}

fn decode_lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Borrowed writer for one stream of an [`OutputSink`].
pub struct StreamWriter<'a> {
    sink: &'a OutputSink,
    stream: Stream,
}

impl fmt::Write for StreamWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.sink.write_str(self.stream, s);
        Ok(())
    }
}

impl io::Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write_bytes(self.stream, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a fresh sink and return its result together with the
/// captured text (`""` when capture is disabled).
pub fn with_capture<R>(enabled: bool, f: impl FnOnce(&OutputSink) -> R) -> (R, String) {
    let sink = OutputSink::new(enabled);
    let result = f(&sink);
    (result, sink.into_text())
}
