//! Standard streams backed by host log sinks.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use p2shim_core::StreamError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{InputHandler, InputStream, OutputHandler, OutputStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputChannel::Stdout => f.write_str("stdout"),
            OutputChannel::Stderr => f.write_str("stderr"),
        }
    }
}

/// A host destination for guest output. Each call is one line; the sink
/// supplies its own terminator.
pub trait LogSink: Send + Sync {
    fn log(&self, channel: OutputChannel, line: &str);
}

/// Emits guest output as `tracing` events on target `guest`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, channel: OutputChannel, line: &str) {
        match channel {
            OutputChannel::Stdout => info!(target: "guest", %channel, "{}", line),
            OutputChannel::Stderr => warn!(target: "guest", %channel, "{}", line),
        }
    }
}

/// Writes guest output to the host process's own stdout and stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn log(&self, channel: OutputChannel, line: &str) {
        match channel {
            OutputChannel::Stdout => println!("{}", line),
            OutputChannel::Stderr => eprintln!("{}", line),
        }
    }
}

/// Keeps guest output in memory.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    lines: Arc<Mutex<Vec<(OutputChannel, String)>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(OutputChannel, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn channel_lines(&self, channel: OutputChannel) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, line)| line)
            .collect()
    }
}

impl LogSink for CaptureSink {
    fn log(&self, channel: OutputChannel, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel, line.to_string()));
    }
}

/// Output handler that forwards each write to a [`LogSink`] as one line.
///
/// A single trailing `\n` is stripped first. The full write is reported as
/// consumed.
pub struct LogOutput {
    channel: OutputChannel,
    sink: Arc<dyn LogSink>,
}

impl LogOutput {
    pub fn new(channel: OutputChannel, sink: Arc<dyn LogSink>) -> Self {
        Self { channel, sink }
    }
}

impl OutputHandler for LogOutput {
    fn write(&mut self, contents: &[u8]) -> Result<u64, StreamError> {
        if contents.is_empty() {
            return Ok(0);
        }
        let line = contents.strip_suffix(b"\n").unwrap_or(contents);
        self.sink
            .log(self.channel, &String::from_utf8_lossy(line));
        Ok(contents.len() as u64)
    }
}

/// Input with nothing to read.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyInput;

impl InputHandler for EmptyInput {
    fn blocking_read(&mut self, _len: u64) -> Result<Vec<u8>, StreamError> {
        Ok(Vec::new())
    }
}

/// The guest's three standard streams.
#[derive(Debug)]
pub struct Stdio {
    pub stdin: InputStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
}

impl Stdio {
    pub fn new(stdout: Arc<dyn LogSink>, stderr: Arc<dyn LogSink>) -> Self {
        Self {
            stdin: InputStream::new(EmptyInput),
            stdout: OutputStream::new(LogOutput::new(OutputChannel::Stdout, stdout)),
            stderr: OutputStream::new(LogOutput::new(OutputChannel::Stderr, stderr)),
        }
    }

    /// Route both output streams to the same sink.
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self::new(sink.clone(), sink)
    }
}

impl Default for Stdio {
    fn default() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_newline_is_stripped_once() {
        let sink = CaptureSink::new();
        let mut stdio = Stdio::with_sink(Arc::new(sink.clone()));

        stdio.stdout.write(b"hello\n").unwrap();
        stdio.stdout.write(b"two\n\n").unwrap();
        stdio.stdout.write(b"no newline").unwrap();
        stdio.stdout.write(b"\n").unwrap();

        assert_eq!(
            sink.channel_lines(OutputChannel::Stdout),
            vec!["hello", "two\n", "no newline", ""]
        );
    }

    #[test]
    fn channels_are_kept_apart() {
        let out = CaptureSink::new();
        let err = CaptureSink::new();
        let mut stdio = Stdio::new(Arc::new(out.clone()), Arc::new(err.clone()));

        stdio.stdout.blocking_write_and_flush(b"out\n").unwrap();
        stdio.stderr.blocking_write_and_flush(b"err\n").unwrap();

        assert_eq!(out.lines(), vec![(OutputChannel::Stdout, "out".to_string())]);
        assert_eq!(err.lines(), vec![(OutputChannel::Stderr, "err".to_string())]);
    }

    #[test]
    fn write_reports_full_length() {
        let mut output = LogOutput::new(OutputChannel::Stdout, Arc::new(CaptureSink::new()));
        assert_eq!(output.write(b"abc\n").unwrap(), 4);
        assert_eq!(output.write(b"").unwrap(), 0);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let sink = CaptureSink::new();
        let mut output = LogOutput::new(OutputChannel::Stderr, Arc::new(sink.clone()));
        output.write(&[b'a', 0xff, b'\n']).unwrap();
        assert_eq!(sink.channel_lines(OutputChannel::Stderr), vec!["a\u{fffd}"]);
    }

    #[test]
    fn stdin_reads_nothing() {
        let mut stdio = Stdio::default();
        assert_eq!(stdio.stdin.blocking_read(1024).unwrap(), Vec::<u8>::new());
        assert_eq!(stdio.stdin.read(1).unwrap(), Vec::<u8>::new());
    }
}
