//! Input and output streams.
//!
//! A stream wraps exactly one handler. It starts open and closes once, on
//! [`close`](OutputStream::close), on drop, or when its handler fails; after
//! that every operation returns [`StreamError::Closed`].

mod stdio;

pub use stdio::{
    CaptureSink, ConsoleSink, EmptyInput, LogOutput, LogSink, OutputChannel, Stdio, TracingSink,
};

use p2shim_bridge::{Bridge, Pollable};
use p2shim_core::{StreamError, StreamId};

/// Bytes a caller may write without blocking. In-memory sinks never apply
/// backpressure.
pub const WRITE_BUDGET: u64 = 4096;

/// Source of bytes for an [`InputStream`].
pub trait InputHandler: Send {
    fn blocking_read(&mut self, len: u64) -> Result<Vec<u8>, StreamError>;

    /// Called once when the stream closes.
    fn dispose(&mut self) {}
}

/// Destination of bytes for an [`OutputStream`].
pub trait OutputHandler: Send {
    /// Consume `contents`, returning how many bytes were taken.
    fn write(&mut self, contents: &[u8]) -> Result<u64, StreamError>;

    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    /// Called once when the stream closes.
    fn dispose(&mut self) {}
}

pub struct InputStream {
    id: StreamId,
    handler: Option<Box<dyn InputHandler>>,
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl InputStream {
    pub fn new(handler: impl InputHandler + 'static) -> Self {
        Self {
            id: StreamId::next(),
            handler: Some(Box::new(handler)),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.handler.is_none()
    }

    /// Read up to `len` bytes. In-memory sources are always ready, so this
    /// is the same as [`blocking_read`](Self::blocking_read).
    pub fn read(&mut self, len: u64) -> Result<Vec<u8>, StreamError> {
        self.blocking_read(len)
    }

    pub fn blocking_read(&mut self, len: u64) -> Result<Vec<u8>, StreamError> {
        let handler = self.handler.as_mut().ok_or(StreamError::Closed)?;
        let result = handler.blocking_read(len);
        if result.is_err() {
            self.close();
        }
        result
    }

    pub fn subscribe(&self, bridge: &Bridge) -> Pollable {
        bridge.subscribe_stream(self.id)
    }

    /// Swap the handler of an open stream. The old handler is disposed.
    pub fn set_handler(&mut self, handler: impl InputHandler + 'static) -> Result<(), StreamError> {
        let current = self.handler.as_mut().ok_or(StreamError::Closed)?;
        current.dispose();
        *current = Box::new(handler);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            handler.dispose();
        }
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct OutputStream {
    id: StreamId,
    handler: Option<Box<dyn OutputHandler>>,
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl OutputStream {
    pub fn new(handler: impl OutputHandler + 'static) -> Self {
        Self {
            id: StreamId::next(),
            handler: Some(Box::new(handler)),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.handler.is_none()
    }

    /// How many bytes the next `write` may carry.
    pub fn check_write(&self) -> Result<u64, StreamError> {
        self.handler
            .as_ref()
            .map(|_| WRITE_BUDGET)
            .ok_or(StreamError::Closed)
    }

    pub fn write(&mut self, contents: &[u8]) -> Result<(), StreamError> {
        self.with_handler(|handler| handler.write(contents).map(|_| ()))
    }

    pub fn blocking_write_and_flush(&mut self, contents: &[u8]) -> Result<(), StreamError> {
        self.write(contents)?;
        self.blocking_flush()
    }

    pub fn flush(&mut self) -> Result<(), StreamError> {
        self.with_handler(|handler| handler.flush())
    }

    pub fn blocking_flush(&mut self) -> Result<(), StreamError> {
        self.flush()
    }

    pub fn subscribe(&self, bridge: &Bridge) -> Pollable {
        bridge.subscribe_stream(self.id)
    }

    /// Swap the handler of an open stream. The old handler is disposed.
    pub fn set_handler(
        &mut self,
        handler: impl OutputHandler + 'static,
    ) -> Result<(), StreamError> {
        let current = self.handler.as_mut().ok_or(StreamError::Closed)?;
        current.dispose();
        *current = Box::new(handler);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            handler.dispose();
        }
    }

    /// Run `f` against the handler. A failure closes the stream.
    fn with_handler<T>(
        &mut self,
        f: impl FnOnce(&mut dyn OutputHandler) -> Result<T, StreamError>,
    ) -> Result<T, StreamError> {
        let handler = self.handler.as_mut().ok_or(StreamError::Closed)?;
        let result = f(handler.as_mut());
        if result.is_err() {
            self.close();
        }
        result
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2shim_bridge::{BridgeConfig, SharedMemory, WaitOutcome};
    use p2shim_core::IoError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Failing;

    impl OutputHandler for Failing {
        fn write(&mut self, _contents: &[u8]) -> Result<u64, StreamError> {
            Err(StreamError::LastOperationFailed(IoError::new("sink gone")))
        }
    }

    struct CountDisposals(Arc<AtomicUsize>);

    impl OutputHandler for CountDisposals {
        fn write(&mut self, contents: &[u8]) -> Result<u64, StreamError> {
            Ok(contents.len() as u64)
        }

        fn dispose(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn closed_stream_rejects_everything() {
        let mut stream = OutputStream::new(CountDisposals(Arc::default()));
        stream.close();
        assert!(stream.is_closed());
        assert_eq!(stream.write(b"x"), Err(StreamError::Closed));
        assert_eq!(stream.flush(), Err(StreamError::Closed));
        assert_eq!(stream.check_write(), Err(StreamError::Closed));
        assert_eq!(
            stream.set_handler(CountDisposals(Arc::default())),
            Err(StreamError::Closed)
        );
    }

    #[test]
    fn handler_failure_closes_the_stream() {
        let mut stream = OutputStream::new(Failing);
        assert!(matches!(
            stream.write(b"x"),
            Err(StreamError::LastOperationFailed(_))
        ));
        assert_eq!(stream.write(b"x"), Err(StreamError::Closed));
    }

    #[test]
    fn dispose_runs_once() {
        let disposed = Arc::new(AtomicUsize::new(0));
        {
            let mut stream = OutputStream::new(CountDisposals(disposed.clone()));
            stream.write(b"hello").unwrap();
            stream.close();
            stream.close();
        }
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_handler_disposes_previous() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut stream = OutputStream::new(CountDisposals(first.clone()));
        stream.set_handler(CountDisposals(second.clone())).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        drop(stream);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stream_ids_are_unique() {
        let a = OutputStream::new(CountDisposals(Arc::default()));
        let b = InputStream::new(EmptyInput);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn stream_pollables_are_always_ready() {
        let bridge = Bridge::detached(SharedMemory::new(1), BridgeConfig::default());
        let stream = InputStream::new(EmptyInput);
        let pollable = stream.subscribe(&bridge);
        assert!(pollable.ready());
        assert_eq!(pollable.block(), WaitOutcome::AlreadyReady);
    }

    #[test]
    fn check_write_reports_budget() {
        let stream = OutputStream::new(CountDisposals(Arc::default()));
        assert_eq!(stream.check_write(), Ok(WRITE_BUDGET));
    }
}
