//! Scripted pseudoterminal for tests and headless runs
//!
//! [`ScriptedPty`] behaves like a live pty whose output is fed by a
//! [`ScriptHandle`]. The handle also records everything the session did to
//! the device (writes, resizes, closes) and can inject failures.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::pty::{ChildExit, Pty};
use crate::size::WindowSize;

#[derive(Debug, Default)]
struct ScriptState {
    output: VecDeque<u8>,
    finished: bool,
    echo: bool,
    fail_next_read: Option<io::ErrorKind>,
    resize_failure: Option<io::ErrorKind>,
    write_limit: Option<usize>,
    block_writes: bool,
    written: Vec<u8>,
    resize_calls: Vec<WindowSize>,
    size: WindowSize,
    exit: Option<ChildExit>,
    closed: bool,
    close_calls: usize,
}

fn lock(state: &Mutex<ScriptState>) -> MutexGuard<'_, ScriptState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A pty driven by a script instead of a child process
pub struct ScriptedPty {
    state: Arc<Mutex<ScriptState>>,
}

/// Controls and observes a [`ScriptedPty`]
#[derive(Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedPty {
    /// A silent device of the given size
    pub fn new(size: WindowSize) -> (Self, ScriptHandle) {
        let state = Arc::new(Mutex::new(ScriptState {
            size,
            ..Default::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            ScriptHandle { state },
        )
    }

    /// A device that echoes every accepted write back as output, like `cat`
    pub fn echo(size: WindowSize) -> (Self, ScriptHandle) {
        let (pty, handle) = Self::new(size);
        lock(&handle.state).echo = true;
        (pty, handle)
    }
}

impl ScriptHandle {
    /// Queue bytes for the session to read
    pub fn push_output(&self, bytes: &[u8]) {
        lock(&self.state).output.extend(bytes);
    }

    /// End the output stream once queued bytes are drained
    pub fn finish(&self) {
        lock(&self.state).finished = true;
    }

    /// Simulate the child exiting with `exit`; output ends after queued bytes
    pub fn exit(&self, exit: ChildExit) {
        let mut state = lock(&self.state);
        state.exit = Some(exit);
        state.finished = true;
    }

    /// Make the next read fail with `kind`
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        lock(&self.state).fail_next_read = Some(kind);
    }

    /// Make every resize fail with `kind`, or succeed again with `None`
    pub fn fail_resizes(&self, kind: Option<io::ErrorKind>) {
        lock(&self.state).resize_failure = kind;
    }

    /// Accept at most `limit` bytes per write
    pub fn limit_writes(&self, limit: Option<usize>) {
        lock(&self.state).write_limit = limit;
    }

    /// Refuse writes with `WouldBlock` while set
    pub fn block_writes(&self, block: bool) {
        lock(&self.state).block_writes = block;
    }

    /// Everything written to the device so far
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    /// Every size passed to resize, including rejected ones
    pub fn resize_calls(&self) -> Vec<WindowSize> {
        lock(&self.state).resize_calls.clone()
    }

    /// Size the device currently reports
    pub fn size(&self) -> WindowSize {
        lock(&self.state).size
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// How many times close reached the device
    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }
}

impl Pty for ScriptedPty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.closed {
            return Ok(0);
        }
        if let Some(kind) = state.fail_next_read.take() {
            return Err(kind.into());
        }
        if state.output.is_empty() {
            return if state.finished {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(state.output.len());
        for (dst, src) in buf.iter_mut().zip(state.output.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.closed || state.finished {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if state.block_writes {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.written.extend_from_slice(&buf[..n]);
        if state.echo {
            state.output.extend(&buf[..n]);
        }
        Ok(n)
    }

    fn resize(&mut self, size: WindowSize) -> Result<()> {
        let mut state = lock(&self.state);
        state.resize_calls.push(size);
        if let Some(kind) = state.resize_failure {
            return Err(Error::Resize {
                cols: size.cols,
                rows: size.rows,
                source: kind.into(),
            });
        }
        state.size = size;
        Ok(())
    }

    fn window_size(&self) -> Result<WindowSize> {
        Ok(lock(&self.state).size)
    }

    fn process_id(&self) -> Option<u32> {
        None
    }

    fn try_wait(&mut self) -> Result<Option<ChildExit>> {
        Ok(lock(&self.state).exit)
    }

    fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.close_calls += 1;
        state.closed = true;
        state.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_would_block_then_data_then_eof() {
        let (mut pty, handle) = ScriptedPty::new(WindowSize::default());
        let mut buf = [0u8; 16];

        let err = pty.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        handle.push_output(b"hi");
        assert_eq!(pty.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");

        handle.finish();
        assert_eq!(pty.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_echo_and_partial_writes() {
        let (mut pty, handle) = ScriptedPty::echo(WindowSize::default());
        handle.limit_writes(Some(2));
        assert_eq!(pty.write(b"hello").unwrap(), 2);

        let mut buf = [0u8; 16];
        assert_eq!(pty.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"he");
        assert_eq!(handle.written(), b"he");
    }

    #[test]
    fn test_resize_failure_keeps_size() {
        let (mut pty, handle) = ScriptedPty::new(WindowSize::new(80, 24));
        handle.fail_resizes(Some(io::ErrorKind::InvalidInput));
        let err = pty.resize(WindowSize::new(100, 30)).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(pty.window_size().unwrap(), WindowSize::new(80, 24));
        assert_eq!(handle.resize_calls().len(), 1);
    }

    #[test]
    fn test_injected_read_failure_happens_once() {
        let (mut pty, handle) = ScriptedPty::new(WindowSize::default());
        handle.fail_next_read(io::ErrorKind::ConnectionReset);
        let mut buf = [0u8; 4];
        assert_eq!(
            pty.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );
        assert_eq!(
            pty.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }
}
