//! Session handle: one child process and its channel
//!
//! The session owns the platform pty exclusively; nothing else reads, writes
//! or closes it. Reads never block, so the owner can poll it from a frame
//! loop. Writes that the channel cannot take right away are queued and
//! flushed on later calls.

use std::collections::VecDeque;
use std::io;

use crate::command::CommandSpec;
use crate::error::{Error, Result};
use crate::pty::{ChildExit, Pty};
use crate::size::WindowSize;

/// Result of one non-blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer
    Data(usize),
    /// Nothing available right now
    WouldBlock,
    /// The child's output has ended; the session should drain
    EndOfStream,
}

/// A live pseudoterminal session
pub struct Session {
    pty: Box<dyn Pty>,
    size: WindowSize,
    pending: VecDeque<u8>,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.pty.process_id())
            .field("size", &self.size)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Session {
    /// Start the default shell on a pty of the given size
    pub fn create(rows: u16, cols: u16, pixel_width: u16, pixel_height: u16) -> Result<Self> {
        let size = WindowSize::with_pixels(cols, rows, pixel_width, pixel_height);
        Self::spawn(&CommandSpec::default_shell(), size)
    }

    /// Start `command` on the platform's native pty
    pub fn spawn(command: &CommandSpec, size: WindowSize) -> Result<Self> {
        let size = size.clamped();
        let pty = crate::spawn_native(command, size)?;
        log::info!(
            "session started: {} ({}x{}, pid {:?})",
            command.display_program(),
            size.cols,
            size.rows,
            pty.process_id()
        );
        Ok(Self::from_pty(pty, size))
    }

    /// Wrap an already created pty
    pub fn from_pty(pty: Box<dyn Pty>, size: WindowSize) -> Self {
        Self {
            pty,
            size: size.clamped(),
            pending: VecDeque::new(),
            closed: false,
        }
    }

    /// Read child output without blocking
    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if self.closed {
            return Ok(ReadOutcome::EndOfStream);
        }
        match self.pty.read(buf) {
            Ok(0) => Ok(ReadOutcome::EndOfStream),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::WouldBlock)
            }
            Err(e) => Err(Error::channel("read", e)),
        }
    }

    /// Write as much of `data` as the channel takes right now.
    ///
    /// Returns the number of bytes accepted; 0 if the channel would block.
    /// Bytes queued by [`Session::send`] go first, so this only writes
    /// directly when nothing is pending.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::channel("write", io::ErrorKind::NotConnected.into()));
        }
        self.flush()?;
        if !self.pending.is_empty() {
            return Ok(0);
        }
        write_to(self.pty.as_mut(), data)
    }

    /// Queue all of `data` for the child and write as much as possible now
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::channel("write", io::ErrorKind::NotConnected.into()));
        }
        self.pending.extend(data);
        self.flush()
    }

    /// Push queued bytes to the channel until it would block
    pub fn flush(&mut self) -> Result<()> {
        while !self.pending.is_empty() && !self.closed {
            let n = write_to(self.pty.as_mut(), self.pending.as_slices().0)?;
            if n == 0 {
                break;
            }
            self.pending.drain(..n);
        }
        Ok(())
    }

    /// Bytes queued but not yet accepted by the channel
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Apply a new size to the live pty.
    ///
    /// Returns `Ok(false)` if the grid is unchanged. On failure the session
    /// keeps its previous size.
    pub fn resize(&mut self, size: WindowSize) -> Result<bool> {
        let size = size.clamped();
        if self.closed {
            return Err(Error::channel("resize", io::ErrorKind::NotConnected.into()));
        }
        if size.same_grid(&self.size) {
            self.size = size;
            return Ok(false);
        }
        self.pty.resize(size)?;
        log::debug!(
            "session resized {}x{} -> {}x{}",
            self.size.cols,
            self.size.rows,
            size.cols,
            size.rows
        );
        self.size = size;
        Ok(true)
    }

    /// Size last applied to the pty
    pub fn size(&self) -> WindowSize {
        self.size
    }

    /// Size as reported by the device itself
    pub fn window_size(&self) -> Result<WindowSize> {
        self.pty.window_size()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.pty.process_id()
    }

    /// Reap the child without blocking
    pub fn try_wait(&mut self) -> Result<Option<ChildExit>> {
        self.pty.try_wait()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the child and every OS resource. A second call is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.pending.is_empty() {
            log::debug!("dropping {} unsent bytes on close", self.pending.len());
            self.pending.clear();
        }
        self.pty.close()
    }
}

fn write_to(pty: &mut dyn Pty, data: &[u8]) -> Result<usize> {
    loop {
        match pty.write(data) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(e) => return Err(Error::channel("write", e)),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("error closing session: {}", e);
        }
    }
}
