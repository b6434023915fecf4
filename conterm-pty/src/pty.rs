//! The pseudoterminal interface shared by every platform backend
//!
//! A [`Pty`] owns the master side of a virtual terminal and the child process
//! attached to its slave side. Reads never block: "no data yet" surfaces as
//! [`std::io::ErrorKind::WouldBlock`] and the end of the child's output as a
//! zero-length read.

use std::io;

use crate::error::Result;
use crate::size::WindowSize;

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Normal exit with a status code
    Exited(i32),
    /// Killed by a signal (POSIX only)
    Signaled(i32),
}

impl ChildExit {
    pub fn success(&self) -> bool {
        matches!(self, ChildExit::Exited(0))
    }
}

/// Master side of a pseudoterminal with its child process
pub trait Pty: Send {
    /// Read child output.
    ///
    /// `Ok(0)` means the child's output has ended. `WouldBlock` means nothing
    /// is available right now.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write to the child's input; may accept fewer bytes than offered or
    /// fail with `WouldBlock`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Apply a new size to the live device
    fn resize(&mut self, size: WindowSize) -> Result<()>;

    /// Size currently reported by the device
    fn window_size(&self) -> Result<WindowSize>;

    /// OS process id of the child, if one was spawned
    fn process_id(&self) -> Option<u32>;

    /// Reap the child without blocking
    fn try_wait(&mut self) -> Result<Option<ChildExit>>;

    /// Tear down the child and every OS resource. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}
