//! Conterm PTY - pseudoterminal sessions
//!
//! This crate creates a child shell attached to a virtual terminal device and
//! exposes its input/output as a non-blocking byte channel.
//!
//! Key features:
//! - One [`Pty`] interface with a POSIX implementation (fork + exec on a pty
//!   pair) and a Windows implementation (ConPTY driven through anonymous pipes)
//! - A transport adapter ([`bridge`]) that turns blocking pipes into a pollable
//!   loopback socket using one thread per direction
//! - Window size management (TIOCSWINSZ / ResizePseudoConsole)
//! - Orderly, idempotent teardown
//!
//! Reference: https://www.man7.org/linux/man-pages/man3/openpty.3.html
//! Reference: https://learn.microsoft.com/en-us/windows/console/creating-a-pseudoconsole-session

pub mod bridge;
mod command;
#[cfg(windows)]
mod conpty;
mod error;
#[cfg(unix)]
mod posix;
mod pty;
pub mod scripted;
mod session;
mod size;

pub use command::{CommandSpec, DEFAULT_TERM};
pub use error::{Error, Result};
pub use pty::{ChildExit, Pty};
pub use session::{ReadOutcome, Session};
pub use size::WindowSize;

/// Spawn `command` on the platform's native pseudoterminal.
pub fn spawn_native(command: &CommandSpec, size: WindowSize) -> Result<Box<dyn Pty>> {
    #[cfg(unix)]
    {
        posix::UnixPty::spawn(command, size).map(|pty| Box::new(pty) as Box<dyn Pty>)
    }
    #[cfg(windows)]
    {
        conpty::ConPty::spawn(command, size).map(|pty| Box::new(pty) as Box<dyn Pty>)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (command, size);
        Err(Error::UnsupportedPlatform(
            "no pseudoterminal implementation for this target".to_string(),
        ))
    }
}
