//! Single-threaded consumer loop
//!
//! A [`Console`] ties a session to a terminal engine. The host calls
//! [`pump`](Console::pump) once per frame to move child output into the
//! engine, forwards window events through
//! [`handle_event`](Console::handle_event), and asks for a
//! [`frame`](Console::frame) to paint.

use conterm_pty::{ReadOutcome, Session};
use log::{debug, error, trace, warn};
use serde::Serialize;

use crate::color::{AttributeResolver, Rgb};
use crate::engine::{Scroll, TerminalEngine};
use crate::error::{Error, Result};
use crate::event::InputEvent;
use crate::geometry::{GridSize, Rect};
use crate::input::{translate, KeyAction};
use crate::lifecycle::{DrainReason, Lifecycle, LifecycleState};
use crate::resize::ResizeCoordinator;

/// Read buffer size; one page
pub const READ_BUFFER_SIZE: usize = 4096;

/// Reads per pump before yielding back to the frame loop
pub const DEFAULT_READS_PER_PUMP: usize = 16;

/// What one pump accomplished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpStatus {
    /// Nothing to read
    Idle,
    /// Bytes fed to the engine
    Data(usize),
    /// The session has ended and been closed
    Ended(DrainReason),
    /// The session was already closed
    Closed,
}

/// One cell as a renderer paints it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderCell {
    pub row: u16,
    pub col: u16,
    pub ch: char,
    /// Glyph origin
    pub x: f32,
    pub baseline: f32,
    pub fg: Rgb,
    pub bg: Rgb,
    pub background: Rect,
    /// Underline bar, when the cell is underlined
    pub underline: Option<Rect>,
}

/// Everything a renderer needs for one pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub rows: u16,
    pub cols: u16,
    /// Surface clear color
    pub background: Rgb,
    pub cells: Vec<RenderCell>,
}

impl Frame {
    /// Cell at `row`, `col`, if it starts a glyph
    pub fn cell(&self, row: u16, col: u16) -> Option<&RenderCell> {
        self.cells.iter().find(|c| c.row == row && c.col == col)
    }
}

pub struct Console<E: TerminalEngine> {
    lifecycle: Lifecycle,
    engine: E,
    resizer: ResizeCoordinator,
    resolver: AttributeResolver,
    buf: Vec<u8>,
    reads_per_pump: usize,
}

impl<E: TerminalEngine> Console<E> {
    pub fn new(engine: E, resizer: ResizeCoordinator, resolver: AttributeResolver) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            engine,
            resizer,
            resolver,
            buf: vec![0; READ_BUFFER_SIZE],
            reads_per_pump: DEFAULT_READS_PER_PUMP,
        }
    }

    pub fn with_reads_per_pump(mut self, reads: usize) -> Self {
        self.reads_per_pump = reads.max(1);
        self
    }

    /// Begin consuming `session`. The engine is brought to the session's grid.
    pub fn start(&mut self, session: Session) -> Result<()> {
        let size = session.size();
        self.lifecycle.start(session)?;
        if (self.engine.rows(), self.engine.cols()) != (size.rows, size.cols) {
            self.engine.resize(size.rows, size.cols);
        }
        self.resizer.assume_applied(GridSize::new(size.rows, size.cols));
        debug!("Console started at {}x{}", size.cols, size.rows);
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn drain_reason(&self) -> Option<&DrainReason> {
        self.lifecycle.drain_reason()
    }

    pub fn session(&self) -> Result<&Session> {
        self.lifecycle.session()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn resizer(&self) -> &ResizeCoordinator {
        &self.resizer
    }

    pub fn resolver(&self) -> &AttributeResolver {
        &self.resolver
    }

    /// Flush queued input and feed available output to the engine.
    ///
    /// Never blocks. End-of-stream and channel failures drain and close the
    /// session and are reported as [`PumpStatus::Ended`].
    pub fn pump(&mut self) -> Result<PumpStatus> {
        match self.lifecycle.state() {
            LifecycleState::Running => {}
            LifecycleState::Draining => {
                self.finish()?;
                return Ok(PumpStatus::Closed);
            }
            LifecycleState::Closed => return Ok(PumpStatus::Closed),
            state => return Err(Error::InvalidState(state)),
        }

        let session = self.lifecycle.session_mut()?;
        if let Err(e) = session.flush() {
            return self.channel_failed(e);
        }

        let mut total = 0;
        for _ in 0..self.reads_per_pump {
            let session = self.lifecycle.session_mut()?;
            match session.read(&mut self.buf) {
                Ok(ReadOutcome::Data(n)) => {
                    trace!("Read {} bytes", n);
                    self.engine.feed(&self.buf[..n]);
                    total += n;
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::EndOfStream) => {
                    debug!("Child output ended after {} bytes this frame", total);
                    self.lifecycle.begin_drain(DrainReason::EndOfStream);
                    self.finish()?;
                    return Ok(PumpStatus::Ended(DrainReason::EndOfStream));
                }
                Err(e) => return self.channel_failed(e),
            }
        }

        Ok(if total == 0 {
            PumpStatus::Idle
        } else {
            PumpStatus::Data(total)
        })
    }

    /// Apply one event from the window layer
    pub fn handle_event(&mut self, event: InputEvent) -> Result<()> {
        match event {
            InputEvent::Key { key, mods } => {
                let action = match self.engine.inject_key(&key, mods) {
                    Some(bytes) => KeyAction::Write(bytes),
                    None => translate(&key, mods),
                };
                self.apply_key(action)
            }
            InputEvent::Resized { width, height } => {
                let session = self.lifecycle.session_mut()?;
                let result = self.resizer.resize(session, &mut self.engine, width, height);
                tolerate(result.map(|_| ()))
            }
            InputEvent::Zoom(zoom) => {
                let session = self.lifecycle.session_mut()?;
                let result = self.resizer.zoom(zoom, session, &mut self.engine);
                tolerate(result.map(|_| ()))
            }
            InputEvent::Quit => self.close(),
        }
    }

    fn apply_key(&mut self, action: KeyAction) -> Result<()> {
        match action {
            KeyAction::Write(bytes) => {
                let session = self.lifecycle.session_mut()?;
                if let Err(e) = session.send(&bytes) {
                    self.channel_failed(e)?;
                    return Ok(());
                }
                self.engine.scroll(Scroll::Reset);
            }
            KeyAction::Scroll(scroll) => self.engine.scroll(scroll),
            KeyAction::Zoom(zoom) => {
                let session = self.lifecycle.session_mut()?;
                let result = self.resizer.zoom(zoom, session, &mut self.engine);
                tolerate(result.map(|_| ()))?;
            }
            KeyAction::Ignore => {}
        }
        Ok(())
    }

    /// Cells of the current view with resolved colors and positions
    pub fn frame(&self) -> Frame {
        let rows = self.engine.rows();
        let cols = self.engine.cols();
        let calculator = self.resizer.calculator();
        let mut cells = Vec::with_capacity(usize::from(rows) * usize::from(cols));
        for row in 0..rows {
            for col in 0..cols {
                let Some(cell) = self.engine.cell(row, col) else {
                    continue;
                };
                if cell.is_continuation() {
                    continue;
                }
                let (fg, bg) = self.resolver.resolve(&cell.attrs);
                let geometry = calculator.cell(row, col);
                cells.push(RenderCell {
                    row,
                    col,
                    ch: cell.ch,
                    x: geometry.x,
                    baseline: geometry.baseline,
                    fg,
                    bg,
                    background: geometry.background,
                    underline: cell.attrs.underline.then_some(geometry.underline),
                });
            }
        }
        Frame {
            rows,
            cols,
            background: self.resolver.default_background(),
            cells,
        }
    }

    /// Quit: drain and close the session. A second call is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.lifecycle.begin_drain(DrainReason::UserQuit);
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        self.lifecycle.close()
    }

    fn channel_failed(&mut self, e: conterm_pty::Error) -> Result<PumpStatus> {
        error!("Channel failed: {}", e);
        let reason = DrainReason::ChannelError(e.to_string());
        self.lifecycle.begin_drain(reason.clone());
        if let Err(close_err) = self.finish() {
            warn!("Error closing session after channel failure: {}", close_err);
        }
        Ok(PumpStatus::Ended(reason))
    }
}

/// Swallow recoverable errors after they have been logged by the callee
fn tolerate(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_recoverable() => {
            debug!("Continuing after: {}", e);
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PlainGrid;
    use crate::geometry::{FontMetrics, GridCalculator};
    use crate::input::{Key, Modifiers};
    use conterm_pty::scripted::{ScriptHandle, ScriptedPty};
    use conterm_pty::WindowSize;
    use std::io;

    fn console(cols: u16, rows: u16) -> (Console<PlainGrid>, ScriptHandle) {
        let metrics = FontMetrics::new(12.0, 7.0, 1.0).unwrap();
        let mut console = Console::new(
            PlainGrid::new(24, 80),
            ResizeCoordinator::new(GridCalculator::new(metrics)),
            AttributeResolver::default(),
        );
        let (pty, handle) = ScriptedPty::echo(WindowSize::new(cols, rows));
        console
            .start(Session::from_pty(Box::new(pty), WindowSize::new(cols, rows)))
            .unwrap();
        (console, handle)
    }

    #[test]
    fn test_start_matches_engine_to_session() {
        let (console, _handle) = console(100, 30);
        assert_eq!((console.engine().rows(), console.engine().cols()), (30, 100));
        assert_eq!(console.state(), LifecycleState::Running);
    }

    #[test]
    fn test_typed_keys_echo_into_grid() {
        let (mut console, handle) = console(80, 24);
        for event in InputEvent::text("hi") {
            console.handle_event(event).unwrap();
        }
        assert_eq!(handle.written(), b"hi");
        assert_eq!(console.pump().unwrap(), PumpStatus::Data(2));
        assert_eq!(console.engine().row_text(0).trim_end(), "hi");
        assert_eq!(console.pump().unwrap(), PumpStatus::Idle);
    }

    #[test]
    fn test_pump_limits_reads() {
        let (console, handle) = console(80, 24);
        let mut console = console.with_reads_per_pump(1);
        handle.push_output(&vec![b'x'; READ_BUFFER_SIZE + 10]);
        assert_eq!(console.pump().unwrap(), PumpStatus::Data(READ_BUFFER_SIZE));
        assert_eq!(console.pump().unwrap(), PumpStatus::Data(10));
    }

    #[test]
    fn test_end_of_stream_closes() {
        let (mut console, handle) = console(80, 24);
        handle.push_output(b"bye");
        handle.finish();
        assert_eq!(
            console.pump().unwrap(),
            PumpStatus::Ended(DrainReason::EndOfStream)
        );
        assert_eq!(console.state(), LifecycleState::Closed);
        assert!(handle.is_closed());
        assert_eq!(console.engine().row_text(0).trim_end(), "bye");
        assert_eq!(console.pump().unwrap(), PumpStatus::Closed);
        console.close().unwrap();
    }

    #[test]
    fn test_channel_error_drains() {
        let (mut console, handle) = console(80, 24);
        handle.fail_next_read(io::ErrorKind::Other);
        match console.pump().unwrap() {
            PumpStatus::Ended(DrainReason::ChannelError(_)) => {}
            other => panic!("expected a channel error, got {:?}", other),
        }
        assert_eq!(console.state(), LifecycleState::Closed);
        assert_eq!(handle.close_calls(), 1);
    }

    #[test]
    fn test_scroll_keys_bypass_channel() {
        let (mut console, handle) = console(10, 2);
        handle.push_output(b"1\r\n2\r\n3\r\n4");
        console.pump().unwrap();

        console
            .handle_event(InputEvent::Key {
                key: Key::Up,
                mods: Modifiers::shift(),
            })
            .unwrap();
        assert!(handle.written().is_empty());
        assert_eq!(console.engine().view_offset(), 1);

        // Typing returns to the live screen
        console.handle_event(InputEvent::key(Key::Char('x'))).unwrap();
        assert_eq!(console.engine().view_offset(), 0);
    }

    #[test]
    fn test_resize_event_reaches_both_sides() {
        let (mut console, handle) = console(80, 24);
        let (w, h) = console.resizer().surface_for(GridSize::new(30, 100));
        console
            .handle_event(InputEvent::Resized {
                width: w,
                height: h,
            })
            .unwrap();
        assert_eq!((handle.size().cols, handle.size().rows), (100, 30));
        let frame = console.frame();
        assert_eq!((frame.rows, frame.cols), (30, 100));
    }

    #[test]
    fn test_failed_resize_is_tolerated() {
        let (mut console, handle) = console(80, 24);
        handle.fail_resizes(Some(io::ErrorKind::Other));
        console
            .handle_event(InputEvent::Resized {
                width: 800,
                height: 600,
            })
            .unwrap();
        assert_eq!(console.state(), LifecycleState::Running);
        assert_eq!((console.engine().rows(), console.engine().cols()), (24, 80));
    }

    #[test]
    fn test_frame_resolves_colors() {
        let (mut console, handle) = console(80, 24);
        handle.push_output(b"ok");
        console.pump().unwrap();
        let frame = console.frame();
        assert_eq!(frame.cells.len(), 80 * 24);
        let cell = frame.cell(0, 1).unwrap();
        assert_eq!(cell.ch, 'k');
        assert_eq!(cell.x, 7.0);
        assert_eq!(cell.bg, frame.background);
        assert!(cell.underline.is_none());
    }

    #[test]
    fn test_quit_then_events_are_rejected() {
        let (mut console, handle) = console(80, 24);
        console.handle_event(InputEvent::Quit).unwrap();
        assert_eq!(console.drain_reason(), Some(&DrainReason::UserQuit));
        assert!(handle.is_closed());
        assert!(matches!(
            console.handle_event(InputEvent::key(Key::Enter)),
            Err(Error::InvalidState(LifecycleState::Closed))
        ));
        console.handle_event(InputEvent::Quit).unwrap();
    }
}
