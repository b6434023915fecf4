//! Conterm Core - session glue between a pty and a terminal engine
//!
//! This crate holds the platform-independent half of the terminal:
//! - Resize coordination: surface pixels and font metrics to a grid, applied
//!   to the pty before the engine
//! - Attribute resolution against named 18-entry palettes
//! - Key translation to the bytes a shell expects
//! - The session lifecycle and a single-threaded consumer loop
//!
//! The escape sequence engine, renderer and window system stay outside; they
//! meet this crate at [`TerminalEngine`], [`Frame`] and [`InputEvent`].

pub mod color;
mod console;
pub mod engine;
mod error;
mod event;
pub mod geometry;
pub mod input;
mod lifecycle;
mod resize;

pub use color::{AttributeResolver, CellAttributes, Color, Palette, PaletteName, Rgb};
pub use console::{Console, Frame, PumpStatus, RenderCell, DEFAULT_READS_PER_PUMP, READ_BUFFER_SIZE};
pub use engine::{Cell, GridSnapshot, PlainGrid, Scroll, TerminalEngine};
pub use error::{Error, Result};
pub use event::InputEvent;
pub use geometry::{CellGeometry, FontMetrics, GridCalculator, GridSize, Rect};
pub use input::{Key, KeyAction, Modifiers, Zoom};
pub use lifecycle::{DrainReason, Lifecycle, LifecycleState};
pub use resize::{ResizeCoordinator, ResizeOutcome, MAX_FONT_SIZE, MIN_FONT_SIZE};
