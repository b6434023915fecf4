//! Resize Coordinator
//!
//! Owns the font metrics and the current surface size. A new surface size or
//! font size is turned into a grid, applied to the pty first and to the
//! engine second, so the engine never lays out bytes at a width the child
//! has not been told about.

use conterm_pty::{Session, WindowSize};
use log::{debug, warn};

use crate::engine::TerminalEngine;
use crate::error::Result;
use crate::geometry::{FontMetrics, GridCalculator, GridSize};
use crate::input::Zoom;

/// Smallest font size reachable by zooming
pub const MIN_FONT_SIZE: f32 = 8.0;

/// Largest font size reachable by zooming
pub const MAX_FONT_SIZE: f32 = 32.0;

/// Result of a resize request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The grid was already at this size
    Unchanged,
    Applied(GridSize),
}

#[derive(Debug, Clone)]
pub struct ResizeCoordinator {
    calculator: GridCalculator,
    surface: (u32, u32),
    applied: Option<GridSize>,
}

impl ResizeCoordinator {
    pub fn new(calculator: GridCalculator) -> Self {
        Self {
            calculator,
            surface: (0, 0),
            applied: None,
        }
    }

    pub fn calculator(&self) -> &GridCalculator {
        &self.calculator
    }

    pub fn metrics(&self) -> &FontMetrics {
        &self.calculator.metrics
    }

    /// Last surface size seen, in pixels
    pub fn surface(&self) -> (u32, u32) {
        self.surface
    }

    /// Grid last applied to both the pty and the engine
    pub fn applied(&self) -> Option<GridSize> {
        self.applied
    }

    /// Grid for a surface, without applying it
    pub fn compute(&self, width: u32, height: u32) -> GridSize {
        self.calculator.grid_for_surface(width, height)
    }

    /// Surface that holds `grid` exactly
    pub fn surface_for(&self, grid: GridSize) -> (u32, u32) {
        self.calculator.surface_for_grid(grid)
    }

    /// Record a grid that both sides already share, such as the size a
    /// session was spawned with
    pub fn assume_applied(&mut self, grid: GridSize) {
        self.surface = self.calculator.surface_for_grid(grid);
        self.applied = Some(grid);
    }

    /// Fit the grid to a `width x height` surface.
    ///
    /// A pty failure leaves the engine and the recorded grid untouched and is
    /// returned to the caller; the session keeps its previous size.
    pub fn resize<E>(
        &mut self,
        session: &mut Session,
        engine: &mut E,
        width: u32,
        height: u32,
    ) -> Result<ResizeOutcome>
    where
        E: TerminalEngine + ?Sized,
    {
        self.surface = (width, height);
        let grid = self.compute(width, height);
        let engine_grid = GridSize::new(engine.rows(), engine.cols());
        if self.applied == Some(grid) && engine_grid == grid {
            return Ok(ResizeOutcome::Unchanged);
        }

        let size = WindowSize::with_pixels(grid.cols, grid.rows, pixels(width), pixels(height));
        if let Err(e) = session.resize(size) {
            warn!(
                "Keeping {}x{}: resize to {}x{} failed: {}",
                session.size().cols,
                session.size().rows,
                grid.cols,
                grid.rows,
                e
            );
            return Err(e.into());
        }

        if engine_grid != grid {
            engine.resize(grid.rows, grid.cols);
        }
        self.applied = Some(grid);
        debug!(
            "Resized to {}x{} for a {}x{} surface",
            grid.cols, grid.rows, width, height
        );
        Ok(ResizeOutcome::Applied(grid))
    }

    /// Change the font size by one point and refit the grid.
    ///
    /// Returns `false` when the size is already at the limit. If the pty
    /// rejects the new grid the previous font is restored.
    pub fn zoom<E>(&mut self, zoom: Zoom, session: &mut Session, engine: &mut E) -> Result<bool>
    where
        E: TerminalEngine + ?Sized,
    {
        let current = self.calculator.metrics;
        let size = match zoom {
            Zoom::In => current.size + 1.0,
            Zoom::Out => current.size - 1.0,
        };
        if !(MIN_FONT_SIZE..=MAX_FONT_SIZE).contains(&size) {
            debug!("Font size {} is at the zoom limit", current.size);
            return Ok(false);
        }

        self.calculator.metrics = current.with_size(size)?;
        let (width, height) = self.surface;
        if let Err(e) = self.resize(session, engine, width, height) {
            self.calculator.metrics = current;
            return Err(e);
        }
        debug!("Font size {} -> {}", current.size, size);
        Ok(true)
    }
}

fn pixels(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
