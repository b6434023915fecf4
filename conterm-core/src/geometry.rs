//! Font metrics, grid computation and cell layout
//!
//! A surface of `width x height` pixels holds
//! `cols = floor(width / advance)` columns and
//! `rows = floor((height + spacing) / (line_height + spacing)) - padding_rows`
//! rows, both at least 1. The bottom padding keeps the last row from being
//! clipped by the surface edge.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Rows reserved at the bottom of the surface
pub const DEFAULT_PADDING_ROWS: u16 = 1;

/// Upper bound on line spacing
pub const MAX_SPACING: f32 = 1.0;

/// Absorbs float error when a surface was sized for an exact grid
const EPSILON: f64 = 1e-6;

/// Measurements of the monospace font used to lay out the grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontMetrics {
    /// Font size in pixels; also the line height
    pub size: f32,
    /// Horizontal advance of one cell
    pub advance_width: f32,
    /// Extra space between lines, at most [`MAX_SPACING`]
    pub spacing: f32,
}

impl FontMetrics {
    /// Validate metrics. Spacing above [`MAX_SPACING`] is clamped.
    pub fn new(size: f32, advance_width: f32, spacing: f32) -> Result<Self> {
        if !(size.is_finite() && size > 0.0) {
            return Err(Error::InvalidMetrics(format!("font size {} must be positive", size)));
        }
        if !(advance_width.is_finite() && advance_width > 0.0) {
            return Err(Error::InvalidMetrics(format!(
                "advance width {} must be positive",
                advance_width
            )));
        }
        if !spacing.is_finite() || size + spacing.min(MAX_SPACING) <= 0.0 {
            return Err(Error::InvalidMetrics(format!(
                "line spacing {} leaves no room for a line",
                spacing
            )));
        }
        Ok(Self {
            size,
            advance_width,
            spacing: spacing.min(MAX_SPACING),
        })
    }

    /// Metrics for a monospace font whose advance is `advance_ratio` of its size
    pub fn monospace(size: f32, advance_ratio: f32, spacing: f32) -> Result<Self> {
        Self::new(size, size * advance_ratio, spacing)
    }

    /// The same font at another size; the advance scales with it
    pub fn with_size(&self, size: f32) -> Result<Self> {
        Self::new(size, self.advance_width * size / self.size, self.spacing)
    }

    pub fn line_height(&self) -> f32 {
        self.size
    }

    /// Vertical distance between consecutive baselines
    pub fn line_pitch(&self) -> f32 {
        self.size + self.spacing
    }
}

/// Terminal grid dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSize {
    pub rows: u16,
    pub cols: u16,
}

impl GridSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Same grid with both dimensions raised to at least 1
    pub fn clamped(self) -> Self {
        Self {
            rows: self.rows.max(1),
            cols: self.cols.max(1),
        }
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self::new(24, 80)
    }
}

/// Converts between surface pixels and grid dimensions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCalculator {
    pub metrics: FontMetrics,
    pub padding_rows: u16,
}

impl GridCalculator {
    pub fn new(metrics: FontMetrics) -> Self {
        Self {
            metrics,
            padding_rows: DEFAULT_PADDING_ROWS,
        }
    }

    pub fn with_padding_rows(mut self, padding_rows: u16) -> Self {
        self.padding_rows = padding_rows;
        self
    }

    /// Grid that fits a surface of `width x height` pixels
    pub fn grid_for_surface(&self, width: u32, height: u32) -> GridSize {
        let m = &self.metrics;
        let cols = (f64::from(width) / f64::from(m.advance_width) + EPSILON).floor();
        let lines = ((f64::from(height) + f64::from(m.spacing)) / f64::from(m.line_pitch())
            + EPSILON)
            .floor();
        let rows = lines - f64::from(self.padding_rows);
        GridSize {
            rows: saturate(rows),
            cols: saturate(cols),
        }
    }

    /// Smallest surface for which [`grid_for_surface`](Self::grid_for_surface)
    /// yields `grid`
    pub fn surface_for_grid(&self, grid: GridSize) -> (u32, u32) {
        let m = &self.metrics;
        let grid = grid.clamped();
        let width = f64::from(m.advance_width) * f64::from(grid.cols);
        let lines = f64::from(grid.rows) + f64::from(self.padding_rows);
        let height = f64::from(m.line_pitch()) * lines - f64::from(m.spacing);
        (ceil_pixels(width), ceil_pixels(height))
    }

    /// Layout of the cell at `row`, `col`
    pub fn cell(&self, row: u16, col: u16) -> CellGeometry {
        let m = &self.metrics;
        let x = f32::from(col) * m.advance_width;
        let baseline = (f32::from(row) + 1.0) * m.size + f32::from(row) * m.spacing;
        let right = x + m.advance_width + m.spacing;
        CellGeometry {
            x,
            baseline,
            background: Rect {
                left: x,
                top: baseline - m.size + m.spacing * 2.0,
                right,
                bottom: baseline + m.spacing * 3.0,
            },
            underline: Rect {
                left: x,
                top: baseline + m.spacing * 2.0,
                right,
                bottom: baseline + m.spacing * 3.0,
            },
        }
    }
}

fn saturate(value: f64) -> u16 {
    value.clamp(1.0, f64::from(u16::MAX)) as u16
}

fn ceil_pixels(value: f64) -> u32 {
    value.ceil().clamp(1.0, f64::from(u32::MAX)) as u32
}

/// Axis-aligned rectangle in surface pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// Where a renderer draws one cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellGeometry {
    /// Left edge of the glyph
    pub x: f32,
    /// Text baseline
    pub baseline: f32,
    /// Area filled with the background color
    pub background: Rect,
    /// Underline bar, painted in the foreground color
    pub underline: Rect,
}
