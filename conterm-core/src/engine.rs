//! Terminal-state engine boundary
//!
//! Escape sequence interpretation belongs to an external engine. The session
//! glue only needs to feed it bytes, resize it, scroll its view and read back
//! cells, which is what [`TerminalEngine`] captures.
//!
//! [`PlainGrid`] is a minimal engine for headless runs and tests: it lays out
//! printable text with line wrapping, honours CR, LF, BS and TAB, keeps a
//! scrollback, and skips escape sequences without interpreting them.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use crate::color::CellAttributes;
use crate::input::{Key, Modifiers};

/// Default scrollback capacity in lines
pub const DEFAULT_SCROLLBACK_LINES: usize = 10240;

const TAB_WIDTH: u16 = 8;

/// Scrollback navigation commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scroll {
    LineUp,
    LineDown,
    PageUp,
    PageDown,
    /// Back to the live screen
    Reset,
}

/// One grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub ch: char,
    /// Display width: 1, 2 for wide characters, 0 for the second half of a
    /// wide character
    pub width: u8,
    pub attrs: CellAttributes,
}

impl Cell {
    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            width: 1,
            attrs: CellAttributes::default(),
        }
    }
}

/// A terminal-state engine driven by the consumer loop
pub trait TerminalEngine {
    /// Consume child output
    fn feed(&mut self, bytes: &[u8]);

    /// Reset the grid to `rows x cols`
    fn resize(&mut self, rows: u16, cols: u16);

    fn rows(&self) -> u16;

    fn cols(&self) -> u16;

    /// Move the scrollback view
    fn scroll(&mut self, scroll: Scroll);

    /// Cell at `row`, `col` of the current view
    fn cell(&self, row: u16, col: u16) -> Option<Cell>;

    /// Attributes of blank cells
    fn default_attributes(&self) -> CellAttributes {
        CellAttributes::default()
    }

    /// Give the engine first refusal on a key press.
    ///
    /// Engines that track terminal modes (application cursor keys and the
    /// like) return the bytes to send; `None` falls back to the standard
    /// translation.
    fn inject_key(&mut self, _key: &Key, _mods: Modifiers) -> Option<Vec<u8>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Ground,
    Escape,
    Csi,
    Osc,
    OscEscape,
}

type Line = Vec<Cell>;

/// Plain text grid with scrollback
#[derive(Debug, Clone)]
pub struct PlainGrid {
    rows: u16,
    cols: u16,
    screen: VecDeque<Line>,
    scrollback: VecDeque<Line>,
    scrollback_limit: usize,
    view_offset: usize,
    cursor_row: u16,
    /// May equal `cols`, meaning the next printable character wraps
    cursor_col: u16,
    state: ParseState,
    utf8: Vec<u8>,
    utf8_len: usize,
}

impl PlainGrid {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self::with_scrollback(rows, cols, DEFAULT_SCROLLBACK_LINES)
    }

    pub fn with_scrollback(rows: u16, cols: u16, scrollback_limit: usize) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self {
            rows,
            cols,
            screen: (0..rows).map(|_| blank_line(cols)).collect(),
            scrollback: VecDeque::new(),
            scrollback_limit,
            view_offset: 0,
            cursor_row: 0,
            cursor_col: 0,
            state: ParseState::Ground,
            utf8: Vec::with_capacity(4),
            utf8_len: 0,
        }
    }

    /// Cursor position, column clamped to the grid
    pub fn cursor(&self) -> (u16, u16) {
        (self.cursor_row, self.cursor_col.min(self.cols - 1))
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    /// Lines the view is scrolled back by; 0 is the live screen
    pub fn view_offset(&self) -> usize {
        self.view_offset
    }

    /// Text of a visible row, including trailing blanks
    pub fn row_text(&self, row: u16) -> String {
        self.visible_line(row)
            .map(|line| {
                line.iter()
                    .filter(|cell| !cell.is_continuation())
                    .map(|cell| cell.ch)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serializable picture of the current view
    pub fn snapshot(&self) -> GridSnapshot {
        let (cursor_row, cursor_col) = self.cursor();
        GridSnapshot {
            rows: self.rows,
            cols: self.cols,
            cursor_row,
            cursor_col,
            scrollback: self.scrollback.len(),
            view_offset: self.view_offset,
            lines: (0..self.rows)
                .map(|row| self.row_text(row).trim_end().to_string())
                .collect(),
        }
    }

    fn visible_line(&self, row: u16) -> Option<&Line> {
        if row >= self.rows {
            return None;
        }
        let top = self.scrollback.len() - self.view_offset;
        let index = top + usize::from(row);
        if index < self.scrollback.len() {
            self.scrollback.get(index)
        } else {
            self.screen.get(index - self.scrollback.len())
        }
    }

    fn print(&mut self, c: char) {
        let width = match c.width() {
            Some(w) if w > 0 => w.min(2) as u16,
            _ => return,
        };
        // A wide character never fits a one-column grid
        if width > self.cols {
            return;
        }
        if self.cursor_col + width > self.cols {
            self.cursor_col = 0;
            self.line_feed();
        }

        let row = usize::from(self.cursor_row);
        let col = usize::from(self.cursor_col);
        let line = &mut self.screen[row];
        line[col] = Cell {
            ch: c,
            width: width as u8,
            attrs: CellAttributes::default(),
        };
        if width == 2 {
            line[col + 1] = Cell {
                ch: ' ',
                width: 0,
                attrs: CellAttributes::default(),
            };
        }
        self.cursor_col += width;
    }

    fn line_feed(&mut self) {
        if self.cursor_row + 1 < self.rows {
            self.cursor_row += 1;
            return;
        }
        if let Some(top) = self.screen.pop_front() {
            self.push_scrollback(top);
        }
        self.screen.push_back(blank_line(self.cols));
    }

    fn push_scrollback(&mut self, line: Line) {
        if self.scrollback_limit == 0 {
            return;
        }
        if self.scrollback.len() == self.scrollback_limit {
            self.scrollback.pop_front();
        } else if self.view_offset > 0 {
            // Keep the scrolled-back view anchored on the same text
            self.view_offset += 1;
        }
        self.scrollback.push_back(line);
        self.view_offset = self.view_offset.min(self.scrollback.len());
    }

    fn control(&mut self, byte: u8) {
        match byte {
            b'\r' => self.cursor_col = 0,
            b'\n' | 0x0b | 0x0c => self.line_feed(),
            0x08 => self.cursor_col = self.cursor_col.min(self.cols - 1).saturating_sub(1),
            b'\t' => {
                let next = (self.cursor_col / TAB_WIDTH + 1) * TAB_WIDTH;
                self.cursor_col = next.min(self.cols - 1);
            }
            0x1b => self.state = ParseState::Escape,
            // BEL and the remaining C0 controls have no effect on the grid
            _ => {}
        }
    }

    fn escape(&mut self, byte: u8) {
        self.state = match (self.state, byte) {
            (ParseState::Escape, b'[') => ParseState::Csi,
            (ParseState::Escape, b']') => ParseState::Osc,
            // Intermediate bytes: the sequence continues
            (ParseState::Escape, 0x20..=0x2f) => ParseState::Escape,
            (ParseState::Escape, _) => ParseState::Ground,
            (ParseState::Csi, 0x40..=0x7e) => ParseState::Ground,
            (ParseState::Csi, _) => ParseState::Csi,
            (ParseState::Osc, 0x07) => ParseState::Ground,
            (ParseState::Osc, 0x1b) => ParseState::OscEscape,
            (ParseState::Osc, _) => ParseState::Osc,
            (ParseState::OscEscape, b'\\') => ParseState::Ground,
            (ParseState::OscEscape, _) => ParseState::Osc,
            (ParseState::Ground, _) => ParseState::Ground,
        };
    }

    fn utf8_byte(&mut self, byte: u8) {
        if self.utf8.is_empty() {
            self.utf8_len = match byte {
                0xc2..=0xdf => 2,
                0xe0..=0xef => 3,
                0xf0..=0xf4 => 4,
                _ => {
                    self.print(char::REPLACEMENT_CHARACTER);
                    return;
                }
            };
            self.utf8.push(byte);
            return;
        }
        if byte & 0xc0 != 0x80 {
            // Truncated sequence: emit a replacement and reprocess this byte
            self.utf8.clear();
            self.print(char::REPLACEMENT_CHARACTER);
            self.feed_byte(byte);
            return;
        }
        self.utf8.push(byte);
        if self.utf8.len() == self.utf8_len {
            let c = std::str::from_utf8(&self.utf8)
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(char::REPLACEMENT_CHARACTER);
            self.utf8.clear();
            self.print(c);
        }
    }

    fn feed_byte(&mut self, byte: u8) {
        if self.state != ParseState::Ground {
            self.escape(byte);
            return;
        }
        if !self.utf8.is_empty() || byte >= 0x80 {
            self.utf8_byte(byte);
            return;
        }
        match byte {
            0x20..=0x7e => self.print(byte as char),
            0x7f => {}
            _ => self.control(byte),
        }
    }
}

impl TerminalEngine for PlainGrid {
    fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.feed_byte(byte);
        }
    }

    fn resize(&mut self, rows: u16, cols: u16) {
        let rows = rows.max(1);
        let cols = cols.max(1);

        if cols != self.cols {
            for line in self.screen.iter_mut() {
                line.resize(usize::from(cols), Cell::default());
                // Never leave half of a wide character at the edge
                if let Some(last) = line.last_mut() {
                    if last.width == 2 {
                        *last = Cell::default();
                    }
                }
            }
            self.cols = cols;
        }

        // Shrink from the top while the cursor would fall off, then from the
        // bottom
        while self.screen.len() > usize::from(rows) {
            if usize::from(self.cursor_row) >= usize::from(rows) {
                if let Some(top) = self.screen.pop_front() {
                    self.push_scrollback(top);
                }
                self.cursor_row -= 1;
            } else {
                self.screen.pop_back();
            }
        }
        while self.screen.len() < usize::from(rows) {
            self.screen.push_back(blank_line(cols));
        }
        self.rows = rows;
        self.cursor_col = self.cursor_col.min(cols);
        self.view_offset = self.view_offset.min(self.scrollback.len());
    }

    fn rows(&self) -> u16 {
        self.rows
    }

    fn cols(&self) -> u16 {
        self.cols
    }

    fn scroll(&mut self, scroll: Scroll) {
        let page = usize::from(self.rows);
        let max = self.scrollback.len();
        self.view_offset = match scroll {
            Scroll::LineUp => self.view_offset.saturating_add(1).min(max),
            Scroll::PageUp => self.view_offset.saturating_add(page).min(max),
            Scroll::LineDown => self.view_offset.saturating_sub(1),
            Scroll::PageDown => self.view_offset.saturating_sub(page),
            Scroll::Reset => 0,
        };
    }

    fn cell(&self, row: u16, col: u16) -> Option<Cell> {
        if col >= self.cols {
            return None;
        }
        let line = self.visible_line(row)?;
        // Scrollback lines keep the width they were written at
        Some(line.get(usize::from(col)).copied().unwrap_or_default())
    }
}

fn blank_line(cols: u16) -> Line {
    vec![Cell::default(); usize::from(cols)]
}

/// Text snapshot of a grid view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub rows: u16,
    pub cols: u16,
    pub cursor_row: u16,
    pub cursor_col: u16,
    /// Lines held in scrollback
    pub scrollback: usize,
    pub view_offset: usize,
    /// Visible rows with trailing blanks removed
    pub lines: Vec<String>,
}

impl GridSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Rows joined with newlines, trailing empty rows dropped
    pub fn to_text(&self) -> String {
        let end = self
            .lines
            .iter()
            .rposition(|line| !line.is_empty())
            .map_or(0, |i| i + 1);
        let mut text = self.lines[..end].join("\n");
        if end > 0 {
            text.push('\n');
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_then_blanks() {
        let mut grid = PlainGrid::new(24, 80);
        grid.feed(b"hello");
        let row = grid.row_text(0);
        assert_eq!(row.len(), 80);
        assert!(row.starts_with("hello"));
        assert!(row[5..].chars().all(|c| c == ' '));
        assert_eq!(grid.cursor(), (0, 5));
    }

    #[test]
    fn test_crlf_and_backspace() {
        let mut grid = PlainGrid::new(4, 10);
        grid.feed(b"abc\x08d\r\nxy");
        assert_eq!(grid.row_text(0).trim_end(), "abd");
        assert_eq!(grid.row_text(1).trim_end(), "xy");
    }

    #[test]
    fn test_tab_stops() {
        let mut grid = PlainGrid::new(2, 20);
        grid.feed(b"a\tb");
        assert_eq!(grid.row_text(0).trim_end(), "a       b");
    }

    #[test]
    fn test_wraps_at_right_margin() {
        let mut grid = PlainGrid::new(3, 4);
        grid.feed(b"abcdef");
        assert_eq!(grid.row_text(0), "abcd");
        assert_eq!(grid.row_text(1).trim_end(), "ef");
    }

    #[test]
    fn test_escape_sequences_are_skipped() {
        let mut grid = PlainGrid::new(2, 20);
        grid.feed(b"\x1b[1;31mred\x1b[0m \x1b]0;title\x07ok \x1b(Bdone");
        assert_eq!(grid.row_text(0).trim_end(), "red ok done");
    }

    #[test]
    fn test_utf8_split_across_feeds() {
        let mut grid = PlainGrid::new(2, 10);
        let bytes = "héllo".as_bytes();
        grid.feed(&bytes[..2]);
        grid.feed(&bytes[2..]);
        assert_eq!(grid.row_text(0).trim_end(), "héllo");
    }

    #[test]
    fn test_wide_characters_take_two_cells() {
        let mut grid = PlainGrid::new(2, 10);
        grid.feed("日本".as_bytes());
        assert_eq!(grid.cursor(), (0, 4));
        assert!(grid.cell(0, 1).unwrap().is_continuation());
        assert_eq!(grid.row_text(0).trim_end(), "日本");
    }

    #[test]
    fn test_invalid_utf8_becomes_replacement() {
        let mut grid = PlainGrid::new(2, 10);
        grid.feed(b"a\xffb\xc3c");
        assert_eq!(grid.row_text(0).trim_end(), "a\u{fffd}b\u{fffd}c");
    }

    #[test]
    fn test_scrollback_and_view() {
        let mut grid = PlainGrid::new(2, 10);
        grid.feed(b"one\r\ntwo\r\nthree\r\nfour");
        assert_eq!(grid.scrollback_len(), 2);
        assert_eq!(grid.row_text(0).trim_end(), "three");

        grid.scroll(Scroll::LineUp);
        assert_eq!(grid.row_text(0).trim_end(), "two");
        grid.scroll(Scroll::PageUp);
        assert_eq!(grid.view_offset(), 2);
        assert_eq!(grid.row_text(0).trim_end(), "one");

        grid.scroll(Scroll::Reset);
        assert_eq!(grid.row_text(1).trim_end(), "four");
    }

    #[test]
    fn test_scrollback_limit() {
        let mut grid = PlainGrid::with_scrollback(1, 5, 2);
        grid.feed(b"a\nb\nc\nd\n");
        assert_eq!(grid.scrollback_len(), 2);
    }

    #[test]
    fn test_resize_keeps_cursor_line_visible() {
        let mut grid = PlainGrid::new(4, 10);
        grid.feed(b"1\r\n2\r\n3\r\n4");
        grid.resize(2, 5);
        assert_eq!((grid.rows(), grid.cols()), (2, 5));
        assert_eq!(grid.row_text(0), "3    ");
        assert_eq!(grid.row_text(1), "4    ");
        assert_eq!(grid.cursor(), (1, 1));
    }

    #[test]
    fn test_resize_clamps_to_one() {
        let mut grid = PlainGrid::new(4, 10);
        grid.resize(0, 0);
        assert_eq!((grid.rows(), grid.cols()), (1, 1));
    }

    #[test]
    fn test_snapshot_text() {
        let mut grid = PlainGrid::new(3, 10);
        grid.feed(b"hi\r\nthere");
        let snapshot = grid.snapshot();
        assert_eq!(snapshot.lines, vec!["hi", "there", ""]);
        assert_eq!(snapshot.to_text(), "hi\nthere\n");
    }
}
