//! Key translation
//!
//! Turns a logical key press into what the console should do with it:
//! bytes for the child, a scrollback command for the engine, or a font zoom.
//! `Key::Char` carries the unshifted key; the shift layer below maps it to
//! the US-layout symbol.

use serde::{Deserialize, Serialize};

use crate::engine::Scroll;

/// Interrupt character (Ctrl+C)
pub const INTERRUPT: u8 = 0x03;

/// Quit character (Ctrl+\)
pub const QUIT: u8 = 0x1c;

const ESC: u8 = 0x1b;
const DEL: u8 = 0x7f;

/// Keyboard key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    Backspace,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    F(u8),
}

/// Keyboard modifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    /// Command / Windows key
    pub logo: bool,
}

impl Modifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shift() -> Self {
        Self {
            shift: true,
            ..Self::default()
        }
    }

    pub fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Self::default()
        }
    }

    pub fn alt() -> Self {
        Self {
            alt: true,
            ..Self::default()
        }
    }

    pub fn ctrl_shift() -> Self {
        Self {
            shift: true,
            ctrl: true,
            ..Self::default()
        }
    }

    /// xterm modifier parameter (1 = none, 2 = shift, 3 = alt, ...)
    pub fn to_code(&self) -> u8 {
        let mut code = 1u8;
        if self.shift {
            code += 1;
        }
        if self.alt {
            code += 2;
        }
        if self.ctrl {
            code += 4;
        }
        code
    }
}

/// Font zoom direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Zoom {
    In,
    Out,
}

/// Outcome of a key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Bytes for the child
    Write(Vec<u8>),
    /// Scrollback navigation, handled by the engine
    Scroll(Scroll),
    Zoom(Zoom),
    /// Reserved shortcut; nothing is sent
    Ignore,
}

/// Decide what a key press does
pub fn translate(key: &Key, mods: Modifiers) -> KeyAction {
    if mods.shift {
        let scroll = match key {
            Key::Up => Some(Scroll::LineUp),
            Key::Down => Some(Scroll::LineDown),
            Key::PageUp => Some(Scroll::PageUp),
            Key::PageDown => Some(Scroll::PageDown),
            _ => None,
        };
        if let Some(scroll) = scroll {
            return KeyAction::Scroll(scroll);
        }
    }

    if mods.ctrl && mods.shift && !mods.alt {
        match key {
            Key::Char('=') => return KeyAction::Zoom(Zoom::In),
            Key::Char('-') => return KeyAction::Zoom(Zoom::Out),
            _ => {}
        }
    }

    // Copy/paste and other system shortcuts
    if mods.logo {
        return KeyAction::Ignore;
    }

    let bytes = encode_key(key, mods);
    if bytes.is_empty() {
        KeyAction::Ignore
    } else {
        KeyAction::Write(bytes)
    }
}

/// Encode a key press into terminal input bytes
pub fn encode_key(key: &Key, mods: Modifiers) -> Vec<u8> {
    match *key {
        Key::Char(c) => encode_char(c, mods),
        Key::Enter => vec![b'\r'],
        Key::Tab => {
            if mods.shift {
                vec![ESC, b'[', b'Z']
            } else {
                vec![b'\t']
            }
        }
        Key::Backspace => {
            if mods.alt {
                vec![ESC, DEL]
            } else {
                vec![DEL]
            }
        }
        Key::Escape => vec![ESC],
        Key::Up => encode_cursor_key(b'A', mods),
        Key::Down => encode_cursor_key(b'B', mods),
        Key::Right => encode_cursor_key(b'C', mods),
        Key::Left => encode_cursor_key(b'D', mods),
        Key::Home => encode_cursor_key(b'H', mods),
        Key::End => encode_cursor_key(b'F', mods),
        Key::PageUp => encode_tilde_key(5, mods),
        Key::PageDown => encode_tilde_key(6, mods),
        Key::Insert => encode_tilde_key(2, mods),
        Key::Delete => encode_tilde_key(3, mods),
        Key::F(n) => encode_function_key(n, mods),
    }
}

/// US-layout symbol produced by shift + `c`
pub fn shift_layer(c: char) -> char {
    match c {
        '0' => ')',
        '1' => '!',
        '2' => '@',
        '3' => '#',
        '4' => '$',
        '5' => '%',
        '6' => '^',
        '7' => '&',
        '8' => '*',
        '9' => '(',
        'a'..='z' => c.to_ascii_uppercase(),
        '`' => '~',
        '-' => '_',
        '=' => '+',
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        ';' => ':',
        '\'' => '"',
        ',' => '<',
        '.' => '>',
        '/' => '?',
        other => other,
    }
}

fn encode_char(c: char, mods: Modifiers) -> Vec<u8> {
    // Control codes only for a bare Ctrl; Ctrl+Shift and Ctrl+Alt send the key
    if mods.ctrl && !mods.shift && !mods.alt {
        let control = if c.is_ascii_alphabetic() {
            Some(c.to_ascii_uppercase() as u8 - b'A' + 1)
        } else {
            match c {
                '@' | ' ' => Some(0x00),
                '[' => Some(ESC),
                '\\' => Some(QUIT),
                ']' => Some(0x1d),
                '^' => Some(0x1e),
                '_' => Some(0x1f),
                '?' => Some(DEL),
                _ => None,
            }
        };
        if let Some(control) = control {
            return vec![control];
        }
    }

    let c = if mods.shift && !mods.ctrl && !mods.alt {
        shift_layer(c)
    } else {
        c
    };

    let mut buf = [0u8; 4];
    let encoded = c.encode_utf8(&mut buf).as_bytes();
    let mut bytes = Vec::with_capacity(encoded.len() + 1);
    if mods.alt {
        bytes.push(ESC);
    }
    bytes.extend_from_slice(encoded);
    bytes
}

/// Arrow keys, Home and End: CSI final, or CSI 1 ; mod final with modifiers
fn encode_cursor_key(final_byte: u8, mods: Modifiers) -> Vec<u8> {
    let code = mods.to_code();
    if code > 1 {
        vec![ESC, b'[', b'1', b';', b'0' + code, final_byte]
    } else {
        vec![ESC, b'[', final_byte]
    }
}

/// Editing keys: CSI n ~, or CSI n ; mod ~ with modifiers
fn encode_tilde_key(n: u8, mods: Modifiers) -> Vec<u8> {
    let code = mods.to_code();
    if code > 1 {
        vec![ESC, b'[', b'0' + n, b';', b'0' + code, b'~']
    } else {
        vec![ESC, b'[', b'0' + n, b'~']
    }
}

fn encode_function_key(n: u8, mods: Modifiers) -> Vec<u8> {
    let code = mods.to_code();
    if (1..=4).contains(&n) && code == 1 {
        // F1-F4 are SS3 P..S
        return vec![ESC, b'O', b'P' + (n - 1)];
    }
    let number = match n {
        1..=5 => 10 + n,
        6..=10 => 11 + n,
        11 | 12 => 12 + n,
        _ => return Vec::new(),
    };
    if code > 1 {
        format!("\x1b[{};{}~", number, code).into_bytes()
    } else {
        format!("\x1b[{}~", number).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(key: Key, mods: Modifiers) -> Vec<u8> {
        match translate(&key, mods) {
            KeyAction::Write(bytes) => bytes,
            other => panic!("expected bytes for {:?}, got {:?}", key, other),
        }
    }

    #[test]
    fn test_plain_ascii_passes_through() {
        assert_eq!(write(Key::Char('a'), Modifiers::new()), b"a");
        assert_eq!(write(Key::Char('7'), Modifiers::new()), b"7");
        assert_eq!(write(Key::Char(';'), Modifiers::new()), b";");
    }

    #[test]
    fn test_shift_layer() {
        assert_eq!(write(Key::Char('1'), Modifiers::shift()), b"!");
        assert_eq!(write(Key::Char('0'), Modifiers::shift()), b")");
        assert_eq!(write(Key::Char('q'), Modifiers::shift()), b"Q");
        assert_eq!(write(Key::Char('/'), Modifiers::shift()), b"?");
        assert_eq!(write(Key::Char('\''), Modifiers::shift()), b"\"");
    }

    #[test]
    fn test_control_letters() {
        assert_eq!(write(Key::Char('a'), Modifiers::ctrl()), vec![0x01]);
        assert_eq!(write(Key::Char('c'), Modifiers::ctrl()), vec![INTERRUPT]);
        assert_eq!(write(Key::Char('z'), Modifiers::ctrl()), vec![0x1a]);
        assert_eq!(write(Key::Char('\\'), Modifiers::ctrl()), vec![QUIT]);
    }

    #[test]
    fn test_ctrl_shift_letter_is_not_a_control_code() {
        assert_eq!(write(Key::Char('c'), Modifiers::ctrl_shift()), b"c");
        assert_eq!(write(Key::Char('\\'), Modifiers::ctrl_shift()), b"\\");
        let ctrl_alt = Modifiers {
            ctrl: true,
            alt: true,
            ..Modifiers::new()
        };
        assert_eq!(write(Key::Char('c'), ctrl_alt), vec![ESC, b'c']);
    }

    #[test]
    fn test_alt_skips_shift_layer() {
        let alt_shift = Modifiers {
            shift: true,
            alt: true,
            ..Modifiers::new()
        };
        assert_eq!(write(Key::Char('1'), alt_shift), vec![ESC, b'1']);
        assert_eq!(write(Key::Char('q'), alt_shift), vec![ESC, b'q']);
    }

    #[test]
    fn test_alt_prefixes_escape() {
        assert_eq!(write(Key::Char('x'), Modifiers::alt()), vec![ESC, b'x']);
        assert_eq!(write(Key::Backspace, Modifiers::alt()), vec![ESC, DEL]);
    }

    #[test]
    fn test_special_keys() {
        let none = Modifiers::new();
        assert_eq!(write(Key::Enter, none), b"\r");
        assert_eq!(write(Key::Backspace, none), vec![DEL]);
        assert_eq!(write(Key::Tab, none), b"\t");
        assert_eq!(write(Key::Escape, none), vec![ESC]);
        assert_eq!(write(Key::Up, none), b"\x1b[A");
        assert_eq!(write(Key::Left, none), b"\x1b[D");
        assert_eq!(write(Key::Home, none), b"\x1b[H");
        assert_eq!(write(Key::End, none), b"\x1b[F");
        assert_eq!(write(Key::PageUp, none), b"\x1b[5~");
        assert_eq!(write(Key::Delete, none), b"\x1b[3~");
        assert_eq!(write(Key::F(1), none), b"\x1bOP");
        assert_eq!(write(Key::F(5), none), b"\x1b[15~");
        assert_eq!(write(Key::F(12), none), b"\x1b[24~");
    }

    #[test]
    fn test_ctrl_arrow_carries_modifier() {
        assert_eq!(write(Key::Right, Modifiers::ctrl()), b"\x1b[1;5C");
    }

    #[test]
    fn test_shift_navigation_scrolls() {
        assert_eq!(
            translate(&Key::Up, Modifiers::shift()),
            KeyAction::Scroll(Scroll::LineUp)
        );
        assert_eq!(
            translate(&Key::PageDown, Modifiers::shift()),
            KeyAction::Scroll(Scroll::PageDown)
        );
    }

    #[test]
    fn test_zoom_shortcuts() {
        assert_eq!(
            translate(&Key::Char('='), Modifiers::ctrl_shift()),
            KeyAction::Zoom(Zoom::In)
        );
        assert_eq!(
            translate(&Key::Char('-'), Modifiers::ctrl_shift()),
            KeyAction::Zoom(Zoom::Out)
        );
    }

    #[test]
    fn test_logo_shortcuts_are_ignored() {
        let mods = Modifiers {
            logo: true,
            ..Modifiers::default()
        };
        assert_eq!(translate(&Key::Char('c'), mods), KeyAction::Ignore);
        assert_eq!(translate(&Key::Char('v'), mods), KeyAction::Ignore);
    }

    #[test]
    fn test_unknown_function_key_is_ignored() {
        assert_eq!(translate(&Key::F(30), Modifiers::new()), KeyAction::Ignore);
    }
}
