//! Events delivered to the console by the windowing layer

use serde::{Deserialize, Serialize};

use crate::input::{Key, Modifiers, Zoom};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEvent {
    /// Key press
    Key { key: Key, mods: Modifiers },
    /// The drawable surface changed size, in pixels
    Resized { width: u32, height: u32 },
    /// Explicit font zoom from a menu or shortcut outside the key map
    Zoom(Zoom),
    /// The user asked to close the terminal
    Quit,
}

impl InputEvent {
    pub fn key(key: Key) -> Self {
        InputEvent::Key {
            key,
            mods: Modifiers::default(),
        }
    }

    /// Key presses for each character of `text`, as typed without modifiers
    pub fn text(text: &str) -> impl Iterator<Item = InputEvent> + '_ {
        text.chars().map(|c| match c {
            '\r' | '\n' => InputEvent::key(Key::Enter),
            '\t' => InputEvent::key(Key::Tab),
            c => InputEvent::key(Key::Char(c)),
        })
    }
}
