//! Symbolic key names to Linux input-event codes.
//!
//! Keyboard names follow the browser `KeyboardEvent.code` vocabulary so that an
//! editor can store whatever the user pressed without further translation.

use super::mapping_types::{KeyMode, OutputBinding};

/// `KeyboardEvent.code` name -> `KEY_*` code.
const KEYBOARD: &[(&str, u16)] = &[
    // letters
    ("KeyA", 30),
    ("KeyB", 48),
    ("KeyC", 46),
    ("KeyD", 32),
    ("KeyE", 18),
    ("KeyF", 33),
    ("KeyG", 34),
    ("KeyH", 35),
    ("KeyI", 23),
    ("KeyJ", 36),
    ("KeyK", 37),
    ("KeyL", 38),
    ("KeyM", 50),
    ("KeyN", 49),
    ("KeyO", 24),
    ("KeyP", 25),
    ("KeyQ", 16),
    ("KeyR", 19),
    ("KeyS", 31),
    ("KeyT", 20),
    ("KeyU", 22),
    ("KeyV", 47),
    ("KeyW", 17),
    ("KeyX", 45),
    ("KeyY", 21),
    ("KeyZ", 44),
    // digits
    ("Digit1", 2),
    ("Digit2", 3),
    ("Digit3", 4),
    ("Digit4", 5),
    ("Digit5", 6),
    ("Digit6", 7),
    ("Digit7", 8),
    ("Digit8", 9),
    ("Digit9", 10),
    ("Digit0", 11),
    // function row
    ("F1", 59),
    ("F2", 60),
    ("F3", 61),
    ("F4", 62),
    ("F5", 63),
    ("F6", 64),
    ("F7", 65),
    ("F8", 66),
    ("F9", 67),
    ("F10", 68),
    ("F11", 87),
    ("F12", 88),
    // modifiers and controls
    ("Escape", 1),
    ("Tab", 15),
    ("CapsLock", 58),
    ("ShiftLeft", 42),
    ("ShiftRight", 54),
    ("ControlLeft", 29),
    ("ControlRight", 97),
    ("AltLeft", 56),
    ("AltRight", 100),
    ("Space", 57),
    ("Enter", 28),
    ("Backspace", 14),
    // arrows
    ("ArrowUp", 103),
    ("ArrowDown", 108),
    ("ArrowLeft", 105),
    ("ArrowRight", 106),
    // navigation
    ("Insert", 110),
    ("Delete", 111),
    ("Home", 102),
    ("End", 107),
    ("PageUp", 104),
    ("PageDown", 109),
    // symbols
    ("Minus", 12),
    ("Equal", 13),
    ("BracketLeft", 26),
    ("BracketRight", 27),
    ("Semicolon", 39),
    ("Quote", 40),
    ("Backquote", 41),
    ("Backslash", 43),
    ("Comma", 51),
    ("Period", 52),
    ("Slash", 53),
    // numpad
    ("NumLock", 69),
    ("NumpadDivide", 98),
    ("NumpadMultiply", 55),
    ("NumpadSubtract", 74),
    ("NumpadAdd", 78),
    ("NumpadEnter", 96),
    ("Numpad1", 79),
    ("Numpad2", 80),
    ("Numpad3", 81),
    ("Numpad4", 75),
    ("Numpad5", 76),
    ("Numpad6", 77),
    ("Numpad7", 71),
    ("Numpad8", 72),
    ("Numpad9", 73),
    ("Numpad0", 82),
    ("NumpadDecimal", 83),
];

pub const BTN_LEFT: u16 = 0x110;
pub const BTN_RIGHT: u16 = 0x111;
pub const BTN_MIDDLE: u16 = 0x112;

const MOUSE: &[(&str, u16)] = &[
    ("LClick", BTN_LEFT),
    ("RClick", BTN_RIGHT),
    ("MClick", BTN_MIDDLE),
];

pub fn key_to_code(name: &str) -> Option<u16> {
    KEYBOARD
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, code)| *code)
}

pub fn code_to_key(code: u16) -> Option<&'static str> {
    KEYBOARD
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(key, _)| *key)
}

/// Every keyboard code with a symbolic name
pub fn keyboard_codes() -> impl Iterator<Item = u16> {
    KEYBOARD.iter().map(|(_, code)| *code)
}

pub fn mouse_to_code(name: &str) -> Option<u16> {
    MOUSE
        .iter()
        .find(|(button, _)| *button == name)
        .map(|(_, code)| *code)
}

pub fn code_to_mouse(code: u16) -> Option<&'static str> {
    MOUSE
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(button, _)| *button)
}

/// Resolves a symbolic name for the given output device into a binding.
pub fn binding_from_name(mode: KeyMode, name: &str) -> Option<OutputBinding> {
    let code = match mode {
        KeyMode::Keyboard => key_to_code(name)?,
        KeyMode::Mouse => mouse_to_code(name)?,
    };
    Some(OutputBinding { code, mode })
}

/// Human readable form of a binding, e.g. `KeyW` or `LClick`.
///
/// Unbound positions render as `-`, codes without a symbolic name as
/// `keyboard:<code>` / `mouse:<code>`.
pub fn describe(binding: &OutputBinding) -> String {
    if binding.is_unbound() {
        return "-".to_string();
    }
    let name = match binding.mode {
        KeyMode::Keyboard => code_to_key(binding.code),
        KeyMode::Mouse => code_to_mouse(binding.code),
    };
    match name {
        Some(name) => name.to_string(),
        None => format!("{}:{}", binding.mode, binding.code),
    }
}
