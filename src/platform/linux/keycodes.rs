//! Linux evdev keycode conversions.
//!
//! Maps the canonical `KeyCode` enum to Linux input event key codes (from
//! `linux/input-event-codes.h`) and on to X keycodes. X servers using the
//! evdev (or libinput) driver number keys as `evdev + 8`.

use crate::platform::keycodes::KeyCode;

/// Offset between evdev codes and X keycodes.
const X_KEYCODE_OFFSET: u16 = 8;

/// Converts a canonical `KeyCode` to a Linux evdev keycode for injection.
pub fn keycode_to_evdev(key: KeyCode) -> u16 {
    match key {
        // Letters
        KeyCode::A => 30,
        KeyCode::B => 48,
        KeyCode::C => 46,
        KeyCode::D => 32,
        KeyCode::E => 18,
        KeyCode::F => 33,
        KeyCode::G => 34,
        KeyCode::H => 35,
        KeyCode::I => 23,
        KeyCode::J => 36,
        KeyCode::K => 37,
        KeyCode::L => 38,
        KeyCode::M => 50,
        KeyCode::N => 49,
        KeyCode::O => 24,
        KeyCode::P => 25,
        KeyCode::Q => 16,
        KeyCode::R => 19,
        KeyCode::S => 31,
        KeyCode::T => 20,
        KeyCode::U => 22,
        KeyCode::V => 47,
        KeyCode::W => 17,
        KeyCode::X => 45,
        KeyCode::Y => 21,
        KeyCode::Z => 44,

        // Top-row digits
        KeyCode::Key1 => 2,
        KeyCode::Key2 => 3,
        KeyCode::Key3 => 4,
        KeyCode::Key4 => 5,
        KeyCode::Key5 => 6,
        KeyCode::Key6 => 7,
        KeyCode::Key7 => 8,
        KeyCode::Key8 => 9,
        KeyCode::Key9 => 10,
        KeyCode::Key0 => 11,

        // Function keys F1–F12
        KeyCode::F1 => 59,
        KeyCode::F2 => 60,
        KeyCode::F3 => 61,
        KeyCode::F4 => 62,
        KeyCode::F5 => 63,
        KeyCode::F6 => 64,
        KeyCode::F7 => 65,
        KeyCode::F8 => 66,
        KeyCode::F9 => 67,
        KeyCode::F10 => 68,
        KeyCode::F11 => 87,
        KeyCode::F12 => 88,

        // Function keys F13–F24
        KeyCode::F13 => 183,
        KeyCode::F14 => 184,
        KeyCode::F15 => 185,
        KeyCode::F16 => 186,
        KeyCode::F17 => 187,
        KeyCode::F18 => 188,
        KeyCode::F19 => 189,
        KeyCode::F20 => 190,
        KeyCode::F21 => 191,
        KeyCode::F22 => 192,
        KeyCode::F23 => 193,
        KeyCode::F24 => 194,

        // Modifiers
        KeyCode::LeftCtrl => 29,
        KeyCode::RightCtrl => 97,
        KeyCode::LeftShift => 42,
        KeyCode::RightShift => 54,
        KeyCode::LeftAlt => 56,
        KeyCode::RightAlt => 100,
        KeyCode::LeftMeta => 125,
        KeyCode::RightMeta => 126,
        KeyCode::Menu => 127,

        // Navigation and editing
        KeyCode::Space => 57,
        KeyCode::Enter => 28,
        KeyCode::Tab => 15,
        KeyCode::Escape => 1,
        KeyCode::Backspace => 14,
        KeyCode::Delete => 111,
        KeyCode::Insert => 110,
        KeyCode::Home => 102,
        KeyCode::End => 107,
        KeyCode::PageUp => 104,
        KeyCode::PageDown => 109,
        KeyCode::Up => 103,
        KeyCode::Down => 108,
        KeyCode::Left => 105,
        KeyCode::Right => 106,

        // Lock and system keys
        KeyCode::CapsLock => 58,
        KeyCode::NumLock => 69,
        KeyCode::ScrollLock => 70,
        KeyCode::PrintScreen => 99,
        KeyCode::Pause => 119,

        // Numeric keypad
        KeyCode::Numpad0 => 82,
        KeyCode::Numpad1 => 79,
        KeyCode::Numpad2 => 80,
        KeyCode::Numpad3 => 81,
        KeyCode::Numpad4 => 75,
        KeyCode::Numpad5 => 76,
        KeyCode::Numpad6 => 77,
        KeyCode::Numpad7 => 71,
        KeyCode::Numpad8 => 72,
        KeyCode::Numpad9 => 73,
        KeyCode::NumpadAdd => 78,
        KeyCode::NumpadSub => 74,
        KeyCode::NumpadMul => 55,
        KeyCode::NumpadDiv => 98,
        KeyCode::NumpadDecimal => 83,
        KeyCode::NumpadEnter => 96,

        // Punctuation / symbol keys
        KeyCode::Backtick => 41,
        KeyCode::Minus => 12,
        KeyCode::Equal => 13,
        KeyCode::LeftBracket => 26,
        KeyCode::RightBracket => 27,
        KeyCode::Backslash => 43,
        KeyCode::Semicolon => 39,
        KeyCode::Apostrophe => 40,
        KeyCode::Comma => 51,
        KeyCode::Period => 52,
        KeyCode::Slash => 53,
        KeyCode::IntlBackslash => 86,
    }
}

/// X keycode for `key`, or `None` if it falls outside the 8-bit keycode
/// range.
pub fn x11_keycode(key: KeyCode) -> Option<u8> {
    u8::try_from(keycode_to_evdev(key) + X_KEYCODE_OFFSET).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::keycodes::{scancode_to_keycode, KBDEXT};

    /// In the set-1 base range the evdev code equals the scancode, except for
    /// 0x45 (Pause without the extended flag, NumLock with it).
    #[test]
    fn base_scancodes_equal_evdev_codes() {
        for code in (0x01u16..=0x53).filter(|c| *c != 0x45) {
            let key = scancode_to_keycode(code).unwrap();
            assert_eq!(keycode_to_evdev(key), code, "scancode {code:#04x} ({key:?})");
        }
    }

    #[test]
    fn extended_keys_reach_distinct_x_keycodes() {
        assert_eq!(x11_keycode(scancode_to_keycode(0x1D | KBDEXT).unwrap()), Some(105));
        assert_eq!(x11_keycode(scancode_to_keycode(0x48 | KBDEXT).unwrap()), Some(111));
        assert_eq!(x11_keycode(scancode_to_keycode(0x5B | KBDEXT).unwrap()), Some(133));
    }

    #[test]
    fn every_scancode_key_has_an_x_keycode() {
        for code in 0u16..0x200 {
            if let Some(key) = scancode_to_keycode(code) {
                assert!(x11_keycode(key).is_some(), "{key:?}");
            }
        }
    }

    #[test]
    fn spot_check_x_keycodes() {
        assert_eq!(x11_keycode(KeyCode::Escape), Some(9));
        assert_eq!(x11_keycode(KeyCode::A), Some(38));
        assert_eq!(x11_keycode(KeyCode::Space), Some(65));
        assert_eq!(x11_keycode(KeyCode::F24), Some(202));
    }
}
