//! Protocol scancodes and the canonical `KeyCode` enum.
//!
//! Remote keyboard events carry PC/AT set-1 scancodes. Extended keys (the
//! `E0`-prefixed ones: arrows, right-hand modifiers, the navigation cluster)
//! arrive with the extended flag set, which we fold into the code as
//! `KBDEXT` so one table covers both.
//!
//! Platform backends map `KeyCode` onward to their native key identifiers.

/// Bit set on a scancode when the extended flag accompanied it.
pub const KBDEXT: u16 = 0x0100;

/// Physical key identity, independent of layout and platform.
///
/// Left and right modifiers are distinct: a remote client may hold either and
/// the desktop must see the same physical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    // Letters
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,

    // Top-row digits
    Key0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,

    // Function keys
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    F13,
    F14,
    F15,
    F16,
    F17,
    F18,
    F19,
    F20,
    F21,
    F22,
    F23,
    F24,

    // Modifiers
    LeftCtrl,
    RightCtrl,
    LeftShift,
    RightShift,
    LeftAlt,
    RightAlt,
    LeftMeta,
    RightMeta,
    Menu,

    // Navigation and editing
    Space,
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,

    // Lock and system keys
    CapsLock,
    NumLock,
    ScrollLock,
    PrintScreen,
    Pause,

    // Numeric keypad
    Numpad0,
    Numpad1,
    Numpad2,
    Numpad3,
    Numpad4,
    Numpad5,
    Numpad6,
    Numpad7,
    Numpad8,
    Numpad9,
    NumpadAdd,
    NumpadSub,
    NumpadMul,
    NumpadDiv,
    NumpadDecimal,
    NumpadEnter,

    // Punctuation / symbol keys
    Backtick,
    Minus,
    Equal,
    LeftBracket,
    RightBracket,
    Backslash,
    Semicolon,
    Apostrophe,
    Comma,
    Period,
    Slash,
    /// The extra key between left Shift and Z on ISO keyboards.
    IntlBackslash,
}

/// Resolves a set-1 scancode (with `KBDEXT` for extended keys) to a key.
///
/// Returns `None` for codes with no key: break codes, prefixes, and keys
/// outside the table (media keys, vendor keys). Callers drop those.
pub fn scancode_to_keycode(code: u16) -> Option<KeyCode> {
    let key = match code {
        0x01 => KeyCode::Escape,
        0x02 => KeyCode::Key1,
        0x03 => KeyCode::Key2,
        0x04 => KeyCode::Key3,
        0x05 => KeyCode::Key4,
        0x06 => KeyCode::Key5,
        0x07 => KeyCode::Key6,
        0x08 => KeyCode::Key7,
        0x09 => KeyCode::Key8,
        0x0A => KeyCode::Key9,
        0x0B => KeyCode::Key0,
        0x0C => KeyCode::Minus,
        0x0D => KeyCode::Equal,
        0x0E => KeyCode::Backspace,
        0x0F => KeyCode::Tab,
        0x10 => KeyCode::Q,
        0x11 => KeyCode::W,
        0x12 => KeyCode::E,
        0x13 => KeyCode::R,
        0x14 => KeyCode::T,
        0x15 => KeyCode::Y,
        0x16 => KeyCode::U,
        0x17 => KeyCode::I,
        0x18 => KeyCode::O,
        0x19 => KeyCode::P,
        0x1A => KeyCode::LeftBracket,
        0x1B => KeyCode::RightBracket,
        0x1C => KeyCode::Enter,
        0x1D => KeyCode::LeftCtrl,
        0x1E => KeyCode::A,
        0x1F => KeyCode::S,
        0x20 => KeyCode::D,
        0x21 => KeyCode::F,
        0x22 => KeyCode::G,
        0x23 => KeyCode::H,
        0x24 => KeyCode::J,
        0x25 => KeyCode::K,
        0x26 => KeyCode::L,
        0x27 => KeyCode::Semicolon,
        0x28 => KeyCode::Apostrophe,
        0x29 => KeyCode::Backtick,
        0x2A => KeyCode::LeftShift,
        0x2B => KeyCode::Backslash,
        0x2C => KeyCode::Z,
        0x2D => KeyCode::X,
        0x2E => KeyCode::C,
        0x2F => KeyCode::V,
        0x30 => KeyCode::B,
        0x31 => KeyCode::N,
        0x32 => KeyCode::M,
        0x33 => KeyCode::Comma,
        0x34 => KeyCode::Period,
        0x35 => KeyCode::Slash,
        0x36 => KeyCode::RightShift,
        0x37 => KeyCode::NumpadMul,
        0x38 => KeyCode::LeftAlt,
        0x39 => KeyCode::Space,
        0x3A => KeyCode::CapsLock,
        0x3B => KeyCode::F1,
        0x3C => KeyCode::F2,
        0x3D => KeyCode::F3,
        0x3E => KeyCode::F4,
        0x3F => KeyCode::F5,
        0x40 => KeyCode::F6,
        0x41 => KeyCode::F7,
        0x42 => KeyCode::F8,
        0x43 => KeyCode::F9,
        0x44 => KeyCode::F10,
        // Without the extended flag 0x45 is the tail of the Pause sequence;
        // NumLock is sent extended.
        0x45 => KeyCode::Pause,
        0x46 => KeyCode::ScrollLock,
        0x47 => KeyCode::Numpad7,
        0x48 => KeyCode::Numpad8,
        0x49 => KeyCode::Numpad9,
        0x4A => KeyCode::NumpadSub,
        0x4B => KeyCode::Numpad4,
        0x4C => KeyCode::Numpad5,
        0x4D => KeyCode::Numpad6,
        0x4E => KeyCode::NumpadAdd,
        0x4F => KeyCode::Numpad1,
        0x50 => KeyCode::Numpad2,
        0x51 => KeyCode::Numpad3,
        0x52 => KeyCode::Numpad0,
        0x53 => KeyCode::NumpadDecimal,
        0x56 => KeyCode::IntlBackslash,
        0x57 => KeyCode::F11,
        0x58 => KeyCode::F12,
        0x64 => KeyCode::F13,
        0x65 => KeyCode::F14,
        0x66 => KeyCode::F15,
        0x67 => KeyCode::F16,
        0x68 => KeyCode::F17,
        0x69 => KeyCode::F18,
        0x6A => KeyCode::F19,
        0x6B => KeyCode::F20,
        0x6C => KeyCode::F21,
        0x6D => KeyCode::F22,
        0x6E => KeyCode::F23,
        0x76 => KeyCode::F24,

        // Extended
        0x11C => KeyCode::NumpadEnter,
        0x11D => KeyCode::RightCtrl,
        0x135 => KeyCode::NumpadDiv,
        0x137 => KeyCode::PrintScreen,
        0x138 => KeyCode::RightAlt,
        0x145 => KeyCode::NumLock,
        0x146 => KeyCode::Pause,
        0x147 => KeyCode::Home,
        0x148 => KeyCode::Up,
        0x149 => KeyCode::PageUp,
        0x14B => KeyCode::Left,
        0x14D => KeyCode::Right,
        0x14F => KeyCode::End,
        0x150 => KeyCode::Down,
        0x151 => KeyCode::PageDown,
        0x152 => KeyCode::Insert,
        0x153 => KeyCode::Delete,
        0x15B => KeyCode::LeftMeta,
        0x15C => KeyCode::RightMeta,
        0x15D => KeyCode::Menu,

        _ => return None,
    };
    Some(key)
}
