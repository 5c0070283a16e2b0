//! Remote input: protocol flag sets, translation to native events, and
//! injection through an `InputSink`.
//!
//! Translation is pure and backend-independent; the backend only supplies the
//! final key mapping and the sink. Every injected batch is bracketed by an
//! input grab so it is not interleaved with local input, and the grab is
//! always released, even when a send fails.

use bitflags::bitflags;

use super::keycodes::{scancode_to_keycode, KeyCode, KBDEXT};
use super::{DisplayLock, SubsystemError};

bitflags! {
    /// Flags of a keyboard (scancode or unicode) event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyboardFlags: u16 {
        const EXTENDED = 0x0100;
        /// Part of the Pause key's prefix sequence.
        const EXTENDED1 = 0x0200;
        const DOWN = 0x4000;
        const RELEASE = 0x8000;
    }
}

bitflags! {
    /// Flags of a standard pointer event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PointerFlags: u16 {
        const WHEEL_NEGATIVE = 0x0100;
        const WHEEL = 0x0200;
        const HWHEEL = 0x0400;
        const MOVE = 0x0800;
        const BUTTON1 = 0x1000;
        const BUTTON2 = 0x2000;
        const BUTTON3 = 0x4000;
        const DOWN = 0x8000;
    }
}

bitflags! {
    /// Flags of an extended pointer event (side buttons).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExtendedPointerFlags: u16 {
        const BUTTON1 = 0x0001;
        const BUTTON2 = 0x0002;
        const DOWN = 0x8000;
    }
}

bitflags! {
    /// Lock-key state carried by a synchronize event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncFlags: u32 {
        const SCROLL_LOCK = 0x0001;
        const NUM_LOCK = 0x0002;
        const CAPS_LOCK = 0x0004;
        const KANA_LOCK = 0x0008;
    }
}

// Core pointer button numbers.
pub const BUTTON_LEFT: u8 = 1;
pub const BUTTON_MIDDLE: u8 = 2;
pub const BUTTON_RIGHT: u8 = 3;
pub const BUTTON_WHEEL_UP: u8 = 4;
pub const BUTTON_WHEEL_DOWN: u8 = 5;
pub const BUTTON_WHEEL_LEFT: u8 = 6;
pub const BUTTON_WHEEL_RIGHT: u8 = 7;
pub const BUTTON_BACK: u8 = 8;
pub const BUTTON_FORWARD: u8 = 9;

/// One synthetic event for the native input system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeInput {
    /// Absolute pointer motion in screen coordinates.
    Motion { x: u16, y: u16 },
    Button { button: u8, pressed: bool },
    Key { keycode: u8, pressed: bool },
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Translates a scancode keyboard event.
///
/// Events with neither `DOWN` nor `RELEASE` carry no transition and produce
/// nothing, as do Pause prefix bytes and keys `to_native` cannot map.
pub fn translate_keyboard(
    flags: KeyboardFlags,
    code: u16,
    to_native: fn(KeyCode) -> Option<u8>,
) -> Option<NativeInput> {
    let pressed = if flags.contains(KeyboardFlags::DOWN) {
        true
    } else if flags.contains(KeyboardFlags::RELEASE) {
        false
    } else {
        return None;
    };
    if flags.contains(KeyboardFlags::EXTENDED1) {
        return None;
    }

    let mut scancode = code & 0xFF;
    if flags.contains(KeyboardFlags::EXTENDED) {
        scancode |= KBDEXT;
    }
    let Some(key) = scancode_to_keycode(scancode) else {
        log::debug!("input: unknown scancode {scancode:#05x}");
        return None;
    };
    let Some(keycode) = to_native(key) else {
        log::debug!("input: no native key for {key:?}");
        return None;
    };
    Some(NativeInput::Key { keycode, pressed })
}

/// Translates a standard pointer event.
///
/// Wheel events become a press/release pair of the scroll button and carry no
/// motion. Otherwise a move is emitted first, then at most one button change
/// (left, right, middle in that order of precedence).
pub fn translate_mouse(flags: PointerFlags, x: u16, y: u16) -> Vec<NativeInput> {
    let negative = flags.contains(PointerFlags::WHEEL_NEGATIVE);
    let wheel = if flags.contains(PointerFlags::WHEEL) {
        Some(if negative { BUTTON_WHEEL_DOWN } else { BUTTON_WHEEL_UP })
    } else if flags.contains(PointerFlags::HWHEEL) {
        Some(if negative { BUTTON_WHEEL_LEFT } else { BUTTON_WHEEL_RIGHT })
    } else {
        None
    };
    if let Some(button) = wheel {
        return vec![
            NativeInput::Button { button, pressed: true },
            NativeInput::Button { button, pressed: false },
        ];
    }

    let mut out = Vec::with_capacity(2);
    if flags.contains(PointerFlags::MOVE) {
        out.push(NativeInput::Motion { x, y });
    }
    let button = if flags.contains(PointerFlags::BUTTON1) {
        Some(BUTTON_LEFT)
    } else if flags.contains(PointerFlags::BUTTON2) {
        Some(BUTTON_RIGHT)
    } else if flags.contains(PointerFlags::BUTTON3) {
        Some(BUTTON_MIDDLE)
    } else {
        None
    };
    if let Some(button) = button {
        out.push(NativeInput::Button {
            button,
            pressed: flags.contains(PointerFlags::DOWN),
        });
    }
    out
}

/// Translates an extended pointer event: always a move, then the side button.
pub fn translate_extended_mouse(flags: ExtendedPointerFlags, x: u16, y: u16) -> Vec<NativeInput> {
    let mut out = vec![NativeInput::Motion { x, y }];
    let button = if flags.contains(ExtendedPointerFlags::BUTTON1) {
        Some(BUTTON_BACK)
    } else if flags.contains(ExtendedPointerFlags::BUTTON2) {
        Some(BUTTON_FORWARD)
    } else {
        None
    };
    if let Some(button) = button {
        out.push(NativeInput::Button {
            button,
            pressed: flags.contains(ExtendedPointerFlags::DOWN),
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

/// Native input injection primitive.
pub trait InputSink: Send + Sync {
    /// Takes (`true`) or releases (`false`) exclusive use of the input system.
    fn set_grab(&self, grab: bool) -> Result<(), SubsystemError>;

    fn send(&self, input: NativeInput) -> Result<(), SubsystemError>;

    /// Pushes buffered requests to the display server.
    fn flush(&self) -> Result<(), SubsystemError>;
}

/// Injects `inputs` as one grabbed batch under the display lock.
///
/// An empty batch touches nothing. The grab is released and the connection
/// flushed even when a send fails; the first error is returned.
pub fn dispatch(
    sink: &dyn InputSink,
    display: &DisplayLock,
    inputs: &[NativeInput],
) -> Result<(), SubsystemError> {
    if inputs.is_empty() {
        return Ok(());
    }
    let _display = display.acquire();
    sink.set_grab(true)?;
    let sent = inputs.iter().try_for_each(|input| sink.send(*input));
    let released = sink.set_grab(false);
    let flushed = sink.flush();
    sent.and(released).and(flushed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Grab(bool),
        Send(NativeInput),
        Flush,
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<Call>>,
        fail_sends: bool,
    }

    impl InputSink for RecordingSink {
        fn set_grab(&self, grab: bool) -> Result<(), SubsystemError> {
            self.calls.lock().unwrap().push(Call::Grab(grab));
            Ok(())
        }

        fn send(&self, input: NativeInput) -> Result<(), SubsystemError> {
            if self.fail_sends {
                return Err(SubsystemError::Native("connection lost".into()));
            }
            self.calls.lock().unwrap().push(Call::Send(input));
            Ok(())
        }

        fn flush(&self) -> Result<(), SubsystemError> {
            self.calls.lock().unwrap().push(Call::Flush);
            Ok(())
        }
    }

    fn any_key(_: KeyCode) -> Option<u8> {
        Some(42)
    }

    fn no_key(_: KeyCode) -> Option<u8> {
        None
    }

    #[test]
    fn right_button_press_with_move() {
        let out = translate_mouse(PointerFlags::BUTTON2 | PointerFlags::DOWN | PointerFlags::MOVE, 100, 50);
        assert_eq!(
            out,
            vec![
                NativeInput::Motion { x: 100, y: 50 },
                NativeInput::Button { button: BUTTON_RIGHT, pressed: true },
            ]
        );
    }

    #[test]
    fn button_release_without_move() {
        let out = translate_mouse(PointerFlags::BUTTON3, 7, 7);
        assert_eq!(
            out,
            vec![NativeInput::Button { button: BUTTON_MIDDLE, pressed: false }]
        );
    }

    #[test]
    fn left_button_wins_over_others() {
        let out = translate_mouse(PointerFlags::BUTTON1 | PointerFlags::BUTTON2 | PointerFlags::DOWN, 0, 0);
        assert_eq!(
            out,
            vec![NativeInput::Button { button: BUTTON_LEFT, pressed: true }]
        );
    }

    #[test]
    fn wheel_clicks_and_skips_motion() {
        let up = translate_mouse(PointerFlags::WHEEL | PointerFlags::MOVE, 5, 5);
        assert_eq!(
            up,
            vec![
                NativeInput::Button { button: BUTTON_WHEEL_UP, pressed: true },
                NativeInput::Button { button: BUTTON_WHEEL_UP, pressed: false },
            ]
        );
        let down = translate_mouse(PointerFlags::WHEEL | PointerFlags::WHEEL_NEGATIVE, 5, 5);
        assert_eq!(down[0], NativeInput::Button { button: BUTTON_WHEEL_DOWN, pressed: true });
    }

    #[test]
    fn horizontal_wheel_directions() {
        let right = translate_mouse(PointerFlags::HWHEEL, 0, 0);
        assert_eq!(right[0], NativeInput::Button { button: BUTTON_WHEEL_RIGHT, pressed: true });
        let left = translate_mouse(PointerFlags::HWHEEL | PointerFlags::WHEEL_NEGATIVE, 0, 0);
        assert_eq!(left[1], NativeInput::Button { button: BUTTON_WHEEL_LEFT, pressed: false });
    }

    #[test]
    fn bare_move() {
        assert_eq!(
            translate_mouse(PointerFlags::MOVE, 1, 2),
            vec![NativeInput::Motion { x: 1, y: 2 }]
        );
        assert!(translate_mouse(PointerFlags::empty(), 1, 2).is_empty());
    }

    #[test]
    fn extended_buttons_always_move_first() {
        let out = translate_extended_mouse(
            ExtendedPointerFlags::BUTTON2 | ExtendedPointerFlags::DOWN,
            30,
            40,
        );
        assert_eq!(
            out,
            vec![
                NativeInput::Motion { x: 30, y: 40 },
                NativeInput::Button { button: BUTTON_FORWARD, pressed: true },
            ]
        );
        let back = translate_extended_mouse(ExtendedPointerFlags::BUTTON1, 0, 0);
        assert_eq!(back[1], NativeInput::Button { button: BUTTON_BACK, pressed: false });
    }

    #[test]
    fn every_known_scancode_presses_and_releases() {
        for base in 0u16..=0xFF {
            for ext in [0, KBDEXT] {
                let extended = if ext != 0 { KeyboardFlags::EXTENDED } else { KeyboardFlags::empty() };
                let known = scancode_to_keycode(base | ext).is_some();
                let down = translate_keyboard(KeyboardFlags::DOWN | extended, base, any_key);
                let up = translate_keyboard(KeyboardFlags::RELEASE | extended, base, any_key);
                if known {
                    assert_eq!(down, Some(NativeInput::Key { keycode: 42, pressed: true }));
                    assert_eq!(up, Some(NativeInput::Key { keycode: 42, pressed: false }));
                } else {
                    assert_eq!(down, None);
                    assert_eq!(up, None);
                }
            }
        }
    }

    #[test]
    fn keyboard_without_transition_is_ignored() {
        assert_eq!(translate_keyboard(KeyboardFlags::empty(), 0x1E, any_key), None);
        assert_eq!(translate_keyboard(KeyboardFlags::EXTENDED, 0x48, any_key), None);
    }

    #[test]
    fn pause_prefix_and_unmapped_keys_are_dropped() {
        assert_eq!(
            translate_keyboard(KeyboardFlags::DOWN | KeyboardFlags::EXTENDED1, 0x1D, any_key),
            None
        );
        assert_eq!(translate_keyboard(KeyboardFlags::DOWN, 0x1E, no_key), None);
    }

    #[test]
    fn dispatch_brackets_batch_with_grab() {
        let sink = RecordingSink::default();
        let inputs = translate_mouse(PointerFlags::BUTTON1 | PointerFlags::DOWN | PointerFlags::MOVE, 3, 4);
        dispatch(&sink, &DisplayLock::new(), &inputs).unwrap();
        assert_eq!(
            *sink.calls.lock().unwrap(),
            vec![
                Call::Grab(true),
                Call::Send(NativeInput::Motion { x: 3, y: 4 }),
                Call::Send(NativeInput::Button { button: BUTTON_LEFT, pressed: true }),
                Call::Grab(false),
                Call::Flush,
            ]
        );
    }

    #[test]
    fn empty_batch_touches_nothing() {
        let sink = RecordingSink::default();
        dispatch(&sink, &DisplayLock::new(), &[]).unwrap();
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_send_still_releases_grab() {
        let sink = RecordingSink {
            fail_sends: true,
            ..Default::default()
        };
        let result = dispatch(&sink, &DisplayLock::new(), &[NativeInput::Motion { x: 0, y: 0 }]);
        assert!(matches!(result, Err(SubsystemError::Native(_))));
        assert_eq!(
            *sink.calls.lock().unwrap(),
            vec![Call::Grab(true), Call::Grab(false), Call::Flush]
        );
    }
}
