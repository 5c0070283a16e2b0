//! XTEST input injection.

use std::sync::Arc;

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    BUTTON_PRESS_EVENT, BUTTON_RELEASE_EVENT, KEY_PRESS_EVENT, KEY_RELEASE_EVENT,
    MOTION_NOTIFY_EVENT,
};
use x11rb::protocol::xtest::{self, ConnectionExt as _};

use crate::platform::input::{InputSink, NativeInput};
use crate::platform::SubsystemError;

use super::display::X11Display;

/// Sends synthetic device events through XTEST.
pub struct XTestInjector {
    display: Arc<X11Display>,
}

impl XTestInjector {
    pub fn new(display: Arc<X11Display>) -> Result<Self, SubsystemError> {
        if !display.has_extension(xtest::X11_EXTENSION_NAME)? {
            return Err(SubsystemError::Degraded("XTEST extension not present".into()));
        }
        let version = display.conn().xtest_get_version(2, 2)?.reply()?;
        log::debug!(
            "init: XTEST {}.{}",
            version.major_version,
            version.minor_version
        );
        Ok(Self { display })
    }

    fn fake(&self, kind: u8, detail: u8, x: i16, y: i16) -> Result<(), SubsystemError> {
        self.display.conn().xtest_fake_input(
            kind,
            detail,
            x11rb::CURRENT_TIME,
            self.display.root(),
            x,
            y,
            0,
        )?;
        Ok(())
    }
}

// All methods are called with the display lock held.
impl InputSink for XTestInjector {
    fn set_grab(&self, grab: bool) -> Result<(), SubsystemError> {
        self.display.conn().xtest_grab_control(grab)?;
        Ok(())
    }

    fn send(&self, input: NativeInput) -> Result<(), SubsystemError> {
        match input {
            NativeInput::Motion { x, y } => self.fake(MOTION_NOTIFY_EVENT, 0, x as i16, y as i16),
            NativeInput::Button { button, pressed } => {
                let kind = if pressed { BUTTON_PRESS_EVENT } else { BUTTON_RELEASE_EVENT };
                self.fake(kind, button, 0, 0)
            }
            NativeInput::Key { keycode, pressed } => {
                let kind = if pressed { KEY_PRESS_EVENT } else { KEY_RELEASE_EVENT };
                self.fake(kind, keycode, 0, 0)
            }
        }
    }

    fn flush(&self) -> Result<(), SubsystemError> {
        self.display.conn().flush()?;
        Ok(())
    }
}
