//! Fallback capture: one `GetImage` request per frame.

use std::sync::Arc;

use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat};

use crate::platform::capture::{Snapshot, Snapshotter};
use crate::platform::SubsystemError;
use crate::region::Rect;

use super::display::X11Display;

pub struct X11Snapshotter {
    display: Arc<X11Display>,
}

impl X11Snapshotter {
    pub fn new(display: Arc<X11Display>) -> Self {
        Self { display }
    }
}

impl Snapshotter for X11Snapshotter {
    fn snapshot(&mut self, rect: Rect) -> Result<Snapshot, SubsystemError> {
        let reply = self
            .display
            .conn()
            .get_image(
                ImageFormat::Z_PIXMAP,
                self.display.root(),
                rect.left as i16,
                rect.top as i16,
                rect.width(),
                rect.height(),
                !0,
            )?
            .reply()?;

        let stride = self.display.stride(rect.width());
        if reply.data.len() < stride * rect.height() as usize {
            return Err(SubsystemError::Capture(format!(
                "image of {rect:?} is {} bytes, expected {}",
                reply.data.len(),
                stride * rect.height() as usize
            )));
        }
        Ok(Snapshot {
            data: reply.data,
            stride,
            format: self.display.format().pixel,
        })
    }
}
