//! The X connection as an `EventSource` for the capture thread.

use std::os::unix::io::BorrowedFd;
use std::sync::Arc;

use x11rb::connection::Connection;
use x11rb::protocol::xproto::Rectangle;
use x11rb::protocol::Event;

use crate::platform::event_loop::EventSource;
use crate::platform::SubsystemError;
use crate::region::Rect;

use super::display::X11Display;

pub struct X11EventSource {
    display: Arc<X11Display>,
}

impl X11EventSource {
    pub fn new(display: Arc<X11Display>) -> Self {
        Self { display }
    }
}

impl EventSource for X11EventSource {
    fn fd(&self) -> BorrowedFd<'_> {
        self.display.fd()
    }

    /// Polls until both the socket and x11rb's internal queue are empty.
    fn drain(&self) -> Result<Vec<Rect>, SubsystemError> {
        let _display = self.display.lock().acquire();
        let conn = self.display.conn();
        let mut rects = Vec::new();
        while let Some(event) = conn.poll_for_event()? {
            match event {
                Event::DamageNotify(notify) => rects.extend(rect_from_area(notify.area)),
                Event::Error(e) => log::debug!("capture: X error {:?}", e.error_kind),
                _ => {}
            }
        }
        Ok(rects)
    }
}

/// Converts a damage area to a surface rectangle, clipping negative origins.
/// Returns `None` for empty areas.
pub fn rect_from_area(area: Rectangle) -> Option<Rect> {
    let clamp = |v: i32| v.clamp(0, u16::MAX as i32) as u16;
    let rect = Rect::new(
        clamp(area.x as i32),
        clamp(area.y as i32),
        clamp(area.x as i32 + area.width as i32),
        clamp(area.y as i32 + area.height as i32),
    );
    (!rect.is_empty()).then_some(rect)
}
