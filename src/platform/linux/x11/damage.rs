//! DAMAGE/XFIXES negotiation and the native damage handle.
//!
//! The damage object reports changed rectangles on the root window. After a
//! rectangle has been captured it is subtracted from the damage object via an
//! XFIXES region, so the server reports later changes inside it again.

use std::sync::Arc;

use x11rb::connection::Connection;
use x11rb::protocol::damage::{self, ConnectionExt as _, ReportLevel};
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xproto::Rectangle;

use crate::platform::damage::NativeDamage;
use crate::platform::SubsystemError;
use crate::region::Rect;

use super::display::X11Display;

/// Checks that XFIXES is present and negotiates its version.
pub fn query_xfixes(display: &X11Display) -> Result<(), SubsystemError> {
    if !display.has_extension(xfixes::X11_EXTENSION_NAME)? {
        return Err(SubsystemError::Degraded("XFIXES extension not present".into()));
    }
    let version = display.conn().xfixes_query_version(5, 0)?.reply()?;
    log::debug!(
        "init: XFIXES {}.{}",
        version.major_version,
        version.minor_version
    );
    Ok(())
}

pub(super) fn to_rectangle(rect: Rect) -> Rectangle {
    Rectangle {
        x: rect.left as i16,
        y: rect.top as i16,
        width: rect.width(),
        height: rect.height(),
    }
}

/// A delta-rectangles damage object on the root window.
pub struct XDamage {
    display: Arc<X11Display>,
    damage: damage::Damage,
    region: xfixes::Region,
}

impl XDamage {
    /// Creates the damage object. Requires XFIXES (see `query_xfixes`).
    pub fn create(display: Arc<X11Display>) -> Result<Self, SubsystemError> {
        if !display.has_extension(damage::X11_EXTENSION_NAME)? {
            return Err(SubsystemError::Degraded("DAMAGE extension not present".into()));
        }
        let conn = display.conn();
        let version = conn.damage_query_version(1, 1)?.reply()?;
        if version.major_version < 1 {
            return Err(SubsystemError::Degraded(format!(
                "DAMAGE {}.{} is too old",
                version.major_version, version.minor_version
            )));
        }

        let damage = conn.generate_id()?;
        conn.damage_create(damage, display.root(), ReportLevel::DELTA_RECTANGLES)?
            .check()?;

        let region = match create_region(&display) {
            Ok(region) => region,
            Err(e) => {
                let _ = conn.damage_destroy(damage);
                return Err(e);
            }
        };

        log::debug!(
            "init: DAMAGE {}.{} on root window",
            version.major_version,
            version.minor_version
        );
        Ok(Self {
            display,
            damage,
            region,
        })
    }
}

fn create_region(display: &X11Display) -> Result<xfixes::Region, SubsystemError> {
    let conn = display.conn();
    let region = conn.generate_id()?;
    conn.xfixes_create_region(region, &[])?.check()?;
    Ok(region)
}

impl NativeDamage for XDamage {
    /// Called with the display lock held.
    fn subtract(&self, rect: Rect) -> Result<(), SubsystemError> {
        let conn = self.display.conn();
        conn.xfixes_set_region(self.region, &[to_rectangle(rect)])?;
        conn.damage_subtract(self.damage, self.region, x11rb::NONE)?;
        conn.flush()?;
        Ok(())
    }
}

impl Drop for XDamage {
    fn drop(&mut self) {
        let conn = self.display.conn();
        let _ = conn.damage_destroy(self.damage);
        let _ = conn.xfixes_destroy_region(self.region);
        let _ = conn.flush();
    }
}
