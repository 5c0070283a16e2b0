//! Linux platform backend.
//!
//! Shadowing: X11 via `X11ShadowSubsystem` (x11rb with MIT-SHM, DAMAGE,
//! XFIXES and XTEST).
//!
//! Backend selection:
//! 1. `display.backend` set explicitly in the config wins.
//! 2. Otherwise the session environment decides (`WAYLAND_DISPLAY` / `DISPLAY`).
//! 3. Neither variable set: X11 on the default endpoint.
//!
//! Wayland sessions are reported as unavailable.

mod detect;
mod keycodes;
mod x11;

use crate::config::{Backend, Config};
use crate::platform::{ShadowSubsystem, SubsystemError};
use detect::{detect_display_server, DisplayServer};
use x11::X11ShadowSubsystem;

/// Returns the shadow backend for the configured or detected display server.
pub fn create_subsystem(config: &Config) -> Result<Box<dyn ShadowSubsystem>, SubsystemError> {
    match select_target(config.display.backend, detect_display_server()) {
        DisplayServer::X11 => Ok(Box::new(X11ShadowSubsystem::new(config))),
        DisplayServer::Wayland => Err(SubsystemError::Unavailable(
            "Wayland shadowing is not supported; set display.backend = \"x11\" \
             to shadow an XWayland display instead"
                .into(),
        )),
    }
}

fn select_target(backend: Backend, detected: Option<DisplayServer>) -> DisplayServer {
    match backend {
        Backend::X11 => DisplayServer::X11,
        Backend::Wayland => DisplayServer::Wayland,
        Backend::Auto => detected.unwrap_or_else(|| {
            log::info!("init: no display server detected, trying X11");
            DisplayServer::X11
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_backend_overrides_environment() {
        assert_eq!(
            select_target(Backend::X11, Some(DisplayServer::Wayland)),
            DisplayServer::X11
        );
        assert_eq!(select_target(Backend::Wayland, None), DisplayServer::Wayland);
    }

    #[test]
    fn auto_follows_environment() {
        assert_eq!(
            select_target(Backend::Auto, Some(DisplayServer::Wayland)),
            DisplayServer::Wayland
        );
        assert_eq!(select_target(Backend::Auto, None), DisplayServer::X11);
    }

    #[test]
    fn wayland_backend_is_unavailable() {
        let mut config = Config::default();
        config.display.backend = Backend::Wayland;
        let err = create_subsystem(&config).err().unwrap();
        assert!(matches!(err, SubsystemError::Unavailable(_)));
    }

    #[test]
    fn x11_backend_is_created_without_connecting() {
        let mut config = Config::default();
        config.display.backend = Backend::X11;
        let subsystem = create_subsystem(&config).unwrap();
        assert_eq!(subsystem.name(), "x11");
        assert!(subsystem.monitors().is_empty());
    }
}
