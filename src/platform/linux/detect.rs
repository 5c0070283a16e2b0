//! Display server detection for Linux.
//!
//! Determines whether the current session is Wayland or X11-only by inspecting
//! the environment variables set by the session manager.

use std::env;

/// The active Linux display server protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    /// Wayland session. `WAYLAND_DISPLAY` is set (with or without `DISPLAY`).
    /// A `DISPLAY` alongside it belongs to XWayland, which only sees X clients.
    Wayland,
    /// Pure X11 session. Only `DISPLAY` is set.
    X11,
}

/// Detects the active display server from environment variables.
///
/// Returns `None` when neither `WAYLAND_DISPLAY` nor `DISPLAY` is set.
pub fn detect_display_server() -> Option<DisplayServer> {
    classify_display(env_is_set("WAYLAND_DISPLAY"), env_is_set("DISPLAY"))
}

fn env_is_set(name: &str) -> bool {
    env::var_os(name).is_some_and(|v| !v.is_empty())
}

fn classify_display(has_wayland: bool, has_display: bool) -> Option<DisplayServer> {
    match (has_wayland, has_display) {
        (true, _) => Some(DisplayServer::Wayland),
        (false, true) => Some(DisplayServer::X11),
        (false, false) => None,
    }
}
