//! shadowcap -- desktop capture and input injection for remote-display
//! shadowing.
//!
//! A `ShadowSubsystem` observes the local desktop, copies changed regions
//! into a server-owned `Surface`, and injects remote keyboard and mouse
//! input. `platform::create_subsystem` picks the backend for the session.

pub mod config;
pub mod pixel;
pub mod platform;
pub mod region;
pub mod surface;
