//! Platform abstraction layer.
//!
//! Defines the `ShadowSubsystem` trait every capture backend implements, the
//! `SubsystemCommon` state embedded in each backend, and the factory that picks
//! a backend for the current session. The backend-independent pieces of the
//! capture pipeline live in sibling modules:
//!
//! - `damage`: dirty-region accumulation and exact-rect validation.
//! - `event_loop`: the background thread turning native events into damage.
//! - `capture`: one frame extraction into the canonical surface.
//! - `input` / `keycodes`: protocol input translation and injection.

pub mod capture;
pub mod damage;
pub mod event_loop;
pub mod input;
pub mod keycodes;

#[cfg(target_os = "linux")]
mod linux;

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::config::Config;
use crate::pixel::PixelError;
use crate::region::Rect;
use crate::surface::Surface;
use damage::{DamageTracker, NativeDamage};
use event_loop::{CaptureThread, EventSource};
use input::{ExtendedPointerFlags, KeyboardFlags, PointerFlags, SyncFlags};

/// Upper bound on reported monitors.
pub const MAX_MONITORS: usize = 16;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned across the subsystem boundary.
#[derive(Debug, Error)]
pub enum SubsystemError {
    #[error("cannot connect to display {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("{0}")]
    Unavailable(String),

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// An optional capability could not be negotiated.
    #[error("capability unavailable: {0}")]
    Degraded(String),

    #[error("subsystem is not initialized")]
    NotInitialized,

    #[error("subsystem is not started")]
    NotStarted,

    #[error("capture thread is already running")]
    AlreadyRunning,

    #[error("surface is {actual:?} but the screen is {expected:?}")]
    SurfaceMismatch {
        expected: (u16, u16),
        actual: (u16, u16),
    },

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("display request failed: {0}")]
    Native(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pixel(#[from] PixelError),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification used by callers to decide what to do with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The session cannot start.
    FatalInit,
    /// A fast path or precision feature is missing; a fallback is in use.
    DegradedCapability,
    /// One capture or injection failed; retry on the next cadence.
    Transient,
    /// The caller violated the lifecycle (e.g. copy before start).
    Lifecycle,
}

impl SubsystemError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubsystemError::Connect { .. }
            | SubsystemError::Unavailable(_)
            | SubsystemError::UnsupportedFormat(_)
            | SubsystemError::SurfaceMismatch { .. } => ErrorKind::FatalInit,
            SubsystemError::Degraded(_) => ErrorKind::DegradedCapability,
            SubsystemError::NotInitialized
            | SubsystemError::NotStarted
            | SubsystemError::AlreadyRunning => ErrorKind::Lifecycle,
            SubsystemError::Capture(_)
            | SubsystemError::Native(_)
            | SubsystemError::Io(_)
            | SubsystemError::Pixel(_)
            | SubsystemError::Other(_) => ErrorKind::Transient,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared value types
// ---------------------------------------------------------------------------

/// One monitor's bounds in desktop coordinates (right/bottom exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorDef {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub primary: bool,
}

impl MonitorDef {
    /// A primary monitor spanning `width` x `height` at the origin.
    pub fn primary(width: u16, height: u16) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
            primary: true,
        }
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

/// Optional capabilities negotiated during `init`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    /// Shared-memory capture path active.
    pub shm: bool,
    /// Event-driven damage tracking active.
    pub damage: bool,
    /// Input injection available.
    pub xtest: bool,
}

/// The five input operations of the subsystem contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOperation {
    Synchronize,
    Keyboard,
    UnicodeKeyboard,
    Mouse,
    ExtendedMouse,
}

/// How a backend handles one input operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSupport {
    /// Translated into native input.
    Native,
    /// Accepted and deliberately ignored: the platform has no primitive for it.
    NoOp,
    /// Accepted and ignored: a native mapping exists but is not implemented.
    NotPorted,
    /// Accepted and ignored: injection could not be negotiated at init.
    Unavailable,
}

/// Serializes use of the native display connection between frame capture,
/// event draining and input injection.
#[derive(Debug, Default)]
pub struct DisplayLock(Mutex<()>);

impl DisplayLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Common backend state
// ---------------------------------------------------------------------------

/// State every backend embeds: monitor layout, negotiated features, the
/// damage tracker bound to the server's surface, and the capture thread.
#[derive(Default)]
pub struct SubsystemCommon {
    monitors: Vec<MonitorDef>,
    features: Features,
    tracker: Option<DamageTracker>,
    capture_thread: Option<CaptureThread>,
}

impl SubsystemCommon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn monitors(&self) -> &[MonitorDef] {
        &self.monitors
    }

    /// Replaces the monitor list, keeping at most `MAX_MONITORS` entries.
    pub fn set_monitors(&mut self, monitors: impl IntoIterator<Item = MonitorDef>) {
        self.monitors = monitors.into_iter().collect();
        if self.monitors.len() > MAX_MONITORS {
            log::warn!(
                "init: {} monitors reported, keeping the first {MAX_MONITORS}",
                self.monitors.len()
            );
            self.monitors.truncate(MAX_MONITORS);
        }
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn set_features(&mut self, features: Features) {
        self.features = features;
    }

    /// The damage tracker, present between `start` and `uninit`.
    pub fn tracker(&self) -> Option<&DamageTracker> {
        self.tracker.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.capture_thread.is_some()
    }

    /// Binds the tracker to `surface` and launches the capture thread.
    pub fn start_capture(
        &mut self,
        surface: Arc<Surface>,
        source: Arc<dyn EventSource>,
        native: Option<Arc<dyn NativeDamage>>,
    ) -> Result<(), SubsystemError> {
        if self.capture_thread.is_some() {
            return Err(SubsystemError::AlreadyRunning);
        }
        let tracker = DamageTracker::new(surface, native);
        self.capture_thread = Some(CaptureThread::spawn(source, tracker.clone())?);
        self.tracker = Some(tracker);
        Ok(())
    }

    /// Signals the capture thread and waits for it to exit. No-op when idle.
    pub fn stop_capture(&mut self) -> Result<(), SubsystemError> {
        match self.capture_thread.take() {
            Some(mut thread) => thread.stop(),
            None => Ok(()),
        }
    }

    /// Stops capture and forgets everything negotiated at `init`.
    pub fn reset(&mut self) -> Result<(), SubsystemError> {
        let stopped = self.stop_capture();
        self.tracker = None;
        self.monitors.clear();
        self.features = Features::default();
        stopped
    }
}

// ---------------------------------------------------------------------------
// Subsystem contract
// ---------------------------------------------------------------------------

/// The capability set a capture backend exposes to the shadow server.
///
/// Lifecycle: `init` -> `start` -> `stop` -> `uninit` -> `free`. Only `start`
/// creates concurrency; every other call is synchronous. Runtime operations
/// take `&self` so the server can call them from its encoder and input
/// threads concurrently.
pub trait ShadowSubsystem: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn common(&self) -> &SubsystemCommon;

    /// Connects to the desktop and negotiates format, shared buffer and
    /// extensions. Failure is fatal for the session.
    fn init(&mut self) -> Result<(), SubsystemError>;

    /// Releases everything `init` acquired. Stops capture first if needed.
    fn uninit(&mut self) -> Result<(), SubsystemError>;

    /// Binds the server's surface and spawns the capture thread.
    fn start(&mut self, surface: Arc<Surface>) -> Result<(), SubsystemError>;

    /// Stops the capture thread and waits for it to exit.
    fn stop(&mut self) -> Result<(), SubsystemError>;

    /// Releases all resources. Safe to call repeatedly and after `uninit`.
    fn free(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}: stop during free failed: {e}", self.name());
        }
        if let Err(e) = self.uninit() {
            log::warn!("{}: uninit during free failed: {e}", self.name());
        }
    }

    /// Copies every pixel changed since the last call into the surface.
    ///
    /// Returns the copied rectangle, or `None` when nothing was dirty.
    fn surface_copy(&self) -> Result<Option<Rect>, SubsystemError>;

    fn synchronize_event(&self, flags: SyncFlags) -> Result<(), SubsystemError>;

    fn keyboard_event(&self, flags: KeyboardFlags, code: u16) -> Result<(), SubsystemError>;

    fn unicode_keyboard_event(&self, flags: KeyboardFlags, code: u16)
        -> Result<(), SubsystemError>;

    fn mouse_event(&self, flags: PointerFlags, x: u16, y: u16) -> Result<(), SubsystemError>;

    fn extended_mouse_event(
        &self,
        flags: ExtendedPointerFlags,
        x: u16,
        y: u16,
    ) -> Result<(), SubsystemError>;

    /// Reports whether an input operation is real, a no-op, or unported.
    fn input_support(&self, op: InputOperation) -> InputSupport;

    fn monitors(&self) -> &[MonitorDef] {
        self.common().monitors()
    }

    fn features(&self) -> Features {
        self.common().features()
    }

    /// Marks the whole screen dirty. The server calls this on a fixed cadence
    /// when `features().damage` is false.
    fn refresh_full_screen(&self) -> Result<(), SubsystemError> {
        let tracker = self.common().tracker().ok_or(SubsystemError::NotStarted)?;
        tracker.invalidate_all();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Creates the backend for the configured (or detected) windowing system.
#[cfg(target_os = "linux")]
pub fn create_subsystem(config: &Config) -> Result<Box<dyn ShadowSubsystem>, SubsystemError> {
    linux::create_subsystem(config)
}

/// Creates the backend for the configured (or detected) windowing system.
#[cfg(not(target_os = "linux"))]
pub fn create_subsystem(_config: &Config) -> Result<Box<dyn ShadowSubsystem>, SubsystemError> {
    Err(SubsystemError::Unavailable(
        "no shadow backend for this operating system".into(),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_list_is_bounded() {
        let mut common = SubsystemCommon::new();
        common.set_monitors((0..20).map(|_| MonitorDef::primary(10, 10)));
        assert_eq!(common.monitors().len(), MAX_MONITORS);
    }

    #[test]
    fn primary_monitor_spans_screen() {
        let m = MonitorDef::primary(1920, 1080);
        assert_eq!((m.left, m.top, m.right, m.bottom), (0, 0, 1920, 1080));
        assert_eq!((m.width(), m.height()), (1920, 1080));
        assert!(m.primary);
    }

    #[test]
    fn stop_on_idle_common_is_noop() {
        let mut common = SubsystemCommon::new();
        assert!(!common.is_running());
        assert!(common.stop_capture().is_ok());
        assert!(common.reset().is_ok());
    }

    #[test]
    fn error_kinds_follow_taxonomy() {
        let connect = SubsystemError::Connect {
            endpoint: ":0".into(),
            reason: "refused".into(),
        };
        assert_eq!(connect.kind(), ErrorKind::FatalInit);
        assert_eq!(
            SubsystemError::Degraded("no MIT-SHM".into()).kind(),
            ErrorKind::DegradedCapability
        );
        assert_eq!(
            SubsystemError::Capture("GetImage".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(SubsystemError::NotStarted.kind(), ErrorKind::Lifecycle);
    }

    #[test]
    fn display_lock_survives_poisoning() {
        let lock = Arc::new(DisplayLock::new());
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.acquire();
            panic!("poison the display lock");
        })
        .join();
        drop(lock.acquire());
    }
}
