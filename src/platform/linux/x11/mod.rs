//! X11 shadow backend.
//!
//! `init` connects with x11rb and negotiates, in order:
//! 1. the screen's pixel format (fatal when unsupported),
//! 2. the MIT-SHM shared pixmap (else one `GetImage` per frame),
//! 3. XFIXES + DAMAGE (else the server refreshes the full screen on a timer),
//! 4. XTEST (else remote input is dropped).
//!
//! `start` binds the server's surface and runs the capture thread on the
//! connection's file descriptor.

mod damage;
mod display;
mod events;
mod shm;
mod snapshot;
mod xtest;

use std::sync::{Arc, Mutex, MutexGuard};

use x11rb::errors::{ConnectionError, ReplyError, ReplyOrIdError};

use crate::config::Config;
use crate::platform::capture::{self, select_strategy, CaptureStrategy};
use crate::platform::damage::{DamageTracker, NativeDamage};
use crate::platform::event_loop::EventSource;
use crate::platform::input::{
    dispatch, translate_extended_mouse, translate_keyboard, translate_mouse,
    ExtendedPointerFlags, KeyboardFlags, NativeInput, PointerFlags, SyncFlags,
};
use crate::platform::{
    Features, InputOperation, InputSupport, MonitorDef, ShadowSubsystem, SubsystemCommon,
    SubsystemError,
};
use crate::region::Rect;
use crate::surface::Surface;

use super::keycodes::x11_keycode;
use damage::{query_xfixes, XDamage};
use display::{resolve_endpoint, X11Display};
use events::X11EventSource;
use shm::ShmPixmap;
use snapshot::X11Snapshotter;
use xtest::XTestInjector;

impl From<ConnectionError> for SubsystemError {
    fn from(e: ConnectionError) -> Self {
        SubsystemError::Native(e.to_string())
    }
}

impl From<ReplyError> for SubsystemError {
    fn from(e: ReplyError) -> Self {
        SubsystemError::Native(e.to_string())
    }
}

impl From<ReplyOrIdError> for SubsystemError {
    fn from(e: ReplyOrIdError) -> Self {
        SubsystemError::Native(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Public struct
// ---------------------------------------------------------------------------

/// Shadows an X11 screen.
pub struct X11ShadowSubsystem {
    common: SubsystemCommon,
    endpoint: Option<String>,
    use_shm: bool,
    use_damage: bool,
    input_enabled: bool,
    display: Option<Arc<X11Display>>,
    capture: Mutex<Option<Box<dyn CaptureStrategy>>>,
    damage: Option<Arc<XDamage>>,
    events: Option<Arc<X11EventSource>>,
    injector: Option<XTestInjector>,
}

impl X11ShadowSubsystem {
    /// Creates an uninitialized backend; nothing is opened until `init`.
    pub fn new(config: &Config) -> Self {
        Self {
            common: SubsystemCommon::new(),
            endpoint: config.display.endpoint.clone(),
            use_shm: config.capture.use_shm,
            use_damage: config.capture.use_damage,
            input_enabled: config.input.enabled,
            display: None,
            capture: Mutex::new(None),
            damage: None,
            events: None,
            injector: None,
        }
    }

    fn capture_slot(&self) -> MutexGuard<'_, Option<Box<dyn CaptureStrategy>>> {
        self.capture.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn negotiate_capture(
        &self,
        display: &Arc<X11Display>,
        features: &mut Features,
    ) -> Box<dyn CaptureStrategy> {
        let (strategy, shm) = select_strategy(
            self.use_shm,
            || ShmPixmap::create(Arc::clone(display)),
            || X11Snapshotter::new(Arc::clone(display)),
        );
        features.shm = shm;
        strategy
    }

    fn negotiate_damage(
        &self,
        display: &Arc<X11Display>,
        features: &mut Features,
    ) -> Option<Arc<XDamage>> {
        if !self.use_damage {
            log::info!("init: damage tracking disabled by config");
            return None;
        }
        if let Err(e) = query_xfixes(display) {
            log::warn!("init: {e}; damage tracking unavailable");
            return None;
        }
        match XDamage::create(Arc::clone(display)) {
            Ok(damage) => {
                features.damage = true;
                Some(Arc::new(damage))
            }
            Err(e) => {
                log::warn!("init: {e}; falling back to periodic full refresh");
                None
            }
        }
    }

    fn negotiate_input(
        &self,
        display: &Arc<X11Display>,
        features: &mut Features,
    ) -> Option<XTestInjector> {
        if !self.input_enabled {
            log::info!("init: remote input disabled by config");
            return None;
        }
        match XTestInjector::new(Arc::clone(display)) {
            Ok(injector) => {
                features.xtest = true;
                Some(injector)
            }
            Err(e) => {
                log::warn!("init: {e}; remote input will be dropped");
                None
            }
        }
    }

    /// Feeds events x11rb queued while another thread awaited a reply.
    fn pump_queued_events(&self, tracker: &DamageTracker) {
        let Some(events) = &self.events else {
            return;
        };
        match events.drain() {
            Ok(rects) => rects.into_iter().for_each(|r| tracker.invalidate(r)),
            Err(e) => log::debug!("capture: event pump failed: {e}"),
        }
    }

    fn inject(&self, inputs: &[NativeInput]) -> Result<(), SubsystemError> {
        match (&self.display, &self.injector) {
            (Some(display), Some(injector)) => dispatch(injector, display.lock(), inputs),
            _ => {
                if !inputs.is_empty() {
                    log::trace!("input: injection unavailable, dropped {inputs:?}");
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ShadowSubsystem trait impl
// ---------------------------------------------------------------------------

impl ShadowSubsystem for X11ShadowSubsystem {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn common(&self) -> &SubsystemCommon {
        &self.common
    }

    fn init(&mut self) -> Result<(), SubsystemError> {
        if self.display.is_some() {
            log::warn!("init: already initialized");
            return Ok(());
        }

        let endpoint = resolve_endpoint(self.endpoint.as_deref());
        let display = Arc::new(X11Display::open(&endpoint)?);
        let format = display.format();
        log::info!(
            "init: connected to {endpoint}, screen {}x{} depth {} ({:?}, {} bpp)",
            display.width(),
            display.height(),
            format.depth,
            format.pixel,
            format.bits_per_pixel
        );

        let mut features = Features::default();
        let strategy = self.negotiate_capture(&display, &mut features);
        let damage = self.negotiate_damage(&display, &mut features);
        let injector = self.negotiate_input(&display, &mut features);
        display.select_root_input()?;
        let events = Arc::new(X11EventSource::new(Arc::clone(&display)));

        self.common
            .set_monitors([MonitorDef::primary(display.width(), display.height())]);
        self.common.set_features(features);
        *self.capture_slot() = Some(strategy);
        self.damage = damage;
        self.injector = injector;
        self.events = Some(events);
        self.display = Some(display);

        log::info!(
            "init: capture via {}, damage {}, input {}",
            if features.shm { "shared memory" } else { "GetImage" },
            if features.damage { "event-driven" } else { "polled" },
            if features.xtest { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), SubsystemError> {
        let stopped = self.common.reset();
        *self.capture_slot() = None;
        self.events = None;
        self.injector = None;
        self.damage = None;
        if self.display.take().is_some() {
            log::info!("uninit: disconnected");
        }
        stopped
    }

    fn start(&mut self, surface: Arc<Surface>) -> Result<(), SubsystemError> {
        let display = self.display.as_ref().ok_or(SubsystemError::NotInitialized)?;
        let events = self.events.clone().ok_or(SubsystemError::NotInitialized)?;

        let expected = (display.width(), display.height());
        let actual = {
            let state = surface.lock();
            (state.width(), state.height())
        };
        if actual != expected {
            return Err(SubsystemError::SurfaceMismatch { expected, actual });
        }

        let native = self
            .damage
            .clone()
            .map(|d| d as Arc<dyn NativeDamage>);
        self.common.start_capture(surface, events, native)?;

        // The first frame is a full copy.
        if let Some(tracker) = self.common.tracker() {
            tracker.invalidate_all();
        }
        log::info!("capture: started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SubsystemError> {
        if self.common.is_running() {
            log::info!("capture: stopping");
        }
        self.common.stop_capture()
    }

    fn surface_copy(&self) -> Result<Option<Rect>, SubsystemError> {
        let display = self.display.as_ref().ok_or(SubsystemError::NotInitialized)?;
        let tracker = self.common.tracker().ok_or(SubsystemError::NotStarted)?;

        let copied = {
            let mut slot = self.capture_slot();
            let strategy = slot.as_mut().ok_or(SubsystemError::NotInitialized)?;
            capture::surface_copy(tracker, display.lock(), &mut **strategy)
        };
        self.pump_queued_events(tracker);
        copied
    }

    fn synchronize_event(&self, flags: SyncFlags) -> Result<(), SubsystemError> {
        log::debug!("input: synchronize {flags:?} not handled on X11");
        Ok(())
    }

    fn keyboard_event(&self, flags: KeyboardFlags, code: u16) -> Result<(), SubsystemError> {
        match translate_keyboard(flags, code, x11_keycode) {
            Some(input) => self.inject(&[input]),
            None => Ok(()),
        }
    }

    fn unicode_keyboard_event(
        &self,
        flags: KeyboardFlags,
        code: u16,
    ) -> Result<(), SubsystemError> {
        log::debug!("input: unicode key {code:#06x} ({flags:?}) has no X11 equivalent");
        Ok(())
    }

    fn mouse_event(&self, flags: PointerFlags, x: u16, y: u16) -> Result<(), SubsystemError> {
        self.inject(&translate_mouse(flags, x, y))
    }

    fn extended_mouse_event(
        &self,
        flags: ExtendedPointerFlags,
        x: u16,
        y: u16,
    ) -> Result<(), SubsystemError> {
        self.inject(&translate_extended_mouse(flags, x, y))
    }

    fn input_support(&self, op: InputOperation) -> InputSupport {
        match op {
            InputOperation::UnicodeKeyboard => InputSupport::NoOp,
            InputOperation::Synchronize => InputSupport::NotPorted,
            InputOperation::Keyboard | InputOperation::Mouse | InputOperation::ExtendedMouse => {
                if self.injector.is_some() {
                    InputSupport::Native
                } else {
                    InputSupport::Unavailable
                }
            }
        }
    }
}

impl Drop for X11ShadowSubsystem {
    fn drop(&mut self) {
        self.free();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
