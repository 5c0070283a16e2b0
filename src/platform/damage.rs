//! Dirty-region tracking between the capture thread and frame capture.
//!
//! `invalidate` grows the surface's dirty region; `validate` shrinks it by
//! exactly the rectangle that was just copied, both in the surface and in the
//! backend's own damage accounting. Nothing ever clears the region wholesale,
//! so a change that lands outside the copied rectangle is never lost.

use std::sync::Arc;

use crate::region::Rect;
use crate::surface::{Surface, SurfaceState};

use super::SubsystemError;

/// Backend-side damage accounting (e.g. an X DAMAGE object).
pub trait NativeDamage: Send + Sync {
    /// Removes `rect` so the backend reports future changes inside it again.
    fn subtract(&self, rect: Rect) -> Result<(), SubsystemError>;
}

/// Shared handle used by the capture thread (producer) and frame capture
/// (consumer).
#[derive(Clone)]
pub struct DamageTracker {
    surface: Arc<Surface>,
    native: Option<Arc<dyn NativeDamage>>,
}

impl DamageTracker {
    pub fn new(surface: Arc<Surface>, native: Option<Arc<dyn NativeDamage>>) -> Self {
        Self { surface, native }
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    /// Adds `rect`, clipped to the surface, to the dirty region.
    pub fn invalidate(&self, rect: Rect) {
        let mut state = self.surface.lock();
        let clipped = rect.intersection(&state.bounds());
        if clipped.is_empty() {
            return;
        }
        state.invalid_region_mut().union_rect(clipped);
        log::trace!("damage: invalidated {clipped:?}");
    }

    /// Marks the whole surface dirty.
    pub fn invalidate_all(&self) {
        let mut state = self.surface.lock();
        let bounds = state.bounds();
        state.invalid_region_mut().union_rect(bounds);
    }

    /// Removes exactly `rect` from the dirty region and from the native damage
    /// accounting.
    ///
    /// Must be called with the surface lock held (hence `&mut SurfaceState`)
    /// and only after the pixels of `rect` were copied. The native side goes
    /// first; if it fails the surface's dirty region is left untouched.
    pub fn validate(&self, state: &mut SurfaceState, rect: Rect) -> Result<(), SubsystemError> {
        if let Some(native) = &self.native {
            native.subtract(rect)?;
        }
        state.invalid_region_mut().subtract_rect(rect);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
