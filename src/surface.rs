//! The canonical surface shared between the capture backend and the encoder.
//!
//! One `Mutex` guards both the pixel buffer and its regions:
//! - `invalid`: screen areas changed since they were last captured.
//! - `updated`: areas copied into the buffer that the encoder has not yet
//!   consumed.

use std::sync::{Mutex, MutexGuard};

use crate::pixel::{ImageViewMut, PixelFormat};
use crate::region::{Rect, Region};

/// Server-owned destination for captured pixels.
pub struct Surface {
    state: Mutex<SurfaceState>,
}

/// Everything behind the surface lock.
pub struct SurfaceState {
    width: u16,
    height: u16,
    scanline: usize,
    data: Vec<u8>,
    invalid: Region,
    updated: Region,
}

impl Surface {
    /// Allocates a zeroed XRGB32 surface.
    pub fn new(width: u16, height: u16) -> Self {
        let scanline = width as usize * PixelFormat::CANONICAL.bytes_per_pixel();
        Self {
            state: Mutex::new(SurfaceState {
                width,
                height,
                scanline,
                data: vec![0; scanline * height as usize],
                invalid: Region::new(),
                updated: Region::new(),
            }),
        }
    }

    /// Acquires the surface lock.
    ///
    /// A poisoned lock is recovered: region updates are single calls that
    /// cannot leave the state half-written.
    pub fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SurfaceState {
    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn scanline(&self) -> usize {
        self.scanline
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Writable view of the pixel buffer in the canonical format.
    pub fn image_mut(&mut self) -> ImageViewMut<'_> {
        ImageViewMut {
            data: &mut self.data,
            stride: self.scanline,
            format: PixelFormat::CANONICAL,
        }
    }

    /// Areas changed since they were last captured.
    pub fn invalid_region(&self) -> &Region {
        &self.invalid
    }

    pub(crate) fn invalid_region_mut(&mut self) -> &mut Region {
        &mut self.invalid
    }

    /// Areas copied but not yet handed to the encoder.
    pub fn updated_region(&self) -> &Region {
        &self.updated
    }

    pub(crate) fn mark_updated(&mut self, rect: Rect) {
        self.updated.union_rect(rect);
    }

    /// Hands the updated region to the encoder, leaving it empty.
    pub fn take_updates(&mut self) -> Region {
        self.updated.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_surface_is_zeroed_and_clean() {
        let surface = Surface::new(8, 4);
        let state = surface.lock();
        assert_eq!(state.scanline(), 32);
        assert_eq!(state.data().len(), 128);
        assert!(state.data().iter().all(|b| *b == 0));
        assert!(state.invalid_region().is_empty());
        assert_eq!(state.bounds(), Rect::new(0, 0, 8, 4));
    }

    #[test]
    fn take_updates_drains() {
        let surface = Surface::new(8, 4);
        let mut state = surface.lock();
        state.mark_updated(Rect::new(0, 0, 2, 2));
        let updates = state.take_updates();
        assert_eq!(updates.area(), 4);
        assert!(state.updated_region().is_empty());
    }
}
