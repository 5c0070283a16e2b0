//! Frame capture: copy the dirty bounding box into the canonical surface.
//!
//! The pixel source is a strategy picked at `init`:
//! - `SharedCapture` copies the screen area into a shared-memory pixmap and
//!   reads it in place (zero-copy from the display server).
//! - `SnapshotCapture` requests a fresh image of exactly the dirty area.
//!
//! Both produce the same surface content for the same damage.
//!
//! Lock order is surface, then display. The surface lock is held across the
//! pixel transfer and validation so an invalidation arriving mid-copy waits
//! and is kept.

use crate::pixel::{image_copy, ImageView, PixelFormat};
use crate::region::Rect;
use crate::surface::SurfaceState;

use super::damage::DamageTracker;
use super::{DisplayLock, SubsystemError};

// ---------------------------------------------------------------------------
// Strategy seam
// ---------------------------------------------------------------------------

/// Extracts one rectangle of the live screen into the surface.
pub trait CaptureStrategy: Send {
    fn name(&self) -> &'static str;

    /// Writes the pixels of `rect` into `dst` at the same coordinates.
    fn extract(&mut self, rect: Rect, dst: &mut SurfaceState) -> Result<(), SubsystemError>;
}

/// A screen-sized image backed by memory shared with the display server.
pub trait SharedPixmap: Send {
    /// Copies `rect` of the screen into the image at the same coordinates and
    /// returns once the copy is complete.
    fn refresh(&mut self, rect: Rect) -> Result<(), SubsystemError>;

    /// The whole shared image, in screen coordinates.
    fn image(&self) -> ImageView<'_>;
}

/// Produces fresh images of a screen rectangle.
pub trait Snapshotter: Send {
    fn snapshot(&mut self, rect: Rect) -> Result<Snapshot, SubsystemError>;
}

/// An owned image whose first pixel is the top-left of the requested rect.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub data: Vec<u8>,
    pub stride: usize,
    pub format: PixelFormat,
}

impl Snapshot {
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            data: &self.data,
            stride: self.stride,
            format: self.format,
        }
    }
}

fn origin(rect: Rect) -> (usize, usize) {
    (rect.left as usize, rect.top as usize)
}

fn size(rect: Rect) -> (usize, usize) {
    (rect.width() as usize, rect.height() as usize)
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Capture through a shared-memory pixmap.
pub struct SharedCapture<P> {
    pixmap: P,
}

impl<P: SharedPixmap> SharedCapture<P> {
    pub fn new(pixmap: P) -> Self {
        Self { pixmap }
    }
}

impl<P: SharedPixmap> CaptureStrategy for SharedCapture<P> {
    fn name(&self) -> &'static str {
        "shared-memory"
    }

    fn extract(&mut self, rect: Rect, dst: &mut SurfaceState) -> Result<(), SubsystemError> {
        self.pixmap.refresh(rect)?;
        let src = self.pixmap.image();
        image_copy(&mut dst.image_mut(), origin(rect), &src, origin(rect), size(rect))?;
        Ok(())
    }
}

/// Capture through one image request per frame.
pub struct SnapshotCapture<S> {
    source: S,
}

impl<S: Snapshotter> SnapshotCapture<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: Snapshotter> CaptureStrategy for SnapshotCapture<S> {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn extract(&mut self, rect: Rect, dst: &mut SurfaceState) -> Result<(), SubsystemError> {
        let snapshot = self.source.snapshot(rect)?;
        image_copy(&mut dst.image_mut(), origin(rect), &snapshot.view(), (0, 0), size(rect))?;
        Ok(())
    }
}

/// Picks the shared-memory strategy when it is enabled and `shared` succeeds,
/// otherwise the snapshot fallback. The flag is true when shared memory won.
pub fn select_strategy<P, S, FP, FS>(
    use_shm: bool,
    shared: FP,
    snapshot: FS,
) -> (Box<dyn CaptureStrategy>, bool)
where
    P: SharedPixmap + 'static,
    S: Snapshotter + 'static,
    FP: FnOnce() -> Result<P, SubsystemError>,
    FS: FnOnce() -> S,
{
    if use_shm {
        match shared() {
            Ok(pixmap) => return (Box::new(SharedCapture::new(pixmap)), true),
            Err(e) => log::warn!("init: {e}; falling back to image requests"),
        }
    } else {
        log::info!("init: shared memory capture disabled by config");
    }
    (Box::new(SnapshotCapture::new(snapshot())), false)
}

// ---------------------------------------------------------------------------
// Frame capture
// ---------------------------------------------------------------------------

/// Copies the bounding box of the dirty region into the surface, validates
/// exactly that box and records it as updated for the encoder.
///
/// Returns `Ok(None)` without touching the display when nothing is dirty. On
/// error, whether from the strategy or the native damage subtract, the dirty
/// and updated regions are left as they were so the next call retries.
pub fn surface_copy(
    tracker: &DamageTracker,
    display: &DisplayLock,
    strategy: &mut dyn CaptureStrategy,
) -> Result<Option<Rect>, SubsystemError> {
    let mut state = tracker.surface().lock();
    let Some(extents) = state.invalid_region().extents() else {
        return Ok(None);
    };

    let _display = display.acquire();
    strategy.extract(extents, &mut state)?;
    tracker.validate(&mut state, extents)?;
    state.mark_updated(extents);

    log::trace!("capture: copied {extents:?} via {}", strategy.name());
    Ok(Some(extents))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::damage::NativeDamage;
    use crate::surface::Surface;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    const W: u16 = 64;
    const H: u16 = 48;

    /// A fake RGB565 screen with a distinct value per pixel.
    fn screen() -> Arc<Vec<u8>> {
        let mut data = Vec::with_capacity(W as usize * H as usize * 2);
        for y in 0..H as u32 {
            for x in 0..W as u32 {
                let v = ((x * 7 + y * 131) & 0xffff) as u16;
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
        Arc::new(data)
    }

    const STRIDE: usize = W as usize * 2;

    struct FakeShared {
        screen: Arc<Vec<u8>>,
        shared: Vec<u8>,
        refreshes: Arc<AtomicUsize>,
    }

    impl SharedPixmap for FakeShared {
        fn refresh(&mut self, rect: Rect) -> Result<(), SubsystemError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            for y in rect.top as usize..rect.bottom as usize {
                let start = y * STRIDE + rect.left as usize * 2;
                let end = y * STRIDE + rect.right as usize * 2;
                self.shared[start..end].copy_from_slice(&self.screen[start..end]);
            }
            Ok(())
        }

        fn image(&self) -> ImageView<'_> {
            ImageView {
                data: &self.shared,
                stride: STRIDE,
                format: PixelFormat::Rgb565,
            }
        }
    }

    struct FakeSnapshots {
        screen: Arc<Vec<u8>>,
        fail: bool,
    }

    impl Snapshotter for FakeSnapshots {
        fn snapshot(&mut self, rect: Rect) -> Result<Snapshot, SubsystemError> {
            if self.fail {
                return Err(SubsystemError::Capture("no image".into()));
            }
            // Pad rows to 32 bits like an X server would.
            let stride = (rect.width() as usize * 2).div_ceil(4) * 4;
            let mut data = vec![0u8; stride * rect.height() as usize];
            for (row, y) in (rect.top as usize..rect.bottom as usize).enumerate() {
                let start = y * STRIDE + rect.left as usize * 2;
                let len = rect.width() as usize * 2;
                data[row * stride..row * stride + len]
                    .copy_from_slice(&self.screen[start..start + len]);
            }
            Ok(Snapshot {
                data,
                stride,
                format: PixelFormat::Rgb565,
            })
        }
    }

    fn shared_strategy(refreshes: Arc<AtomicUsize>) -> SharedCapture<FakeShared> {
        SharedCapture::new(FakeShared {
            screen: screen(),
            shared: vec![0; STRIDE * H as usize],
            refreshes,
        })
    }

    fn tracker() -> DamageTracker {
        DamageTracker::new(Arc::new(Surface::new(W, H)), None)
    }

    #[test]
    fn clean_surface_copies_nothing() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let mut strategy = shared_strategy(refreshes.clone());
        let tracker = tracker();
        let copied = surface_copy(&tracker, &DisplayLock::new(), &mut strategy).unwrap();
        assert_eq!(copied, None);
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn second_copy_without_damage_is_idle() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let mut strategy = shared_strategy(refreshes.clone());
        let tracker = tracker();
        let display = DisplayLock::new();

        tracker.invalidate(Rect::new(4, 4, 20, 10));
        assert!(surface_copy(&tracker, &display, &mut strategy).unwrap().is_some());
        assert_eq!(surface_copy(&tracker, &display, &mut strategy).unwrap(), None);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn copies_bounding_box_of_all_damage() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let mut strategy = shared_strategy(refreshes);
        let tracker = tracker();

        tracker.invalidate(Rect::new(2, 3, 5, 6));
        tracker.invalidate(Rect::new(30, 20, 40, 25));
        let copied = surface_copy(&tracker, &DisplayLock::new(), &mut strategy)
            .unwrap()
            .unwrap();

        assert_eq!(copied, Rect::new(2, 3, 40, 25));
        let state = tracker.surface().lock();
        assert!(state.invalid_region().is_empty());
        assert!(state.updated_region().contains_rect(&copied));
    }

    #[test]
    fn copied_pixels_are_converted_and_placed() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let mut strategy = shared_strategy(refreshes);
        let tracker = tracker();
        tracker.invalidate(Rect::new(10, 10, 12, 12));
        surface_copy(&tracker, &DisplayLock::new(), &mut strategy).unwrap();

        let state = tracker.surface().lock();
        let px = |x: usize, y: usize| {
            let off = y * state.scanline() + x * 4;
            state.data()[off..off + 4].to_vec()
        };
        // Outside the damage nothing was written.
        assert_eq!(px(0, 0), vec![0, 0, 0, 0]);
        // Inside the damage the alpha byte is set by the conversion.
        assert_eq!(px(10, 10)[3], 0xff);
        assert_eq!(px(11, 11)[3], 0xff);
        assert_eq!(px(12, 12)[3], 0);
    }

    #[test]
    fn snapshot_fallback_matches_shared_path() {
        let damage = [
            Rect::new(0, 0, 3, 3),
            Rect::new(17, 9, 33, 30),
            Rect::new(60, 40, 64, 48),
        ];

        let shared_tracker = tracker();
        let snapshot_tracker = tracker();
        let mut shared = shared_strategy(Arc::new(AtomicUsize::new(0)));
        let mut snapshot = SnapshotCapture::new(FakeSnapshots {
            screen: screen(),
            fail: false,
        });

        for rect in damage {
            shared_tracker.invalidate(rect);
            snapshot_tracker.invalidate(rect);
        }
        let display = DisplayLock::new();
        let a = surface_copy(&shared_tracker, &display, &mut shared).unwrap();
        let b = surface_copy(&snapshot_tracker, &display, &mut snapshot).unwrap();

        assert_eq!(a, b);
        assert_eq!(
            shared_tracker.surface().lock().data(),
            snapshot_tracker.surface().lock().data()
        );
    }

    #[test]
    fn failed_extract_keeps_damage() {
        let tracker = tracker();
        let mut strategy = SnapshotCapture::new(FakeSnapshots {
            screen: screen(),
            fail: true,
        });
        tracker.invalidate(Rect::new(1, 1, 9, 9));

        let result = surface_copy(&tracker, &DisplayLock::new(), &mut strategy);
        assert!(matches!(result, Err(SubsystemError::Capture(_))));

        let state = tracker.surface().lock();
        assert!(state.invalid_region().contains_rect(&Rect::new(1, 1, 9, 9)));
        assert!(state.updated_region().is_empty());
    }

    fn fake_snapshots() -> FakeSnapshots {
        FakeSnapshots {
            screen: screen(),
            fail: false,
        }
    }

    #[test]
    fn shared_memory_is_selected_when_available() {
        let (strategy, shm) = select_strategy(
            true,
            || Ok(shared_strategy(Arc::new(AtomicUsize::new(0))).pixmap),
            fake_snapshots,
        );
        assert!(shm);
        assert_eq!(strategy.name(), "shared-memory");
    }

    #[test]
    fn shared_memory_failure_falls_back_to_snapshots() {
        let (strategy, shm) = select_strategy::<FakeShared, _, _, _>(
            true,
            || Err(SubsystemError::Degraded("MIT-SHM extension not present".into())),
            fake_snapshots,
        );
        assert!(!shm);
        assert_eq!(strategy.name(), "snapshot");
    }

    #[test]
    fn disabled_shared_memory_is_never_tried() {
        let (strategy, shm) = select_strategy::<FakeShared, _, _, _>(
            false,
            || panic!("shared memory must not be negotiated"),
            fake_snapshots,
        );
        assert!(!shm);
        assert_eq!(strategy.name(), "snapshot");
    }

    #[test]
    fn fallback_strategy_still_captures() {
        let (mut strategy, _) = select_strategy::<FakeShared, _, _, _>(
            true,
            || Err(SubsystemError::Degraded("no shared pixmaps".into())),
            fake_snapshots,
        );
        let tracker = tracker();
        tracker.invalidate(Rect::new(5, 5, 9, 9));
        let copied = surface_copy(&tracker, &DisplayLock::new(), &mut *strategy).unwrap();
        assert_eq!(copied, Some(Rect::new(5, 5, 9, 9)));
    }

    struct NoopCapture;

    impl CaptureStrategy for NoopCapture {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn extract(&mut self, _rect: Rect, _dst: &mut SurfaceState) -> Result<(), SubsystemError> {
            Ok(())
        }
    }

    struct RejectingDamage;

    impl NativeDamage for RejectingDamage {
        fn subtract(&self, _rect: Rect) -> Result<(), SubsystemError> {
            Err(SubsystemError::Native("BadDamage".into()))
        }
    }

    #[test]
    fn failed_native_subtract_keeps_damage() {
        let tracker = DamageTracker::new(
            Arc::new(Surface::new(W, H)),
            Some(Arc::new(RejectingDamage) as Arc<dyn NativeDamage>),
        );
        tracker.invalidate(Rect::new(3, 3, 7, 7));

        let result = surface_copy(&tracker, &DisplayLock::new(), &mut NoopCapture);
        assert!(matches!(result, Err(SubsystemError::Native(_))));

        let state = tracker.surface().lock();
        assert!(state.invalid_region().contains_rect(&Rect::new(3, 3, 7, 7)));
        assert!(state.updated_region().is_empty());
    }

    /// Signals when the copy is in flight, then lingers so a concurrent
    /// invalidation has to wait for the surface lock.
    struct SlowCapture {
        in_flight: mpsc::Sender<()>,
    }

    impl CaptureStrategy for SlowCapture {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn extract(&mut self, _rect: Rect, _dst: &mut SurfaceState) -> Result<(), SubsystemError> {
            let _ = self.in_flight.send(());
            thread::sleep(Duration::from_millis(50));
            Ok(())
        }
    }

    #[test]
    fn damage_racing_an_inflight_copy_stays_dirty() {
        let tracker = tracker();
        tracker.invalidate(Rect::new(0, 0, 32, 32));

        let (tx, rx) = mpsc::channel();
        let racer = {
            let tracker = tracker.clone();
            thread::spawn(move || {
                rx.recv().unwrap();
                tracker.invalidate(Rect::new(8, 8, 16, 16));
            })
        };

        let mut strategy = SlowCapture { in_flight: tx };
        let copied = surface_copy(&tracker, &DisplayLock::new(), &mut strategy).unwrap();
        racer.join().unwrap();

        assert_eq!(copied, Some(Rect::new(0, 0, 32, 32)));
        assert!(tracker
            .surface()
            .lock()
            .invalid_region()
            .contains_rect(&Rect::new(8, 8, 16, 16)));
    }
}
