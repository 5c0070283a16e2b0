//! The background capture thread.
//!
//! `CaptureThread::spawn` starts a thread that owns a single-threaded tokio
//! runtime. The runtime waits on the display connection's file descriptor and,
//! whenever it becomes readable, drains the pending native events and feeds
//! the damaged rectangles into the `DamageTracker`.
//!
//! `stop` cancels a `CancellationToken` that the loop selects on alongside the
//! fd, so the thread exits promptly even while blocked with no traffic, then
//! joins it.

use std::os::unix::io::BorrowedFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio_util::sync::CancellationToken;

use crate::region::Rect;

use super::damage::DamageTracker;
use super::SubsystemError;

/// A native event stream the capture thread can wait on.
pub trait EventSource: Send + Sync {
    /// Descriptor that becomes readable when events arrive.
    fn fd(&self) -> BorrowedFd<'_>;

    /// Consumes every pending event without blocking and returns the damaged
    /// rectangles in arrival order.
    ///
    /// Implementations hold the display lock only while reading, never while
    /// the returned rectangles are applied.
    fn drain(&self) -> Result<Vec<Rect>, SubsystemError>;
}

/// Handle to the running capture thread.
pub struct CaptureThread {
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl CaptureThread {
    /// Spawns the capture thread.
    ///
    /// The runtime is built on the calling thread so that failure surfaces as
    /// an error from `start` rather than a silently dead thread.
    pub fn spawn(
        source: Arc<dyn EventSource>,
        tracker: DamageTracker,
    ) -> Result<Self, SubsystemError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let token = CancellationToken::new();
        let child = token.clone();
        let thread = thread::Builder::new()
            .name("shadow-capture".into())
            .spawn(move || {
                if let Err(e) = rt.block_on(event_loop(source, tracker, child)) {
                    log::error!("capture: event loop failed: {e}");
                }
            })?;

        log::debug!("capture: thread started");
        Ok(Self {
            token,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Signals the thread and waits for it to exit. Calling it again is a
    /// no-op.
    pub fn stop(&mut self) -> Result<(), SubsystemError> {
        self.token.cancel();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| SubsystemError::Other("capture thread panicked".into()))?;
            log::debug!("capture: thread stopped");
        }
        Ok(())
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ---------------------------------------------------------------------------
// Async loop
// ---------------------------------------------------------------------------

async fn event_loop(
    source: Arc<dyn EventSource>,
    tracker: DamageTracker,
    token: CancellationToken,
) -> Result<(), SubsystemError> {
    // The registration borrows the source's descriptor and is dropped first.
    let fd = AsyncFd::try_with_interest(source.fd(), Interest::READABLE)
        .map_err(|e| e.into_parts().1)?;

    // Events queued before registration produce no readiness edge.
    deliver(source.as_ref(), &tracker)?;

    loop {
        let mut guard = tokio::select! {
            _ = token.cancelled() => break,
            ready = fd.readable() => ready?,
        };
        if token.is_cancelled() {
            break;
        }
        guard.clear_ready();
        deliver(source.as_ref(), &tracker)?;
    }

    log::debug!("capture: stop signal received");
    Ok(())
}

fn deliver(source: &dyn EventSource, tracker: &DamageTracker) -> Result<(), SubsystemError> {
    for rect in source.drain()? {
        tracker.invalidate(rect);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Surface;
    use std::io::{ErrorKind, Read, Write};
    use std::os::unix::io::AsFd;
    use std::os::unix::net::UnixStream;
    use std::time::{Duration, Instant};

    /// Every byte written to the peer is a 1x1 damage at x = byte.
    struct SocketSource {
        rx: UnixStream,
    }

    impl EventSource for SocketSource {
        fn fd(&self) -> BorrowedFd<'_> {
            self.rx.as_fd()
        }

        fn drain(&self) -> Result<Vec<Rect>, SubsystemError> {
            let mut buf = [0u8; 64];
            let mut rects = Vec::new();
            loop {
                match (&self.rx).read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => rects.extend(
                        buf[..n]
                            .iter()
                            .map(|&b| Rect::new(b as u16, 0, b as u16 + 1, 1)),
                    ),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(rects)
        }
    }

    struct Harness {
        thread: CaptureThread,
        tracker: DamageTracker,
        tx: UnixStream,
        // Keeps the receiving end open after the thread lets go of it.
        _source: Arc<SocketSource>,
    }

    fn setup() -> Harness {
        let (tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();
        let tracker = DamageTracker::new(Arc::new(Surface::new(64, 4)), None);
        let source = Arc::new(SocketSource { rx });
        let thread = CaptureThread::spawn(source.clone(), tracker.clone()).unwrap();
        Harness {
            thread,
            tracker,
            tx,
            _source: source,
        }
    }

    fn wait_for(tracker: &DamageTracker, rect: Rect) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if tracker.surface().lock().invalid_region().contains_rect(&rect) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn readable_events_become_damage() {
        let mut h = setup();
        h.tx.write_all(&[5, 9]).unwrap();
        assert!(wait_for(&h.tracker, Rect::new(5, 0, 6, 1)));
        assert!(wait_for(&h.tracker, Rect::new(9, 0, 10, 1)));
        h.thread.stop().unwrap();
    }

    #[test]
    fn pending_events_are_drained_on_start() {
        let (tx, rx) = UnixStream::pair().unwrap();
        rx.set_nonblocking(true).unwrap();
        (&tx).write_all(&[3]).unwrap();

        let tracker = DamageTracker::new(Arc::new(Surface::new(64, 4)), None);
        let mut thread =
            CaptureThread::spawn(Arc::new(SocketSource { rx }), tracker.clone()).unwrap();
        assert!(wait_for(&tracker, Rect::new(3, 0, 4, 1)));
        thread.stop().unwrap();
    }

    #[test]
    fn stop_while_idle_returns_promptly() {
        let mut h = setup();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        h.thread.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!h.thread.is_running());

        // The descriptor is still open, but nothing watches it any more.
        h.tx.write_all(&[7]).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(h.tracker.surface().lock().invalid_region().is_empty());
    }

    #[test]
    fn stop_twice_is_ok() {
        let mut h = setup();
        h.thread.stop().unwrap();
        h.thread.stop().unwrap();
    }
}
