//! MIT-SHM fast path: a screen-sized pixmap backed by a SysV shared-memory
//! segment, so captured pixels are read in place instead of being streamed
//! over the socket.

use std::io;
use std::ptr;
use std::sync::Arc;

use x11rb::connection::Connection;
use x11rb::protocol::shm::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ConnectionExt as _, CreateGCAux, Gcontext, Pixmap, SubwindowMode, GX};

use crate::pixel::ImageView;
use crate::platform::capture::SharedPixmap;
use crate::platform::SubsystemError;
use crate::region::Rect;

use super::display::X11Display;

// ---------------------------------------------------------------------------
// Shared-memory segment
// ---------------------------------------------------------------------------

/// A private SysV segment mapped into this process.
struct ShmSegment {
    id: libc::c_int,
    addr: *mut u8,
    size: usize,
}

// The mapping is plain memory owned by this value.
unsafe impl Send for ShmSegment {}

impl ShmSegment {
    fn new(size: usize) -> io::Result<Self> {
        // SAFETY: plain SysV IPC calls; every result is checked.
        let id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600) };
        if id < 0 {
            return Err(io::Error::last_os_error());
        }
        let addr = unsafe { libc::shmat(id, ptr::null(), 0) };
        if addr as isize == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::shmctl(id, libc::IPC_RMID, ptr::null_mut()) };
            return Err(err);
        }
        Ok(Self {
            id,
            addr: addr.cast(),
            size,
        })
    }

    /// Schedules removal once every attachment is gone, so the segment cannot
    /// outlive both processes.
    fn mark_removed(&self) {
        // SAFETY: `id` names a segment this value created.
        unsafe { libc::shmctl(self.id, libc::IPC_RMID, ptr::null_mut()) };
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `addr` maps `size` bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.addr, self.size) }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        self.mark_removed();
        // SAFETY: `addr` came from `shmat` and is detached exactly once.
        unsafe { libc::shmdt(self.addr as *const libc::c_void) };
    }
}

// ---------------------------------------------------------------------------
// Shared pixmap
// ---------------------------------------------------------------------------

/// Screen-sized pixmap whose storage is the shared segment, plus the GC used
/// to copy the root window into it.
pub struct ShmPixmap {
    display: Arc<X11Display>,
    segment: ShmSegment,
    seg: shm::Seg,
    pixmap: Pixmap,
    gc: Gcontext,
    stride: usize,
}

impl ShmPixmap {
    /// Negotiates MIT-SHM and builds the shared pixmap.
    ///
    /// Every failure is a `Degraded` error; the caller falls back to image
    /// requests.
    pub fn create(display: Arc<X11Display>) -> Result<Self, SubsystemError> {
        let degraded = |what: &str, e: &dyn std::fmt::Display| {
            SubsystemError::Degraded(format!("MIT-SHM {what}: {e}"))
        };

        if !display.has_extension(shm::X11_EXTENSION_NAME)? {
            return Err(SubsystemError::Degraded("MIT-SHM extension not present".into()));
        }
        let conn = display.conn();
        let version = conn
            .shm_query_version()
            .map_err(|e| degraded("query", &e))?
            .reply()
            .map_err(|e| degraded("query", &e))?;
        if !version.shared_pixmaps {
            return Err(SubsystemError::Degraded(
                "MIT-SHM without shared pixmap support".into(),
            ));
        }

        let (width, height) = (display.width(), display.height());
        let stride = display.stride(width);
        let segment =
            ShmSegment::new(stride * height as usize).map_err(|e| degraded("segment", &e))?;

        let seg = conn.generate_id()?;
        conn.shm_attach(seg, segment.id as u32, false)
            .map_err(|e| degraded("attach", &e))?
            .check()
            .map_err(|e| degraded("attach", &e))?;
        segment.mark_removed();

        // From here on `Drop` detaches and frees whatever was created.
        let mut shared = Self {
            display: Arc::clone(&display),
            segment,
            seg,
            pixmap: x11rb::NONE,
            gc: x11rb::NONE,
            stride,
        };

        let pixmap = conn.generate_id()?;
        conn.shm_create_pixmap(
            pixmap,
            display.root(),
            width,
            height,
            display.format().depth,
            seg,
            0,
        )
        .map_err(|e| degraded("pixmap", &e))?
        .check()
        .map_err(|e| degraded("pixmap", &e))?;
        shared.pixmap = pixmap;

        let gc = conn.generate_id()?;
        let aux = CreateGCAux::new()
            .subwindow_mode(SubwindowMode::INCLUDE_INFERIORS)
            .graphics_exposures(0u32)
            .function(GX::COPY);
        conn.create_gc(gc, pixmap, &aux)?.check()?;
        shared.gc = gc;

        log::debug!(
            "init: shared pixmap {width}x{height}, {} bytes, stride {stride}",
            shared.segment.size
        );
        Ok(shared)
    }
}

impl SharedPixmap for ShmPixmap {
    fn refresh(&mut self, rect: Rect) -> Result<(), SubsystemError> {
        let (x, y) = (rect.left as i16, rect.top as i16);
        self.display.conn().copy_area(
            self.display.root(),
            self.pixmap,
            self.gc,
            x,
            y,
            x,
            y,
            rect.width(),
            rect.height(),
        )?;
        self.display.sync()
    }

    fn image(&self) -> ImageView<'_> {
        ImageView {
            data: self.segment.as_slice(),
            stride: self.stride,
            format: self.display.format().pixel,
        }
    }
}

impl Drop for ShmPixmap {
    fn drop(&mut self) {
        let conn = self.display.conn();
        if self.gc != x11rb::NONE {
            let _ = conn.free_gc(self.gc);
        }
        if self.pixmap != x11rb::NONE {
            let _ = conn.free_pixmap(self.pixmap);
        }
        let _ = conn.shm_detach(self.seg);
        // The server must have detached before the segment is unmapped.
        if let Err(e) = self.display.sync() {
            log::debug!("uninit: sync after MIT-SHM detach failed: {e}");
        }
    }
}
