//! The X connection and everything negotiated from the connection setup.

use std::env;
use std::os::unix::io::{AsFd, BorrowedFd};

use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::xproto::{
    ChangeWindowAttributesAux, ConnectionExt as _, Depth, EventMask, Format, ImageOrder,
    VisualClass, Visualtype, Window,
};
use x11rb::rust_connection::RustConnection;

use crate::pixel::{scanline_bytes, PixelFormat};
use crate::platform::{DisplayLock, SubsystemError};

/// Endpoint used when neither the config nor `$DISPLAY` names one.
pub const DEFAULT_ENDPOINT: &str = ":0";

/// How the root window's pixels are laid out in images and pixmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenFormat {
    pub depth: u8,
    pub bits_per_pixel: u8,
    pub scanline_pad: u8,
    pub pixel: PixelFormat,
}

/// An open display plus the default screen's geometry and pixel format.
///
/// Shared (`Arc`) by the capture strategy, damage handle, event source and
/// input injector; `lock` serializes their use of the connection.
pub struct X11Display {
    conn: RustConnection,
    root: Window,
    width: u16,
    height: u16,
    format: ScreenFormat,
    lock: DisplayLock,
}

impl X11Display {
    /// Connects to `endpoint` and validates the default screen's format.
    pub fn open(endpoint: &str) -> Result<Self, SubsystemError> {
        let (conn, screen_num) =
            x11rb::connect(Some(endpoint)).map_err(|e| SubsystemError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let (root, width, height, format) = {
            let setup = conn.setup();
            let screen = setup.roots.get(screen_num).ok_or_else(|| {
                SubsystemError::Unavailable(format!("display {endpoint} has no screen {screen_num}"))
            })?;
            let format = negotiate_format(
                setup.image_byte_order,
                &setup.pixmap_formats,
                &screen.allowed_depths,
                screen.root_depth,
            )?;
            (
                screen.root,
                screen.width_in_pixels,
                screen.height_in_pixels,
                format,
            )
        };

        Ok(Self {
            conn,
            root,
            width,
            height,
            format,
            lock: DisplayLock::new(),
        })
    }

    pub fn conn(&self) -> &RustConnection {
        &self.conn
    }

    pub fn root(&self) -> Window {
        self.root
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn format(&self) -> ScreenFormat {
        self.format
    }

    /// Bytes per scanline of a `width`-pixel image in the screen format.
    pub fn stride(&self, width: u16) -> usize {
        scanline_bytes(
            width as usize,
            self.format.bits_per_pixel as usize,
            self.format.scanline_pad as usize,
        )
    }

    pub fn lock(&self) -> &DisplayLock {
        &self.lock
    }

    /// The connection's socket, for readiness polling.
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.conn.stream().as_fd()
    }

    pub fn has_extension(&self, name: &'static str) -> Result<bool, SubsystemError> {
        Ok(self.conn.extension_information(name)?.is_some())
    }

    /// Round-trips to the server, so every earlier request has been
    /// processed when this returns.
    pub fn sync(&self) -> Result<(), SubsystemError> {
        self.conn.get_input_focus()?.reply()?;
        Ok(())
    }

    /// Asks for structure notifications on the root window.
    pub fn select_root_input(&self) -> Result<(), SubsystemError> {
        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY);
        self.conn.change_window_attributes(self.root, &aux)?.check()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Endpoint and format selection
// ---------------------------------------------------------------------------

/// Config endpoint, else `$DISPLAY`, else `:0`.
pub fn resolve_endpoint(configured: Option<&str>) -> String {
    pick_endpoint(configured, env::var("DISPLAY").ok().as_deref())
}

fn pick_endpoint(configured: Option<&str>, from_env: Option<&str>) -> String {
    configured
        .or(from_env.filter(|v| !v.is_empty()))
        .unwrap_or(DEFAULT_ENDPOINT)
        .to_string()
}

fn find_pixmap_format(formats: &[Format], depth: u8) -> Option<&Format> {
    formats.iter().find(|f| f.depth == depth)
}

fn find_truecolor_visual(depths: &[Depth], depth: u8) -> Option<&Visualtype> {
    depths
        .iter()
        .filter(|d| d.depth == depth)
        .flat_map(|d| d.visuals.iter())
        .find(|v| v.class == VisualClass::TRUE_COLOR)
}

fn negotiate_format(
    byte_order: ImageOrder,
    formats: &[Format],
    depths: &[Depth],
    depth: u8,
) -> Result<ScreenFormat, SubsystemError> {
    if byte_order != ImageOrder::LSB_FIRST {
        return Err(SubsystemError::UnsupportedFormat(
            "MSB-first image byte order".into(),
        ));
    }
    let pixmap = find_pixmap_format(formats, depth).ok_or_else(|| {
        SubsystemError::UnsupportedFormat(format!("no pixmap format for depth {depth}"))
    })?;
    let visual = find_truecolor_visual(depths, depth).ok_or_else(|| {
        SubsystemError::UnsupportedFormat(format!("no TrueColor visual at depth {depth}"))
    })?;
    let pixel = PixelFormat::from_masks(
        pixmap.bits_per_pixel,
        visual.red_mask,
        visual.green_mask,
        visual.blue_mask,
    )
    .ok_or_else(|| {
        SubsystemError::UnsupportedFormat(format!(
            "{} bpp with masks {:#x}/{:#x}/{:#x}",
            pixmap.bits_per_pixel, visual.red_mask, visual.green_mask, visual.blue_mask
        ))
    })?;

    Ok(ScreenFormat {
        depth,
        bits_per_pixel: pixmap.bits_per_pixel,
        scanline_pad: pixmap.scanline_pad,
        pixel,
    })
}
