//! Pixel layouts and conversion into the canonical surface format.
//!
//! The canonical format is `Xrgb32`: 32-bit little-endian `0xXXRRGGBB`, i.e.
//! bytes B, G, R, X in memory. Native layouts are derived from the X visual's
//! channel masks and the pixmap format's bits-per-pixel.

use thiserror::Error;

/// Errors reported by [`image_copy`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PixelError {
    #[error("{side} rectangle {x},{y} {width}x{height} exceeds buffer ({len} bytes, stride {stride})")]
    OutOfBounds {
        side: &'static str,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        len: usize,
        stride: usize,
    },
}

// ---------------------------------------------------------------------------
// PixelFormat
// ---------------------------------------------------------------------------

/// Memory layout of one pixel (little-endian image byte order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32 bpp, red in bits 16..24.
    Xrgb32,
    /// 32 bpp, red in bits 0..8.
    Xbgr32,
    /// 24 bpp packed, red in the high byte.
    Rgb24,
    /// 16 bpp 5-6-5.
    Rgb565,
    /// 16 bpp 5-5-5.
    Rgb555,
}

impl PixelFormat {
    /// The format of the canonical surface buffer.
    pub const CANONICAL: PixelFormat = PixelFormat::Xrgb32;

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Xrgb32 | PixelFormat::Xbgr32 => 4,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgb565 | PixelFormat::Rgb555 => 2,
        }
    }

    /// Matches a visual's channel masks at the given bits-per-pixel.
    ///
    /// Returns `None` for layouts the converter does not handle (palettes,
    /// 30-bit deep color, unusual channel orders).
    pub fn from_masks(bits_per_pixel: u8, red: u32, green: u32, blue: u32) -> Option<Self> {
        match (bits_per_pixel, red, green, blue) {
            (32, 0x00ff_0000, 0x0000_ff00, 0x0000_00ff) => Some(PixelFormat::Xrgb32),
            (32, 0x0000_00ff, 0x0000_ff00, 0x00ff_0000) => Some(PixelFormat::Xbgr32),
            (24, 0x00ff_0000, 0x0000_ff00, 0x0000_00ff) => Some(PixelFormat::Rgb24),
            (16, 0xf800, 0x07e0, 0x001f) => Some(PixelFormat::Rgb565),
            (16, 0x7c00, 0x03e0, 0x001f) => Some(PixelFormat::Rgb555),
            _ => None,
        }
    }

    /// Decodes one pixel into 8-bit (r, g, b).
    fn read(self, px: &[u8]) -> (u8, u8, u8) {
        match self {
            PixelFormat::Xrgb32 | PixelFormat::Rgb24 => (px[2], px[1], px[0]),
            PixelFormat::Xbgr32 => (px[0], px[1], px[2]),
            PixelFormat::Rgb565 => {
                let v = u16::from_le_bytes([px[0], px[1]]);
                (
                    expand5((v >> 11) & 0x1f),
                    expand6((v >> 5) & 0x3f),
                    expand5(v & 0x1f),
                )
            }
            PixelFormat::Rgb555 => {
                let v = u16::from_le_bytes([px[0], px[1]]);
                (
                    expand5((v >> 10) & 0x1f),
                    expand5((v >> 5) & 0x1f),
                    expand5(v & 0x1f),
                )
            }
        }
    }

    /// Encodes (r, g, b) into one pixel.
    fn write(self, px: &mut [u8], (r, g, b): (u8, u8, u8)) {
        match self {
            PixelFormat::Xrgb32 => px[..4].copy_from_slice(&[b, g, r, 0xff]),
            PixelFormat::Xbgr32 => px[..4].copy_from_slice(&[r, g, b, 0xff]),
            PixelFormat::Rgb24 => px[..3].copy_from_slice(&[b, g, r]),
            PixelFormat::Rgb565 => {
                let v = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
                px[..2].copy_from_slice(&v.to_le_bytes());
            }
            PixelFormat::Rgb555 => {
                let v = ((r as u16 >> 3) << 10) | ((g as u16 >> 3) << 5) | (b as u16 >> 3);
                px[..2].copy_from_slice(&v.to_le_bytes());
            }
        }
    }
}

fn expand5(v: u16) -> u8 {
    ((v << 3) | (v >> 2)) as u8
}

fn expand6(v: u16) -> u8 {
    ((v << 2) | (v >> 4)) as u8
}

/// Bytes per scanline for `width` pixels, padded to `scanline_pad` bits.
pub fn scanline_bytes(width: usize, bits_per_pixel: usize, scanline_pad: usize) -> usize {
    let pad = scanline_pad.max(8);
    (width * bits_per_pixel).div_ceil(pad) * pad / 8
}

// ---------------------------------------------------------------------------
// Image views
// ---------------------------------------------------------------------------

/// Read-only view of a pixel buffer.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub data: &'a [u8],
    pub stride: usize,
    pub format: PixelFormat,
}

/// Writable view of a pixel buffer.
#[derive(Debug)]
pub struct ImageViewMut<'a> {
    pub data: &'a mut [u8],
    pub stride: usize,
    pub format: PixelFormat,
}

fn check_bounds(
    side: &'static str,
    len: usize,
    stride: usize,
    bpp: usize,
    (x, y): (usize, usize),
    (width, height): (usize, usize),
) -> Result<(), PixelError> {
    let fits = width == 0
        || height == 0
        || ((x + width) * bpp <= stride && (y + height - 1) * stride + (x + width) * bpp <= len);
    if fits {
        Ok(())
    } else {
        Err(PixelError::OutOfBounds {
            side,
            x,
            y,
            width,
            height,
            len,
            stride,
        })
    }
}

/// Copies a `width` x `height` block from `src` at `src_origin` into `dst`
/// at `dst_origin`, converting between pixel formats.
pub fn image_copy(
    dst: &mut ImageViewMut<'_>,
    dst_origin: (usize, usize),
    src: &ImageView<'_>,
    src_origin: (usize, usize),
    size: (usize, usize),
) -> Result<(), PixelError> {
    let dst_bpp = dst.format.bytes_per_pixel();
    let src_bpp = src.format.bytes_per_pixel();
    check_bounds("destination", dst.data.len(), dst.stride, dst_bpp, dst_origin, size)?;
    check_bounds("source", src.data.len(), src.stride, src_bpp, src_origin, size)?;

    let (width, height) = size;
    for row in 0..height {
        let d_off = (dst_origin.1 + row) * dst.stride + dst_origin.0 * dst_bpp;
        let s_off = (src_origin.1 + row) * src.stride + src_origin.0 * src_bpp;
        let d_row = &mut dst.data[d_off..d_off + width * dst_bpp];
        let s_row = &src.data[s_off..s_off + width * src_bpp];

        if dst.format == src.format {
            d_row.copy_from_slice(s_row);
            continue;
        }
        for (d_px, s_px) in d_row.chunks_exact_mut(dst_bpp).zip(s_row.chunks_exact(src_bpp)) {
            dst.format.write(d_px, src.format.read(s_px));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
