//! Rotated Shadow Updates
//!
//! When the application draws in an orientation the display cannot scan
//! out, it renders into a shadow buffer kept in logical orientation. Dirty
//! rectangles are then copied to the physical framebuffer, remapping every
//! pixel for one of four fixed rotations.
//!
//! Each rectangle is walked in physical order. For every physical pixel the
//! source address in the shadow buffer moves by a fixed "right" delta, and
//! for every physical row by a fixed "down" delta; the orientation only
//! decides the starting pixel and those two deltas.

use alloc::vec;
use alloc::vec::Vec;

use crate::config::Orientation;
use crate::geometry::Rect;
use crate::{bytes_per_pixel, DisplayError, Result};

/// The only depth the copy loops handle
pub const SHADOW_BITS_PER_PIXEL: u32 = 16;

/// Edge length of the square tiles used by the tiled copy
pub const TILE_SIZE: usize = 32;

const BPP: usize = 2;

/// Where one clipped logical rectangle lands physically, and how to walk
/// the shadow buffer while filling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectTransform {
    /// Physical corners `(x1, y1, x2, y2)`
    pub physical: (usize, usize, usize, usize),
    /// Shadow pixel copied to the physical top-left corner
    pub start: (usize, usize),
    /// Shadow index step per physical column, in pixels
    pub right_delta: isize,
    /// Shadow index step per physical row, in pixels
    pub down_delta: isize,
}

impl RectTransform {
    pub fn width(&self) -> usize {
        self.physical.2 - self.physical.0
    }

    pub fn height(&self) -> usize {
        self.physical.3 - self.physical.1
    }
}

/// Shadow-to-framebuffer copier for one mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationBlitEngine {
    orientation: Orientation,
    /// Logical width (shadow buffer row length in pixels)
    width: usize,
    /// Logical height
    height: usize,
    bits_per_pixel: u32,
    /// Physical bytes per scanline
    stride: usize,
    /// Copy in square tiles instead of whole rows
    tiled: bool,
}

impl RotationBlitEngine {
    /// Create a copier for a `width` x `height` logical shadow buffer.
    ///
    /// Rotations that swap axes default to tiled copies, since consecutive
    /// reads then walk down shadow columns.
    pub fn new(
        orientation: Orientation,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        stride: usize,
    ) -> Self {
        Self {
            orientation,
            width: width as usize,
            height: height as usize,
            bits_per_pixel,
            stride,
            tiled: orientation.swaps_axes(),
        }
    }

    pub fn with_tiling(mut self, tiled: bool) -> Self {
        self.tiled = tiled;
        self
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn is_tiled(&self) -> bool {
        self.tiled
    }

    /// Whether the copy loops can handle this engine's depth.
    pub fn is_supported(&self) -> bool {
        self.bits_per_pixel == SHADOW_BITS_PER_PIXEL
    }

    /// Map a clipped logical rectangle `(x1, y1, x2, y2)`.
    pub fn transform(&self, x1: usize, y1: usize, x2: usize, y2: usize) -> RectTransform {
        let w = self.width;
        let h = self.height;
        let iw = w as isize;

        match self.orientation {
            Orientation::None => RectTransform {
                physical: (x1, y1, x2, y2),
                start: (x1, y1),
                right_delta: 1,
                down_delta: iw,
            },
            Orientation::Ccw => RectTransform {
                physical: (y1, w - x2, y2, w - x1),
                start: (x2 - 1, y1),
                right_delta: iw,
                down_delta: -1,
            },
            Orientation::Ud => RectTransform {
                physical: (w - x2, h - y2, w - x1, h - y1),
                start: (x2 - 1, y2 - 1),
                right_delta: -1,
                down_delta: -iw,
            },
            Orientation::Cw => RectTransform {
                physical: (h - y2, x1, h - y1, x2),
                start: (x1, y2 - 1),
                right_delta: -iw,
                down_delta: 1,
            },
        }
    }

    /// Copy `rects` from `shadow` into `physical`, whose visible page
    /// starts at byte `offset`.
    ///
    /// Rectangles are clipped to the logical screen and skipped when empty.
    /// Every check happens before the first write, so a failed call leaves
    /// `physical` untouched.
    pub fn update(
        &self,
        shadow: &[u8],
        physical: &mut [u8],
        offset: usize,
        rects: &[Rect],
    ) -> Result<()> {
        if !self.is_supported() {
            log::error!(
                "shadow copy only implemented for 16 bpp (got {})",
                self.bits_per_pixel
            );
            return Err(DisplayError::UnsupportedDepthForShadow);
        }
        if shadow.len() < self.width * self.height * BPP {
            return Err(DisplayError::NotMapped);
        }

        let mut jobs = Vec::with_capacity(rects.len());
        for rect in rects {
            let Some((x1, y1, x2, y2)) = rect.clip_to(self.width as u32, self.height as u32)
            else {
                continue;
            };
            let t = self.transform(x1, y1, x2, y2);
            let end = offset + (t.physical.3 - 1) * self.stride + t.physical.2 * BPP;
            if end > physical.len() {
                return Err(DisplayError::NotMapped);
            }
            jobs.push(t);
        }

        for t in &jobs {
            let src = (t.start.1 * self.width + t.start.0) as isize;
            let dst = offset + t.physical.1 * self.stride + t.physical.0 * BPP;
            if self.tiled {
                self.copy_tiled(shadow, physical, src, dst, t);
            } else {
                self.copy_rows(shadow, physical, src, dst, t.width(), t.height(), t);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_rows(
        &self,
        shadow: &[u8],
        physical: &mut [u8],
        src: isize,
        dst: usize,
        width: usize,
        height: usize,
        t: &RectTransform,
    ) {
        let mut src_row = src;
        let mut dst_row = dst;
        for _ in 0..height {
            let mut s = src_row;
            let mut d = dst_row;
            for _ in 0..width {
                let at = s as usize * BPP;
                physical[d..d + BPP].copy_from_slice(&shadow[at..at + BPP]);
                s += t.right_delta;
                d += BPP;
            }
            src_row += t.down_delta;
            dst_row += self.stride;
        }
    }

    fn copy_tiled(
        &self,
        shadow: &[u8],
        physical: &mut [u8],
        src: isize,
        dst: usize,
        t: &RectTransform,
    ) {
        let (width, height) = (t.width(), t.height());
        for ty in (0..height).step_by(TILE_SIZE) {
            let rows = TILE_SIZE.min(height - ty);
            for tx in (0..width).step_by(TILE_SIZE) {
                let cols = TILE_SIZE.min(width - tx);
                let tile_src = src + ty as isize * t.down_delta + tx as isize * t.right_delta;
                let tile_dst = dst + ty * self.stride + tx * BPP;
                self.copy_rows(shadow, physical, tile_src, tile_dst, cols, rows, t);
            }
        }
    }
}

/// Shadow buffer bound to one active mode
#[derive(Debug)]
pub struct ShadowSession {
    buffer: Vec<u8>,
    engine: RotationBlitEngine,
    pitch: usize,
}

impl ShadowSession {
    /// Allocate a zeroed logical `width` x `height` shadow buffer for a
    /// display with `stride` bytes per physical scanline.
    pub fn new(
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        orientation: Orientation,
        stride: usize,
    ) -> Result<Self> {
        let engine = RotationBlitEngine::new(orientation, width, height, bits_per_pixel, stride);
        if !engine.is_supported() {
            return Err(DisplayError::UnsupportedDepthForShadow);
        }

        let pitch = width as usize * bytes_per_pixel(bits_per_pixel);
        log::debug!(
            "shadow buffer {}x{} ({:?}), {} bytes",
            width,
            height,
            orientation,
            pitch * height as usize
        );
        Ok(Self {
            buffer: vec![0u8; pitch * height as usize],
            engine,
            pitch,
        })
    }

    /// Bytes per logical row
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn engine(&self) -> &RotationBlitEngine {
        &self.engine
    }

    /// Push dirty rectangles to the page starting at `offset` in `physical`.
    pub fn update(&self, physical: &mut [u8], offset: usize, rects: &[Rect]) -> Result<()> {
        self.engine.update(&self.buffer, physical, offset, rects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 16-bit buffer where every pixel holds its own index.
    fn numbered(width: usize, height: usize) -> Vec<u8> {
        (0..width * height)
            .flat_map(|i| (i as u16).to_le_bytes())
            .collect()
    }

    fn pixel(buf: &[u8], stride: usize, x: usize, y: usize) -> u16 {
        let at = y * stride + x * BPP;
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    /// Rotate a whole `width` x `height` buffer and return the physical one.
    fn rotate_all(src: &[u8], width: u32, height: u32, orientation: Orientation, tiled: bool) -> Vec<u8> {
        let (pw, ph) = orientation.physical_size(width, height);
        let stride = pw as usize * BPP;
        let engine = RotationBlitEngine::new(orientation, width, height, 16, stride).with_tiling(tiled);
        let mut dst = vec![0u8; stride * ph as usize];
        engine
            .update(src, &mut dst, 0, &[Rect::new(0, 0, width, height)])
            .unwrap();
        dst
    }

    #[test]
    fn test_cw_transposes_rect() {
        let engine = RotationBlitEngine::new(Orientation::Cw, 100, 50, 16, 100);
        let t = engine.transform(0, 0, 100, 50);
        assert_eq!(t.physical, (0, 0, 50, 100));
        assert_eq!(t.start, (0, 49));
        assert_eq!((t.right_delta, t.down_delta), (-100, 1));
    }

    #[test]
    fn test_pixel_placement() {
        let (w, h) = (5usize, 3usize);
        let src = numbered(w, h);

        let cw = rotate_all(&src, w as u32, h as u32, Orientation::Cw, false);
        // Logical top-left ends up at the physical top-right.
        assert_eq!(pixel(&cw, h * BPP, h - 1, 0), 0);
        assert_eq!(pixel(&cw, h * BPP, 0, 0), ((h - 1) * w) as u16);

        let ccw = rotate_all(&src, w as u32, h as u32, Orientation::Ccw, false);
        assert_eq!(pixel(&ccw, h * BPP, 0, w - 1), 0);
        assert_eq!(pixel(&ccw, h * BPP, 0, 0), (w - 1) as u16);

        let ud = rotate_all(&src, w as u32, h as u32, Orientation::Ud, false);
        assert_eq!(pixel(&ud, w * BPP, w - 1, h - 1), 0);
        assert_eq!(pixel(&ud, w * BPP, 0, 0), (w * h - 1) as u16);

        let none = rotate_all(&src, w as u32, h as u32, Orientation::None, false);
        assert_eq!(none, src);
    }

    #[test]
    fn test_round_trips() {
        let (w, h) = (37u32, 23u32);
        let src = numbered(w as usize, h as usize);

        // The rotated buffer is a logical buffer with swapped dimensions.
        let cw = rotate_all(&src, w, h, Orientation::Cw, false);
        assert_eq!(rotate_all(&cw, h, w, Orientation::Ccw, false), src);

        let ccw = rotate_all(&src, w, h, Orientation::Ccw, true);
        assert_eq!(rotate_all(&ccw, h, w, Orientation::Cw, true), src);

        let ud = rotate_all(&src, w, h, Orientation::Ud, false);
        assert_ne!(ud, src);
        assert_eq!(rotate_all(&ud, w, h, Orientation::Ud, false), src);
    }

    #[test]
    fn test_tiled_matches_rows() {
        let (w, h) = (70u32, 45u32);
        let src = numbered(w as usize, h as usize);
        for orientation in [Orientation::None, Orientation::Cw, Orientation::Ccw, Orientation::Ud] {
            assert_eq!(
                rotate_all(&src, w, h, orientation, true),
                rotate_all(&src, w, h, orientation, false),
                "{:?}",
                orientation
            );
        }
    }

    #[test]
    fn test_partial_rect_and_clipping() {
        let (w, h) = (8u32, 4u32);
        let src = numbered(w as usize, h as usize);
        let stride = h as usize * BPP;
        let engine = RotationBlitEngine::new(Orientation::Cw, w, h, 16, stride);

        let mut dst = vec![0xFFu8; stride * w as usize];
        engine
            .update(&src, &mut dst, 0, &[Rect::new(-10, -10, 5, 5), Rect::new(8, 0, 4, 4)])
            .unwrap();
        assert!(dst.iter().all(|&b| b == 0xFF));

        // Only logical column 6, row 1 to 2.
        engine
            .update(&src, &mut dst, 0, &[Rect::new(6, 1, 1, 2)])
            .unwrap();
        let t = engine.transform(6, 1, 7, 3);
        assert_eq!(t.physical, (1, 6, 3, 7));
        assert_eq!(pixel(&dst, stride, 1, 6), (2 * w + 6) as u16);
        assert_eq!(pixel(&dst, stride, 2, 6), (w + 6) as u16);
        assert_eq!(pixel(&dst, stride, 0, 6), 0xFFFF);
        assert_eq!(pixel(&dst, stride, 1, 5), 0xFFFF);
    }

    #[test]
    fn test_page_offset() {
        let (w, h) = (4u32, 2u32);
        let src = numbered(w as usize, h as usize);
        let stride = 16;
        let engine = RotationBlitEngine::new(Orientation::None, w, h, 16, stride);
        let mut dst = vec![0u8; 100 + stride * 2];
        engine
            .update(&src, &mut dst, 100, &[Rect::new(0, 0, w, h)])
            .unwrap();
        assert!(dst[..100].iter().all(|&b| b == 0));
        assert_eq!(pixel(&dst[100..], stride, 3, 1), 7);
    }

    #[test]
    fn test_failures_write_nothing() {
        let src = vec![0xAAu8; 8 * 4 * 4];
        let mut dst = vec![0u8; 8 * 4 * 4];

        let wrong_depth = RotationBlitEngine::new(Orientation::Cw, 8, 4, 32, 16);
        assert_eq!(
            wrong_depth.update(&src, &mut dst, 0, &[Rect::new(0, 0, 8, 4)]),
            Err(DisplayError::UnsupportedDepthForShadow)
        );

        // Second rectangle does not fit below the first: nothing is copied.
        let engine = RotationBlitEngine::new(Orientation::None, 8, 4, 16, 16);
        assert_eq!(
            engine.update(&src, &mut dst, 96, &[Rect::new(0, 0, 1, 1), Rect::new(0, 0, 8, 4)]),
            Err(DisplayError::NotMapped)
        );
        assert!(dst.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_shadow_session() {
        assert_eq!(
            ShadowSession::new(64, 32, 32, Orientation::Cw, 128).err(),
            Some(DisplayError::UnsupportedDepthForShadow)
        );

        let mut shadow = ShadowSession::new(4, 2, 16, Orientation::Ud, 8).unwrap();
        assert_eq!(shadow.pitch(), 8);
        assert!(!shadow.engine().is_tiled());
        shadow.buffer_mut()[0] = 0x34;
        shadow.buffer_mut()[1] = 0x12;

        let mut physical = vec![0u8; 16];
        shadow.update(&mut physical, 0, &[Rect::new(0, 0, 4, 2)]).unwrap();
        assert_eq!(pixel(&physical, 8, 3, 1), 0x1234);
    }
}
