//! Memory-Backed Framebuffer
//!
//! A framebuffer device whose video memory lives on the heap. It behaves
//! like a simple fbdev driver: it accepts a configurable set of
//! resolutions, may coerce the requested depth, computes its own line
//! length and records the calls made against it. Like real video memory,
//! its contents survive unmapping.

use alloc::vec::Vec;

use super::FramebufferDevice;
use crate::geometry::{Bitfield, FbType, FixedInfo, Geometry, Visual};
use crate::{DisplayError, Result};

/// A call observed by the device, in issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Commit(Geometry),
    Pan(u32),
    WaitVblank,
    WaitIdle,
    Map(usize),
    Unmap,
}

/// Heap-backed framebuffer device
pub struct MemoryFramebuffer {
    /// Fixed info (line length follows the active geometry)
    fixed: FixedInfo,
    /// Active geometry
    geometry: Geometry,
    /// Accepted resolutions; empty accepts anything that fits in memory
    modes: Vec<(u32, u32)>,
    /// Depth the device always falls back to, if any
    forced_depth: Option<u32>,
    /// Scanline alignment in bytes
    line_align: usize,
    /// Refuse every query (device gone)
    unavailable: bool,
    /// Video memory, including the page offset prefix
    vram: Vec<u8>,
    /// Length of the current mapping
    mapped: Option<usize>,
    /// Call log
    events: Vec<DeviceEvent>,
}

impl MemoryFramebuffer {
    /// Create a device with `mem_len` bytes of video memory, currently
    /// displaying `initial`.
    pub fn new(mem_len: usize, initial: Geometry) -> Self {
        let mut geometry = initial;
        set_channel_layout(&mut geometry);

        let mut fb = Self {
            fixed: FixedInfo {
                mem_start: 0,
                mem_len,
                line_length: 0,
                fb_type: FbType::PackedPixels,
                visual: Visual::TrueColor,
            },
            geometry,
            modes: Vec::new(),
            forced_depth: None,
            line_align: 1,
            unavailable: false,
            vram: Vec::new(),
            mapped: None,
            events: Vec::new(),
        };
        fb.fixed.line_length = fb.line_length_for(&geometry);
        fb
    }

    /// Only accept these resolutions.
    pub fn with_modes(mut self, modes: &[(u32, u32)]) -> Self {
        self.modes = modes.to_vec();
        self
    }

    /// Silently replace every requested depth with `bits_per_pixel`.
    pub fn with_forced_depth(mut self, bits_per_pixel: u32) -> Self {
        self.forced_depth = Some(bits_per_pixel);
        self
    }

    /// Pad scanlines to a multiple of `align` bytes.
    pub fn with_line_alignment(mut self, align: usize) -> Self {
        self.line_align = align.max(1);
        self.fixed.line_length = self.line_length_for(&self.geometry);
        self
    }

    pub fn with_visual(mut self, visual: Visual) -> Self {
        self.fixed.visual = visual;
        self
    }

    pub fn with_fb_type(mut self, fb_type: FbType) -> Self {
        self.fixed.fb_type = fb_type;
        self
    }

    /// Physical start address; only its page offset matters here.
    pub fn with_mem_start(mut self, mem_start: u64) -> Self {
        self.fixed.mem_start = mem_start;
        self
    }

    /// Make every query fail as if the device disappeared.
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    /// Calls made so far
    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Raw video memory, mapped or not
    pub fn video_memory(&self) -> &[u8] {
        &self.vram
    }

    fn line_length_for(&self, geometry: &Geometry) -> usize {
        let raw = geometry.xres_virtual as usize * geometry.bytes_per_pixel();
        raw.div_ceil(self.line_align) * self.line_align
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            Err(DisplayError::DeviceUnavailable)
        } else {
            Ok(())
        }
    }
}

impl FramebufferDevice for MemoryFramebuffer {
    fn fixed_info(&self) -> Result<FixedInfo> {
        self.check_available()?;
        Ok(self.fixed)
    }

    fn query_geometry(&self) -> Result<Geometry> {
        self.check_available()?;
        Ok(self.geometry)
    }

    fn try_apply(&mut self, request: &Geometry) -> Result<Geometry> {
        self.check_available()?;

        if !self.modes.is_empty() && !self.modes.contains(&(request.xres, request.yres)) {
            return Err(DisplayError::ModeRejected);
        }

        let mut accepted = *request;
        if let Some(depth) = self.forced_depth {
            accepted.bits_per_pixel = depth;
        }
        accepted.xres_virtual = accepted.xres_virtual.max(accepted.xres);
        accepted.yres_virtual = accepted.yres_virtual.max(accepted.yres);
        set_channel_layout(&mut accepted);

        let needed = self.line_length_for(&accepted) * accepted.yres_virtual as usize;
        if accepted.bits_per_pixel == 0 || needed > self.fixed.mem_len {
            return Err(DisplayError::ModeRejected);
        }

        Ok(accepted)
    }

    fn commit(&mut self, request: &Geometry) -> Result<Geometry> {
        let accepted = self.try_apply(request)?;
        self.geometry = accepted;
        self.fixed.line_length = self.line_length_for(&accepted);
        self.events.push(DeviceEvent::Commit(accepted));
        Ok(accepted)
    }

    fn pan_to_offset(&mut self, y_offset: u32) -> Result<()> {
        self.check_available()?;
        let fits = y_offset
            .checked_add(self.geometry.yres)
            .is_some_and(|end| end <= self.geometry.yres_virtual);
        if !fits {
            return Err(DisplayError::ModeRejected);
        }
        self.geometry.yoffset = y_offset;
        self.events.push(DeviceEvent::Pan(y_offset));
        Ok(())
    }

    fn wait_vblank(&mut self) {
        self.events.push(DeviceEvent::WaitVblank);
    }

    fn wait_idle(&mut self) {
        self.events.push(DeviceEvent::WaitIdle);
    }

    fn map_memory(&mut self, len: usize) -> Result<()> {
        self.check_available()?;
        if len > self.fixed.mapped_len() {
            return Err(DisplayError::NotMapped);
        }
        if self.vram.len() < len {
            self.vram.resize(len, 0);
        }
        self.mapped = Some(len);
        self.events.push(DeviceEvent::Map(len));
        Ok(())
    }

    fn unmap_memory(&mut self) {
        if self.mapped.take().is_some() {
            self.events.push(DeviceEvent::Unmap);
        }
    }

    fn memory(&self) -> Option<&[u8]> {
        match self.mapped {
            Some(len) => self.vram.get(..len),
            None => None,
        }
    }

    fn memory_mut(&mut self) -> Option<&mut [u8]> {
        match self.mapped {
            Some(len) => self.vram.get_mut(..len),
            None => None,
        }
    }
}

/// Native channel layout for each depth.
fn set_channel_layout(geometry: &mut Geometry) {
    let (red, green, blue, transp) = match geometry.bits_per_pixel {
        15 => ((10, 5), (5, 5), (0, 5), (0, 0)),
        16 => ((11, 5), (5, 6), (0, 5), (0, 0)),
        24 => ((16, 8), (8, 8), (0, 8), (0, 0)),
        32 => ((16, 8), (8, 8), (0, 8), (24, 8)),
        _ => ((0, 0), (0, 0), (0, 0), (0, 0)),
    };
    geometry.red = Bitfield::new(red.0, red.1);
    geometry.green = Bitfield::new(green.0, green.1);
    geometry.blue = Bitfield::new(blue.0, blue.1);
    geometry.transp = Bitfield::new(transp.0, transp.1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_apply_coerces_depth() {
        let mut fb = MemoryFramebuffer::new(1 << 20, Geometry::with_mode(320, 200, 8))
            .with_forced_depth(16);
        let accepted = fb.try_apply(&Geometry::with_mode(320, 240, 32)).unwrap();
        assert_eq!(accepted.bits_per_pixel, 16);
        assert_eq!(accepted.red, Bitfield::new(11, 5));
        // Testing a mode never changes the active one.
        assert_eq!(fb.query_geometry().unwrap().yres, 200);
    }

    #[test]
    fn test_rejects_modes() {
        let mut fb = MemoryFramebuffer::new(320 * 240 * 2, Geometry::with_mode(320, 240, 16))
            .with_modes(&[(320, 240), (640, 480)]);
        assert!(fb.try_apply(&Geometry::with_mode(320, 240, 16)).is_ok());
        assert_eq!(
            fb.try_apply(&Geometry::with_mode(800, 600, 16)),
            Err(DisplayError::ModeRejected)
        );
        // Listed, but does not fit in memory.
        assert_eq!(
            fb.try_apply(&Geometry::with_mode(640, 480, 16)),
            Err(DisplayError::ModeRejected)
        );
    }

    #[test]
    fn test_line_alignment() {
        let mut fb = MemoryFramebuffer::new(1 << 20, Geometry::with_mode(100, 50, 16))
            .with_line_alignment(64);
        assert_eq!(fb.fixed_info().unwrap().line_length, 256);
        fb.commit(&Geometry::with_mode(320, 200, 8)).unwrap();
        assert_eq!(fb.fixed_info().unwrap().line_length, 320);
    }

    #[test]
    fn test_map_and_pan() {
        let mut fb = MemoryFramebuffer::new(4096, Geometry::with_mode(32, 16, 16));
        assert_eq!(fb.map_memory(8192), Err(DisplayError::NotMapped));
        fb.map_memory(4096).unwrap();
        assert_eq!(fb.memory().map(|m| m.len()), Some(4096));

        let mut doubled = Geometry::with_mode(32, 16, 16);
        doubled.yres_virtual = 32;
        fb.commit(&doubled).unwrap();
        fb.pan_to_offset(16).unwrap();
        assert_eq!(fb.pan_to_offset(17), Err(DisplayError::ModeRejected));
        assert_eq!(fb.pan_to_offset(u32::MAX), Err(DisplayError::ModeRejected));

        fb.memory_mut().unwrap()[7] = 9;

        fb.unmap_memory();
        fb.unmap_memory();
        assert!(!fb.is_mapped());
        assert!(fb.memory().is_none());
        // Contents outlive the mapping.
        assert_eq!(fb.video_memory()[7], 9);
        assert_eq!(
            fb.events().iter().filter(|e| **e == DeviceEvent::Unmap).count(),
            1
        );
    }

    #[test]
    fn test_unavailable() {
        let mut fb = MemoryFramebuffer::new(4096, Geometry::with_mode(32, 16, 16));
        fb.set_unavailable(true);
        assert_eq!(fb.fixed_info(), Err(DisplayError::DeviceUnavailable));
        assert_eq!(fb.query_geometry(), Err(DisplayError::DeviceUnavailable));
    }
}
