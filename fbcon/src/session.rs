//! Display Session
//!
//! Owns one framebuffer device from open to close. Opening validates the
//! device, maps its memory and builds the mode catalog; setting a mode
//! negotiates timings, commits the geometry and sets up the video memory
//! allocator and (for rotated or forced-shadow output) the shadow buffer.
//!
//! ```text
//! Closed --open--> Opened --set_mode--> ModeSet --close--> Closed
//!                             ^            |
//!                             +--set_mode--+
//! ```
//!
//! A failed mode set closes the session.

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::catalog::{ModeCatalog, ModeRect};
use crate::config::DisplayConfig;
use crate::device::FramebufferDevice;
use crate::geometry::{FixedInfo, Geometry, Rect};
use crate::negotiate::ModeNegotiator;
use crate::rotate::ShadowSession;
use crate::timing::TimingCatalog;
use crate::vidmem::{SurfaceAllocator, SurfaceHandle};
use crate::{bytes_per_pixel, DisplayError, Result};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    /// Device validated and mapped, no mode active
    Opened,
    /// Geometry committed, allocator (and shadow buffer) live
    ModeSet,
}

bitflags::bitflags! {
    /// How the output surface is backed
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SurfaceFlags: u32 {
        /// Pixels live in video memory
        const HARDWARE = 1 << 0;
        /// Pixels live in a shadow buffer copied on update
        const SHADOW = 1 << 1;
        /// Two pages, presented with `flip`
        const DOUBLEBUF = 1 << 2;
    }
}

/// The primary surface as seen by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSurface {
    /// Width in pixels (logical orientation)
    pub width: u32,
    /// Height in pixels (logical orientation)
    pub height: u32,
    /// Bytes per row
    pub pitch: usize,
    pub bits_per_pixel: u32,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub flags: SurfaceFlags,
}

/// State that lives exactly as long as one mode
#[derive(Debug)]
struct ActiveMode {
    surface: OutputSurface,
    geometry: Geometry,
    allocator: SurfaceAllocator,
    shadow: Option<ShadowSession>,
    /// Offset of the first pixel in the mapping
    pixels: usize,
    /// Bytes per physical page
    page_bytes: usize,
    /// Bytes of all physical pages
    screen_bytes: usize,
    /// Page the primary surface currently draws into
    back: usize,
}

/// Exclusive access to the primary surface pixels.
///
/// The guard marks the lock/unlock bracket around direct pixel access; the
/// session borrow already makes it exclusive. Dropping the lock releases the
/// primary surface mutex.
pub struct PrimaryLock<'a> {
    _guard: MutexGuard<'a, ()>,
    pixels: &'a mut [u8],
    pitch: usize,
}

impl PrimaryLock<'_> {
    /// Bytes per row
    pub fn pitch(&self) -> usize {
        self.pitch
    }
}

impl Deref for PrimaryLock<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.pixels
    }
}

impl DerefMut for PrimaryLock<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.pixels
    }
}

/// Display session controller
pub struct DisplaySession<D: FramebufferDevice> {
    device: D,
    config: DisplayConfig,
    state: SessionState,
    builtin: TimingCatalog,
    /// User timing database, loaded at open
    overrides: Option<TimingCatalog>,
    catalog: ModeCatalog,
    /// Geometry found at open, restored at close
    saved: Option<Geometry>,
    fixed: Option<FixedInfo>,
    mode: Option<ActiveMode>,
    /// Guards direct access to the primary surface
    primary: Mutex<()>,
}

impl<D: FramebufferDevice> DisplaySession<D> {
    pub fn new(device: D, config: DisplayConfig) -> Self {
        Self {
            device,
            config,
            state: SessionState::Closed,
            builtin: TimingCatalog::builtin(),
            overrides: None,
            catalog: ModeCatalog::new(),
            saved: None,
            fixed: None,
            mode: None,
            primary: Mutex::new(()),
        }
    }

    /// Validate and map the device, then build the mode catalog.
    pub fn open(&mut self) -> Result<()> {
        if self.state != SessionState::Closed {
            return Err(DisplayError::InvalidState);
        }

        let fixed = self
            .device
            .fixed_info()
            .map_err(|_| DisplayError::DeviceUnavailable)?;
        if !fixed.is_supported() {
            log::error!(
                "unsupported console hardware: {:?} / {:?}",
                fixed.fb_type,
                fixed.visual
            );
            return Err(DisplayError::UnsupportedHardware);
        }
        let current = self
            .device
            .query_geometry()
            .map_err(|_| DisplayError::DeviceUnavailable)?;

        self.device.map_memory(fixed.mapped_len())?;

        self.overrides = self
            .config
            .modes_db
            .as_deref()
            .and_then(TimingCatalog::load);
        self.catalog = ModeCatalog::build(
            &mut self.device,
            &current,
            &self.builtin,
            self.overrides.as_ref(),
            self.config.broken_modes,
            self.config.orientation(),
        );

        self.saved = Some(current);
        self.fixed = Some(fixed);
        self.state = SessionState::Opened;

        log::info!(
            "framebuffer opened: {} KiB video memory, current mode {}x{}@{}",
            fixed.mem_len / 1024,
            current.xres,
            current.yres,
            current.bits_per_pixel
        );
        Ok(())
    }

    /// Tear down the mode, restore the geometry found at open and unmap.
    /// Does nothing on a closed session.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(mode) = self.mode.as_ref() {
            if let Some(memory) = self.device.memory_mut() {
                leave_screen(memory, mode, self.config.clear_on_close);
            }
        }
        self.teardown_mode();

        if let Some(saved) = self.saved.take() {
            if let Err(err) = self.device.commit(&saved) {
                log::warn!("could not restore original mode: {}", err);
            }
        }
        self.device.unmap_memory();

        self.catalog = ModeCatalog::new();
        self.overrides = None;
        self.fixed = None;
        self.state = SessionState::Closed;
        log::info!("framebuffer closed");
    }

    /// Modes advertised for a depth, largest first
    pub fn list_modes(&self, bits_per_pixel: u32) -> &[ModeRect] {
        self.catalog.modes(bits_per_pixel)
    }

    /// Switch to `width` x `height` at `bits_per_pixel` (logical
    /// orientation). Any previous mode is torn down first; on failure the
    /// session is closed.
    pub fn set_mode(&mut self, width: u32, height: u32, bits_per_pixel: u32) -> Result<OutputSurface> {
        if self.state == SessionState::Closed {
            return Err(DisplayError::InvalidState);
        }
        self.teardown_mode();

        match self.activate(width, height, bits_per_pixel) {
            Ok(surface) => {
                self.state = SessionState::ModeSet;
                Ok(surface)
            }
            Err(err) => {
                log::error!(
                    "setting {}x{}@{} failed: {}",
                    width,
                    height,
                    bits_per_pixel,
                    err
                );
                self.close();
                Err(err)
            }
        }
    }

    fn activate(&mut self, width: u32, height: u32, bits_per_pixel: u32) -> Result<OutputSurface> {
        let orientation = self.config.orientation();
        let shadowed = self.config.uses_shadow();
        let (phys_w, phys_h) = orientation.physical_size(width, height);

        let mut request = self.device.query_geometry()?;
        request.xres = phys_w;
        request.yres = phys_h;
        request.xres_virtual = phys_w;
        request.yres_virtual = if self.config.double_buffer && !shadowed {
            phys_h.checked_mul(2).ok_or(DisplayError::ModeRejected)?
        } else {
            phys_h
        };
        request.xoffset = 0;
        request.yoffset = 0;
        request.bits_per_pixel = bits_per_pixel;
        request.clear_channels();
        ModeNegotiator::new(&self.builtin, self.overrides.as_ref()).negotiate(&mut request);

        let committed = match self.device.commit(&request) {
            Ok(accepted) => accepted,
            Err(_) if request.yres_virtual > request.yres => {
                log::warn!(
                    "no room for a second page at {}x{}, retrying single-buffered",
                    phys_w,
                    phys_h
                );
                request.yres_virtual = request.yres;
                self.device
                    .commit(&request)
                    .map_err(|_| DisplayError::ModeRejected)?
            }
            Err(_) => return Err(DisplayError::ModeRejected),
        };

        // Line length depends on the committed mode.
        let fixed = self.device.fixed_info()?;
        self.fixed = Some(fixed);

        let line_length = fixed.line_length;
        let pixels = fixed.page_offset();
        let page_bytes = committed.yres as usize * line_length;
        let screen_bytes = committed.yres_virtual as usize * line_length;
        let mapped = self.device.memory().map(|m| m.len()).unwrap_or(0);
        if pixels + screen_bytes > mapped {
            return Err(DisplayError::NotMapped);
        }

        let (width, height) = orientation.physical_size(committed.xres, committed.yres);
        let (red_mask, green_mask, blue_mask) = if fixed.visual.has_channel_masks() {
            (committed.red.mask(), committed.green.mask(), committed.blue.mask())
        } else {
            (0, 0, 0)
        };
        let double = self.config.double_buffer
            && !shadowed
            && committed.yres_virtual >= 2 * committed.yres;

        let (pitch, flags, shadow, allocator) = if shadowed {
            let shadow = ShadowSession::new(
                width,
                height,
                committed.bits_per_pixel,
                orientation,
                line_length,
            )?;
            let pitch = shadow.pitch();
            let allocator = SurfaceAllocator::new(pitch * height as usize, 0, pitch);
            (pitch, SurfaceFlags::SHADOW, Some(shadow), allocator)
        } else {
            let mut flags = SurfaceFlags::HARDWARE;
            if double {
                flags |= SurfaceFlags::DOUBLEBUF;
            }
            let allocator = SurfaceAllocator::new(
                screen_bytes,
                fixed.mem_len.saturating_sub(screen_bytes),
                line_length,
            );
            (line_length, flags, None, allocator)
        };

        let surface = OutputSurface {
            width,
            height,
            pitch,
            bits_per_pixel: committed.bits_per_pixel,
            red_mask,
            green_mask,
            blue_mask,
            flags,
        };
        self.mode = Some(ActiveMode {
            surface,
            geometry: committed,
            allocator,
            shadow,
            pixels,
            page_bytes,
            screen_bytes,
            back: 0,
        });

        if double {
            // Show the first page and start drawing into the second.
            self.flip()?;
        }

        log::info!(
            "mode set: {}x{}@{} pitch {} ({:?}, {:?})",
            width,
            height,
            committed.bits_per_pixel,
            pitch,
            orientation,
            flags
        );
        Ok(surface)
    }

    fn teardown_mode(&mut self) {
        if let Some(mode) = self.mode.take() {
            log::debug!(
                "releasing {}x{} mode ({} bytes of surfaces free)",
                mode.surface.width,
                mode.surface.height,
                mode.allocator.free_bytes()
            );
        }
        if self.state == SessionState::ModeSet {
            self.state = SessionState::Opened;
        }
    }

    /// Allocate an off-screen surface in video memory.
    pub fn alloc_surface(&mut self, width: u32, height: u32) -> Result<SurfaceHandle> {
        let mode = self.mode.as_mut().ok_or(DisplayError::InvalidState)?;
        let pitch = width as usize * bytes_per_pixel(mode.surface.bits_per_pixel);
        mode.allocator.allocate(width, height, pitch).map_err(|err| {
            log::debug!("surface {}x{} not allocated: {}", width, height, err);
            err
        })
    }

    pub fn free_surface(&mut self, handle: SurfaceHandle) -> Result<()> {
        let mode = self.mode.as_mut().ok_or(DisplayError::InvalidState)?;
        mode.allocator.release(handle)
    }

    /// Record an accelerated operation still running against a surface.
    pub fn mark_busy(&mut self, handle: SurfaceHandle) -> Result<()> {
        let mode = self.mode.as_mut().ok_or(DisplayError::InvalidState)?;
        mode.allocator.mark_busy(handle)
    }

    /// Pixels of an off-screen surface, once the accelerator is done with
    /// it. Rows are the display pitch apart.
    pub fn lock_surface(&mut self, handle: SurfaceHandle) -> Result<&mut [u8]> {
        let mode = self.mode.as_mut().ok_or(DisplayError::InvalidState)?;
        if handle == SurfaceHandle::SCREEN {
            return Err(DisplayError::InvalidSurface);
        }
        let block = *mode
            .allocator
            .block(handle)
            .ok_or(DisplayError::InvalidSurface)?;
        if block.dirty {
            wait_busy(&mut self.device, &mut mode.allocator);
        }

        let start = mode.pixels + block.base;
        self.device
            .memory_mut()
            .and_then(|m| m.get_mut(start..start + block.size))
            .ok_or(DisplayError::NotMapped)
    }

    /// Lock the primary surface for direct pixel access.
    pub fn lock_primary(&mut self) -> Result<PrimaryLock<'_>> {
        let mode = self.mode.as_mut().ok_or(DisplayError::InvalidState)?;
        let guard = self.primary.lock();
        if mode.allocator.is_busy(SurfaceHandle::SCREEN) {
            wait_busy(&mut self.device, &mut mode.allocator);
        }

        let pitch = mode.surface.pitch;
        let pixels = match mode.shadow.as_mut() {
            Some(shadow) => shadow.buffer_mut(),
            None => {
                let start = mode.pixels + mode.back * mode.page_bytes;
                self.device
                    .memory_mut()
                    .and_then(|m| m.get_mut(start..start + mode.page_bytes))
                    .ok_or(DisplayError::NotMapped)?
            }
        };

        Ok(PrimaryLock {
            _guard: guard,
            pixels,
            pitch,
        })
    }

    /// Present the page drawn into since the last flip. Single-buffered
    /// modes push the whole screen instead.
    pub fn flip(&mut self) -> Result<()> {
        let mode = self.mode.as_mut().ok_or(DisplayError::InvalidState)?;
        if !mode.surface.flags.contains(SurfaceFlags::DOUBLEBUF) {
            let full = Rect::new(0, 0, mode.surface.width, mode.surface.height);
            return self.update_rects(&[full]);
        }

        if mode.allocator.is_busy(SurfaceHandle::SCREEN) {
            wait_busy(&mut self.device, &mut mode.allocator);
        }
        self.device.wait_vblank();
        self.device
            .pan_to_offset(mode.back as u32 * mode.geometry.yres)?;
        mode.back ^= 1;
        Ok(())
    }

    /// Copy dirty rectangles of the shadow buffer to the screen. Nothing
    /// to do when drawing goes straight to video memory.
    pub fn update_rects(&mut self, rects: &[Rect]) -> Result<()> {
        let mode = self.mode.as_ref().ok_or(DisplayError::InvalidState)?;
        let Some(shadow) = mode.shadow.as_ref() else {
            return Ok(());
        };
        let physical = self.device.memory_mut().ok_or(DisplayError::NotMapped)?;
        shadow.update(physical, mode.pixels, rects)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The primary surface of the active mode
    pub fn surface(&self) -> Option<&OutputSurface> {
        self.mode.as_ref().map(|m| &m.surface)
    }

    /// Video memory allocator of the active mode
    pub fn allocator(&self) -> Option<&SurfaceAllocator> {
        self.mode.as_ref().map(|m| &m.allocator)
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: FramebufferDevice> Drop for DisplaySession<D> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Blank the screen, or keep the last frame visible once the original
/// single-page geometry is back (page 0 must hold the frame on display).
fn leave_screen(memory: &mut [u8], mode: &ActiveMode, clear: bool) {
    let start = mode.pixels;
    if clear {
        if let Some(screen) = memory.get_mut(start..start + mode.screen_bytes) {
            screen.fill(0);
        }
        return;
    }

    let front_is_second_page =
        mode.surface.flags.contains(SurfaceFlags::DOUBLEBUF) && mode.back == 0;
    let end = start + 2 * mode.page_bytes;
    if front_is_second_page && end <= memory.len() {
        memory.copy_within(start + mode.page_bytes..end, start);
    }
}

/// Let the accelerator finish, then forget every busy marker.
fn wait_busy<D: FramebufferDevice>(device: &mut D, allocator: &mut SurfaceAllocator) {
    device.wait_idle();
    allocator.clear_busy();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Orientation;
    use crate::device::{DeviceEvent, MemoryFramebuffer};
    use crate::geometry::{FbType, Visual};

    fn config() -> DisplayConfig {
        DisplayConfig::default().with_modes_db(None)
    }

    #[test]
    fn test_open_validates_device() {
        let planar = MemoryFramebuffer::new(1 << 20, Geometry::with_mode(640, 480, 16))
            .with_fb_type(FbType::Planes);
        let mut session = DisplaySession::new(planar, config());
        assert_eq!(session.open(), Err(DisplayError::UnsupportedHardware));
        assert_eq!(session.state(), SessionState::Closed);

        let mono = MemoryFramebuffer::new(1 << 20, Geometry::with_mode(640, 480, 16))
            .with_visual(Visual::Mono01);
        let mut session = DisplaySession::new(mono, config());
        assert_eq!(session.open(), Err(DisplayError::UnsupportedHardware));

        let mut gone = MemoryFramebuffer::new(1 << 20, Geometry::with_mode(640, 480, 16));
        gone.set_unavailable(true);
        let mut session = DisplaySession::new(gone, config());
        assert_eq!(session.open(), Err(DisplayError::DeviceUnavailable));
        assert!(!session.device().is_mapped());
    }

    #[test]
    fn test_state_transitions() {
        let fb = MemoryFramebuffer::new(1 << 20, Geometry::with_mode(320, 240, 16));
        let mut session = DisplaySession::new(fb, config());

        assert_eq!(session.set_mode(320, 240, 16).err(), Some(DisplayError::InvalidState));
        assert!(session.lock_primary().is_err());
        assert_eq!(session.flip(), Err(DisplayError::InvalidState));

        session.open().unwrap();
        assert_eq!(session.open(), Err(DisplayError::InvalidState));
        assert_eq!(session.state(), SessionState::Opened);
        assert!(session.surface().is_none());

        session.set_mode(320, 240, 16).unwrap();
        assert_eq!(session.state(), SessionState::ModeSet);
        session.set_mode(320, 200, 8).unwrap();
        assert_eq!(session.state(), SessionState::ModeSet);
        assert_eq!(session.surface().map(|s| s.pitch), Some(320));

        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.device().is_mapped());
    }

    #[test]
    fn test_double_buffer_falls_back_to_single_page() {
        // One 640x480x16 page plus 1000 spare bytes.
        let fb = MemoryFramebuffer::new(640 * 480 * 2 + 1000, Geometry::with_mode(640, 480, 16));
        let mut session = DisplaySession::new(
            fb,
            DisplayConfig {
                double_buffer: true,
                ..config()
            },
        );
        session.open().unwrap();
        session.device_mut().clear_events();

        let surface = session.set_mode(640, 480, 16).unwrap();
        assert_eq!(surface.flags, SurfaceFlags::HARDWARE);
        assert_eq!(session.allocator().map(|a| a.total_bytes()), Some(1000));

        let events = session.device().events();
        assert_eq!(events.len(), 1);
        match events[0] {
            DeviceEvent::Commit(geometry) => assert_eq!(geometry.yres_virtual, 480),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_shadow_requires_16bpp() {
        let fb = MemoryFramebuffer::new(1 << 20, Geometry::with_mode(320, 240, 16));
        let mut session = DisplaySession::new(fb, config().with_rotation(Orientation::Cw));
        session.open().unwrap();

        assert_eq!(
            session.set_mode(320, 240, 32).err(),
            Some(DisplayError::UnsupportedDepthForShadow)
        );
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.device().is_mapped());

        let restored = session.device().query_geometry().unwrap();
        assert_eq!(
            (restored.xres, restored.yres, restored.bits_per_pixel),
            (320, 240, 16)
        );
    }

    #[test]
    fn test_oversized_double_buffer_request() {
        let fb = MemoryFramebuffer::new(1 << 20, Geometry::with_mode(320, 240, 16));
        let mut session = DisplaySession::new(
            fb,
            DisplayConfig {
                double_buffer: true,
                ..config()
            },
        );
        session.open().unwrap();
        assert_eq!(
            session.set_mode(320, u32::MAX, 16).err(),
            Some(DisplayError::ModeRejected)
        );
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_pseudocolor_has_no_masks() {
        let fb = MemoryFramebuffer::new(1 << 20, Geometry::with_mode(320, 200, 8))
            .with_visual(Visual::PseudoColor);
        let mut session = DisplaySession::new(fb, config());
        session.open().unwrap();
        let surface = session.set_mode(320, 200, 16).unwrap();
        assert_eq!(
            (surface.red_mask, surface.green_mask, surface.blue_mask),
            (0, 0, 0)
        );
    }
}
