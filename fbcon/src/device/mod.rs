//! Framebuffer Device Interface
//!
//! The capability a display session needs from the underlying device.
//! Every backing device (a kernel framebuffer, a virtual one in memory)
//! implements [`FramebufferDevice`] and is injected into the session.

pub mod memory;

pub use memory::{DeviceEvent, MemoryFramebuffer};

use alloc::boxed::Box;

use crate::geometry::{FixedInfo, Geometry};
use crate::Result;

/// Framebuffer device capability
pub trait FramebufferDevice: Send {
    /// Fixed screen information. Fails with `DeviceUnavailable` if the
    /// device cannot be queried.
    fn fixed_info(&self) -> Result<FixedInfo>;

    /// Currently active geometry
    fn query_geometry(&self) -> Result<Geometry>;

    /// Test whether a geometry would be accepted without applying it.
    ///
    /// The device may silently adjust any field; callers must use the
    /// returned geometry rather than the request.
    fn try_apply(&mut self, geometry: &Geometry) -> Result<Geometry>;

    /// Apply a geometry. Returns what the device actually set.
    fn commit(&mut self, geometry: &Geometry) -> Result<Geometry>;

    /// Pan the visible window to start at scanline `y_offset`.
    fn pan_to_offset(&mut self, y_offset: u32) -> Result<()>;

    /// Block until the next vertical blank.
    fn wait_vblank(&mut self);

    /// Block until the accelerator has finished outstanding operations.
    fn wait_idle(&mut self) {}

    /// Map `len` bytes of framebuffer memory.
    fn map_memory(&mut self, len: usize) -> Result<()>;

    /// Release the memory mapping. Safe to call when nothing is mapped.
    fn unmap_memory(&mut self);

    /// Mapped memory, if any
    fn memory(&self) -> Option<&[u8]>;

    /// Mapped memory, if any
    fn memory_mut(&mut self) -> Option<&mut [u8]>;
}

impl<T: FramebufferDevice + ?Sized> FramebufferDevice for Box<T> {
    fn fixed_info(&self) -> Result<FixedInfo> {
        (**self).fixed_info()
    }

    fn query_geometry(&self) -> Result<Geometry> {
        (**self).query_geometry()
    }

    fn try_apply(&mut self, geometry: &Geometry) -> Result<Geometry> {
        (**self).try_apply(geometry)
    }

    fn commit(&mut self, geometry: &Geometry) -> Result<Geometry> {
        (**self).commit(geometry)
    }

    fn pan_to_offset(&mut self, y_offset: u32) -> Result<()> {
        (**self).pan_to_offset(y_offset)
    }

    fn wait_vblank(&mut self) {
        (**self).wait_vblank()
    }

    fn wait_idle(&mut self) {
        (**self).wait_idle()
    }

    fn map_memory(&mut self, len: usize) -> Result<()> {
        (**self).map_memory(len)
    }

    fn unmap_memory(&mut self) {
        (**self).unmap_memory()
    }

    fn memory(&self) -> Option<&[u8]> {
        (**self).memory()
    }

    fn memory_mut(&mut self) -> Option<&mut [u8]> {
        (**self).memory_mut()
    }
}
