//! Framebuffer Console Display Backend
//!
//! This crate drives a framebuffer-backed graphics output device: it
//! negotiates an achievable display mode, carves auxiliary drawing surfaces
//! out of the leftover video memory, and streams a rotated shadow buffer to
//! the physical framebuffer when the device cannot present pixels in the
//! application's orientation.
//!
//! # Architecture
//!
//! - `timing`: Static VESA timing table and the `fb.modes` override database
//! - `catalog`: Per-depth catalog of resolutions the device accepts
//! - `negotiate`: Timing selection for a requested mode
//! - `vidmem`: First-fit, coalescing allocator for off-screen surfaces
//! - `rotate`: Rotation-aware shadow-to-framebuffer block copies
//! - `session`: Display session controller tying the above together
//! - `device`: Framebuffer device capability and a heap-backed implementation
//! - `config`: Session configuration bundle

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod catalog;
pub mod config;
pub mod device;
pub mod geometry;
pub mod negotiate;
pub mod rotate;
pub mod session;
pub mod timing;
pub mod vidmem;

use core::fmt;

pub use catalog::{ModeCatalog, ModeRect, NUM_DEPTH_BUCKETS};
pub use config::{DisplayConfig, Orientation};
pub use device::{FramebufferDevice, MemoryFramebuffer};
pub use geometry::{Bitfield, FbType, FixedInfo, Geometry, Rect, SyncFlags, VideoModeFlags, Visual};
pub use negotiate::{ModeNegotiator, TimingSource};
pub use rotate::{RotationBlitEngine, ShadowSession};
pub use session::{DisplaySession, OutputSurface, PrimaryLock, SessionState, SurfaceFlags};
pub use timing::{TimingCatalog, TimingEntry};
pub use vidmem::{MemoryBlock, SurfaceAllocator, SurfaceHandle};

/// Page size used to locate the framebuffer start inside its mapping.
pub const PAGE_SIZE: u64 = 4096;

/// Display backend error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    /// Device could not be opened or queried.
    DeviceUnavailable,
    /// Device type or visual is not supported.
    UnsupportedHardware,
    /// Request exceeds the total free video memory.
    OutOfMemory,
    /// Enough free memory in total, but no single block fits.
    Fragmented,
    /// Auxiliary surface is wider than the display pitch.
    SurfaceTooWide,
    /// Surface handle is not owned by the allocator.
    InvalidSurface,
    /// Shadow updates requested at a depth the blitter cannot copy.
    UnsupportedDepthForShadow,
    /// Unrecognized orientation value.
    InvalidRotation,
    /// Device refused to commit the requested geometry.
    ModeRejected,
    /// Operation issued in the wrong session state.
    InvalidState,
    /// Device memory is not mapped or too small for the mode.
    NotMapped,
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::DeviceUnavailable => write!(f, "framebuffer device unavailable"),
            DisplayError::UnsupportedHardware => write!(f, "unsupported console hardware"),
            DisplayError::OutOfMemory => write!(f, "not enough video memory"),
            DisplayError::Fragmented => write!(f, "video memory too fragmented"),
            DisplayError::SurfaceTooWide => write!(f, "surface requested wider than screen"),
            DisplayError::InvalidSurface => write!(f, "surface not owned by video memory"),
            DisplayError::UnsupportedDepthForShadow => {
                write!(f, "shadow copy only implemented for 16 bpp")
            }
            DisplayError::InvalidRotation => write!(f, "invalid rotation"),
            DisplayError::ModeRejected => write!(f, "couldn't set console screen info"),
            DisplayError::InvalidState => write!(f, "invalid display session state"),
            DisplayError::NotMapped => write!(f, "framebuffer memory not mapped"),
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, DisplayError>;

/// Catalog bucket index for a bit depth (8/16/24/32 bpp map to 0..=3).
///
/// Returns `None` for depths outside the four supported byte widths.
pub fn depth_bucket(bits_per_pixel: u32) -> Option<usize> {
    let bytes = (bits_per_pixel as usize + 7) / 8;
    if (1..=NUM_DEPTH_BUCKETS).contains(&bytes) {
        Some(bytes - 1)
    } else {
        None
    }
}

/// Bytes needed to store one pixel of the given depth.
#[inline]
pub fn bytes_per_pixel(bits_per_pixel: u32) -> usize {
    (bits_per_pixel as usize + 7) / 8
}
