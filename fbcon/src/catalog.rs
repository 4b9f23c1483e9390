//! Mode Catalog
//!
//! For every depth bucket (8, 16, 24 and 32 bpp) the catalog lists the
//! resolutions the device actually accepts, largest first. It is rebuilt
//! each time a device is opened.

use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::config::Orientation;
use crate::device::FramebufferDevice;
use crate::geometry::Geometry;
use crate::timing::TimingCatalog;

/// Number of depth buckets (1 to 4 bytes per pixel)
pub const NUM_DEPTH_BUCKETS: usize = 4;

/// Resolutions probed when no override database is available.
pub const PROBE_RESOLUTIONS: &[(u32, u32)] = &[
    (1920, 1080),
    (1600, 1200),
    (1408, 1056),
    (1280, 1024),
    (1152, 864),
    (1024, 768),
    (960, 720),
    (800, 600),
    (768, 576),
    (720, 576),
    (640, 480),
    (640, 400),
    (512, 384),
    (320, 240),
    (320, 200),
];

/// One advertised mode. The origin is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ModeRect {
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Largest-first order: decreasing height, then decreasing width.
fn largest_first(a: &ModeRect, b: &ModeRect) -> Ordering {
    b.height.cmp(&a.height).then(b.width.cmp(&a.width))
}

/// Where probe candidates come from.
enum Candidates<'a> {
    /// Override database entries, advertised without a timing check
    Database(&'a TimingCatalog),
    /// Fixed probe list, advertised only with a known timing
    Probe,
}

impl Candidates<'_> {
    fn resolutions(&self) -> Vec<(u32, u32)> {
        match self {
            Candidates::Database(db) => db
                .all_entries()
                .iter()
                .map(|e| (e.width, e.height))
                .collect(),
            Candidates::Probe => PROBE_RESOLUTIONS.to_vec(),
        }
    }

    fn needs_timing(&self) -> bool {
        matches!(self, Candidates::Probe)
    }
}

/// Per-depth list of accepted resolutions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeCatalog {
    buckets: [Vec<ModeRect>; NUM_DEPTH_BUCKETS],
}

impl ModeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe `device` and build the catalog.
    ///
    /// `current` is the geometry active on the device; it is the template
    /// for every probe and is always offered in its own bucket. With
    /// `broken_modes` only the current mode is listed. Dimensions in the
    /// catalog are logical (swapped for CW/CCW orientations).
    pub fn build(
        device: &mut dyn FramebufferDevice,
        current: &Geometry,
        builtin: &TimingCatalog,
        overrides: Option<&TimingCatalog>,
        broken_modes: bool,
        orientation: Orientation,
    ) -> Self {
        let mut catalog = Self::new();
        let (current_w, current_h) = orientation.physical_size(current.xres, current.yres);
        let mut current_bucket = crate::depth_bucket(current.bits_per_pixel);

        if broken_modes {
            if let Some(index) = current_bucket {
                catalog.add_mode(index, ModeRect::new(current_w, current_h));
            }
            log::debug!("broken modes: advertising only {}x{}", current_w, current_h);
            return catalog;
        }

        let candidates = match overrides {
            Some(db) => Candidates::Database(db),
            None => Candidates::Probe,
        };
        let resolutions = candidates.resolutions();

        for index in 0..NUM_DEPTH_BUCKETS {
            for &(phys_w, phys_h) in &resolutions {
                let (w, h) = orientation.physical_size(phys_w, phys_h);

                if current_bucket == Some(index) && (current_w > w || current_h > h) {
                    // Only once: the active mode must stay selectable.
                    catalog.add_mode(index, ModeRect::new(current_w, current_h));
                    current_bucket = None;
                }

                let Some((accepted_w, accepted_h)) = probe(device, current, index, phys_w, phys_h)
                else {
                    continue;
                };
                if candidates.needs_timing() && !builtin.has_timing(accepted_w, accepted_h) {
                    log::trace!("no timing for {}x{}, not advertised", accepted_w, accepted_h);
                    continue;
                }

                let (w, h) = orientation.physical_size(accepted_w, accepted_h);
                catalog.add_mode(index, ModeRect::new(w, h));
            }
        }

        catalog.sort();
        for index in 0..NUM_DEPTH_BUCKETS {
            log::debug!(
                "{} bpp: {} modes",
                (index + 1) * 8,
                catalog.buckets[index].len()
            );
        }
        catalog
    }

    /// Append a mode unless it repeats the most recently added one.
    ///
    /// Only the last entry is compared: candidates are expected to arrive
    /// grouped, so an out-of-order repeat is kept.
    pub fn add_mode(&mut self, index: usize, mode: ModeRect) -> bool {
        let Some(bucket) = self.buckets.get_mut(index) else {
            return false;
        };
        if let Some(last) = bucket.last() {
            if last.width == mode.width && last.height == mode.height {
                return false;
            }
        }
        bucket.push(mode);
        true
    }

    /// Sort every bucket largest first.
    pub fn sort(&mut self) {
        for bucket in &mut self.buckets {
            bucket.sort_by(largest_first);
        }
    }

    /// Modes in bucket `index` (0..=3)
    pub fn bucket(&self, index: usize) -> &[ModeRect] {
        self.buckets.get(index).map(|b| b.as_slice()).unwrap_or(&[])
    }

    /// Modes available at the given depth
    pub fn modes(&self, bits_per_pixel: u32) -> &[ModeRect] {
        match crate::depth_bucket(bits_per_pixel) {
            Some(index) => self.bucket(index),
            None => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }
}

/// Test-apply a resolution at the bucket's depth. Returns the resolution
/// the device settled on, if it kept the depth in the same bucket.
fn probe(
    device: &mut dyn FramebufferDevice,
    template: &Geometry,
    index: usize,
    width: u32,
    height: u32,
) -> Option<(u32, u32)> {
    let mut request = *template;
    request.bits_per_pixel = (index as u32 + 1) * 8;
    request.xres = width;
    request.yres = height;
    request.xres_virtual = width;
    request.yres_virtual = height;
    request.xoffset = 0;
    request.yoffset = 0;
    request.clear_channels();

    match device.try_apply(&request) {
        Ok(accepted) if crate::depth_bucket(accepted.bits_per_pixel) == Some(index) => {
            log::trace!("probe {}x{}@{}: ok", width, height, request.bits_per_pixel);
            Some((accepted.xres, accepted.yres))
        }
        Ok(accepted) => {
            log::trace!(
                "probe {}x{}@{}: device coerced depth to {}",
                width,
                height,
                request.bits_per_pixel,
                accepted.bits_per_pixel
            );
            None
        }
        Err(_) => {
            log::trace!("probe {}x{}@{}: rejected", width, height, request.bits_per_pixel);
            None
        }
    }
}
