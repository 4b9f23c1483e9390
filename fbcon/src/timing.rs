//! Display Timings
//!
//! Known-good CRT timings for common resolutions and the fbset `fb.modes`
//! override database. Both sources share one entry type and are read-only
//! once loaded.

use alloc::borrow::Cow;
use alloc::vec::Vec;

use crate::geometry::{Geometry, SyncFlags, VideoModeFlags};

/// One timing descriptor. Entries are identified by resolution; several
/// entries may share a resolution with different refresh parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingEntry {
    pub width: u32,
    pub height: u32,
    /// Depth the entry was written for (override database only)
    pub bits_per_pixel: Option<u32>,
    /// Pixel clock in picoseconds, 0 if unknown
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: SyncFlags,
    pub vmode: VideoModeFlags,
}

impl TimingEntry {
    #[allow(clippy::too_many_arguments)]
    const fn vesa(
        width: u32,
        height: u32,
        pixclock: u32,
        left_margin: u32,
        right_margin: u32,
        upper_margin: u32,
        lower_margin: u32,
        hsync_len: u32,
        vsync_len: u32,
        sync: SyncFlags,
        vmode: VideoModeFlags,
    ) -> Self {
        Self {
            width,
            height,
            bits_per_pixel: None,
            pixclock,
            left_margin,
            right_margin,
            upper_margin,
            lower_margin,
            hsync_len,
            vsync_len,
            sync,
            vmode,
        }
    }

    /// Whether the entry carries a usable pixel clock.
    pub fn has_pixclock(&self) -> bool {
        self.pixclock != 0
    }

    /// Copy the timing fields (not the resolution) into `geometry`.
    pub fn apply_to(&self, geometry: &mut Geometry) {
        geometry.pixclock = self.pixclock;
        geometry.left_margin = self.left_margin;
        geometry.right_margin = self.right_margin;
        geometry.upper_margin = self.upper_margin;
        geometry.lower_margin = self.lower_margin;
        geometry.hsync_len = self.hsync_len;
        geometry.vsync_len = self.vsync_len;
        geometry.sync = self.sync;
        geometry.vmode = self.vmode;
    }
}

const NO_SYNC: SyncFlags = SyncFlags::empty();
const PROGRESSIVE: VideoModeFlags = VideoModeFlags::empty();

/// Built-in timings, generated from X modelines for a 15" CRT.
pub static VESA_TIMINGS: &[TimingEntry] = &[
    TimingEntry::vesa(320, 200, 79440, 16, 16, 20, 4, 48, 1, NO_SYNC, VideoModeFlags::DOUBLE), // 70 Hz
    TimingEntry::vesa(320, 240, 63492, 16, 16, 16, 4, 48, 2, NO_SYNC, VideoModeFlags::DOUBLE), // 72 Hz
    TimingEntry::vesa(512, 384, 49603, 48, 16, 16, 1, 64, 3, NO_SYNC, PROGRESSIVE), // 78 Hz
    TimingEntry::vesa(640, 400, 31747, 64, 16, 39, 8, 96, 2, NO_SYNC, PROGRESSIVE), // 85 Hz
    TimingEntry::vesa(640, 480, 31747, 64, 16, 16, 4, 64, 3, NO_SYNC, PROGRESSIVE), // 85 Hz
    TimingEntry::vesa(720, 576, 26101, 144, 16, 28, 6, 112, 4, NO_SYNC, PROGRESSIVE), // 60 Hz
    TimingEntry::vesa(768, 576, 26101, 144, 16, 28, 6, 112, 4, NO_SYNC, PROGRESSIVE), // 60 Hz
    TimingEntry::vesa(800, 600, 20000, 64, 16, 16, 4, 64, 3, NO_SYNC, PROGRESSIVE), // 85 Hz
    TimingEntry::vesa(960, 720, 17686, 144, 24, 28, 8, 112, 4, NO_SYNC, PROGRESSIVE), // 60 Hz
    TimingEntry::vesa(1024, 768, 13333, 144, 24, 29, 3, 136, 6, NO_SYNC, PROGRESSIVE), // 70 Hz
    TimingEntry::vesa(1152, 864, 12286, 192, 32, 30, 4, 128, 4, NO_SYNC, PROGRESSIVE), // 60 Hz
    TimingEntry::vesa(1280, 1024, 9369, 224, 32, 32, 4, 136, 4, NO_SYNC, PROGRESSIVE), // 60 Hz
    TimingEntry::vesa(1408, 1056, 8214, 256, 40, 32, 5, 144, 5, NO_SYNC, PROGRESSIVE), // 60 Hz
    // Pixel clock never measured; resolution is matched but not advertised.
    TimingEntry::vesa(1600, 1200, 0, 272, 48, 32, 5, 152, 5, NO_SYNC, PROGRESSIVE), // 60 Hz
    TimingEntry::vesa(
        1920,
        1080,
        6734,
        148,
        88,
        36,
        4,
        44,
        5,
        SyncFlags::HOR_HIGH_ACT.union(SyncFlags::VERT_HIGH_ACT),
        PROGRESSIVE,
    ), // 60 Hz
];

/// An ordered list of timing entries. Earlier entries win lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingCatalog {
    entries: Cow<'static, [TimingEntry]>,
}

impl TimingCatalog {
    /// The compiled-in timing table.
    pub fn builtin() -> Self {
        Self {
            entries: Cow::Borrowed(VESA_TIMINGS),
        }
    }

    pub fn from_entries(entries: Vec<TimingEntry>) -> Self {
        Self {
            entries: Cow::Owned(entries),
        }
    }

    /// First entry with the given resolution.
    pub fn lookup_by_resolution(&self, width: u32, height: u32) -> Option<&TimingEntry> {
        self.entries
            .iter()
            .find(|e| e.width == width && e.height == height)
    }

    /// Whether some entry for this resolution has a known pixel clock.
    pub fn has_timing(&self, width: u32, height: u32) -> bool {
        self.entries
            .iter()
            .any(|e| e.width == width && e.height == height && e.has_pixclock())
    }

    pub fn all_entries(&self) -> &[TimingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse an fbset mode database. Malformed blocks are skipped.
    pub fn parse_modes_db(text: &str) -> Self {
        let mut entries = Vec::new();
        let mut block: Option<ModeBlock> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = match raw.split_once('#') {
                Some((before, _)) => before.trim(),
                None => raw.trim(),
            };
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };

            match keyword {
                "mode" => {
                    if block.is_some() {
                        log::debug!("mode block unterminated before line {}", index + 1);
                    }
                    block = Some(ModeBlock::default());
                }
                "endmode" => match block.take().and_then(ModeBlock::finish) {
                    Some(entry) => entries.push(entry),
                    None => log::debug!("skipping incomplete mode block at line {}", index + 1),
                },
                _ => {
                    if let Some(block) = block.as_mut() {
                        block.apply(keyword, words);
                    }
                }
            }
        }

        log::debug!("parsed {} entries from mode database", entries.len());
        Self::from_entries(entries)
    }

    /// Read and parse a mode database file. Any failure yields `None`;
    /// callers fall back to the built-in table.
    #[cfg(feature = "std")]
    pub fn load(path: &str) -> Option<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Some(Self::parse_modes_db(&text)),
            Err(err) => {
                log::warn!("cannot read mode database {}: {}", path, err);
                None
            }
        }
    }

    /// Without filesystem access the override database is never present.
    #[cfg(not(feature = "std"))]
    pub fn load(path: &str) -> Option<Self> {
        log::debug!("no filesystem access, ignoring mode database {}", path);
        None
    }
}

impl Default for TimingCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Partially parsed `mode ... endmode` block.
#[derive(Default)]
struct ModeBlock {
    geometry: Option<[u32; 5]>,
    timings: Option<[u32; 7]>,
    sync: SyncFlags,
    vmode: VideoModeFlags,
    malformed: bool,
}

impl ModeBlock {
    fn apply<'a>(&mut self, keyword: &str, mut words: impl Iterator<Item = &'a str>) {
        match keyword {
            "geometry" => {
                self.geometry = parse_fields(&mut words);
                self.malformed |= self.geometry.is_none();
            }
            "timings" => {
                self.timings = parse_fields(&mut words);
                self.malformed |= self.timings.is_none();
            }
            "hsync" => self.set_sync(SyncFlags::HOR_HIGH_ACT, words.next() == Some("high")),
            "vsync" => self.set_sync(SyncFlags::VERT_HIGH_ACT, words.next() == Some("high")),
            "csync" => self.set_sync(SyncFlags::COMP_HIGH_ACT, words.next() == Some("high")),
            "gsync" => self.set_sync(SyncFlags::ON_GREEN, words.next() == Some("high")),
            "extsync" => self.set_sync(SyncFlags::EXT, words.next() == Some("true")),
            "bcast" => self.set_sync(SyncFlags::BROADCAST, words.next() == Some("true")),
            "laced" => self
                .vmode
                .set(VideoModeFlags::INTERLACED, words.next() == Some("true")),
            "double" => self
                .vmode
                .set(VideoModeFlags::DOUBLE, words.next() == Some("true")),
            _ => {}
        }
    }

    fn set_sync(&mut self, flag: SyncFlags, on: bool) {
        self.sync.set(flag, on);
    }

    fn finish(self) -> Option<TimingEntry> {
        if self.malformed {
            return None;
        }
        let [xres, yres, _vxres, _vyres, depth] = self.geometry?;
        let [pixclock, left, right, upper, lower, hslen, vslen] = self.timings?;

        Some(TimingEntry {
            width: xres,
            height: yres,
            bits_per_pixel: Some(depth),
            pixclock,
            left_margin: left,
            right_margin: right,
            upper_margin: upper,
            lower_margin: lower,
            hsync_len: hslen,
            vsync_len: vslen,
            sync: self.sync,
            vmode: self.vmode,
        })
    }
}

fn parse_fields<'a, const N: usize>(words: &mut impl Iterator<Item = &'a str>) -> Option<[u32; N]> {
    let mut fields = [0u32; N];
    for field in fields.iter_mut() {
        *field = words.next()?.parse().ok()?;
    }
    Some(fields)
}
