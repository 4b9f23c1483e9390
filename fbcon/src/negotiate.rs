//! Mode Negotiation
//!
//! Fills in the timing half of a mode request. User-supplied timings from
//! the override database are preferred, the built-in table comes next, and
//! when neither knows the resolution the device's own defaults are left in
//! place for it to accept or reject.

use crate::geometry::Geometry;
use crate::timing::TimingCatalog;

/// Which source supplied the timings of a negotiated geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingSource {
    /// Override database entry matching resolution and depth
    DatabaseExact,
    /// First override database entry matching the resolution
    Database,
    /// Built-in timing table
    Builtin,
    /// Nothing matched; timings are whatever the device reported
    DeviceDefault,
}

/// Timing negotiator over the built-in table and an optional override
/// database.
pub struct ModeNegotiator<'a> {
    builtin: &'a TimingCatalog,
    overrides: Option<&'a TimingCatalog>,
}

impl<'a> ModeNegotiator<'a> {
    pub fn new(builtin: &'a TimingCatalog, overrides: Option<&'a TimingCatalog>) -> Self {
        Self { builtin, overrides }
    }

    /// Complete `geometry` (whose resolution and depth are already set)
    /// with timings and sync flags.
    pub fn negotiate(&self, geometry: &mut Geometry) -> TimingSource {
        if let Some(source) = self.from_database(geometry) {
            log::debug!(
                "{}x{}@{}: timings from mode database ({:?})",
                geometry.xres,
                geometry.yres,
                geometry.bits_per_pixel,
                source
            );
            return source;
        }

        match self.builtin.lookup_by_resolution(geometry.xres, geometry.yres) {
            Some(entry) => {
                entry.apply_to(geometry);
                log::debug!("{}x{}: built-in timings", geometry.xres, geometry.yres);
                TimingSource::Builtin
            }
            None => {
                log::debug!(
                    "{}x{}: no known timings, keeping device defaults",
                    geometry.xres,
                    geometry.yres
                );
                TimingSource::DeviceDefault
            }
        }
    }

    /// The first resolution match is taken provisionally; a later entry
    /// with the same resolution and the exact depth replaces it and ends
    /// the search.
    fn from_database(&self, geometry: &mut Geometry) -> Option<TimingSource> {
        let db = self.overrides?;
        let mut matched = None;

        for entry in db.all_entries() {
            if entry.width != geometry.xres || entry.height != geometry.yres {
                continue;
            }
            let exact = entry.bits_per_pixel == Some(geometry.bits_per_pixel);
            match matched {
                None => {
                    entry.apply_to(geometry);
                    matched = Some(if exact {
                        TimingSource::DatabaseExact
                    } else {
                        TimingSource::Database
                    });
                }
                Some(_) if exact => {
                    entry.apply_to(geometry);
                    return Some(TimingSource::DatabaseExact);
                }
                Some(_) => {}
            }
        }

        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{SyncFlags, VideoModeFlags};
    use crate::timing::TimingEntry;
    use alloc::vec;

    fn entry(width: u32, height: u32, depth: u32, pixclock: u32) -> TimingEntry {
        TimingEntry {
            width,
            height,
            bits_per_pixel: Some(depth),
            pixclock,
            left_margin: 1,
            right_margin: 2,
            upper_margin: 3,
            lower_margin: 4,
            hsync_len: 5,
            vsync_len: 6,
            sync: SyncFlags::HOR_HIGH_ACT,
            vmode: VideoModeFlags::empty(),
        }
    }

    #[test]
    fn test_database_exact_depth_wins() {
        let db = TimingCatalog::from_entries(vec![
            entry(640, 480, 8, 100),
            entry(640, 480, 16, 200),
            entry(640, 480, 16, 300),
        ]);
        let builtin = TimingCatalog::builtin();
        let negotiator = ModeNegotiator::new(&builtin, Some(&db));

        let mut geometry = Geometry::with_mode(640, 480, 16);
        assert_eq!(negotiator.negotiate(&mut geometry), TimingSource::DatabaseExact);
        assert_eq!(geometry.pixclock, 200);
        assert_eq!(geometry.sync, SyncFlags::HOR_HIGH_ACT);
    }

    #[test]
    fn test_database_ambiguous_depth_first_wins() {
        let db = TimingCatalog::from_entries(vec![
            entry(640, 480, 8, 100),
            entry(640, 480, 24, 200),
        ]);
        let builtin = TimingCatalog::builtin();
        let negotiator = ModeNegotiator::new(&builtin, Some(&db));

        let mut geometry = Geometry::with_mode(640, 480, 32);
        assert_eq!(negotiator.negotiate(&mut geometry), TimingSource::Database);
        assert_eq!(geometry.pixclock, 100);
    }

    #[test]
    fn test_falls_back_to_builtin() {
        let db = TimingCatalog::from_entries(vec![entry(640, 480, 8, 100)]);
        let builtin = TimingCatalog::builtin();
        let negotiator = ModeNegotiator::new(&builtin, Some(&db));

        let mut geometry = Geometry::with_mode(1024, 768, 8);
        assert_eq!(negotiator.negotiate(&mut geometry), TimingSource::Builtin);
        assert_eq!(geometry.pixclock, 13333);

        let without_db = ModeNegotiator::new(&builtin, None);
        let mut geometry = Geometry::with_mode(320, 240, 8);
        assert_eq!(without_db.negotiate(&mut geometry), TimingSource::Builtin);
        assert_eq!(geometry.vmode, VideoModeFlags::DOUBLE);
    }

    #[test]
    fn test_unknown_resolution_keeps_device_defaults() {
        let builtin = TimingCatalog::builtin();
        let negotiator = ModeNegotiator::new(&builtin, None);

        let mut geometry = Geometry::with_mode(1366, 768, 32);
        geometry.pixclock = 12345;
        geometry.hsync_len = 40;
        let before = geometry;
        assert_eq!(negotiator.negotiate(&mut geometry), TimingSource::DeviceDefault);
        assert_eq!(geometry, before);
    }
}
