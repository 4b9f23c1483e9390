//! Session Configuration
//!
//! The configuration bundle handed to a display session when it opens.

use alloc::string::String;
use core::str::FromStr;

use crate::DisplayError;

/// Default location of the fbset mode database.
pub const DEFAULT_MODES_DB: &str = "/etc/fb.modes";

/// Orientation of the physical display relative to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Unrotated
    None,
    /// Display is rotated clockwise
    Cw,
    /// Display is rotated counter-clockwise
    Ccw,
    /// Display is upside down
    Ud,
}

impl Orientation {
    /// Whether the logical and physical axes are swapped.
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Orientation::Cw | Orientation::Ccw)
    }

    /// Map logical dimensions to physical ones (and back: the swap is its
    /// own inverse).
    pub fn physical_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

impl TryFrom<u8> for Orientation {
    type Error = DisplayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Orientation::None),
            1 => Ok(Orientation::Cw),
            2 => Ok(Orientation::Ud),
            3 => Ok(Orientation::Ccw),
            _ => Err(DisplayError::InvalidRotation),
        }
    }
}

impl FromStr for Orientation {
    type Err = DisplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Orientation::None),
            "CW" => Ok(Orientation::Cw),
            "CCW" => Ok(Orientation::Ccw),
            "UD" => Ok(Orientation::Ud),
            _ => Err(DisplayError::InvalidRotation),
        }
    }
}

/// Parse a rotation selection. An empty selection disables rotation.
pub fn parse_rotation(value: &str) -> Result<Option<Orientation>, DisplayError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some)
}

/// Display session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConfig {
    /// Rotation selection; `None` disables rotation
    pub rotation: Option<Orientation>,
    /// Render through a shadow buffer even without rotation
    pub force_shadow: bool,
    /// Path of the timing override database
    pub modes_db: Option<String>,
    /// Only advertise the currently active mode
    pub broken_modes: bool,
    /// Request a second page for flipping
    pub double_buffer: bool,
    /// Blank the screen on close; otherwise the last frame stays visible
    pub clear_on_close: bool,
}

impl DisplayConfig {
    /// Effective orientation (disabled rotation behaves as `None`).
    pub fn orientation(&self) -> Orientation {
        self.rotation.unwrap_or(Orientation::None)
    }

    /// Whether updates go through a shadow buffer. Any rotation selection,
    /// `NONE` included, renders through one.
    pub fn uses_shadow(&self) -> bool {
        self.force_shadow || self.rotation.is_some()
    }

    pub fn with_rotation(mut self, rotation: Orientation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_modes_db(mut self, path: Option<&str>) -> Self {
        self.modes_db = path.map(String::from);
        self
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            rotation: None,
            force_shadow: false,
            modes_db: Some(String::from(DEFAULT_MODES_DB)),
            broken_modes: false,
            double_buffer: false,
            clear_on_close: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotation() {
        assert_eq!(parse_rotation(""), Ok(None));
        assert_eq!(parse_rotation("NONE"), Ok(Some(Orientation::None)));
        assert_eq!(parse_rotation("CW"), Ok(Some(Orientation::Cw)));
        assert_eq!(parse_rotation("CCW"), Ok(Some(Orientation::Ccw)));
        assert_eq!(parse_rotation(" UD "), Ok(Some(Orientation::Ud)));
        assert_eq!(parse_rotation("left"), Err(DisplayError::InvalidRotation));
        assert_eq!(Orientation::try_from(7), Err(DisplayError::InvalidRotation));
    }

    #[test]
    fn test_shadow_selection() {
        let config = DisplayConfig::default();
        assert!(!config.uses_shadow());

        let rotated = DisplayConfig::default().with_rotation(Orientation::Ud);
        assert!(rotated.uses_shadow());

        // Unrotated, but still shadowed.
        let unrotated = DisplayConfig::default().with_rotation(Orientation::None);
        assert!(unrotated.uses_shadow());
        assert_eq!(unrotated.orientation(), Orientation::None);

        let forced = DisplayConfig {
            force_shadow: true,
            ..DisplayConfig::default()
        };
        assert!(forced.uses_shadow());
    }

    #[test]
    fn test_orientation_axes() {
        assert_eq!(Orientation::Cw.physical_size(640, 480), (480, 640));
        assert_eq!(Orientation::Ud.physical_size(640, 480), (640, 480));
        assert_eq!(Orientation::Ccw.physical_size(640, 480), (480, 640));
    }
}
