//! Display Geometry Types
//!
//! Variable and fixed screen information exchanged with the framebuffer
//! device, plus the dirty rectangle type used by shadow updates.

/// Position and width of one color channel inside a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bitfield {
    /// Bit offset of the channel
    pub offset: u32,
    /// Channel width in bits
    pub length: u32,
}

impl Bitfield {
    pub const fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    /// Pixel mask covering this channel.
    pub fn mask(&self) -> u32 {
        if self.length == 0 {
            return 0;
        }
        let bits = if self.length >= 32 {
            u32::MAX
        } else {
            (1u32 << self.length) - 1
        };
        bits.checked_shl(self.offset).unwrap_or(0)
    }
}

bitflags::bitflags! {
    /// Sync signal polarity and routing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SyncFlags: u32 {
        const HOR_HIGH_ACT = 1 << 0;
        const VERT_HIGH_ACT = 1 << 1;
        const EXT = 1 << 2;
        const COMP_HIGH_ACT = 1 << 3;
        const BROADCAST = 1 << 4;
        const ON_GREEN = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Scan mode flags. An empty set means non-interlaced.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VideoModeFlags: u32 {
        const INTERLACED = 1 << 0;
        const DOUBLE = 1 << 1;
    }
}

/// Variable screen information: everything a mode change can alter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    /// Visible resolution
    pub xres: u32,
    pub yres: u32,
    /// Virtual resolution
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    /// Offset from virtual to visible
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub red: Bitfield,
    pub green: Bitfield,
    pub blue: Bitfield,
    pub transp: Bitfield,
    /// Pixel clock in picoseconds
    pub pixclock: u32,
    /// Time from sync to picture
    pub left_margin: u32,
    /// Time from picture to sync
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: SyncFlags,
    pub vmode: VideoModeFlags,
}

impl Geometry {
    /// Geometry with the given resolution and depth, everything else zero.
    pub fn with_mode(xres: u32, yres: u32, bits_per_pixel: u32) -> Self {
        Self {
            xres,
            yres,
            xres_virtual: xres,
            yres_virtual: yres,
            bits_per_pixel,
            ..Self::default()
        }
    }

    /// Bytes per pixel at the current depth
    pub fn bytes_per_pixel(&self) -> usize {
        crate::bytes_per_pixel(self.bits_per_pixel)
    }

    /// Reset the channel layout so the device picks its native one.
    pub fn clear_channels(&mut self) {
        self.red = Bitfield::default();
        self.green = Bitfield::default();
        self.blue = Bitfield::default();
        self.transp = Bitfield::default();
    }
}

/// Framebuffer memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FbType {
    PackedPixels,
    Planes,
    InterleavedPlanes,
    Text,
    VgaPlanes,
}

/// Color visual of the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visual {
    Mono01,
    Mono10,
    TrueColor,
    PseudoColor,
    DirectColor,
    StaticPseudoColor,
}

impl Visual {
    /// Whether the channel bitfields describe real pixel masks.
    pub fn has_channel_masks(&self) -> bool {
        matches!(self, Visual::TrueColor | Visual::DirectColor)
    }
}

/// Fixed screen information: properties a mode change cannot alter,
/// except the line length which must be re-read after every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInfo {
    /// Physical start of framebuffer memory
    pub mem_start: u64,
    /// Length of framebuffer memory in bytes
    pub mem_len: usize,
    /// Bytes per scanline
    pub line_length: usize,
    pub fb_type: FbType,
    pub visual: Visual,
}

impl FixedInfo {
    /// Offset of the first pixel inside a page-aligned mapping.
    pub fn page_offset(&self) -> usize {
        (self.mem_start & (crate::PAGE_SIZE - 1)) as usize
    }

    /// Length to map so that all of framebuffer memory is covered.
    pub fn mapped_len(&self) -> usize {
        self.mem_len + self.page_offset()
    }

    /// Only packed-pixel devices with a color visual can be driven.
    pub fn is_supported(&self) -> bool {
        self.fb_type == FbType::PackedPixels
            && matches!(
                self.visual,
                Visual::TrueColor
                    | Visual::PseudoColor
                    | Visual::StaticPseudoColor
                    | Visual::DirectColor
            )
    }
}

/// A rectangle in logical (application) coordinates that needs to be
/// copied to the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip to `[0, width] x [0, height]`, returning corner coordinates
    /// `(x1, y1, x2, y2)`, or `None` if nothing is left.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
        let clamp = |v: i64, max: u32| v.clamp(0, max as i64) as usize;

        let x1 = clamp(self.x as i64, width);
        let y1 = clamp(self.y as i64, height);
        let x2 = clamp(self.x as i64 + self.width as i64, width);
        let y2 = clamp(self.y as i64 + self.height as i64, height);

        if x2 <= x1 || y2 <= y1 {
            None
        } else {
            Some((x1, y1, x2, y2))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitfield_mask() {
        assert_eq!(Bitfield::new(11, 5).mask(), 0xF800);
        assert_eq!(Bitfield::new(5, 6).mask(), 0x07E0);
        assert_eq!(Bitfield::new(0, 5).mask(), 0x001F);
        assert_eq!(Bitfield::new(0, 32).mask(), u32::MAX);
        assert_eq!(Bitfield::new(8, 0).mask(), 0);
    }

    #[test]
    fn test_rect_clip() {
        assert_eq!(Rect::new(-10, -10, 30, 30).clip_to(100, 50), Some((0, 0, 20, 20)));
        assert_eq!(Rect::new(90, 40, 30, 30).clip_to(100, 50), Some((90, 40, 100, 50)));
        assert_eq!(Rect::new(100, 0, 10, 10).clip_to(100, 50), None);
        assert_eq!(Rect::new(-20, 0, 10, 10).clip_to(100, 50), None);
        assert_eq!(Rect::new(5, 5, 0, 10).clip_to(100, 50), None);
    }

    #[test]
    fn test_fixed_info_support() {
        let mut fixed = FixedInfo {
            mem_start: 0xE000_0100,
            mem_len: 4096,
            line_length: 64,
            fb_type: FbType::PackedPixels,
            visual: Visual::TrueColor,
        };
        assert!(fixed.is_supported());
        assert_eq!(fixed.page_offset(), 0x100);
        assert_eq!(fixed.mapped_len(), 4096 + 0x100);

        fixed.visual = Visual::Mono01;
        assert!(!fixed.is_supported());
        fixed.visual = Visual::PseudoColor;
        fixed.fb_type = FbType::VgaPlanes;
        assert!(!fixed.is_supported());
    }
}
