use bytemuck::{Pod, Zeroable};

/// Style flag bits carried in `GlyphProps::flags` and packed into the top
/// byte of a renderer cell's foreground word.
pub const FLAG_BOLD: u8 = 0x01;
pub const FLAG_DIM: u8 = 0x02;
pub const FLAG_ITALIC: u8 = 0x04;
pub const FLAG_UNDERLINE: u8 = 0x08;
pub const FLAG_BLINK: u8 = 0x10;
pub const FLAG_REVERSE: u8 = 0x20;
pub const FLAG_INVISIBLE: u8 = 0x40;
pub const FLAG_STRIKE: u8 = 0x80;

/// Pack 8-bit color channels into the renderer's `0x00BBGGRR` layout.
pub fn pack_rgb(r: u32, g: u32, b: u32) -> u32 {
    let r = r.min(255);
    let g = g.min(255);
    let b = b.min(255);
    (b << 16) | (g << 8) | r
}

/// Grid coordinates. Kept signed: `CSI H` can park the cursor out of bounds
/// and layout simply drops writes until it comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Effective style at a point in the byte stream: 24-bit fg/bg plus flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlyphProps {
    pub foreground: u32,
    pub background: u32,
    pub flags: u8,
}

impl GlyphProps {
    pub fn new(foreground: u32, background: u32) -> Self {
        Self { foreground, background, flags: 0 }
    }
}

/// A cursor is a grid position plus the props that will style the next cell.
/// The parser keeps one (mutated by SGR as bytes stream in); layout keeps its
/// own, re-seeded from each line's starting props.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub at: Point,
    pub props: GlyphProps,
}

/// One cell of the screen grid, laid out exactly as the GPU consumes it.
/// The top byte of `foreground` carries the style flags so the shader can
/// apply blink/underline/strike at draw time.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RendererCell {
    pub glyph_index: u32,
    pub foreground: u32,
    pub background: u32,
}

impl RendererCell {
    /// Compose a cell from a tile index and the current props. Reverse video
    /// swaps fg/bg here, at write time; invisible collapses to the empty tile.
    pub fn compose(gpu_index: u32, props: GlyphProps) -> Self {
        let mut foreground = props.foreground;
        let mut background = props.background;
        if props.flags & FLAG_REVERSE != 0 {
            foreground = props.background;
            background = props.foreground;
        }

        let glyph_index = if props.flags & FLAG_INVISIBLE != 0 { 0 } else { gpu_index };

        Self {
            glyph_index,
            foreground: foreground | ((props.flags as u32) << 24),
            background,
        }
    }

    pub fn blank(background: u32) -> Self {
        // Foreground matches the background rather than zero so that tile 0
        // stays harmless even if the empty glyph has coverage.
        Self { glyph_index: 0, foreground: background, background }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_rgb_layout() {
        assert_eq!(pack_rgb(255, 0, 0), 0x0000FF);
        assert_eq!(pack_rgb(0, 255, 0), 0x00FF00);
        assert_eq!(pack_rgb(0, 0, 255), 0xFF0000);
        assert_eq!(pack_rgb(300, 300, 300), 0xFFFFFF);
    }

    #[test]
    fn reverse_swaps_fg_bg() {
        let mut props = GlyphProps::new(0x111111, 0x222222);
        props.flags = FLAG_REVERSE;
        let cell = RendererCell::compose(7, props);
        assert_eq!(cell.foreground & 0x00FF_FFFF, 0x222222);
        assert_eq!(cell.background, 0x111111);
    }

    #[test]
    fn invisible_maps_to_empty_tile() {
        let mut props = GlyphProps::new(0x111111, 0x222222);
        props.flags = FLAG_INVISIBLE;
        let cell = RendererCell::compose(42, props);
        assert_eq!(cell.glyph_index, 0);
    }

    #[test]
    fn flags_ride_in_top_byte() {
        let mut props = GlyphProps::new(0xABCDEF, 0);
        props.flags = FLAG_BLINK | FLAG_UNDERLINE;
        let cell = RendererCell::compose(1, props);
        assert_eq!(cell.foreground >> 24, (FLAG_BLINK | FLAG_UNDERLINE) as u32);
        assert_eq!(cell.foreground & 0x00FF_FFFF, 0xABCDEF);
    }
}
