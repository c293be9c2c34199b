//! Glyph generation: font resolution, run rasterization into a CPU transfer
//! surface, and tile-by-tile handoff to whatever owns the atlas.
//!
//! The engine only ever rasterizes a run once per cache entry; everything
//! here is off the steady-state hot path.

use std::path::{Path, PathBuf};

use swash::scale::{Render, ScaleContext, Source, StrikeWith};
use swash::zeno::Format;
use swash::FontRef;
use thiserror::Error;
use unicode_width::UnicodeWidthChar;

use crate::glyph_cache::{ReservedTiles, EMPTY_TILE, MAX_DIRECT_CODEPOINT, MIN_DIRECT_CODEPOINT};

/// Sink for finished tiles. The renderer's atlas implements this; tests use
/// a counting mock. `reset` re-shapes the backing store for a new font and
/// returns how many tiles it holds.
pub trait TileStore {
    fn reset(&mut self, tile_width: u32, tile_height: u32) -> u32;
    /// `pixels` is a tight `tile_width * tile_height` alpha buffer.
    fn store_tile(&mut self, gpu_index: u32, pixels: &[u8]);
}

#[derive(Debug, Error)]
pub enum FontError {
    #[error("font family {0:?} not found in any font directory")]
    NotFound(String),
    #[error("could not read font file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported font data in {0}")]
    Unsupported(PathBuf),
}

/// Rasterizes shaping runs into an R8 transfer surface, one run at a time.
/// Starts fontless (blank tiles, fixed 8x16 metrics) so the engine can run
/// headless; `set_font` upgrades it.
pub struct GlyphGenerator {
    transfer_width: u32,
    transfer_height: u32,
    pixels: Vec<u8>,
    scratch: Vec<u8>,

    context: ScaleContext,
    font_data: Vec<u8>,
    font_size: f32,
    ascent: f32,

    pub font_width: u32,
    pub font_height: u32,
}

impl GlyphGenerator {
    pub fn new(transfer_width: u32, transfer_height: u32) -> Self {
        Self {
            transfer_width,
            transfer_height,
            pixels: vec![0u8; (transfer_width * transfer_height) as usize],
            scratch: Vec::new(),
            context: ScaleContext::new(),
            font_data: Vec::new(),
            font_size: 0.0,
            ascent: 12.0,
            font_width: 8,
            font_height: 16,
        }
    }

    /// Load a font by family name at the requested cell height in pixels.
    pub fn set_font(&mut self, family: &str, height: u32) -> Result<(), FontError> {
        let path = resolve_font_file(family).ok_or_else(|| FontError::NotFound(family.into()))?;
        let data = std::fs::read(&path)
            .map_err(|source| FontError::Io { path: path.clone(), source })?;
        let font =
            FontRef::from_index(&data, 0).ok_or_else(|| FontError::Unsupported(path.clone()))?;

        let metrics = font.metrics(&[]);
        let units_per_em = f32::from(metrics.units_per_em).max(1.0);
        let em_height = (metrics.ascent + metrics.descent).max(1.0);

        // The transfer surface bounds the tallest usable font.
        let height = height.clamp(4, self.transfer_height);
        let font_size = height as f32 * units_per_em / em_height;
        let scale = font_size / units_per_em;

        self.font_size = font_size;
        self.ascent = metrics.ascent * scale;
        self.font_height = height;
        self.font_width = measure_advance(&mut self.context, font, font_size)
            .unwrap_or(font_size * 0.6)
            .ceil()
            .max(1.0) as u32;
        self.font_data = data;

        log::info!(
            "font {:?} at {}px: cell {}x{}",
            family,
            height,
            self.font_width,
            self.font_height
        );
        Ok(())
    }

    pub fn has_font(&self) -> bool {
        !self.font_data.is_empty()
    }

    /// Widest run the transfer surface can hold, in tiles.
    pub fn max_tiles_per_run(&self) -> u32 {
        (self.transfer_width / self.font_width.max(1)).max(1)
    }

    /// Tile count for a run: terminal columns by East Asian width rules,
    /// clamped to the transfer surface.
    pub fn measure_run(&self, codepoints: &[char]) -> u32 {
        let columns: usize = codepoints.iter().map(|&c| c.width().unwrap_or(0)).sum();
        (columns.max(1) as u32).min(self.max_tiles_per_run())
    }

    /// Paint a whole run into the transfer surface. Called once per run per
    /// rasterization, before the per-tile transfers.
    pub fn prepare_run(&mut self, codepoints: &[char], tile_count: u32) {
        let strip_width = (tile_count * self.font_width).min(self.transfer_width) as usize;
        let height = (self.font_height.min(self.transfer_height)) as usize;
        for row in 0..height {
            let start = row * self.transfer_width as usize;
            self.pixels[start..start + strip_width].fill(0);
        }

        if self.font_data.is_empty() {
            return;
        }

        let Some(font) = FontRef::from_index(&self.font_data, 0) else {
            return;
        };
        let mut scaler = self.context.builder(font).size(self.font_size).hint(true).build();
        let charmap = font.charmap();

        let mut pen_cells = 0u32;
        for &c in codepoints {
            let advance = c.width().unwrap_or(0) as u32;
            // Zero-advance marks overlay the cell of their base character.
            let cell = if advance == 0 { pen_cells.saturating_sub(1) } else { pen_cells };
            if cell >= tile_count {
                break;
            }

            let glyph_id = charmap.map(c);
            let image = Render::new(&[
                Source::ColorOutline(0),
                Source::ColorBitmap(StrikeWith::BestFit),
                Source::Outline,
            ])
            .format(Format::Alpha)
            .render(&mut scaler, glyph_id);

            if let Some(image) = image {
                let origin_x = (cell * self.font_width) as i32 + image.placement.left;
                let origin_y = self.ascent as i32 - image.placement.top;
                blit_alpha(
                    &mut self.pixels,
                    self.transfer_width as usize,
                    height,
                    strip_width,
                    &image.data,
                    image.placement.width,
                    image.placement.height,
                    origin_x,
                    origin_y,
                );
            }

            pen_cells += advance;
        }
    }

    /// Copy one tile of the prepared run into the store at its permanent
    /// atlas index.
    pub fn transfer_tile(&mut self, tile_index: u32, gpu_index: u32, store: &mut dyn TileStore) {
        let width = self.font_width as usize;
        let height = self.font_height.min(self.transfer_height) as usize;
        let x0 = (tile_index * self.font_width) as usize;

        self.scratch.clear();
        self.scratch.reserve(width * height);
        for row in 0..height {
            let start = row * self.transfer_width as usize + x0;
            if start + width <= self.pixels.len() {
                self.scratch.extend_from_slice(&self.pixels[start..start + width]);
            } else {
                self.scratch.extend(std::iter::repeat(0).take(width));
            }
        }
        store.store_tile(gpu_index, &self.scratch);
    }

    /// Pre-rasterize the empty tile and every direct codepoint into their
    /// reserved indices. Done once per font.
    pub fn rasterize_reserved(&mut self, reserved: &ReservedTiles, store: &mut dyn TileStore) {
        self.prepare_run(&[], 1);
        self.transfer_tile(0, EMPTY_TILE, store);

        for codepoint in MIN_DIRECT_CODEPOINT..=MAX_DIRECT_CODEPOINT {
            let c = codepoint as char;
            self.prepare_run(&[c], 1);
            self.transfer_tile(0, reserved.get(codepoint), store);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn blit_alpha(
    pixels: &mut [u8],
    pitch: usize,
    max_height: usize,
    strip_width: usize,
    data: &[u8],
    width: u32,
    height: u32,
    origin_x: i32,
    origin_y: i32,
) {
    for row in 0..height as i32 {
        let y = origin_y + row;
        if y < 0 || y as usize >= max_height {
            continue;
        }
        for col in 0..width as i32 {
            let x = origin_x + col;
            if x < 0 || (x as usize) >= strip_width {
                continue;
            }
            let src = (row as u32 * width + col as u32) as usize;
            let dst = y as usize * pitch + x as usize;
            pixels[dst] = pixels[dst].max(data[src]);
        }
    }
}

fn measure_advance(context: &mut ScaleContext, font: FontRef, font_size: f32) -> Option<f32> {
    let mut scaler = context.builder(font).size(font_size).hint(true).build();
    let glyph_id = font.charmap().map('M');
    if glyph_id == 0 {
        return None;
    }
    let image = Render::new(&[
        Source::ColorOutline(0),
        Source::ColorBitmap(StrikeWith::BestFit),
        Source::Outline,
    ])
    .format(Format::Alpha)
    .render(&mut scaler, glyph_id)?;

    let visual = image.placement.width as f32;
    let bearing = image.placement.left as f32;
    Some((bearing + visual).max(1.0))
}

/// Look for a font file whose name matches the family, in the usual system
/// and user font directories.
fn resolve_font_file(family: &str) -> Option<PathBuf> {
    let needle = normalize(family);
    if needle.is_empty() {
        return None;
    }

    let mut roots: Vec<PathBuf> = vec![
        PathBuf::from("/usr/share/fonts"),
        PathBuf::from("/usr/local/share/fonts"),
        PathBuf::from("/System/Library/Fonts"),
        PathBuf::from("/Library/Fonts"),
        PathBuf::from("C:\\Windows\\Fonts"),
    ];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".local/share/fonts"));
        roots.push(home.join(".fonts"));
        roots.push(home.join("Library/Fonts"));
    }

    for root in roots {
        if let Some(path) = search_dir(&root, &needle, 3) {
            return Some(path);
        }
    }
    None
}

fn search_dir(dir: &Path, needle: &str, depth: u32) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
            continue;
        }
        let extension_ok = matches!(
            path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
            Some(ref e) if e == "ttf" || e == "otf" || e == "ttc"
        );
        if !extension_ok {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if normalize(stem).contains(needle) {
                return Some(path);
            }
        }
    }
    if depth > 0 {
        for sub in subdirs {
            if let Some(path) = search_dir(&sub, needle, depth - 1) {
                return Some(path);
            }
        }
    }
    None
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
pub mod testing {
    use super::TileStore;
    use std::collections::HashMap;

    /// Counting store for layout and cache tests; no GPU involved.
    #[derive(Default)]
    pub struct MockStore {
        pub tile_width: u32,
        pub tile_height: u32,
        pub capacity: u32,
        pub transfers: u64,
        pub per_tile: HashMap<u32, u64>,
    }

    impl MockStore {
        pub fn with_capacity(capacity: u32) -> Self {
            Self { capacity, ..Self::default() }
        }
    }

    impl TileStore for MockStore {
        fn reset(&mut self, tile_width: u32, tile_height: u32) -> u32 {
            self.tile_width = tile_width;
            self.tile_height = tile_height;
            self.capacity
        }

        fn store_tile(&mut self, gpu_index: u32, pixels: &[u8]) {
            assert_eq!(pixels.len() as u32, self.tile_width * self.tile_height);
            self.transfers += 1;
            *self.per_tile.entry(gpu_index).or_default() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockStore;
    use super::*;

    #[test]
    fn fontless_generator_still_measures_and_transfers() {
        let mut generator = GlyphGenerator::new(128, 32);
        assert!(!generator.has_font());
        assert_eq!(generator.measure_run(&['a']), 1);
        assert_eq!(generator.measure_run(&['全']), 2);

        let mut store = MockStore::with_capacity(64);
        store.reset(generator.font_width, generator.font_height);
        generator.prepare_run(&['a'], 1);
        generator.transfer_tile(0, 7, &mut store);
        assert_eq!(store.transfers, 1);
        assert_eq!(store.per_tile[&7], 1);
    }

    #[test]
    fn measure_clamps_to_transfer_width() {
        let generator = GlyphGenerator::new(32, 32); // 4 tiles of 8px
        let wide: Vec<char> = std::iter::repeat('x').take(100).collect();
        assert_eq!(generator.measure_run(&wide), 4);
    }

    #[test]
    fn zero_width_run_occupies_one_tile() {
        let generator = GlyphGenerator::new(128, 32);
        assert_eq!(generator.measure_run(&['\u{200b}']), 1);
    }

    #[test]
    fn reserved_rasterization_covers_all_direct_tiles() {
        let mut generator = GlyphGenerator::new(128, 32);
        let mut store = MockStore::with_capacity(128);
        store.reset(generator.font_width, generator.font_height);
        let reserved = ReservedTiles::default();
        generator.rasterize_reserved(&reserved, &mut store);
        // 95 direct codepoints plus the empty tile.
        assert_eq!(store.transfers, 96);
        assert_eq!(store.per_tile[&EMPTY_TILE], 1);
    }
}
