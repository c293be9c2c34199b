//! Frame replay: turn a tail window of indexed lines back into a screen
//! grid of styled cells.
//!
//! Fast-path lines write one reserved tile per byte. Complex lines are cut
//! at control bytes and the slices in between go through the partitioner
//! and the glyph cache, rasterizing each distinct run at most once.

use crate::glyph_cache::{
    is_direct_codepoint, run_fingerprint, tile_fingerprint, GlyphState, GlyphTable, ReservedTiles,
};
use crate::rasterizer::{GlyphGenerator, TileStore};
use crate::shaper::Partitioner;

use super::cell::{Cursor, GlyphProps, Point, RendererCell};
use super::lines::LineIndex;
use super::parser::{EscapeParser, EscapeStep, ESC};
use super::screen::ScreenBuffer;
use super::scrollback::SourceBuffer;

const DEBUG_DIRECT_BG: u32 = 0x0000_8000;
const DEBUG_SEGMENT_BG: [u32; 2] = [0x0080_0000, 0x0080_8000];

pub struct LayoutPass<'a> {
    pub screen: &'a mut ScreenBuffer,
    pub glyphs: &'a mut GlyphTable,
    pub raster: &'a mut GlyphGenerator,
    pub store: &'a mut dyn TileStore,
    pub partitioner: &'a mut Partitioner,
    pub reserved: &'a ReservedTiles,
    pub defaults: GlyphProps,
    pub line_wrap: bool,
    pub debug: bool,
}

impl LayoutPass<'_> {
    /// Replay the last `2 * dim_y` lines ending at the viewing position,
    /// then the prompt, the pending command line, and the block cursor.
    pub fn run(
        &mut self,
        scrollback: &SourceBuffer,
        lines: &LineIndex,
        viewing_offset: i32,
        command_line: &[u8],
    ) {
        let background = self.defaults.background;
        self.screen.clear(background);

        let window = 2 * self.screen.dim_y as i64;
        // The window ends at the viewing position, open line included.
        let offset = lines.current_index() as i64 + viewing_offset as i64 - window + 1;

        let mut cursor = Cursor { at: Point::default(), props: self.defaults };
        let mut jumped = false;
        let mut scratch: Vec<u8> = Vec::new();

        for i in 0..window {
            let line = lines.get_wrapped(offset + i);
            cursor.props = line.starting_props;

            let bytes = read_line(scrollback, line.first, line.one_past_last, &mut scratch);
            if !bytes.is_empty() {
                jumped |= self.emit_line(&mut cursor, bytes, line.contains_complex);
            }

            // A gap between consecutive records is the newline that closed
            // this one; synthetic feeds tile exactly and stay on the row.
            if i + 1 < window {
                let next = lines.get_wrapped(offset + i + 1);
                if next.first > line.one_past_last {
                    self.screen.advance_row(&mut cursor.at, background);
                }
            }
        }

        if jumped {
            cursor.at.x = 0;
            cursor.at.y = self.screen.dim_y as i32 - 4;
        }

        self.screen.advance_row(&mut cursor.at, background);
        cursor.props = self.defaults;

        self.emit_line(&mut cursor, b"> ", false);
        self.emit_line(&mut cursor, command_line, true);
        self.emit_line(&mut cursor, "\x1b[5m\u{2588}".as_bytes(), true);
        self.screen.advance_row_no_clear(&mut cursor.at);

        self.screen.first_line_y = if jumped { 0 } else { cursor.at.y.max(0) as u32 };
    }

    /// Replay one line's bytes. Returns true when a CSI repositioned the
    /// cursor, which pins the prompt to the bottom of the window.
    pub fn emit_line(&mut self, cursor: &mut Cursor, bytes: &[u8], contains_complex: bool) -> bool {
        let background = self.defaults.background;
        let mut jumped = false;
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];

            if b == ESC && bytes.get(i + 1) == Some(&b'[') {
                let mut escape = EscapeParser::new();
                let mut j = i;
                loop {
                    if j >= bytes.len() {
                        // Unterminated at line end: consumed and dropped.
                        i = j;
                        break;
                    }
                    match escape.advance(bytes[j]) {
                        EscapeStep::Pending => j += 1,
                        EscapeStep::Dispatch(sequence) => {
                            j += 1;
                            if sequence.apply(cursor, self.defaults) {
                                jumped = true;
                            }
                            i = j;
                            break;
                        }
                        EscapeStep::Rejected(_) | EscapeStep::Literal(_) => {
                            i = j;
                            break;
                        }
                    }
                }
                continue;
            }

            if b == b'\r' {
                cursor.at.x = 0;
                i += 1;
                continue;
            }
            if b == b'\n' {
                self.screen.advance_row(&mut cursor.at, background);
                i += 1;
                continue;
            }

            if contains_complex {
                // Cut at the next control byte and shape what lies between.
                let start = i;
                i += 1;
                while i < bytes.len() && !matches!(bytes[i], ESC | b'\r' | b'\n') {
                    i += 1;
                }
                self.emit_shaped(cursor, &bytes[start..i]);
                continue;
            }

            self.emit_simple(cursor, b);
            i += 1;
        }

        jumped
    }

    /// One byte of a fast-path line: direct ASCII hits its reserved tile,
    /// anything else (stray controls) takes the hashed single-glyph path.
    fn emit_simple(&mut self, cursor: &mut Cursor, byte: u8) {
        let gpu_index = if (32..=126).contains(&byte) {
            self.reserved.get(byte)
        } else {
            debug_assert!(byte < 0x80);
            self.single_glyph(byte as char)
        };

        put_cell(self.screen, cursor.at, gpu_index, cursor.props);
        self.screen.advance_column(&mut cursor.at, self.line_wrap, self.defaults.background);
    }

    fn single_glyph(&mut self, c: char) -> u32 {
        let run = run_fingerprint(&[c]);
        let entry = self.glyphs.find(tile_fingerprint(run, 0));
        if entry.state != GlyphState::Rasterized {
            self.raster.prepare_run(&[c], 1);
            self.raster.transfer_tile(0, entry.gpu_index, &mut *self.store);
            self.glyphs.update(entry.id, GlyphState::Rasterized, 1, 1);
        }
        entry.gpu_index
    }

    /// Partition a complex slice into shaping runs and emit one cell per
    /// output tile, resolving each tile through the reservation cache.
    fn emit_shaped(&mut self, cursor: &mut Cursor, slice: &[u8]) {
        let Some(segments) = self.partitioner.partition(slice) else {
            return;
        };

        let count = segments.count();
        let order: Vec<usize> = if segments.rtl {
            (0..count).rev().collect()
        } else {
            (0..count).collect()
        };

        for (visit, seg_index) in order.into_iter().enumerate() {
            let start = segments.bounds[seg_index] as usize;
            let end = segments.bounds[seg_index + 1] as usize;
            let segment = &segments.codepoints[start..end];
            if segment.is_empty() {
                continue;
            }

            if segment.len() == 1 && is_direct_codepoint(segment[0]) {
                let mut props = cursor.props;
                if self.debug {
                    props.background = DEBUG_DIRECT_BG;
                }
                let gpu_index = self.reserved.get(segment[0] as u8);
                put_cell(self.screen, cursor.at, gpu_index, props);
                self.screen.advance_column(
                    &mut cursor.at,
                    self.line_wrap,
                    self.defaults.background,
                );
                continue;
            }

            let run = run_fingerprint(segment);

            // Dimensions live in the cache too, keyed by the run itself.
            let sizing = self.glyphs.find(run);
            let tile_count = if sizing.state == GlyphState::None {
                let tiles = self.raster.measure_run(segment);
                self.glyphs.update(sizing.id, GlyphState::Sized, tiles as u16, 1);
                tiles
            } else {
                (sizing.dim_x as u32).max(1)
            };

            let mut prepared = false;
            for tile in 0..tile_count {
                let entry = self.glyphs.find(tile_fingerprint(run, tile));
                if entry.state != GlyphState::Rasterized {
                    if !prepared {
                        self.raster.prepare_run(segment, tile_count);
                        prepared = true;
                    }
                    self.raster.transfer_tile(tile, entry.gpu_index, &mut *self.store);
                    self.glyphs.update(entry.id, GlyphState::Rasterized, tile_count as u16, 1);
                }

                let mut props = cursor.props;
                if self.debug {
                    props.background = DEBUG_SEGMENT_BG[visit & 1];
                }
                put_cell(self.screen, cursor.at, entry.gpu_index, props);
                self.screen.advance_column(
                    &mut cursor.at,
                    self.line_wrap,
                    self.defaults.background,
                );
            }
        }
    }
}

fn put_cell(screen: &mut ScreenBuffer, at: Point, gpu_index: u32, props: GlyphProps) {
    if let Some(cell) = screen.cell_mut(at) {
        *cell = RendererCell::compose(gpu_index, props);
    }
}

/// Fetch a line's bytes, stitching the two ring fragments together when the
/// extent straddles the wrap. An evicted line reads as empty.
fn read_line<'a>(
    scrollback: &'a SourceBuffer,
    first: u64,
    one_past_last: u64,
    scratch: &'a mut Vec<u8>,
) -> &'a [u8] {
    let len = (one_past_last - first) as usize;
    if len == 0 {
        return &[];
    }

    let head = scrollback.read_at(first, len);
    if head.len() == len || head.is_empty() {
        return head;
    }

    scratch.clear();
    scratch.extend_from_slice(head);
    let tail = scrollback.read_at(first + head.len() as u64, len - head.len());
    scratch.extend_from_slice(tail);
    scratch
}
