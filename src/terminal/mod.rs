pub mod cell;
pub mod layout;
pub mod lines;
pub mod parser;
pub mod pty;
pub mod screen;
pub mod scrollback;

use anyhow::{bail, Result};

use crate::config::{parse_packed_color, Config};
use crate::glyph_cache::{GlyphStats, GlyphTable, ReservedTiles, RESERVED_TILE_COUNT};
use crate::rasterizer::{GlyphGenerator, TileStore};
use crate::shaper::Partitioner;

use cell::{Cursor, GlyphProps};
use layout::LayoutPass;
use lines::LineIndex;
use parser::LineParser;
use pty::ChildIo;
use screen::ScreenBuffer;
use scrollback::SourceBuffer;

pub const TRANSFER_WIDTH: u32 = 1024;
pub const TRANSFER_HEIGHT: u32 = 512;
pub const MAX_GRID_WIDTH: u32 = 1024;
pub const MAX_GRID_HEIGHT: u32 = 1024;
pub const DEFAULT_FONT_FAMILY: &str = "DejaVu Sans Mono";
pub const DEFAULT_FONT_HEIGHT: u32 = 17;
const COMMAND_LINE_MAX: usize = 256;

/// What a submitted command asks of the frame driver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommandEffect {
    pub font_changed: bool,
}

/// The terminal core: scrollback, line index, running parse cursor, glyph
/// cache, and screen grid, plus the interactive command surface. One
/// logical worker owns all of it; nothing in here blocks.
pub struct Terminal {
    pub scrollback: SourceBuffer,
    pub lines: LineIndex,
    pub screen: ScreenBuffer,
    parser: LineParser,
    running: Cursor,
    partitioner: Partitioner,
    pub glyphs: GlyphTable,
    pub raster: GlyphGenerator,
    reserved: ReservedTiles,
    child: Option<ChildIo>,

    pub command_line: Vec<u8>,
    pub viewing_offset: i32,
    pub line_wrap: bool,
    pub debug_highlighting: bool,
    pub no_throttle: bool,
    pub fast_pipe: bool,
    pub quit: bool,

    pub font_family: String,
    pub font_height: u32,
    hash_count: usize,
    defaults: GlyphProps,
}

impl Terminal {
    pub fn new(config: &Config) -> Self {
        let defaults = GlyphProps::new(
            parse_packed_color(&config.colors.foreground, 0x00AF_AFAF),
            parse_packed_color(&config.colors.background, 0x000C_0C0C),
        );

        let mut running = Cursor::default();
        running.props = defaults;

        let scrollback = SourceBuffer::with_capacity(config.engine.scrollback_bytes);
        let lines = LineIndex::new(config.engine.max_lines);
        log::info!(
            "scrollback {} KiB, {} line records",
            scrollback.capacity() / 1024,
            lines.max_lines()
        );

        Self {
            scrollback,
            lines,
            screen: ScreenBuffer::new(1, 1, defaults.background),
            parser: LineParser::new(config.engine.split_line_at),
            running,
            partitioner: Partitioner::new(),
            glyphs: GlyphTable::new(1, config.engine.hash_count, RESERVED_TILE_COUNT),
            raster: GlyphGenerator::new(TRANSFER_WIDTH, TRANSFER_HEIGHT),
            reserved: ReservedTiles::default(),
            child: None,
            command_line: Vec::new(),
            viewing_offset: 0,
            line_wrap: config.engine.line_wrap,
            debug_highlighting: false,
            no_throttle: !config.engine.throttle,
            fast_pipe: config.engine.fast_pipe,
            quit: false,
            font_family: config.font.family.clone(),
            font_height: config.font.height,
            hash_count: config.engine.hash_count,
            defaults,
        }
    }

    /// Store a chunk of producer bytes and index it. The scrollback hands
    /// out contiguous ranges, so a chunk may commit in several pieces.
    pub fn ingest(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while !rest.is_empty() {
            let (at, dst) = self.scrollback.reserve(rest.len());
            let n = dst.len().min(rest.len());
            dst[..n].copy_from_slice(&rest[..n]);
            self.scrollback.commit(n);

            let committed = self.scrollback.read_at(at, n);
            self.parser.scan(committed, at, &mut self.lines, &mut self.running, self.defaults);
            rest = &rest[n..];
        }
    }

    /// In-band output from the terminal itself (command results, banner);
    /// it goes through the exact same path as child output.
    pub fn append_output(&mut self, text: &str) {
        self.ingest(text.as_bytes());
    }

    pub fn banner(&mut self) {
        self.append_output("\n");
        self.append_output(&format!("torrent terminal v{}\n", env!("CARGO_PKG_VERSION")));
        self.append_output(
            "A \x1b[38;2;255;0;0m\x1b[5mreference\x1b[0m display engine for \
             \x1b[9mslow\x1b[0m \x1b[4mfast\x1b[0m terminals.\n",
        );
        // Shaped-path smoke test straight from the banner.
        self.append_output("नमस्ते — आपका स्वागत है\n");
        self.append_output("\n");
    }

    /// Pull everything the child has produced this frame into the log.
    pub fn drain_child(&mut self) {
        let mut chunks = Vec::new();
        let mut gone = false;
        if let Some(child) = self.child.as_mut() {
            let pending = child.peek_pending();
            if pending > 0 {
                log::trace!("{pending} bytes pending from child");
            }
            chunks = child.drain_all();
            gone = child.all_gone();
        }
        for chunk in &chunks {
            self.ingest(chunk);
        }
        if gone {
            log::info!("child process output finished");
            self.child = None;
        }
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    pub fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            child.kill();
        }
    }

    /// Replay the tail window into the screen grid.
    pub fn layout(&mut self, store: &mut dyn TileStore) {
        let mut pass = LayoutPass {
            screen: &mut self.screen,
            glyphs: &mut self.glyphs,
            raster: &mut self.raster,
            store,
            partitioner: &mut self.partitioner,
            reserved: &self.reserved,
            defaults: self.defaults,
            line_wrap: self.line_wrap,
            debug: self.debug_highlighting,
        };
        pass.run(&self.scrollback, &self.lines, self.viewing_offset, &self.command_line);
    }

    pub fn resize_grid(&mut self, dim_x: u32, dim_y: u32) {
        let dim_x = dim_x.clamp(1, MAX_GRID_WIDTH);
        let dim_y = dim_y.clamp(1, MAX_GRID_HEIGHT);
        if dim_x != self.screen.dim_x || dim_y != self.screen.dim_y {
            self.screen = ScreenBuffer::new(dim_x, dim_y, self.defaults.background);
        }
    }

    pub fn stats(&mut self) -> GlyphStats {
        self.glyphs.stats()
    }

    // ── Font lifecycle ─────────────────────────────────────────────────

    /// Load the requested font, falling back to the default family once;
    /// then rebuild the atlas-backed cache. A second failure is fatal.
    pub fn refresh_font(&mut self, store: &mut dyn TileStore) -> Result<()> {
        for attempt in 0..2 {
            match self.raster.set_font(&self.font_family, self.font_height) {
                Ok(()) => {
                    debug_assert!(self.raster.has_font());
                    match self.rebuild_glyph_cache(store) {
                        Ok(()) => return Ok(()),
                        Err(error) => log::warn!("glyph cache rebuild failed: {error}"),
                    }
                }
                Err(error) => log::warn!("font load failed: {error}"),
            }
            if attempt == 0 {
                self.font_family = DEFAULT_FONT_FAMILY.to_string();
                self.font_height = DEFAULT_FONT_HEIGHT;
            }
        }
        bail!("no usable font, tried {:?} and the default", self.font_family);
    }

    /// Size the entry arena to the atlas and pre-rasterize the reserved
    /// tiles. Separated from font resolution so it is testable headless.
    pub fn rebuild_glyph_cache(&mut self, store: &mut dyn TileStore) -> Result<()> {
        let capacity = store.reset(self.raster.font_width, self.raster.font_height);
        if capacity <= RESERVED_TILE_COUNT {
            bail!(
                "atlas holds {} tiles, not enough beyond the {} reserved",
                capacity,
                RESERVED_TILE_COUNT
            );
        }

        let entry_count = (capacity - RESERVED_TILE_COUNT) as usize;
        self.glyphs = GlyphTable::new(entry_count, self.hash_count, RESERVED_TILE_COUNT);
        self.raster.rasterize_reserved(&self.reserved, store);
        log::info!("glyph cache rebuilt: {} entries", entry_count);
        Ok(())
    }

    // ── Command surface ────────────────────────────────────────────────

    pub fn push_input(&mut self, text: &str) {
        let space = COMMAND_LINE_MAX.saturating_sub(self.command_line.len());
        self.command_line.extend(text.bytes().take(space));
    }

    /// UTF-8 aware backspace: strip continuation bytes, then the lead byte.
    pub fn backspace(&mut self) {
        while matches!(self.command_line.last(), Some(b) if b & 0xC0 == 0x80) {
            self.command_line.pop();
        }
        self.command_line.pop();
    }

    pub fn page_up(&mut self) {
        self.viewing_offset -= self.screen.dim_y as i32 / 2;
        self.clamp_viewing_offset();
    }

    pub fn page_down(&mut self) {
        self.viewing_offset += self.screen.dim_y as i32 / 2;
        self.clamp_viewing_offset();
    }

    fn clamp_viewing_offset(&mut self) {
        let depth = self.lines.line_count() as i32;
        self.viewing_offset = self.viewing_offset.clamp(-depth, 0);
    }

    /// Run the pending command line. Built-ins are handled in place; any
    /// other word spawns an external program.
    pub fn execute_command_line(&mut self) -> CommandEffect {
        let mut effect = CommandEffect::default();

        let line = std::mem::take(&mut self.command_line);
        let text = String::from_utf8_lossy(&line).into_owned();
        let mut parts = text.splitn(2, ' ');
        let command = parts.next().unwrap_or("").to_string();
        let rest = parts.next().unwrap_or("").to_string();

        self.viewing_offset = 0;
        self.append_output("\n");

        match command.as_str() {
            "status" => {
                self.running.props = self.defaults;
                let lines = [
                    format!("torrent terminal v{}\n", env!("CARGO_PKG_VERSION")),
                    format!("Size: {} x {}\n", self.screen.dim_x, self.screen.dim_y),
                    format!("Fast pipe: {}\n", on_off(self.fast_pipe)),
                    format!("Child: {}\n", if self.has_child() { "running" } else { "none" }),
                    format!("Font: {} {}\n", self.font_family, self.font_height),
                    format!("Line wrap: {}\n", on_off(self.line_wrap)),
                    format!("Debug: {}\n", on_off(self.debug_highlighting)),
                    format!("Throttling: {}\n", on_off(!self.no_throttle)),
                ];
                for line in lines {
                    self.append_output(&line);
                }
            }
            "fastpipe" => {
                self.fast_pipe = !self.fast_pipe;
                let text = format!("Fast pipe: {}\n", on_off(self.fast_pipe));
                self.append_output(&text);
            }
            "linewrap" => {
                self.line_wrap = !self.line_wrap;
                let text = format!("Line wrap: {}\n", on_off(self.line_wrap));
                self.append_output(&text);
            }
            "debug" => {
                self.debug_highlighting = !self.debug_highlighting;
                let text = format!("Debug: {}\n", on_off(self.debug_highlighting));
                self.append_output(&text);
            }
            "throttle" => {
                self.no_throttle = !self.no_throttle;
                let text = format!("Throttling: {}\n", on_off(!self.no_throttle));
                self.append_output(&text);
            }
            "font" => {
                if rest.is_empty() {
                    self.append_output("Usage: font <family>\n");
                } else {
                    self.font_family = rest.clone();
                    effect.font_changed = true;
                    let text = format!("Font: {}\n", self.font_family);
                    self.append_output(&text);
                }
            }
            "fontsize" => match rest.trim().parse::<u32>() {
                Ok(height) if height > 0 => {
                    self.font_height = height;
                    effect.font_changed = true;
                    let text = format!("Font height: {}\n", self.font_height);
                    self.append_output(&text);
                }
                _ => self.append_output("Usage: fontsize <pixels>\n"),
            },
            "kill" | "break" => {
                self.kill_child();
            }
            "clear" | "cls" => {
                self.running.at = cell::Point::default();
                self.running.props = self.defaults;
                self.parser.reset();
                let head = self.scrollback.head();
                self.lines.clear(head, self.defaults);
            }
            "exit" | "quit" => {
                self.kill_child();
                self.append_output("Exiting...\n");
                self.quit = true;
            }
            "echo" | "print" => {
                let text = format!("{rest}\n");
                self.append_output(&text);
            }
            "" => {}
            program => {
                self.kill_child();
                let args: Vec<&str> = rest.split_whitespace().collect();
                match ChildIo::spawn(
                    program,
                    &args,
                    self.fast_pipe,
                    self.screen.dim_x.min(u16::MAX as u32) as u16,
                    self.screen.dim_y.min(u16::MAX as u32) as u16,
                ) {
                    Ok(child) => self.child = Some(child),
                    Err(error) => {
                        let text = format!("ERROR: unable to execute {text}: {error:#}\n");
                        self.append_output(&text);
                    }
                }
            }
        }

        effect
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "off"
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        self.kill_child();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterizer::testing::MockStore;

    fn terminal() -> Terminal {
        Terminal::new(&Config::default())
    }

    fn submit(terminal: &mut Terminal, command: &str) -> CommandEffect {
        terminal.command_line = command.as_bytes().to_vec();
        terminal.execute_command_line()
    }

    #[test]
    fn toggles_flip_and_report() {
        let mut t = terminal();
        assert!(t.line_wrap);
        submit(&mut t, "linewrap");
        assert!(!t.line_wrap);
        submit(&mut t, "debug");
        assert!(t.debug_highlighting);
        submit(&mut t, "throttle");
        assert!(t.no_throttle);
        // The replies landed in the scrollback.
        assert!(t.scrollback.head() > 0);
    }

    #[test]
    fn echo_appends_argument() {
        let mut t = terminal();
        let before = t.scrollback.head();
        submit(&mut t, "echo hello there");
        let written = t.scrollback.read_at(before, (t.scrollback.head() - before) as usize);
        assert_eq!(written, b"\nhello there\n");
    }

    #[test]
    fn quit_sets_flag() {
        let mut t = terminal();
        submit(&mut t, "quit");
        assert!(t.quit);
    }

    #[test]
    fn font_commands_request_refresh() {
        let mut t = terminal();
        let effect = submit(&mut t, "font Iosevka");
        assert!(effect.font_changed);
        assert_eq!(t.font_family, "Iosevka");

        let effect = submit(&mut t, "fontsize 24");
        assert!(effect.font_changed);
        assert_eq!(t.font_height, 24);

        let effect = submit(&mut t, "fontsize nope");
        assert!(!effect.font_changed);
    }

    #[test]
    fn clear_resets_the_line_index() {
        let mut t = terminal();
        t.append_output("one\ntwo\nthree\n");
        assert!(t.lines.current_index() > 0);
        submit(&mut t, "clear");
        // One output newline from the submit itself.
        assert!(t.lines.current_index() <= 1);
    }

    #[test]
    fn backspace_is_utf8_aware() {
        let mut t = terminal();
        t.push_input("aé");
        assert_eq!(t.command_line.len(), 3);
        t.backspace();
        assert_eq!(t.command_line, b"a");
        t.backspace();
        assert!(t.command_line.is_empty());
        t.backspace();
        assert!(t.command_line.is_empty());
    }

    #[test]
    fn command_line_is_bounded() {
        let mut t = terminal();
        let long = "x".repeat(1000);
        t.push_input(&long);
        assert_eq!(t.command_line.len(), 256);
    }

    #[test]
    fn paging_clamps_to_history() {
        let mut t = terminal();
        t.resize_grid(80, 24);
        for _ in 0..10 {
            t.append_output("line\n");
        }
        t.page_down();
        assert_eq!(t.viewing_offset, 0);
        for _ in 0..100 {
            t.page_up();
        }
        assert_eq!(t.viewing_offset, -(t.lines.line_count() as i32));
        submit(&mut t, "");
        assert_eq!(t.viewing_offset, 0);
    }

    #[test]
    fn glyph_cache_rebuild_sizes_to_the_atlas() {
        let mut t = terminal();
        let mut store = MockStore::with_capacity(512);
        t.rebuild_glyph_cache(&mut store).expect("rebuild");
        assert_eq!(t.glyphs.entry_count() as u32, 512 - RESERVED_TILE_COUNT);
        // Empty tile + 95 direct tiles were pre-rasterized.
        assert_eq!(store.transfers, 96);
    }

    #[test]
    fn too_small_atlas_is_an_error() {
        let mut t = terminal();
        let mut store = MockStore::with_capacity(RESERVED_TILE_COUNT);
        assert!(t.rebuild_glyph_cache(&mut store).is_err());
    }

    #[test]
    fn ingest_and_layout_end_to_end() {
        let mut t = terminal();
        let mut store = MockStore::with_capacity(512);
        t.rebuild_glyph_cache(&mut store).expect("rebuild");
        t.resize_grid(40, 10);
        t.banner();
        t.ingest(b"hello\n");
        t.layout(&mut store);
        // The banner's complex line rasterized something beyond the
        // reserved tiles.
        assert!(store.transfers > 96);
    }
}
