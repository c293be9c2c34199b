//! Out-of-band index of logical lines over the scrollback byte log.
//!
//! Records are kept in a fixed ring; old lines are silently overwritten.
//! A line's byte extent excludes the `\n` that terminated it, so the sum of
//! all extents plus the count of newline bytes equals the bytes committed.

use super::cell::GlyphProps;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Line {
    /// Absolute position of the line's first byte.
    pub first: u64,
    /// Absolute position one past the line's last byte.
    pub one_past_last: u64,
    /// Set when any byte in the extent has its high bit set; such lines go
    /// through the shaping path at layout time.
    pub contains_complex: bool,
    /// Effective style at the moment the line began.
    pub starting_props: GlyphProps,
}

impl Line {
    pub fn len(&self) -> usize {
        debug_assert!(self.one_past_last >= self.first);
        (self.one_past_last - self.first) as usize
    }
}

pub struct LineIndex {
    lines: Vec<Line>,
    current: usize,
    count: usize,
}

impl LineIndex {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: vec![Line::default(); max_lines.max(2)],
            current: 0,
            count: 1,
        }
    }

    pub fn max_lines(&self) -> usize {
        self.lines.len()
    }

    /// Index of the record currently being appended to.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Number of occupied records, saturating at `max_lines`.
    pub fn line_count(&self) -> usize {
        self.count
    }

    pub fn current(&self) -> &Line {
        &self.lines[self.current]
    }

    /// Fetch a record by signed ring offset from slot 0. Offsets wrap.
    pub fn get_wrapped(&self, index: i64) -> Line {
        let max = self.lines.len() as i64;
        let mut i = index % max;
        if i < 0 {
            i += max;
        }
        self.lines[i as usize]
    }

    /// Update the open line's end to the producer's current position.
    pub fn update_current_end(&mut self, one_past_last: u64) {
        self.lines[self.current].one_past_last = one_past_last;
    }

    pub fn mark_current_complex(&mut self) {
        self.lines[self.current].contains_complex = true;
    }

    /// Close the open line at `split_at` and open a new one at `next_start`
    /// with the given starting props. `split_at == next_start` for synthetic
    /// feeds (cursor moves, forced splits); a newline leaves a one-byte gap.
    pub fn line_feed(&mut self, split_at: u64, next_start: u64, starting_props: GlyphProps) {
        self.lines[self.current].one_past_last = split_at;

        self.current += 1;
        if self.current >= self.lines.len() {
            self.current = 0;
        }

        self.lines[self.current] = Line {
            first: next_start,
            one_past_last: next_start,
            contains_complex: false,
            starting_props,
        };

        if self.count <= self.current {
            self.count = self.current + 1;
        }
    }

    /// Drop every record, reopening line 0 at the given position. Used by the
    /// `clear` command.
    pub fn clear(&mut self, at: u64, starting_props: GlyphProps) {
        for line in &mut self.lines {
            *line = Line::default();
        }
        self.current = 0;
        self.count = 1;
        self.lines[0] = Line { first: at, one_past_last: at, contains_complex: false, starting_props };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_feed_leaves_gap_for_the_terminator() {
        let mut index = LineIndex::new(8);
        index.update_current_end(5);
        index.line_feed(5, 6, GlyphProps::default());
        index.update_current_end(9);

        let first = index.get_wrapped(0);
        let second = index.get_wrapped(1);
        assert_eq!((first.first, first.one_past_last), (0, 5));
        assert_eq!((second.first, second.one_past_last), (6, 9));
        // extents + newline count == bytes committed
        assert_eq!(first.len() + second.len() + 1, 9);
    }

    #[test]
    fn synthetic_feed_tiles_exactly() {
        let mut index = LineIndex::new(8);
        index.update_current_end(4096);
        index.line_feed(4096, 4096, GlyphProps::default());
        assert_eq!(index.get_wrapped(0).one_past_last, index.get_wrapped(1).first);
    }

    #[test]
    fn starting_props_are_captured_at_the_feed() {
        let mut index = LineIndex::new(8);
        let mut props = GlyphProps::new(0xFF, 0);
        props.flags = 0x10;
        index.line_feed(3, 4, props);
        assert_eq!(index.current().starting_props, props);
        assert!(!index.current().contains_complex);
    }

    #[test]
    fn ring_wraps_and_count_saturates() {
        let mut index = LineIndex::new(4);
        for i in 0..10u64 {
            index.line_feed(i, i + 1, GlyphProps::default());
        }
        assert_eq!(index.line_count(), 4);
        assert!(index.current_index() < 4);
    }

    #[test]
    fn complex_mark_sticks_to_current_line_only() {
        let mut index = LineIndex::new(8);
        index.mark_current_complex();
        index.line_feed(2, 3, GlyphProps::default());
        assert!(index.get_wrapped(0).contains_complex);
        assert!(!index.current().contains_complex);
    }
}
