//! Run partitioner.
//!
//! Given the UTF-8 bytes of one logical line (or the slice of it between
//! control bytes), produce the ordered shaping segments the glyph cache is
//! keyed by. Segments never cross script, direction, or word boundaries;
//! simple scripts split down to grapheme level so ASCII inside a complex
//! line still hits the reserved tiles one cell at a time.

use icu_properties::props::Script;
use icu_properties::{CodePointMapData, CodePointMapDataBorrowed};
use unicode_bidi::{bidi_class, BidiClass};
use unicode_segmentation::UnicodeSegmentation;

/// Hard cap on boundaries per line; overflow truncates at the last accepted
/// boundary and the remaining codepoints ride in the final segment.
pub const SEG_MAX: usize = 1024;

pub const BREAK_GRAPHEME: u8 = 1 << 0;
pub const BREAK_WORD: u8 = 1 << 1;
pub const BREAK_LINE_SOFT: u8 = 1 << 2;
pub const BREAK_LINE_HARD: u8 = 1 << 3;
pub const BREAK_SCRIPT: u8 = 1 << 4;
pub const BREAK_DIRECTION: u8 = 1 << 5;

/// One break opportunity, in codepoint positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Break {
    pub position: u32,
    pub flags: u8,
}

/// A finished partition of one line: `bounds` is ascending, starts at 0 and
/// ends at `codepoints.len()`. Visit segments in reverse order when `rtl`.
pub struct Segments<'a> {
    pub codepoints: &'a [char],
    pub bounds: &'a [u32],
    pub rtl: bool,
}

impl Segments<'_> {
    pub fn count(&self) -> usize {
        self.bounds.len().saturating_sub(1)
    }

    pub fn segment(&self, index: usize) -> &[char] {
        let start = self.bounds[index] as usize;
        let end = self.bounds[index + 1] as usize;
        &self.codepoints[start..end]
    }
}

pub struct Partitioner {
    codepoints: Vec<char>,
    byte_starts: Vec<u32>,
    text: String,
    breaks: Vec<Break>,
    bounds: Vec<u32>,
    script_map: CodePointMapDataBorrowed<'static, Script>,
}

impl Default for Partitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Partitioner {
    pub fn new() -> Self {
        Self {
            codepoints: Vec::new(),
            byte_starts: Vec::new(),
            text: String::new(),
            breaks: Vec::new(),
            bounds: Vec::new(),
            script_map: CodePointMapData::<Script>::new(),
        }
    }

    /// Partition one line slice. Returns `None` when nothing decodable is
    /// left after dropping invalid sequences; the caller abandons shaping
    /// for the slice.
    pub fn partition(&mut self, bytes: &[u8]) -> Option<Segments<'_>> {
        self.decode(bytes);
        if self.codepoints.is_empty() {
            return None;
        }

        self.scan_breaks();
        let rtl = self.classify();

        Some(Segments { codepoints: &self.codepoints, bounds: &self.bounds, rtl })
    }

    /// Decode UTF-8, skipping invalid sequences. Skipped bytes stay in the
    /// line's byte extent and show up as a misaligned tile; that is the
    /// accepted degradation.
    fn decode(&mut self, bytes: &[u8]) {
        self.codepoints.clear();
        self.byte_starts.clear();
        self.text.clear();

        let mut rest = bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.push_str(valid);
                    break;
                }
                Err(error) => {
                    let (valid, after) = rest.split_at(error.valid_up_to());
                    // from_utf8 guarantees the prefix is valid.
                    self.push_str(std::str::from_utf8(valid).unwrap());
                    let skip = error.error_len().unwrap_or(after.len());
                    rest = &after[skip..];
                }
            }
        }
    }

    fn push_str(&mut self, s: &str) {
        for c in s.chars() {
            self.byte_starts.push(self.text.len() as u32);
            self.codepoints.push(c);
            self.text.push(c);
        }
    }

    fn codepoint_at_byte(&self, byte: u32) -> u32 {
        match self.byte_starts.binary_search(&byte) {
            Ok(i) => i as u32,
            // Boundaries from the segmenters always land on char starts.
            Err(i) => i as u32,
        }
    }

    /// Merge break opportunities from every source into one ascending list.
    fn scan_breaks(&mut self) {
        self.breaks.clear();

        for (offset, _) in self.text.grapheme_indices(true) {
            let position = self.codepoint_at_byte(offset as u32);
            self.breaks.push(Break { position, flags: BREAK_GRAPHEME });
        }

        for (offset, _) in self.text.split_word_bound_indices() {
            let position = self.codepoint_at_byte(offset as u32);
            self.breaks.push(Break { position, flags: BREAK_WORD });
        }

        // Script runs: Common/Inherited codepoints extend the current run.
        let mut current = Script::Unknown;
        for (i, &c) in self.codepoints.iter().enumerate() {
            let script = self.script_map.get(c);
            if script == Script::Common || script == Script::Inherited {
                continue;
            }
            if script != current {
                current = script;
                self.breaks.push(Break { position: i as u32, flags: BREAK_SCRIPT });
            }
        }

        // Direction runs from the strong bidi classes.
        let mut last_strong: Option<bool> = None;
        for (i, &c) in self.codepoints.iter().enumerate() {
            let rtl = match bidi_class(c) {
                BidiClass::R | BidiClass::AL => true,
                BidiClass::L => false,
                _ => continue,
            };
            if last_strong != Some(rtl) {
                last_strong = Some(rtl);
                self.breaks.push(Break { position: i as u32, flags: BREAK_DIRECTION });
            }
        }

        // Soft wrap opportunity after whitespace, hard break after newlines.
        for (i, &c) in self.codepoints.iter().enumerate() {
            if i == 0 {
                continue;
            }
            let prev = self.codepoints[i - 1];
            if prev == '\n' {
                self.breaks.push(Break { position: i as u32, flags: BREAK_LINE_HARD });
            } else if prev.is_whitespace() {
                self.breaks.push(Break { position: i as u32, flags: BREAK_LINE_SOFT });
            }
        }

        self.breaks.sort_by_key(|b| b.position);

        // Collapse duplicates, or-ing flags.
        self.breaks.dedup_by(|b, a| {
            if a.position == b.position {
                a.flags |= b.flags;
                true
            } else {
                false
            }
        });
    }

    /// Walk the merged breaks, keeping script and direction state, and decide
    /// which become segment boundaries. Returns whether the line is RTL.
    fn classify(&mut self) -> bool {
        let n = self.codepoints.len() as u32;
        self.bounds.clear();
        self.bounds.push(0);

        let mut current_script = Script::Unknown;
        let mut current_rtl = false;
        let mut has_rtl = false;
        let mut last = 0u32;

        for i in 0..self.breaks.len() {
            let br = self.breaks[i];
            let at = (br.position as usize).min(self.codepoints.len().saturating_sub(1));

            if br.flags & BREAK_SCRIPT != 0 {
                current_script = self.script_map.get(self.codepoints[at]);
            }
            if br.flags & BREAK_DIRECTION != 0 {
                current_rtl = matches!(
                    bidi_class(self.codepoints[at]),
                    BidiClass::R | BidiClass::AL
                );
                has_rtl |= current_rtl;
            }

            let complex = script_is_complex(current_script) || has_rtl;
            let mut boundary = br.flags & BREAK_LINE_HARD != 0;
            if complex {
                boundary |= br.flags & BREAK_LINE_SOFT != 0;
            } else {
                boundary |= br.flags & BREAK_GRAPHEME != 0;
            }
            boundary |= br.flags & (BREAK_SCRIPT | BREAK_DIRECTION | BREAK_WORD) != 0;

            if boundary && br.position > last && br.position < n {
                if self.bounds.len() >= SEG_MAX {
                    break;
                }
                self.bounds.push(br.position);
                last = br.position;
            }
        }

        // Whitespace always delimits runs, even when no word break fired.
        for (i, &c) in self.codepoints.iter().enumerate() {
            if c == ' ' && i > 0 && self.bounds.len() < SEG_MAX {
                self.bounds.push(i as u32);
            }
        }

        self.bounds.sort_unstable();
        self.bounds.dedup();

        if *self.bounds.last().unwrap() != n {
            if self.bounds.len() < SEG_MAX + 1 {
                self.bounds.push(n);
            } else {
                *self.bounds.last_mut().unwrap() = n;
            }
        }

        has_rtl && current_rtl
    }
}

/// Scripts whose clusters must be shaped as units rather than split at
/// grapheme level.
const COMPLEX_SCRIPTS: [Script; 22] = [
    Script::Arabic,
    Script::Syriac,
    Script::Hebrew,
    Script::Nko,
    Script::Thaana,
    Script::Devanagari,
    Script::Bengali,
    Script::Gurmukhi,
    Script::Gujarati,
    Script::Oriya,
    Script::Tamil,
    Script::Telugu,
    Script::Kannada,
    Script::Malayalam,
    Script::Sinhala,
    Script::Thai,
    Script::Lao,
    Script::Tibetan,
    Script::Myanmar,
    Script::Khmer,
    Script::Mongolian,
    Script::Hangul,
];

fn script_is_complex(script: Script) -> bool {
    COMPLEX_SCRIPTS.contains(&script)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds_of(partitioner: &mut Partitioner, text: &str) -> (Vec<u32>, bool) {
        let segments = partitioner.partition(text.as_bytes()).expect("partition");
        (segments.bounds.to_vec(), segments.rtl)
    }

    #[test]
    fn empty_input_aborts() {
        let mut partitioner = Partitioner::new();
        assert!(partitioner.partition(b"").is_none());
    }

    #[test]
    fn ascii_splits_to_single_codepoints() {
        let mut partitioner = Partitioner::new();
        let (bounds, rtl) = bounds_of(&mut partitioner, "ab cd");
        assert_eq!(bounds, vec![0, 1, 2, 3, 4, 5]);
        assert!(!rtl);
    }

    #[test]
    fn bounds_partition_the_line() {
        let mut partitioner = Partitioner::new();
        for text in ["hello world", "नमस्ते दुनिया", "aaa سلام bbb"] {
            let segments = partitioner.partition(text.as_bytes()).unwrap();
            assert_eq!(segments.bounds[0], 0);
            assert_eq!(
                *segments.bounds.last().unwrap() as usize,
                segments.codepoints.len(),
                "{text}"
            );
            assert!(segments.bounds.windows(2).all(|w| w[0] < w[1]), "{text}");
        }
    }

    #[test]
    fn devanagari_cluster_stays_one_segment() {
        let mut partitioner = Partitioner::new();
        let segments = partitioner.partition("नमस्ते".as_bytes()).unwrap();
        assert_eq!(segments.count(), 1);
        assert_eq!(segments.segment(0).len(), segments.codepoints.len());
        assert!(!segments.rtl);
    }

    #[test]
    fn devanagari_words_split_at_spaces() {
        let mut partitioner = Partitioner::new();
        let segments = partitioner.partition("नम ते".as_bytes()).unwrap();
        // word, the space, word
        assert_eq!(segments.count(), 3);
        assert_eq!(segments.segment(1), &[' ']);
    }

    #[test]
    fn arabic_line_reports_rtl() {
        let mut partitioner = Partitioner::new();
        let segments = partitioner.partition("سلام".as_bytes()).unwrap();
        assert!(segments.rtl);
        assert_eq!(segments.count(), 1);
    }

    #[test]
    fn script_change_is_a_boundary() {
        let mut partitioner = Partitioner::new();
        let segments = partitioner.partition("abनम".as_bytes()).unwrap();
        assert!(segments.bounds.contains(&2));
    }

    #[test]
    fn invalid_utf8_is_skipped_not_fatal() {
        let mut partitioner = Partitioner::new();
        let segments = partitioner.partition(b"a\xffb").unwrap();
        assert_eq!(segments.codepoints, &['a', 'b']);
    }

    #[test]
    fn trailing_direction_decides_visit_order() {
        let mut partitioner = Partitioner::new();
        // RTL seen but the line ends LTR: emitted order stays logical.
        let (_, rtl) = bounds_of(&mut partitioner, "سلام abc");
        assert!(!rtl);
    }
}
