//! Window arithmetic for splitting a file into overlapping chunks.
//!
//! Three strategies are supported, selected by [`ChunkingMode`]:
//!
//! - **Line**: fixed windows of `size` lines advancing by
//!   `size - ceil(overlap / 2)` lines.
//! - **Char**: the same arithmetic over characters; the last window is
//!   clipped to the end of the file.
//! - **Token budget**: windows grow line by line until the token count
//!   reported by a [`TokenCounter`] would pass the ceiling. The next
//!   window starts `max(floor(0.8 * consumed), 4)` lines later.

use std::ops::Range;

use encoding_rs::Encoding;

use crate::{
    embedder::TokenCounter,
    error::{Error, Result},
};

/// Default window length in lines for [`ChunkingMode::Line`].
pub const DEFAULT_LINE_SIZE: usize = 40;

/// Default overlap in lines for [`ChunkingMode::Line`].
pub const DEFAULT_LINE_OVERLAP: usize = 10;

/// Default window length in characters for [`ChunkingMode::Char`].
pub const DEFAULT_CHAR_SIZE: usize = 720;

/// Default overlap in characters for [`ChunkingMode::Char`].
pub const DEFAULT_CHAR_OVERLAP: usize = 240;

/// Token ceiling for [`ChunkingMode::TokenBudget`], matching the input
/// limit of BERT-style embedding models.
pub const DEFAULT_TOKEN_CEILING: usize = 512;

/// Smallest step, in lines, between two token-budget windows.
pub const MIN_TOKEN_STEP: usize = 4;

/// How a file is cut into windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ChunkingMode {
    /// Fixed number of lines per chunk.
    Line,
    /// Fixed number of characters per chunk.
    Char,
    /// Lines accumulated up to a token ceiling.
    #[value(name = "token")]
    TokenBudget,
}

impl ChunkingMode {
    /// `(size, overlap)` used when the caller does not pick one.
    pub fn default_window(self) -> (usize, usize) {
        match self {
            Self::Line => (DEFAULT_LINE_SIZE, DEFAULT_LINE_OVERLAP),
            Self::Char => (DEFAULT_CHAR_SIZE, DEFAULT_CHAR_OVERLAP),
            Self::TokenBudget => (DEFAULT_TOKEN_CEILING, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Char => "char",
            Self::TokenBudget => "token",
        }
    }
}

/// What happens to the lines after the last full window in
/// [`ChunkingMode::Line`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingLines {
    /// Only full windows are emitted; up to `size - 1` trailing lines may
    /// not be covered by any chunk.
    #[default]
    Drop,
    /// The window that reaches the end of the file is emitted, shorter
    /// than `size` if needed, and ends the file.
    KeepFinal,
}

/// Immutable chunking configuration.
///
/// Built once and shared by every file of a run. `size <= overlap` is
/// corrected to `size = overlap + 1` so that every window advances.
///
/// # Examples
///
/// ```
/// use codesift::chunking::{ChunkingConfig, ChunkingMode};
///
/// let config = ChunkingConfig::new(ChunkingMode::Line, 10, 4);
/// assert_eq!(config.step(), 8);
///
/// // Overlap larger than the window is corrected.
/// let config = ChunkingConfig::new(ChunkingMode::Line, 3, 6);
/// assert_eq!(config.size(), 7);
/// ```
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    mode: ChunkingMode,
    size: usize,
    overlap: usize,
    include_all_files: bool,
    encoding: Option<&'static Encoding>,
    detect_encoding: bool,
    trailing_lines: TrailingLines,
    filename_header: bool,
    exclude: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let (size, overlap) = ChunkingMode::Char.default_window();
        Self::new(ChunkingMode::Char, size, overlap)
    }
}

impl ChunkingConfig {
    pub fn new(mode: ChunkingMode, size: usize, overlap: usize) -> Self {
        let size = if size <= overlap {
            tracing::warn!(
                size,
                overlap,
                corrected = overlap + 1,
                "chunk size must exceed overlap, correcting"
            );
            overlap + 1
        } else {
            size
        };

        Self {
            mode,
            size,
            overlap,
            include_all_files: false,
            encoding: None,
            detect_encoding: true,
            trailing_lines: TrailingLines::default(),
            filename_header: mode == ChunkingMode::TokenBudget,
            exclude: Vec::new(),
        }
    }

    /// Decode files with the given WHATWG encoding label instead of
    /// trying UTF-8 first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for labels `encoding_rs` does not know.
    pub fn with_encoding(mut self, label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| {
                Error::Config(format!("unknown encoding label: {label}"))
            })?;
        self.encoding = Some(encoding);
        Ok(self)
    }

    /// Whether a file that fails to decode gets one more try with a
    /// detected encoding. On by default.
    pub fn with_encoding_detection(mut self, detect_encoding: bool) -> Self {
        self.detect_encoding = detect_encoding;
        self
    }

    pub fn with_include_all_files(mut self, include_all_files: bool) -> Self {
        self.include_all_files = include_all_files;
        self
    }

    pub fn with_trailing_lines(mut self, trailing_lines: TrailingLines) -> Self {
        self.trailing_lines = trailing_lines;
        self
    }

    /// Prefix each chunk with its file name. Always on in token-budget
    /// mode.
    pub fn with_filename_header(mut self, filename_header: bool) -> Self {
        self.filename_header =
            filename_header || self.mode == ChunkingMode::TokenBudget;
        self
    }

    /// Glob patterns matched against relative paths to skip.
    pub fn with_exclude(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }

    pub fn mode(&self) -> ChunkingMode {
        self.mode
    }

    /// Window length in lines or characters, or the token ceiling.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn include_all_files(&self) -> bool {
        self.include_all_files
    }

    pub fn encoding(&self) -> Option<&'static Encoding> {
        self.encoding
    }

    pub fn encoding_detection(&self) -> bool {
        self.detect_encoding
    }

    pub fn trailing_lines(&self) -> TrailingLines {
        self.trailing_lines
    }

    pub fn filename_header(&self) -> bool {
        self.filename_header
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// Distance between window starts for line and char modes: half of
    /// the overlap (rounded up) is shared with each neighbour.
    pub fn step(&self) -> usize {
        self.size - self.overlap.div_ceil(2)
    }
}

/// Line windows for a file of `line_count` lines.
///
/// A file shorter than `size` yields one window covering it whole.
///
/// # Examples
///
/// ```
/// use codesift::chunking::{line_windows, TrailingLines};
///
/// assert_eq!(line_windows(25, 10, 8, TrailingLines::Drop), vec![0..10, 8..18]);
/// assert_eq!(
///     line_windows(25, 10, 8, TrailingLines::KeepFinal),
///     vec![0..10, 8..18, 16..25]
/// );
/// ```
pub fn line_windows(
    line_count: usize,
    size: usize,
    step: usize,
    trailing: TrailingLines,
) -> Vec<Range<usize>> {
    if line_count == 0 {
        return Vec::new();
    }
    if line_count < size {
        return vec![0..line_count];
    }

    let step = step.max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    while start < line_count {
        let end = start + size;
        if end > line_count {
            if trailing == TrailingLines::KeepFinal {
                windows.push(start..line_count);
            }
            break;
        }
        windows.push(start..end);
        if end == line_count {
            break;
        }
        start += step;
    }

    windows
}

/// Character windows for a text of `char_count` characters. The last
/// window is clipped to the end of the text.
///
/// # Examples
///
/// ```
/// use codesift::chunking::char_windows;
///
/// assert_eq!(char_windows(21, 10, 8), vec![0..10, 8..18, 16..21]);
/// ```
pub fn char_windows(
    char_count: usize,
    size: usize,
    step: usize,
) -> Vec<Range<usize>> {
    let step = step.max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    while start < char_count {
        let end = (start + size).min(char_count);
        windows.push(start..end);
        if end == char_count {
            break;
        }
        start += step;
    }

    windows
}

/// Step after a token-budget window that consumed `consumed` lines.
///
/// # Examples
///
/// ```
/// use codesift::chunking::token_step;
///
/// assert_eq!(token_step(50), 40);
/// assert_eq!(token_step(2), 4);
/// ```
pub fn token_step(consumed: usize) -> usize {
    (consumed * 4 / 5).max(MIN_TOKEN_STEP)
}

/// Split `text` into its lines, keeping line terminators.
pub(crate) fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn header_for(filename: &str) -> String {
    format!("{filename}\n")
}

/// Chunk texts for line mode.
pub fn chunk_lines(
    text: &str,
    filename: &str,
    config: &ChunkingConfig,
) -> Vec<String> {
    let lines = split_lines(text);
    line_windows(
        lines.len(),
        config.size(),
        config.step(),
        config.trailing_lines(),
    )
    .into_iter()
    .map(|range| {
        let mut chunk = if config.filename_header() {
            header_for(filename)
        } else {
            String::new()
        };
        for line in &lines[range] {
            chunk.push_str(line);
        }
        chunk
    })
    .collect()
}

/// Chunk texts for char mode. Windows are counted in Unicode scalar
/// values, never splitting a multi-byte character.
pub fn chunk_chars(
    text: &str,
    filename: &str,
    config: &ChunkingConfig,
) -> Vec<String> {
    // Map char index -> byte index, with one trailing entry for the end.
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    char_windows(char_count, config.size(), config.step())
        .into_iter()
        .map(|range| {
            let body = &text[char_to_byte[range.start]..char_to_byte[range.end]];
            if config.filename_header() {
                let mut chunk = header_for(filename);
                chunk.push_str(body);
                chunk
            } else {
                body.to_string()
            }
        })
        .collect()
}

/// Chunk texts for token-budget mode.
///
/// Every returned chunk, header included, counts at most `ceiling`
/// tokens. A line that cannot fit even on its own is cut to the longest
/// prefix that does. A window left with nothing but the header is not
/// emitted.
///
/// # Errors
///
/// Propagates failures of the token counter.
pub fn chunk_tokens(
    text: &str,
    filename: &str,
    ceiling: usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<String>> {
    let lines = split_lines(text);
    let header = header_for(filename);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let mut chunk = header.clone();
        let mut consumed = 0;

        while let Some(line) = lines.get(start + consumed) {
            let before = chunk.len();
            chunk.push_str(line);
            if counter.token_count(&chunk)? > ceiling {
                chunk.truncate(before);
                break;
            }
            consumed += 1;
        }

        if consumed == 0 {
            let mut oversized = header.clone();
            oversized.push_str(lines[start]);
            chunk = longest_prefix_within(&oversized, ceiling, counter)?;
            consumed = 1;
        }

        if chunk.len() > header.len() {
            chunks.push(chunk);
        } else {
            tracing::debug!(
                file = filename,
                line = start,
                ceiling,
                "no room for content after the file name header"
            );
        }

        if start + consumed >= lines.len() {
            break;
        }
        start += token_step(consumed);
    }

    Ok(chunks)
}

/// Longest prefix of `text`, cut at a character boundary, whose token
/// count does not exceed `ceiling`.
fn longest_prefix_within(
    text: &str,
    ceiling: usize,
    counter: &dyn TokenCounter,
) -> Result<String> {
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    // Invariant: boundaries[lo] fits, boundaries[hi + 1..] do not.
    let mut lo = 0;
    let mut hi = boundaries.len() - 1;
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if counter.token_count(&text[..boundaries[mid]])? <= ceiling {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    Ok(text[..boundaries[lo]].to_string())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::embedder::fake::WordCounter;

    fn numbered_lines(count: usize) -> String {
        (0..count).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn step_rounds_overlap_half_up() {
        assert_eq!(ChunkingConfig::new(ChunkingMode::Line, 10, 4).step(), 8);
        assert_eq!(ChunkingConfig::new(ChunkingMode::Line, 10, 5).step(), 7);
        assert_eq!(ChunkingConfig::new(ChunkingMode::Line, 10, 0).step(), 10);
    }

    #[test]
    fn size_not_above_overlap_is_corrected() {
        let config = ChunkingConfig::new(ChunkingMode::Char, 4, 4);
        assert_eq!(config.size(), 5);
        assert!(config.step() >= 1);

        let config = ChunkingConfig::new(ChunkingMode::Line, 0, 0);
        assert_eq!(config.size(), 1);
        assert_eq!(config.step(), 1);
    }

    #[test]
    fn unknown_encoding_label_is_rejected() {
        let result = ChunkingConfig::default().with_encoding("klingon-8");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn latin1_label_resolves() {
        let config =
            ChunkingConfig::default().with_encoding("iso-8859-1").unwrap();
        assert_eq!(config.encoding(), Some(encoding_rs::WINDOWS_1252));
    }

    #[test]
    fn token_mode_always_has_header() {
        let config = ChunkingConfig::new(ChunkingMode::TokenBudget, 512, 0)
            .with_filename_header(false);
        assert!(config.filename_header());
    }

    #[test]
    fn twenty_five_lines_drop_policy() {
        let text = numbered_lines(25);
        let config = ChunkingConfig::new(ChunkingMode::Line, 10, 4);
        let chunks = chunk_lines(&text, "a.py", &config);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("line 0\n"));
        assert!(chunks[1].starts_with("line 8\n"));
        assert!(chunks[1].ends_with("line 17\n"));
    }

    #[test]
    fn twenty_five_lines_keep_final_policy() {
        let text = numbered_lines(25);
        let config = ChunkingConfig::new(ChunkingMode::Line, 10, 4)
            .with_trailing_lines(TrailingLines::KeepFinal);
        let chunks = chunk_lines(&text, "a.py", &config);

        assert_eq!(chunks.len(), 3);
        assert!(chunks[2].starts_with("line 16\n"));
        assert!(chunks[2].ends_with("line 24\n"));
        assert_eq!(chunks[2].lines().count(), 9);
    }

    #[test]
    fn short_file_is_one_chunk() {
        let config = ChunkingConfig::new(ChunkingMode::Line, 10, 4);
        let chunks = chunk_lines("a\nb\nc", "x.md", &config);
        assert_eq!(chunks, vec!["a\nb\nc".to_string()]);
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let config = ChunkingConfig::new(ChunkingMode::Line, 10, 4);
        assert!(chunk_lines("", "x.md", &config).is_empty());
        let config = ChunkingConfig::new(ChunkingMode::Char, 10, 4);
        assert!(chunk_chars("", "x.md", &config).is_empty());
        assert!(chunk_tokens("", "x.md", 16, &WordCounter).unwrap().is_empty());
    }

    #[test]
    fn line_header_is_prepended() {
        let config = ChunkingConfig::new(ChunkingMode::Line, 2, 0)
            .with_filename_header(true);
        let chunks = chunk_lines("a\nb\n", "src/x.rs", &config);
        assert_eq!(chunks, vec!["src/x.rs\na\nb\n".to_string()]);
    }

    #[test]
    fn char_final_chunk_takes_remainder() {
        let text = "abcdefghijklmnopqrstu"; // 21 chars
        let config = ChunkingConfig::new(ChunkingMode::Char, 10, 4);
        let chunks = chunk_chars(text, "a.txt", &config);
        assert_eq!(chunks, vec!["abcdefghij", "ijklmnopqr", "qrstu"]);
    }

    #[test]
    fn char_mode_respects_multibyte_boundaries() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(20);
        let config = ChunkingConfig::new(ChunkingMode::Char, 17, 6);
        let chunks = chunk_chars(&text, "u.md", &config);
        assert!(!chunks.is_empty());
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.chars().count(), 17);
        }
    }

    #[test]
    fn token_windows_stay_under_ceiling() {
        let text = numbered_lines(60);
        let chunks = chunk_tokens(&text, "big.py", 20, &WordCounter).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.starts_with("big.py\n"));
            assert!(WordCounter.token_count(chunk).unwrap() <= 20);
        }
        assert!(chunks.last().unwrap().ends_with("line 59\n"));
    }

    #[test]
    fn token_step_has_floor() {
        // Each line is 2 words and the header 1: only 2 lines fit in 5
        // tokens, yet the next window starts 4 lines later.
        let text = numbered_lines(12);
        let chunks = chunk_tokens(&text, "f", 5, &WordCounter).unwrap();
        assert_eq!(chunks[0], "f\nline 0\nline 1\n");
        assert_eq!(chunks[1], "f\nline 4\nline 5\n");
        assert_eq!(chunks[2], "f\nline 8\nline 9\n");
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn token_step_overlaps_about_twenty_percent() {
        let text = numbered_lines(100);
        // 1 header token + 10 lines * 2 tokens = 21
        let chunks = chunk_tokens(&text, "f", 21, &WordCounter).unwrap();
        assert_eq!(chunks[0].lines().count(), 11);
        assert!(chunks[1].starts_with("f\nline 8\n"));
    }

    #[test]
    fn oversized_line_is_truncated() {
        let long_line = format!("{}\n", "word ".repeat(50));
        let text = format!("{long_line}short line\n");
        let chunks = chunk_tokens(&text, "f", 10, &WordCounter).unwrap();

        assert_eq!(WordCounter.token_count(&chunks[0]).unwrap(), 10);
        for chunk in &chunks {
            assert!(WordCounter.token_count(chunk).unwrap() <= 10);
        }
    }

    #[test]
    fn header_over_ceiling_yields_no_chunks() {
        let text = numbered_lines(10);
        let chunks =
            chunk_tokens(&text, "a b c d e f", 3, &WordCounter).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn header_filling_ceiling_yields_no_chunks() {
        let chunks =
            chunk_tokens("alpha beta\n", "one two", 2, &WordCounter).unwrap();
        assert!(chunks.is_empty());
    }

    proptest! {
        #[test]
        fn line_chunking_is_deterministic(
            count in 0usize..200,
            size in 1usize..30,
            overlap in 0usize..30,
        ) {
            let text = numbered_lines(count);
            let config = ChunkingConfig::new(ChunkingMode::Line, size, overlap);
            prop_assert_eq!(
                chunk_lines(&text, "p", &config),
                chunk_lines(&text, "p", &config)
            );
        }

        #[test]
        fn line_windows_are_full_unless_only_chunk(
            count in 1usize..300,
            size in 1usize..40,
            overlap in 0usize..40,
        ) {
            let config = ChunkingConfig::new(ChunkingMode::Line, size, overlap);
            let windows = line_windows(
                count,
                config.size(),
                config.step(),
                TrailingLines::Drop,
            );
            prop_assert!(!windows.is_empty());
            for window in &windows {
                let short = window.len() < config.size();
                prop_assert!(
                    !short || (windows.len() == 1 && count < config.size())
                );
            }
        }

        #[test]
        fn char_windows_cover_the_tail(
            count in 1usize..2000,
            size in 1usize..100,
            overlap in 0usize..100,
        ) {
            let config = ChunkingConfig::new(ChunkingMode::Char, size, overlap);
            let windows = char_windows(count, config.size(), config.step());
            prop_assert_eq!(windows.first().map(|w| w.start), Some(0));
            prop_assert_eq!(windows.last().map(|w| w.end), Some(count));
            for pair in windows.windows(2) {
                prop_assert!(pair[1].start <= pair[0].end);
            }
        }

        #[test]
        fn token_chunks_respect_ceiling_and_floor(
            words in proptest::collection::vec(0usize..12, 1..80),
            ceiling in 3usize..60,
        ) {
            let text: String = words
                .iter()
                .map(|n| format!("{}\n", "w ".repeat(*n)))
                .collect();
            let chunks = chunk_tokens(&text, "f", ceiling, &WordCounter).unwrap();
            let lines = split_lines(&text).len();
            prop_assert!(chunks.len() <= lines.div_ceil(MIN_TOKEN_STEP));
            for chunk in &chunks {
                prop_assert!(WordCounter.token_count(chunk).unwrap() <= ceiling);
                prop_assert!(chunk.len() > "f\n".len());
            }
        }
    }
}
