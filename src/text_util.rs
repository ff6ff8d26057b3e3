/// Lines shown in a preview when no query word matches.
pub const DEFAULT_PREVIEW_LINES: usize = 4;

/// Maximum number of characters in a preview before truncation.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 320;

/// Drop the `filename\n` header that token-budget chunks start with.
pub fn strip_filename_header<'a>(content: &'a str, filename: &str) -> &'a str {
    content
        .strip_prefix(filename)
        .and_then(|rest| rest.strip_prefix('\n'))
        .unwrap_or(content)
}

/// Excerpt of `text` around the first line containing any word of
/// `query` (case-insensitive), or its first lines when nothing matches.
///
/// Returns `(excerpt, start_line)` with a 1-indexed start line, or
/// `None` for blank text.
///
/// # Examples
///
/// ```
/// use codesift::text_util::preview;
///
/// let text = "import os\n\ndef load_config(path):\n    return open(path)\n";
/// let (excerpt, start) = preview(text, "config loader").unwrap();
/// assert_eq!(start, 1);
/// assert!(excerpt.contains("def load_config"));
/// ```
pub fn preview(text: &str, query: &str) -> Option<(String, usize)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.iter().all(|line| line.trim().is_empty()) {
        return None;
    }

    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect();

    let hit = lines.iter().position(|line| {
        let line = line.to_lowercase();
        words.iter().any(|w| line.contains(w.as_str()))
    });

    let (start, end) = match hit {
        Some(idx) => (idx.saturating_sub(2), (idx + 2).min(lines.len())),
        None => (0, DEFAULT_PREVIEW_LINES.min(lines.len())),
    };

    Some((truncate_chars(&lines[start..end].join("\n")), start + 1))
}

fn truncate_chars(text: &str) -> String {
    match text.char_indices().nth(DEFAULT_PREVIEW_MAX_CHARS) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Prefix every line of `text` with `prefix`.
pub fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
