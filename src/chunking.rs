//! Word-window chunking.
//!
//! Text is split on whitespace and cut into windows of `words` words, each
//! window starting `words - overlap` words after the previous one. The
//! last window always ends at the final word.

pub const DEFAULT_CHUNK_WORDS: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 120;

/// Split `text` into overlapping word windows, joined by single spaces.
///
/// Empty or whitespace-only text yields no chunks. `overlap` is clamped
/// below `words` so the window always advances.
///
/// # Examples
///
/// ```
/// use docgraph::chunking::chunk_words;
///
/// let chunks = chunk_words("a b c d e", 3, 1);
/// assert_eq!(chunks, vec!["a b c", "c d e"]);
/// ```
pub fn chunk_words(text: &str, words: usize, overlap: usize) -> Vec<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let size = words.max(1);
    let step = size - overlap.min(size - 1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(tokens.len());
        chunks.push(tokens[start..end].join(" "));
        if end == tokens.len() {
            return chunks;
        }
        start += step;
    }
}
