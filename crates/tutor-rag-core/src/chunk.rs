//! Recursive, overlapping text chunker.
//!
//! Splits a document body into spans of at most `chunk_size` characters.
//! Consecutive spans share roughly `chunk_overlap` characters so that a
//! sentence cut by one boundary is still whole in the neighbouring chunk.
//!
//! # Algorithm
//!
//! 1. From the current start, look `chunk_size` characters ahead.
//! 2. If the rest of the text fits, emit it and stop.
//! 3. Otherwise pick the split point inside the window, preferring in order:
//!    a paragraph break (`\n\n`), a sentence end or line break, a space.
//!    A split point must lie past the first half of the window so chunks
//!    never shrink to slivers. With no usable separator, cut at the window
//!    edge (always on a UTF-8 character boundary).
//! 4. Start the next chunk `chunk_overlap` characters before the split,
//!    moved forward to the next word start, and record how many bytes of
//!    the new chunk repeat the previous one.
//!
//! Chunks are exact slices of the input, so dropping each chunk's
//! `overlap` prefix and concatenating in index order yields the input
//! again (see [`reassemble`]).
//!
//! # Example
//!
//! ```rust
//! use tutor_rag_core::chunk::{chunk_text, reassemble, ChunkingParams};
//!
//! let text = "First paragraph.\n\nSecond paragraph.";
//! let chunks = chunk_text(text, &ChunkingParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(reassemble(&chunks), text);
//! ```

use sha2::{Digest, Sha256};

/// Separator tiers, tried from coarsest to finest.
const SEPARATOR_TIERS: &[&[&str]] = &[&["\n\n"], &[". ", "! ", "? ", "\n"], &[" "]];

/// Chunk size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// A span of text produced by [`chunk_text`], not yet embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: i64,
    pub text: String,
    /// Bytes at the start of `text` that repeat the end of the previous chunk.
    pub overlap: usize,
}

/// Normalize extracted text before chunking.
///
/// Strips a UTF-8 BOM, converts CRLF/CR line endings to LF, and trims
/// surrounding whitespace.
pub fn normalize_text(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Split `text` into overlapping chunks.
///
/// Returns an empty vector for empty or whitespace-only input. Indices are
/// contiguous from 0, and the first chunk has `overlap == 0`.
pub fn chunk_text(text: &str, params: &ChunkingParams) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chunk_size = params.chunk_size.max(1);
    let overlap_chars = params.chunk_overlap.min(chunk_size - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut overlap = 0usize;
    let mut index: i64 = 0;

    loop {
        let window_end = advance_chars(text, start, chunk_size);
        let end = if window_end >= text.len() {
            text.len()
        } else {
            find_split(text, start, window_end, chunk_size)
        };

        chunks.push(TextChunk {
            index,
            text: text[start..end].to_string(),
            overlap,
        });

        if end >= text.len() {
            break;
        }

        let next = next_start(text, start, end, overlap_chars);
        overlap = end - next;
        start = next;
        index += 1;
    }

    chunks
}

/// Rebuild the original text from chunks in index order.
pub fn reassemble(chunks: &[TextChunk]) -> String {
    let mut sorted: Vec<&TextChunk> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.index);
    sorted
        .iter()
        .map(|c| &c.text[c.overlap.min(c.text.len())..])
        .collect()
}

/// Human-readable chunk label: the display name without its extension,
/// an underscore, and the chunk index.
pub fn chunk_label(display_name: &str, index: i64) -> String {
    let stem = match display_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => display_name,
    };
    format!("{}_{}", stem, index)
}

/// SHA-256 of `text`, hex encoded.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Byte offset `n` characters after `from`, clamped to the end of `text`.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Byte offset `n` characters before `to`, never earlier than `floor`.
fn retreat_chars(text: &str, floor: usize, to: usize, n: usize) -> usize {
    if n == 0 {
        return to;
    }
    text[floor..to]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| floor + i)
        .unwrap_or(floor)
}

/// Choose where the chunk starting at `start` ends, given the window end.
fn find_split(text: &str, start: usize, window_end: usize, chunk_size: usize) -> usize {
    let min_end = advance_chars(text, start, chunk_size / 2);
    let window = &text[start..window_end];

    for tier in SEPARATOR_TIERS {
        let best = tier
            .iter()
            .filter_map(|sep| window.rfind(sep).map(|pos| start + pos + sep.len()))
            .filter(|&split| split > min_end && split <= window_end)
            .max();
        if let Some(split) = best {
            return split;
        }
    }

    window_end
}

/// Where the chunk after `[start, end)` begins.
fn next_start(text: &str, start: usize, end: usize, overlap_chars: usize) -> usize {
    if overlap_chars == 0 {
        return end;
    }

    let desired = retreat_chars(text, start, end, overlap_chars);
    let rest = &text[desired..end];
    let mid_word = text[..desired]
        .chars()
        .next_back()
        .is_some_and(|c| !c.is_whitespace())
        && rest.chars().next().is_some_and(|c| !c.is_whitespace());

    // Skip the rest of a cut word, then any whitespace, to land on a word start.
    let word_end = if mid_word {
        rest.find(char::is_whitespace)
    } else {
        Some(0)
    };
    let next = word_end
        .and_then(|w| {
            rest[w..]
                .find(|c: char| !c.is_whitespace())
                .map(|p| desired + w + p)
        })
        .filter(|&pos| pos < end)
        .unwrap_or(desired);

    if next <= start {
        end
    } else {
        next
    }
}
