//! Sliding-window text chunker.
//!
//! Splits text into fixed-size character windows that overlap by a
//! configurable amount, so content cut at a window edge still appears
//! whole in the neighbouring chunk. Windows are measured in Unicode
//! scalar values, never bytes, so multibyte text is never split mid-char.
//!
//! # Algorithm
//!
//! 1. Validate `size > 0` and `0 <= overlap < size`.
//! 2. Empty text yields no chunks.
//! 3. Text that fits in one window yields a single chunk.
//! 4. Otherwise emit `text[start..start + size]` and advance `start` by
//!    `size - overlap` while `start` is still inside the text. The last
//!    window may be shorter than `size`.
//!
//! # Example
//!
//! ```rust
//! use ragvault_core::chunk::{chunk_text, ChunkParams};
//!
//! let chunks = chunk_text("abcdefghij", ChunkParams { size: 4, overlap: 1 }).unwrap();
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, ["abcd", "defg", "ghij", "j"]);
//! ```

use crate::error::{EngineError, Result};

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            size: 1000,
            overlap: 150,
        }
    }
}

impl ChunkParams {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 || self.overlap >= self.size {
            return Err(EngineError::invalid(
                "invalid chunking parameters: require size > 0 and 0 <= overlap < size",
            ));
        }
        Ok(())
    }
}

/// One window of a chunked text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position of this chunk, contiguous from 0.
    pub index: usize,
    pub text: String,
}

/// Split `text` into overlapping windows.
///
/// # Guarantees
///
/// - Empty text produces an empty vector.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Every chunk except possibly the last holds exactly `size` characters.
pub fn chunk_text(text: &str, params: ChunkParams) -> Result<Vec<TextChunk>> {
    params.validate()?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char start, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let n_chars = bounds.len();
    bounds.push(text.len());

    if n_chars <= params.size {
        return Ok(vec![make_chunk(0, text)]);
    }

    let step = params.size - params.overlap;
    let mut chunks = Vec::with_capacity(n_chars / step + 1);
    let mut start = 0;
    while start < n_chars {
        let end = (start + params.size).min(n_chars);
        chunks.push(make_chunk(chunks.len(), &text[bounds[start]..bounds[end]]));
        start += step;
    }

    Ok(chunks)
}

fn make_chunk(index: usize, text: &str) -> TextChunk {
    TextChunk {
        index,
        text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: usize, overlap: usize) -> ChunkParams {
        ChunkParams { size, overlap }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", ChunkParams::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", ChunkParams::default()).unwrap().is_empty());
    }

    #[test]
    fn test_exact_window_is_single_chunk() {
        let chunks = chunk_text("abcd", params(4, 1)).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let text: String = (0..2500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunk_text(&text, ChunkParams::default()).unwrap();
        assert_eq!(chunks.len(), 3);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().skip(850).collect();
            let head: String = pair[1].text.chars().take(150).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let text = "x".repeat(103);
        let chunks = chunk_text(&text, params(10, 3)).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text(text, params(7, 2)).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks[..chunks.len() - 1] {
            assert_eq!(c.text.chars().count(), 7);
        }
    }

    #[test]
    fn test_invalid_params() {
        assert!(chunk_text("abc", params(0, 0)).is_err());
        assert!(chunk_text("abc", params(5, 5)).is_err());
        assert!(chunk_text("abc", params(5, 6)).is_err());
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha Beta Gamma Delta Epsilon";
        let c1 = chunk_text(text, params(8, 2)).unwrap();
        let c2 = chunk_text(text, params(8, 2)).unwrap();
        assert_eq!(c1, c2);
    }
}
