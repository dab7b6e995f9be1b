//! Overlapping, sentence-aware transcript chunking.

use crate::models::Chunk;
use crate::{Error, Result};

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 2200;

/// Default overlap between consecutive windows in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Splits transcripts into overlapping windows.
///
/// All offsets are character (Unicode scalar) offsets, never byte offsets, so
/// a window boundary can never fall inside a multi-byte character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkSplitter {
    /// Creates a splitter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `chunk_size` is zero or `overlap` is
    /// not smaller than `chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be positive".to_string()));
        }
        if overlap >= chunk_size {
            return Err(Error::InvalidInput(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Window size in characters.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Overlap in characters.
    #[must_use]
    pub const fn overlap(&self) -> usize {
        self.overlap
    }

    /// Splits `text` into chunks.
    ///
    /// Text shorter than one window comes back as a single chunk; empty text
    /// yields no chunks. Every non-final window is cut right after the last
    /// `". "` found within `overlap` characters of its end, if there is one.
    /// The next window starts `overlap` characters before the previous cut.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        // Byte offset of every char, plus the end of the string.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let len = offsets.len() - 1;
        if len == 0 {
            return Vec::new();
        }

        let bytes = text.as_bytes();
        let is_boundary = |p: usize| bytes[offsets[p]] == b'.' && bytes[offsets[p + 1]] == b' ';

        let mut chunks = Vec::with_capacity(len / (self.chunk_size - self.overlap) + 1);
        let mut start = 0;
        loop {
            let window_end = (start + self.chunk_size).min(len);
            let end = if window_end < len {
                let floor = window_end.saturating_sub(self.overlap).max(start);
                // ". " must fit entirely before the window end.
                (floor..window_end.saturating_sub(1))
                    .rev()
                    .find(|&p| is_boundary(p))
                    .map_or(window_end, |p| p + 1)
            } else {
                window_end
            };

            chunks.push(Chunk {
                index: chunks.len(),
                char_start: start,
                char_end: end,
                text: text[offsets[start]..offsets[end]].to_string(),
            });

            if end >= len {
                break;
            }
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }
        chunks
    }
}

impl Default for ChunkSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Splits `text` with the given window size and overlap.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an impossible size/overlap pair.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    Ok(ChunkSplitter::new(chunk_size, overlap)?.split(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(text: &str, chunk: &Chunk) -> String {
        text.chars()
            .skip(chunk.char_start)
            .take(chunk.char_len())
            .collect()
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let text = "a".repeat(1000);
        let chunks = ChunkSplitter::default().split(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 1000));
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_empty_text() {
        assert!(ChunkSplitter::default().split("").is_empty());
    }

    #[test]
    fn test_exact_window_is_one_chunk() {
        let text = "b".repeat(DEFAULT_CHUNK_SIZE);
        let chunks = ChunkSplitter::default().split(&text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].char_end, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_cuts_after_sentence_in_overlap() {
        // Boundary ". " at chars 2049..2051 lies inside [2000, 2200).
        let mut text = "x".repeat(2049);
        text.push_str(". ");
        text.push_str(&"y".repeat(1000));

        let chunks = ChunkSplitter::default().split(&text);
        assert_eq!(chunks[0].char_end, 2050);
        assert!(chunks[0].text.ends_with('.'));
        assert_eq!(chunks[1].char_start, 1850);
    }

    #[test]
    fn test_boundary_outside_overlap_is_ignored() {
        let mut text = "x".repeat(1500);
        text.push_str(". ");
        text.push_str(&"y".repeat(2000));

        let chunks = ChunkSplitter::default().split(&text);
        assert_eq!(chunks[0].char_end, DEFAULT_CHUNK_SIZE);
        assert_eq!(chunks[1].char_start, DEFAULT_CHUNK_SIZE - DEFAULT_CHUNK_OVERLAP);
    }

    #[test]
    fn test_last_boundary_wins() {
        let mut text = "x".repeat(2050);
        text.push_str(". ");
        text.push_str(&"x".repeat(50));
        text.push_str(". ");
        text.push_str(&"z".repeat(500));

        let chunks = ChunkSplitter::default().split(&text);
        assert_eq!(chunks[0].char_end, 2103);
    }

    #[test]
    fn test_multibyte_offsets() {
        let text = "é".repeat(25);
        let chunks = ChunkSplitter::new(10, 2).unwrap().split(&text);
        for chunk in &chunks {
            assert_eq!(chunk.text, slice(&text, chunk));
            assert_eq!(chunk.text.chars().count(), chunk.char_len());
        }
        assert_eq!(chunks.last().unwrap().char_end, 25);
    }

    #[test]
    fn test_windows_overlap_and_cover() {
        let text = "w".repeat(5000);
        let chunks = ChunkSplitter::default().split(&text);
        assert_eq!(chunks[0].char_start, 0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].char_start, pair[0].char_end - DEFAULT_CHUNK_OVERLAP);
            assert_eq!(pair[1].index, pair[0].index + 1);
        }
        assert_eq!(chunks.last().unwrap().char_end, 5000);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            ChunkSplitter::new(0, 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ChunkSplitter::new(100, 100),
            Err(Error::InvalidInput(_))
        ));
        assert!(split("text", 100, 150).is_err());
    }

    #[test]
    fn test_progress_when_cut_is_inside_overlap() {
        // A cut at char 2 with overlap 5 would move backwards; the next window
        // starts at the cut instead.
        let text = "a. bbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let chunks = ChunkSplitter::new(6, 5).unwrap().split(text);
        for pair in chunks.windows(2) {
            assert!(pair[1].char_start > pair[0].char_start);
        }
        assert_eq!(chunks.last().unwrap().char_end, text.chars().count());
    }
}
