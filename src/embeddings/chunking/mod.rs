
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{LibrettoError, Result};

/// A contiguous piece of the source document used as a retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text.
    pub content: String,
    /// Offset of the first character of this chunk within the document,
    /// measured in characters.
    pub start_offset: usize,
    /// Position of this chunk in the split sequence.
    pub chunk_index: usize,
}

/// Parameters controlling how the document is split.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub max_length: usize,
    /// Number of characters shared between consecutive chunks. Must be
    /// strictly less than `max_length`.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_length: 700,
            overlap: 70,
        }
    }
}

/// Split a document into overlapping fixed-size chunks.
///
/// Every chunk after the first starts `max_length - overlap` characters after
/// its predecessor, so consecutive chunks share exactly `overlap` characters
/// and the sequence covers the document with no gaps. A document shorter than
/// `max_length` yields a single chunk; an empty document yields no chunks.
///
/// Fails fast when `overlap >= max_length`, which would otherwise produce a
/// zero-advancing sequence.
#[inline]
pub fn split_document(text: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    if config.max_length == 0 {
        return Err(LibrettoError::Config(
            "chunk max_length must be greater than zero".to_string(),
        ));
    }

    if config.overlap >= config.max_length {
        return Err(LibrettoError::Config(format!(
            "chunk overlap ({}) must be less than max_length ({})",
            config.overlap, config.max_length
        )));
    }

    // Byte offset of each character boundary, so slicing stays UTF-8 safe.
    let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_count = boundaries.len();

    if char_count == 0 {
        return Ok(Vec::new());
    }

    let stride = config.max_length - config.overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + config.max_length).min(char_count);
        let byte_start = boundaries[start];
        let byte_end = if end == char_count {
            text.len()
        } else {
            boundaries[end]
        };

        chunks.push(Chunk {
            content: text[byte_start..byte_end].to_string(),
            start_offset: start,
            chunk_index: chunks.len(),
        });

        if end == char_count {
            break;
        }
        start += stride;
    }

    debug!(
        "Split {} characters into {} chunks (max_length={}, overlap={})",
        char_count,
        chunks.len(),
        config.max_length,
        config.overlap
    );

    Ok(chunks)
}
