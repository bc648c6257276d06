//! Sliding-window text chunker.
//!
//! Splits document text into fixed-size character windows that overlap by a
//! configurable amount, so a sentence cut at one boundary is still whole in
//! the neighbouring chunk. Chunk *i* starts at `i × (chunk_size − overlap)`
//! characters; the last chunk is the first one that reaches the end of the
//! text.
//!
//! Chunking is pure: the same text and parameters always produce the same
//! chunks, including ids (`"{document_id}:{index}"`) and SHA-256 hashes.

use crate::error::RagError;
use crate::models::{hash_text, Chunk, RawDocument};

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Returns [`RagError::Config`] unless `0 <= overlap < chunk_size`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::config("chunk_size must be > 0"));
        }
        if overlap >= chunk_size {
            return Err(RagError::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }

    pub fn chunk_document(&self, doc: &RawDocument) -> Vec<Chunk> {
        self.chunk_text(&doc.id, &doc.full_text)
    }

    /// Split `text` into chunks with contiguous indices starting at 0.
    /// Always returns at least one chunk.
    pub fn chunk_text(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        // Byte offset of every char boundary, plus the end of the string.
        let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        bounds.push(text.len());
        let char_len = bounds.len() - 1;

        let mut chunks = Vec::with_capacity(self.expected_count(char_len));
        let mut start = 0usize;
        loop {
            let end = (start + self.chunk_size).min(char_len);
            let slice = &text[bounds[start]..bounds[end]];
            chunks.push(make_chunk(document_id, chunks.len(), slice, start, end));
            if end == char_len {
                break;
            }
            start += self.step();
        }
        chunks
    }

    /// Number of chunks produced for a text of `char_len` characters.
    pub fn expected_count(&self, char_len: usize) -> usize {
        if char_len <= self.chunk_size {
            return 1;
        }
        let step = self.step();
        (char_len - self.overlap).div_ceil(step)
    }
}

fn make_chunk(document_id: &str, index: usize, text: &str, start: usize, end: usize) -> Chunk {
    Chunk {
        id: format!("{}:{}", document_id, index),
        parent_document_id: document_id.to_string(),
        sequence_index: index,
        text: text.to_string(),
        start_offset: start,
        end_offset: end,
        hash: hash_text(text),
    }
}

/// Reassemble the original text by dropping the overlap from every chunk
/// after the first.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}
