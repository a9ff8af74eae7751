//! Document segmentation — cleaned text → ordered, bounded chunks.
//!
//! Paragraphs (blank-line separated) are packed greedily into chunks of at
//! most `max_chars` characters.  A paragraph that is too long on its own is
//! packed sentence by sentence instead.  A single sentence longer than the
//! limit is emitted whole.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::preprocess::MarkdownCleaner;

/// Default maximum characters per chunk.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 800;

/// End-of-sentence punctuation (optionally followed by closing quotes or
/// brackets) and the whitespace after it.
static RE_SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]["'\u{201D}\u{2019})\]]*\s+"#).unwrap());

// ─────────────────────────────────────────────────────────────────────────────
// Data model
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of narration.  `index` is the position in the whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Raw input and its cleaned form.
#[derive(Debug, Clone)]
pub struct Document {
    pub raw: String,
    pub cleaned: String,
}

impl Document {
    pub fn new(raw: impl Into<String>, cleaner: &MarkdownCleaner) -> Self {
        let raw = raw.into();
        let cleaned = cleaner.process(&raw);
        Self { raw, cleaned }
    }

    /// Split the cleaned text into indexed chunks.
    pub fn chunks(&self, max_chars: usize) -> Vec<Chunk> {
        split_text(&self.cleaned, max_chars)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk { index, text })
            .collect()
    }
}

/// Clean `raw` with the default cleaner and split it into chunks.
pub fn segment(raw: &str, max_chars: usize) -> Vec<Chunk> {
    Document::new(raw, &MarkdownCleaner::new()).chunks(max_chars)
}

// ─────────────────────────────────────────────────────────────────────────────
// Splitting
// ─────────────────────────────────────────────────────────────────────────────

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Greedy packer: appends pieces to the open buffer while the result stays
/// within `max_chars`, sealing the buffer otherwise.
struct Packer {
    max_chars: usize,
    current: String,
    current_len: usize,
    chunks: Vec<String>,
}

impl Packer {
    fn new(max_chars: usize) -> Self {
        Self { max_chars, current: String::new(), current_len: 0, chunks: Vec::new() }
    }

    fn fits(&self, piece_len: usize) -> bool {
        if self.current.is_empty() {
            piece_len <= self.max_chars
        } else {
            self.current_len + 1 + piece_len <= self.max_chars
        }
    }

    fn append(&mut self, piece: &str, piece_len: usize, sep: char) {
        if !self.current.is_empty() {
            self.current.push(sep);
            self.current_len += 1;
        }
        self.current.push_str(piece);
        self.current_len += piece_len;
    }

    fn seal(&mut self) {
        if !self.current.is_empty() {
            self.chunks.push(std::mem::take(&mut self.current));
        }
        self.current_len = 0;
    }

    /// Seal unless the piece fits, then add it.
    fn push(&mut self, piece: &str, sep: char) {
        let len = char_len(piece);
        if !self.fits(len) {
            self.seal();
        }
        self.append(piece, len, sep);
    }

    fn finish(mut self) -> Vec<String> {
        self.seal();
        self.chunks
    }
}

/// Split a paragraph on sentence boundaries, keeping the punctuation.
pub fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in RE_SENTENCE_END.find_iter(paragraph) {
        let sentence = paragraph[start..m.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }
    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Split cleaned text into chunks of at most `max_chars` characters.
///
/// Paragraphs inside a chunk are joined with `\n`, sentences with a space.
/// Line breaks inside a paragraph become spaces.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut packer = Packer::new(max_chars.max(1));

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para = para.split('\n').map(str::trim).collect::<Vec<_>>().join(" ");
        let para_len = char_len(&para);

        if packer.fits(para_len) {
            packer.append(&para, para_len, '\n');
            continue;
        }

        packer.seal();
        if para_len > packer.max_chars {
            // Leftover sentences stay open so the next paragraph may join them.
            for sentence in split_sentences(&para) {
                packer.push(sentence, ' ');
            }
        } else {
            packer.append(&para, para_len, '\n');
        }
    }

    packer.finish()
}

// ─────────────────────────────────────────────────────────────────────────────
// Processing range
// ─────────────────────────────────────────────────────────────────────────────

/// Sub-range of chunk indices processed by one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkRange {
    /// First index (inclusive).
    pub start: usize,
    /// Last index (exclusive); `None` means the end of the document.
    pub end: Option<usize>,
    /// Cap on the number of chunks counted from `start`.
    pub max_chunks: Option<usize>,
}

impl ChunkRange {
    /// Resolve against a document of `total` chunks.  Never out of bounds.
    pub fn resolve(&self, total: usize) -> Range<usize> {
        let start = self.start.min(total);
        let mut end = self.end.unwrap_or(total).max(start).min(total);
        if let Some(max) = self.max_chunks {
            end = end.min(start.saturating_add(max));
        }
        start..end
    }

    pub fn is_full(&self, total: usize) -> bool {
        self.resolve(total) == (0..total)
    }

    /// The chunks this range selects, with their document-wide indices intact.
    pub fn select<'a>(&self, chunks: &'a [Chunk]) -> &'a [Chunk] {
        &chunks[self.resolve(chunks.len())]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
