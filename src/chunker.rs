//! Three-tier content chunker.
//!
//! Splits `(content, title)` into ordered [`KnowledgeChunk`]s that carry
//! their section heading and character offsets into the original content:
//!
//! 1. **Heading split** — markdown `#` headings and literal HTML heading
//!    tags open a new section.
//! 2. **Paragraph split** — sections are cut on blank lines (`\n\n`).
//! 3. **Sliding window** — anything still longer than `max_chunk_size` is
//!    cut into overlapping windows with stride
//!    `max_chunk_size × (1 − overlap_ratio)`.
//!
//! Chunking never fails the caller: [`Chunker::chunk`] falls back to a
//! single chunk spanning the whole content when the fallible inner pass
//! ([`Chunker::try_chunk`]) reports an error.

use anyhow::{bail, Result};
use regex::Regex;
use std::sync::OnceLock;

use crate::config::ChunkingConfig;
use crate::models::KnowledgeChunk;

fn md_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+)$").unwrap())
}

fn html_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<h[1-6][^>]*>(.{0,200}?)</h[1-6]>").unwrap())
}

/// Document chunking engine.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split content into chunks. Never fails: any internal error degrades
    /// to a single chunk spanning the whole content. Empty content yields
    /// an empty sequence. `item_id` is left unset.
    pub fn chunk(&self, content: &str, title: &str) -> Vec<KnowledgeChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }
        match self.try_chunk(content, title) {
            Ok(chunks) => chunks,
            Err(error) => {
                tracing::warn!(%error, "chunking failed, degrading to single chunk");
                vec![single_chunk(content, title)]
            }
        }
    }

    /// Fallible chunking pass. Callers that need to distinguish failure
    /// (e.g. to switch to snippet extraction) use this seam directly.
    pub fn try_chunk(&self, content: &str, title: &str) -> Result<Vec<KnowledgeChunk>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        if self.config.max_chunk_size == 0 {
            bail!("max_chunk_size must be positive");
        }

        // Short documents become one chunk, headed by the title.
        if content.len() < self.config.min_chunk_size * 2 {
            return Ok(vec![single_chunk(content, title)]);
        }

        // (heading, text, absolute start offset)
        let sections = split_by_headings(content);
        let raw_pieces: Vec<(String, &str, usize)> = if sections.is_empty() {
            split_by_paragraphs(content, 0)
                .into_iter()
                .map(|(text, pos)| (String::new(), text, pos))
                .collect()
        } else {
            sections
        };

        let mut final_pieces: Vec<(String, &str, usize)> = Vec::new();
        for (heading, text, start) in raw_pieces {
            if text.len() <= self.config.max_chunk_size {
                final_pieces.push((heading, text, start));
                continue;
            }
            for (para, para_start) in split_by_paragraphs(text, start) {
                if para.len() <= self.config.max_chunk_size {
                    final_pieces.push((heading.clone(), para, para_start));
                } else {
                    for (win, win_start) in self.sliding_windows(para, para_start) {
                        final_pieces.push((heading.clone(), win, win_start));
                    }
                }
            }
        }

        let mut chunks = Vec::new();
        let mut chunk_index: i64 = 0;
        for (heading, text, start) in final_pieces {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let end = start + text.len();
            chunks.push(KnowledgeChunk::new(trimmed, heading, chunk_index, start, end));
            chunk_index += 1;
        }

        if chunks.is_empty() {
            return Ok(vec![single_chunk(content, title)]);
        }
        Ok(chunks)
    }

    /// Cut oversized text into overlapping windows. Stride is
    /// `max_chunk_size × (1 − overlap_ratio)`, at least 1. Window edges are
    /// pulled back to char boundaries so offsets always index valid text.
    fn sliding_windows<'a>(&self, text: &'a str, start_offset: usize) -> Vec<(&'a str, usize)> {
        let max = self.config.max_chunk_size;
        let step = ((max as f64) * (1.0 - self.config.overlap_ratio)) as usize;
        let step = step.max(1);

        let mut out = Vec::new();
        let mut start = 0usize;
        while start < text.len() {
            let mut end = floor_char_boundary(text, (start + max).min(text.len()));
            if end <= start {
                // max is smaller than the character at `start`
                end = next_char_boundary(text, start + 1);
            }
            let window = &text[start..end];
            if !window.trim().is_empty() {
                out.push((window, start_offset + start));
            }
            if end >= text.len() {
                break;
            }
            let mut next = floor_char_boundary(text, start + step);
            if next <= start {
                next = end;
            }
            start = next;
        }
        out
    }
}

fn single_chunk(content: &str, title: &str) -> KnowledgeChunk {
    KnowledgeChunk::new(content.trim(), title, 0, 0, content.len())
}

/// Section boundaries from markdown and literal-HTML headings, sorted by
/// offset. Returns empty when no headings are present.
fn split_by_headings(content: &str) -> Vec<(String, &str, usize)> {
    // (boundary start, heading text)
    let mut boundaries: Vec<(usize, String)> = Vec::new();
    for caps in md_heading_re().captures_iter(content) {
        let whole = caps.get(0).unwrap();
        let heading = caps.get(1).unwrap().as_str().trim().to_string();
        boundaries.push((whole.start(), heading));
    }
    for caps in html_heading_re().captures_iter(content) {
        let whole = caps.get(0).unwrap();
        let heading = caps.get(1).unwrap().as_str().trim().to_string();
        boundaries.push((whole.start(), heading));
    }
    if boundaries.is_empty() {
        return Vec::new();
    }
    boundaries.sort_by_key(|(start, _)| *start);

    let mut sections = Vec::new();
    if boundaries[0].0 > 0 {
        let pre = &content[..boundaries[0].0];
        if !pre.trim().is_empty() {
            sections.push((String::new(), pre, 0));
        }
    }
    for (i, (start, heading)) in boundaries.iter().enumerate() {
        let end = boundaries
            .get(i + 1)
            .map(|(next, _)| *next)
            .unwrap_or(content.len());
        let text = &content[*start..end];
        if !text.trim().is_empty() {
            sections.push((heading.clone(), text, *start));
        }
    }
    sections
}

/// Split on blank lines, tracking absolute start offsets. Empty parts are
/// skipped but still advance the offset.
fn split_by_paragraphs(content: &str, start_offset: usize) -> Vec<(&str, usize)> {
    let mut result = Vec::new();
    let mut pos = 0usize;
    for part in content.split("\n\n") {
        if !part.trim().is_empty() {
            result.push((part, start_offset + pos));
        }
        pos += part.len() + 2;
    }
    result
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn next_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
