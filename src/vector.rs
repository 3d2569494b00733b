//! In-memory TF-IDF vector index over the chunk corpus.
//!
//! Holds a fitted vocabulary, an IDF vector, and one L2-normalized sparse
//! vector per chunk. Queries are vectorized against the fitted vocabulary
//! and ranked by cosine similarity. Per-item updates refit the whole
//! model; the corpus is small enough that this is the simplest correct
//! design. A failed refit leaves the previously fitted state intact.

use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::models::KnowledgeChunk;

/// Default result cap for [`TfidfModel::search_chunks`].
pub const DEFAULT_TOP_K: usize = 10;
/// Default similarity floor for [`TfidfModel::search_chunks`].
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.05;

/// Lowercase alphanumeric tokens. CJK runs additionally contribute
/// character bigrams so multi-script content stays searchable without a
/// segmenter.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let word = word.to_lowercase();
        if word.chars().any(is_cjk) {
            let chars: Vec<char> = word.chars().collect();
            tokens.push(word.clone());
            for pair in chars.windows(2) {
                tokens.push(pair.iter().collect());
            }
        } else {
            tokens.push(word);
        }
    }
    tokens
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'   // CJK unified ideographs
        | '\u{3040}'..='\u{30FF}' // hiragana + katakana
        | '\u{AC00}'..='\u{D7AF}' // hangul syllables
    )
}

struct ChunkVector {
    chunk: KnowledgeChunk,
    /// `(term id, weight)` sorted by term id, L2-normalized.
    terms: Vec<(usize, f32)>,
}

/// TF-IDF model over the current chunk corpus.
#[derive(Default)]
pub struct TfidfModel {
    vocab: HashMap<String, usize>,
    idf: Vec<f32>,
    rows: Vec<ChunkVector>,
    fitted: bool,
}

impl TfidfModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rebuild vocabulary, IDF, and all chunk vectors from `chunks`.
    ///
    /// An empty chunk set resets the model to unfitted. A corpus that
    /// yields no tokens at all is an error and leaves the previous fitted
    /// state untouched.
    pub fn fit_chunks(&mut self, chunks: Vec<KnowledgeChunk>) -> Result<()> {
        if chunks.is_empty() {
            self.vocab.clear();
            self.idf.clear();
            self.rows.clear();
            self.fitted = false;
            return Ok(());
        }

        // Chunks vectorize over "<heading> <content>".
        let token_lists: Vec<Vec<String>> = chunks
            .iter()
            .map(|c| tokenize(&format!("{} {}", c.heading, c.content)))
            .collect();

        let mut vocab: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: Vec<u32> = Vec::new();
        for tokens in &token_lists {
            let mut seen = std::collections::HashSet::new();
            for token in tokens {
                if !vocab.contains_key(token) {
                    vocab.insert(token.clone(), vocab.len());
                    doc_freq.push(0);
                }
                if seen.insert(token.as_str()) {
                    doc_freq[vocab[token]] += 1;
                }
            }
        }

        if vocab.is_empty() {
            bail!("chunk corpus produced an empty vocabulary");
        }

        let n = chunks.len() as f32;
        let idf: Vec<f32> = doc_freq
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0)
            .collect();

        let mut rows = Vec::with_capacity(chunks.len());
        for (chunk, tokens) in chunks.into_iter().zip(token_lists) {
            let terms = vectorize(&tokens, &vocab, &idf);
            rows.push(ChunkVector { chunk, terms });
        }

        self.vocab = vocab;
        self.idf = idf;
        self.rows = rows;
        self.fitted = true;
        Ok(())
    }

    /// Replace the rows belonging to `item_id` with `new_chunks`, then
    /// refit.
    pub fn update_chunks_for_item(
        &mut self,
        item_id: &str,
        new_chunks: Vec<KnowledgeChunk>,
    ) -> Result<()> {
        let mut chunks: Vec<KnowledgeChunk> = self
            .rows
            .iter()
            .filter(|row| row.chunk.item_id != item_id)
            .map(|row| row.chunk.clone())
            .collect();
        chunks.extend(new_chunks);
        self.fit_chunks(chunks)
    }

    /// Drop the rows belonging to `item_id` and refit.
    pub fn remove_chunks_for_item(&mut self, item_id: &str) -> Result<()> {
        let chunks: Vec<KnowledgeChunk> = self
            .rows
            .iter()
            .filter(|row| row.chunk.item_id != item_id)
            .map(|row| row.chunk.clone())
            .collect();
        self.fit_chunks(chunks)
    }

    /// Top-k chunks by cosine similarity to `query`, keeping only those at
    /// or above `min_similarity`. Ties break on ascending `chunk_id` so
    /// results are stable across runs.
    pub fn search_chunks(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f64,
    ) -> Vec<(KnowledgeChunk, f64)> {
        if !self.fitted || top_k == 0 {
            return Vec::new();
        }
        let query_vec = vectorize(&tokenize(query), &self.vocab, &self.idf);
        if query_vec.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(&ChunkVector, f64)> = self
            .rows
            .iter()
            .map(|row| (row, sparse_dot(&query_vec, &row.terms) as f64))
            .filter(|(_, sim)| *sim >= min_similarity)
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(row, sim)| (row.chunk.clone(), sim))
            .collect()
    }
}

/// TF-IDF weights for one token list, L2-normalized, sorted by term id.
/// Tokens outside the vocabulary are dropped.
fn vectorize(tokens: &[String], vocab: &HashMap<String, usize>, idf: &[f32]) -> Vec<(usize, f32)> {
    let mut counts: HashMap<usize, f32> = HashMap::new();
    for token in tokens {
        if let Some(&term) = vocab.get(token) {
            *counts.entry(term).or_insert(0.0) += 1.0;
        }
    }
    let mut terms: Vec<(usize, f32)> = counts
        .into_iter()
        .map(|(term, tf)| (term, tf * idf[term]))
        .collect();
    terms.sort_by_key(|(term, _)| *term);

    let norm: f32 = terms.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for (_, w) in &mut terms {
            *w /= norm;
        }
    }
    terms
}

/// Dot product of two normalized sparse vectors (cosine similarity).
fn sparse_dot(a: &[(usize, f32)], b: &[(usize, f32)]) -> f32 {
    let mut dot = 0.0f32;
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, item_id: &str, content: &str) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.to_string(),
            item_id: item_id.to_string(),
            chunk_index: 0,
            content: content.to_string(),
            heading: String::new(),
            start_position: 0,
            end_position: content.len(),
            metadata: Default::default(),
        }
    }

    fn fitted_model() -> TfidfModel {
        let mut model = TfidfModel::new();
        model
            .fit_chunks(vec![
                chunk("a", "item-1", "rust ownership borrowing lifetimes"),
                chunk("b", "item-1", "cargo workspace build profiles"),
                chunk("c", "item-2", "gardening tomatoes compost soil"),
            ])
            .unwrap();
        model
    }

    #[test]
    fn unfitted_model_returns_nothing() {
        let model = TfidfModel::new();
        assert!(!model.is_fitted());
        assert!(model.search_chunks("rust", 10, 0.0).is_empty());
    }

    #[test]
    fn search_ranks_relevant_chunk_first() {
        let model = fitted_model();
        let results = model.search_chunks("rust borrowing", 10, 0.0);
        assert!(!results.is_empty());
        assert_eq!(results[0].0.id, "a");
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn min_similarity_filters() {
        let model = fitted_model();
        let results = model.search_chunks("rust", 10, 0.99);
        assert!(results.is_empty());
    }

    #[test]
    fn top_k_truncates() {
        let mut model = TfidfModel::new();
        let chunks: Vec<KnowledgeChunk> = (0..10)
            .map(|i| chunk(&format!("c{}", i), "item", "same token everywhere"))
            .collect();
        model.fit_chunks(chunks).unwrap();

        let results = model.search_chunks("token", 3, 0.0);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn ties_break_on_chunk_id() {
        let mut model = TfidfModel::new();
        model
            .fit_chunks(vec![
                chunk("zeta", "item", "identical words"),
                chunk("alpha", "item", "identical words"),
                chunk("mid", "item", "identical words"),
            ])
            .unwrap();

        let results = model.search_chunks("identical", 10, 0.0);
        let ids: Vec<&str> = results.iter().map(|(c, _)| c.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn update_replaces_item_rows() {
        let mut model = fitted_model();
        model
            .update_chunks_for_item("item-1", vec![chunk("d", "item-1", "astronomy telescopes")])
            .unwrap();

        assert_eq!(model.len(), 2);
        assert!(model.search_chunks("rust", 10, 0.0).is_empty());
        assert_eq!(model.search_chunks("telescopes", 10, 0.0).len(), 1);
    }

    #[test]
    fn remove_last_item_unfits_model() {
        let mut model = TfidfModel::new();
        model
            .fit_chunks(vec![chunk("a", "only", "single document")])
            .unwrap();
        model.remove_chunks_for_item("only").unwrap();
        assert!(!model.is_fitted());
        assert!(model.is_empty());
    }

    #[test]
    fn failed_refit_retains_previous_model() {
        let mut model = fitted_model();
        // punctuation-only corpus tokenizes to nothing
        let err = model.fit_chunks(vec![chunk("x", "item-9", "!!! ??? ...")]);
        assert!(err.is_err());
        assert!(model.is_fitted());
        assert!(!model.search_chunks("rust ownership", 10, 0.0).is_empty());
    }

    #[test]
    fn query_with_unknown_terms_only_is_empty() {
        let model = fitted_model();
        assert!(model.search_chunks("zzzqqq", 10, 0.0).is_empty());
    }

    #[test]
    fn cjk_bigrams_match() {
        let mut model = TfidfModel::new();
        model
            .fit_chunks(vec![
                chunk("a", "item", "日本語の文書です"),
                chunk("b", "item", "english only text"),
            ])
            .unwrap();
        let results = model.search_chunks("日本語", 10, 0.0);
        assert!(!results.is_empty());
        assert_eq!(results[0].0.id, "a");
    }

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(tokenize("Hello, World-42!"), vec!["hello", "world", "42"]);
        assert!(tokenize("  \n\t ").is_empty());
    }
}
