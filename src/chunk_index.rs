//! Persistent inverted index over chunks.
//!
//! Lives in the `chunks/` subdirectory of the configured index root,
//! separate from the legacy item-level index (`items/`). Documents are
//! keyed by `chunk_id` and carry the owning `item_id` so an item's whole
//! posting set can be dropped in one delete. Scoring is tantivy's BM25
//! over the `heading` and `content` fields, the same analyzer at index and
//! query time.
//!
//! A corrupted or missing index is not an error the search path surfaces:
//! callers treat a failed [`ChunkIndex::open`] as "no chunk index" and fall
//! back to item-level search.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::models::KnowledgeChunk;

/// Default result cap for [`ChunkIndex::search_chunks`].
pub const DEFAULT_CHUNK_SEARCH_LIMIT: usize = 50;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// One keyword hit from the chunk index.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub item_id: String,
    pub chunk_index: i64,
    pub heading: String,
    /// Raw BM25 score; rescaled by the caller.
    pub score: f32,
}

pub struct ChunkIndex {
    dir: PathBuf,
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    f_chunk_id: Field,
    f_item_id: Field,
    f_chunk_index: Field,
    f_heading: Field,
    f_content: Field,
}

impl ChunkIndex {
    /// Open (or create) the chunk index under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating chunk index dir {}", dir.display()))?;

        let mut schema_builder = Schema::builder();
        let f_chunk_id = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let f_item_id = schema_builder.add_text_field("item_id", STRING | STORED);
        let f_chunk_index = schema_builder.add_i64_field("chunk_index", STORED);
        let f_heading = schema_builder.add_text_field("heading", TEXT | STORED);
        let f_content = schema_builder.add_text_field("content", TEXT | STORED);
        let schema = schema_builder.build();

        let mmap = MmapDirectory::open(dir)
            .with_context(|| format!("opening chunk index dir {}", dir.display()))?;
        let index = Index::open_or_create(mmap, schema).context("opening chunk index")?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            dir: dir.to_path_buf(),
            index,
            reader,
            writer: Mutex::new(writer),
            f_chunk_id,
            f_item_id,
            f_chunk_index,
            f_heading,
            f_content,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| anyhow!("chunk index writer lock poisoned"))
    }

    fn chunk_doc(&self, chunk: &KnowledgeChunk) -> TantivyDocument {
        doc!(
            self.f_chunk_id => chunk.id.as_str(),
            self.f_item_id => chunk.item_id.as_str(),
            self.f_chunk_index => chunk.chunk_index,
            self.f_heading => chunk.heading.as_str(),
            self.f_content => chunk.content.as_str(),
        )
    }

    /// Upsert a single chunk by `chunk_id`.
    pub fn add_chunk(&self, chunk: &KnowledgeChunk) -> Result<()> {
        self.add_chunks(std::slice::from_ref(chunk))
    }

    /// Upsert a batch of chunks in one commit.
    pub fn add_chunks(&self, chunks: &[KnowledgeChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer()?;
        for chunk in chunks {
            writer.delete_term(Term::from_field_text(self.f_chunk_id, &chunk.id));
            writer.add_document(self.chunk_doc(chunk))?;
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Drop every document belonging to `item_id`.
    pub fn remove_chunks_for_item(&self, item_id: &str) -> Result<()> {
        let mut writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.f_item_id, item_id));
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Wipe and repopulate the whole index.
    pub fn rebuild(&self, chunks: &[KnowledgeChunk]) -> Result<()> {
        let mut writer = self.writer()?;
        writer.delete_all_documents()?;
        for chunk in chunks {
            writer.add_document(self.chunk_doc(chunk))?;
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// BM25 search across `heading` + `content`, descending score, at most
    /// `limit` hits.
    pub fn search_chunks(&self, query: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let parser = QueryParser::for_index(&self.index, vec![self.f_heading, self.f_content]);
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            hits.push(ChunkHit {
                chunk_id: stored_text(&doc, self.f_chunk_id),
                item_id: stored_text(&doc, self.f_item_id),
                chunk_index: doc
                    .get_first(self.f_chunk_index)
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0),
                heading: stored_text(&doc, self.f_heading),
                score,
            });
        }
        Ok(hits)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// True iff the index directory is usable and holds at least one
    /// document.
    pub fn has_documents(&self) -> bool {
        self.num_docs() > 0
    }
}

fn stored_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(id: &str, item_id: &str, index: i64, heading: &str, content: &str) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.to_string(),
            item_id: item_id.to_string(),
            chunk_index: index,
            content: content.to_string(),
            heading: heading.to_string(),
            start_position: 0,
            end_position: content.len(),
            metadata: Default::default(),
        }
    }

    fn seed(index: &ChunkIndex) {
        index
            .add_chunks(&[
                chunk("c1", "item-a", 0, "Intro", "rust is a systems programming language"),
                chunk("c2", "item-a", 1, "Body", "cargo builds and tests rust crates"),
                chunk("c3", "item-b", 0, "", "python is used for machine learning"),
            ])
            .unwrap();
    }

    #[test]
    fn add_and_search() {
        let tmp = TempDir::new().unwrap();
        let index = ChunkIndex::open(tmp.path()).unwrap();
        seed(&index);

        let hits = index.search_chunks("rust", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.item_id == "item-a"));
        assert!(hits[0].score >= hits[1].score);

        let hits = index.search_chunks("machine learning", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c3");
        assert_eq!(hits[0].chunk_index, 0);
    }

    #[test]
    fn heading_matches_score() {
        let tmp = TempDir::new().unwrap();
        let index = ChunkIndex::open(tmp.path()).unwrap();
        seed(&index);

        let hits = index.search_chunks("Intro", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].heading, "Intro");
    }

    #[test]
    fn upsert_replaces_by_chunk_id() {
        let tmp = TempDir::new().unwrap();
        let index = ChunkIndex::open(tmp.path()).unwrap();
        seed(&index);

        index
            .add_chunk(&chunk("c3", "item-b", 0, "", "now about databases instead"))
            .unwrap();

        assert!(index.search_chunks("machine", 10).unwrap().is_empty());
        let hits = index.search_chunks("databases", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(index.num_docs(), 3);
    }

    #[test]
    fn remove_chunks_for_item_drops_all_postings() {
        let tmp = TempDir::new().unwrap();
        let index = ChunkIndex::open(tmp.path()).unwrap();
        seed(&index);

        index.remove_chunks_for_item("item-a").unwrap();

        assert!(index.search_chunks("rust", 10).unwrap().is_empty());
        assert_eq!(index.num_docs(), 1);
    }

    #[test]
    fn rebuild_wipes_and_repopulates() {
        let tmp = TempDir::new().unwrap();
        let index = ChunkIndex::open(tmp.path()).unwrap();
        seed(&index);

        index
            .rebuild(&[chunk("n1", "item-z", 0, "", "entirely new corpus")])
            .unwrap();

        assert_eq!(index.num_docs(), 1);
        assert!(index.search_chunks("rust", 10).unwrap().is_empty());
        assert_eq!(index.search_chunks("corpus", 10).unwrap().len(), 1);
    }

    #[test]
    fn limit_is_respected() {
        let tmp = TempDir::new().unwrap();
        let index = ChunkIndex::open(tmp.path()).unwrap();
        let chunks: Vec<KnowledgeChunk> = (0..20)
            .map(|i| chunk(&format!("c{}", i), "item", i, "", "repeated token text"))
            .collect();
        index.add_chunks(&chunks).unwrap();

        assert_eq!(index.search_chunks("repeated", 5).unwrap().len(), 5);
        assert!(index.search_chunks("repeated", 0).unwrap().is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let index = ChunkIndex::open(tmp.path()).unwrap();
            seed(&index);
            assert!(index.has_documents());
        }
        let reopened = ChunkIndex::open(tmp.path()).unwrap();
        assert!(reopened.has_documents());
        assert_eq!(reopened.search_chunks("rust", 10).unwrap().len(), 2);
    }

    #[test]
    fn empty_query_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        let index = ChunkIndex::open(tmp.path()).unwrap();
        seed(&index);
        assert!(index.search_chunks("   ", 10).unwrap().is_empty());
    }
}
