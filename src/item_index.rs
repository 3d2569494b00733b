//! Legacy item-level inverted index.
//!
//! Lives in the `items/` subdirectory next to the chunk index and answers
//! the fallback search when the chunk index is missing or returned
//! nothing. Titles are boosted over body content, mirroring how the
//! item-level schema ranked before chunk search existed.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::models::KnowledgeItem;

const WRITER_HEAP_BYTES: usize = 50_000_000;
const TITLE_BOOST: f32 = 2.0;

/// One keyword hit from the item index.
#[derive(Debug, Clone)]
pub struct ItemHit {
    pub item_id: String,
    pub score: f32,
}

pub struct ItemIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    f_id: Field,
    f_title: Field,
    f_content: Field,
    f_source_type: Field,
}

impl ItemIndex {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating item index dir {}", dir.display()))?;

        let mut schema_builder = Schema::builder();
        let f_id = schema_builder.add_text_field("id", STRING | STORED);
        let f_title = schema_builder.add_text_field("title", TEXT | STORED);
        let f_content = schema_builder.add_text_field("content", TEXT);
        let f_source_type = schema_builder.add_text_field("source_type", STRING | STORED);
        let schema = schema_builder.build();

        let mmap = MmapDirectory::open(dir)
            .with_context(|| format!("opening item index dir {}", dir.display()))?;
        let index = Index::open_or_create(mmap, schema).context("opening item index")?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            f_id,
            f_title,
            f_content,
            f_source_type,
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, IndexWriter>> {
        self.writer
            .lock()
            .map_err(|_| anyhow!("item index writer lock poisoned"))
    }

    /// Upsert an item by id.
    pub fn update_item(&self, item: &KnowledgeItem) -> Result<()> {
        let mut writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.f_id, &item.id));
        writer.add_document(doc!(
            self.f_id => item.id.as_str(),
            self.f_title => item.title.as_str(),
            self.f_content => item.content.as_str(),
            self.f_source_type => item.source_type.as_str(),
        ))?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    pub fn remove_item(&self, item_id: &str) -> Result<()> {
        let mut writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.f_id, item_id));
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    pub fn rebuild(&self, items: &[KnowledgeItem]) -> Result<()> {
        let mut writer = self.writer()?;
        writer.delete_all_documents()?;
        for item in items {
            writer.add_document(doc!(
                self.f_id => item.id.as_str(),
                self.f_title => item.title.as_str(),
                self.f_content => item.content.as_str(),
                self.f_source_type => item.source_type.as_str(),
            ))?;
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// BM25 over title (boosted) + content.
    pub fn search_items(&self, query: &str, limit: usize) -> Result<Vec<ItemHit>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut parser = QueryParser::for_index(&self.index, vec![self.f_title, self.f_content]);
        parser.set_field_boost(self.f_title, TITLE_BOOST);
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let item_id = doc
                .get_first(self.f_id)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            hits.push(ItemHit { item_id, score });
        }
        Ok(hits)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}
