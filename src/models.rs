//! Core data models for the knowledge store.
//!
//! These types represent the items, chunks, and search results that flow
//! through the ingestion and retrieval pipeline. The data lifecycle is:
//!
//! ```text
//! DataSource → extract() → KnowledgeItem → chunk() → KnowledgeChunk
//!                                                        ↓
//!                                       index (inverted + vector)
//!                                                        ↓
//!                                       search() → SearchResult
//! ```
//!
//! # Type Relationships
//!
//! - A **[`KnowledgeItem`]** is the document unit: extracted plain text
//!   plus title, source information, categories, and tags.
//! - A **[`KnowledgeChunk`]** is the search unit: a bounded contiguous
//!   extract of an item's content with heading and character offsets.
//! - A **[`SearchResult`]** pairs an item with its relevance score and the
//!   matched/context chunks the two-phase search selected for it.
//!
//! Free-form `metadata` maps use string keys and [`serde_json::Value`]
//! values (string, number, bool, list, nested map).

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form metadata attached to items and chunks.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Kind of source an item was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Document,
    Pdf,
    Code,
    Web,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Document => "document",
            SourceType::Pdf => "pdf",
            SourceType::Code => "code",
            SourceType::Web => "web",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "document" => Ok(SourceType::Document),
            "pdf" => Ok(SourceType::Pdf),
            "code" => Ok(SourceType::Code),
            "web" => Ok(SourceType::Web),
            other => bail!("unknown source type: '{}'", other),
        }
    }
}

/// A source to ingest: a path plus the declared source type and any
/// caller-supplied metadata (e.g. a title override).
#[derive(Debug, Clone)]
pub struct DataSource {
    pub path: String,
    pub source_type: SourceType,
    pub metadata: Metadata,
}

impl DataSource {
    pub fn new(path: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            path: path.into(),
            source_type,
            metadata: Metadata::new(),
        }
    }
}

/// The document unit stored in the `knowledge_items` table.
///
/// Invariants: `id` is globally unique; `updated_at >= created_at`; after
/// any content mutation the chunk set and both indices reflect the new
/// content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub title: String,
    /// Extracted plain text.
    pub content: String,
    pub source_type: SourceType,
    pub source_path: String,
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeItem {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        source_type: SourceType,
        source_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            source_type,
            source_path: source_path.into(),
            categories: Vec::new(),
            tags: Vec::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The search unit: a contiguous extract of an item's content.
///
/// For a given `item_id` the `chunk_index` values form a dense range
/// `[0, n)`; `end_position > start_position` and both are character
/// offsets into the owning item's original content. Late-chunking snippet
/// fallbacks are the one exception: they carry `chunk_index = -1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub item_id: String,
    pub chunk_index: i64,
    pub content: String,
    /// Section heading for this chunk, empty if none.
    pub heading: String,
    pub start_position: usize,
    pub end_position: usize,
    #[serde(default)]
    pub metadata: Metadata,
}

impl KnowledgeChunk {
    pub fn new(
        content: impl Into<String>,
        heading: impl Into<String>,
        chunk_index: i64,
        start_position: usize,
        end_position: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            item_id: String::new(),
            chunk_index,
            content: content.into(),
            heading: heading.into(),
            start_position,
            end_position,
            metadata: Metadata::new(),
        }
    }
}

/// A classification bucket, M:N to items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Category {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            parent_id: None,
            confidence: 1.0,
        }
    }
}

/// A label, M:N to items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub usage_count: i64,
}

impl Tag {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            color: String::new(),
            usage_count: 0,
        }
    }
}

/// Directed edge type between two items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    References,
    RelatedTo,
    PartOf,
    DerivedFrom,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::References => "references",
            RelationshipType::RelatedTo => "related_to",
            RelationshipType::PartOf => "part_of",
            RelationshipType::DerivedFrom => "derived_from",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "references" => Ok(RelationshipType::References),
            "related_to" => Ok(RelationshipType::RelatedTo),
            "part_of" => Ok(RelationshipType::PartOf),
            "derived_from" => Ok(RelationshipType::DerivedFrom),
            other => bail!("unknown relationship type: '{}'", other),
        }
    }
}

/// A directed, typed edge between two items. The graph may contain cycles;
/// traversals cap depth explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: RelationshipType,
    pub strength: f64,
    #[serde(default)]
    pub description: String,
}

/// A chunk selected by the search pipeline, either as a direct match or as
/// surrounding context.
#[derive(Debug, Clone, Serialize)]
pub struct MatchedChunk {
    pub chunk_id: String,
    pub content: String,
    pub heading: String,
    pub chunk_index: i64,
    pub start_position: usize,
    pub end_position: usize,
    pub score: f64,
}

impl MatchedChunk {
    pub fn from_chunk(chunk: &KnowledgeChunk, score: f64) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            content: chunk.content.clone(),
            heading: chunk.heading.clone(),
            chunk_index: chunk.chunk_index,
            start_position: chunk.start_position,
            end_position: chunk.end_position,
            score,
        }
    }
}

/// One search hit: the item plus the chunks that matched and their
/// immediate neighbors.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub item: KnowledgeItem,
    /// Combined relevance in `[0, 1]`.
    pub relevance_score: f64,
    pub matched_fields: Vec<String>,
    pub highlights: Vec<String>,
    pub matched_chunks: Vec<MatchedChunk>,
    pub context_chunks: Vec<MatchedChunk>,
}

/// Sort order for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Relevance,
    Date,
    Title,
}

impl SortBy {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "relevance" => Ok(SortBy::Relevance),
            "date" => Ok(SortBy::Date),
            "title" => Ok(SortBy::Title),
            other => bail!(
                "sort_by must be 'relevance', 'date', or 'title', got '{}'",
                other
            ),
        }
    }
}

/// Search configuration. `Default` gives the standard behavior.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_results: usize,
    pub min_relevance: f64,
    /// Keep only items carrying at least one of these category names.
    pub include_categories: Vec<String>,
    /// Keep only items carrying at least one of these tag names.
    pub include_tags: Vec<String>,
    pub include_source_types: Vec<SourceType>,
    pub sort_by: SortBy,
    pub group_by_category: bool,
    pub include_highlights: bool,
    /// Overall deadline propagated to the phase-1 sub-searches.
    pub deadline: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 50,
            min_relevance: 0.1,
            include_categories: Vec::new(),
            include_tags: Vec::new(),
            include_source_types: Vec::new(),
            sort_by: SortBy::Relevance,
            group_by_category: false,
            include_highlights: false,
            deadline: None,
        }
    }
}

impl SearchOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_results == 0 {
            bail!("max_results must be positive");
        }
        if !(0.0..=1.0).contains(&self.min_relevance) {
            bail!("min_relevance must be between 0.0 and 1.0");
        }
        Ok(())
    }
}

/// Container for one search invocation's output.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub total: usize,
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouped_by_category: Option<BTreeMap<String, Vec<SearchResult>>>,
}

impl SearchResults {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            total: 0,
            results: Vec::new(),
            grouped_by_category: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_round_trip() {
        for st in [
            SourceType::Document,
            SourceType::Pdf,
            SourceType::Code,
            SourceType::Web,
        ] {
            assert_eq!(SourceType::parse(st.as_str()).unwrap(), st);
        }
        assert!(SourceType::parse("zip").is_err());
    }

    #[test]
    fn chunk_serde_round_trip() {
        let mut chunk = KnowledgeChunk::new("body text", "Heading", 3, 10, 19);
        chunk.item_id = "item-1".to_string();
        chunk
            .metadata
            .insert("lang".to_string(), serde_json::json!("en"));

        let json = serde_json::to_string(&chunk).unwrap();
        let back: KnowledgeChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn item_timestamps_start_equal() {
        let item = KnowledgeItem::new("T", "c", SourceType::Document, "/tmp/t.txt");
        assert_eq!(item.created_at, item.updated_at);
    }

    #[test]
    fn search_options_validation() {
        let mut opts = SearchOptions::default();
        assert!(opts.validate().is_ok());

        opts.max_results = 0;
        assert!(opts.validate().is_err());

        opts.max_results = 10;
        opts.min_relevance = 1.5;
        assert!(opts.validate().is_err());
    }
}
