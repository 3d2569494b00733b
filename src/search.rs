//! Two-phase chunk-aware search.
//!
//! Phase 1 retrieves chunks from the keyword (inverted) and semantic
//! (TF-IDF) indices in parallel and merges them into one scored set. Phase
//! 2 groups the surviving chunks by item, loads the owning items, and
//! attaches a bounded context window (adjacent chunks) to every match.
//! Results are filtered, sorted, and cut down to hard character budgets so
//! a single response can never overflow a downstream context window.
//!
//! Degradation order when things are missing or broken:
//! chunk search → item-level fallback search → late (on-demand) chunking →
//! raw snippet extraction. None of these transitions surface an error.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use crate::chunk_index::{ChunkHit, ChunkIndex};
use crate::chunker::Chunker;
use crate::config::{BudgetConfig, SearchConfig};
use crate::item_index::ItemIndex;
use crate::models::{
    KnowledgeChunk, KnowledgeItem, MatchedChunk, SearchOptions, SearchResult, SearchResults,
    SortBy,
};
use crate::store::Store;
use crate::vector::{self, TfidfModel, DEFAULT_MIN_SIMILARITY};

/// Per-chunk content cap in returned results.
pub const MAX_CHUNK_CONTENT_SIZE: usize = 1500;
/// Cap on `matched_chunks` per result.
pub const MAX_MATCHED_CHUNKS: usize = 5;
/// Cap on `context_chunks` per result.
pub const MAX_CONTEXT_CHUNKS: usize = 3;
/// Per-result running content cap.
pub const MAX_RESULT_CONTENT_SIZE: usize = 30_000;
/// Whole-response running content cap.
pub const MAX_TOTAL_CONTENT_SIZE: usize = 100_000;
/// The item's own `content` field is cut to this length.
pub const CONTENT_TRUNCATION_THRESHOLD: usize = 2000;

/// Matched chunks kept per item before aggregation.
pub const MAX_MATCHED_CHUNKS_PER_ITEM: usize = 5;
/// Context chunks kept per item before aggregation.
pub const MAX_CONTEXT_CHUNKS_PER_ITEM: usize = 3;

/// Items longer than this with no chunk rows get chunked at query time.
pub const LATE_CHUNK_THRESHOLD: usize = 2000;
/// Half-width of a snippet window around a query-term occurrence.
pub const SNIPPET_RADIUS: usize = 750;

/// Keyword weight α in the phase-1 merge; semantic weight is `1 − α`.
const KEYWORD_WEIGHT: f64 = 0.6;
/// How many chunks each phase-1 sub-search fetches.
const PHASE1_LIMIT: usize = crate::chunk_index::DEFAULT_CHUNK_SEARCH_LIMIT;

const HIGHLIGHT_RADIUS: usize = 60;
const MAX_HIGHLIGHTS: usize = 3;

/// A chunk surviving the phase-1 merge.
#[derive(Debug, Clone)]
struct ScoredChunk {
    chunk_id: String,
    item_id: String,
    /// Combined score in `[0, 1]`.
    score: f64,
    from_keyword: bool,
    from_semantic: bool,
}

/// The search orchestrator. Owns the chunker, both inverted indices, and
/// the vector model; the relational store is shared.
///
/// Cheap to clone: index handles are `Arc`s and the store wraps a pool.
#[derive(Clone)]
pub struct SearchCore {
    store: Store,
    chunker: Chunker,
    chunk_index: Option<Arc<ChunkIndex>>,
    item_index: Option<Arc<ItemIndex>>,
    vector: Arc<RwLock<TfidfModel>>,
    search_config: SearchConfig,
    budgets: BudgetConfig,
}

impl SearchCore {
    /// Open both index directories under `index_dir`. A directory that
    /// fails to open (missing, corrupted) demotes that index to absent;
    /// search then takes the corresponding fallback path.
    pub fn new(
        store: Store,
        chunker: Chunker,
        index_dir: &Path,
        search_config: SearchConfig,
        budgets: BudgetConfig,
    ) -> Self {
        let chunk_index = match ChunkIndex::open(&index_dir.join("chunks")) {
            Ok(index) => Some(Arc::new(index)),
            Err(error) => {
                tracing::warn!(%error, "chunk index unavailable, falling back to item search");
                None
            }
        };
        let item_index = match ItemIndex::open(&index_dir.join("items")) {
            Ok(index) => Some(Arc::new(index)),
            Err(error) => {
                tracing::warn!(%error, "item index unavailable");
                None
            }
        };

        Self {
            store,
            chunker,
            chunk_index,
            item_index,
            vector: Arc::new(RwLock::new(TfidfModel::new())),
            search_config,
            budgets,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// The vector index lives in memory only; refit it from the store at
    /// startup.
    pub async fn warm_start(&self) -> Result<()> {
        let chunks = self.store.load_all_chunks().await?;
        if chunks.is_empty() {
            return Ok(());
        }
        let mut model = match self.vector.write() {
            Ok(model) => model,
            Err(_) => return Ok(()),
        };
        if let Err(error) = model.fit_chunks(chunks) {
            tracing::warn!(%error, "vector model warm start failed");
        }
        Ok(())
    }

    /// True iff the chunk index directory is usable and holds at least one
    /// document.
    pub fn has_chunk_index(&self) -> bool {
        self.chunk_index
            .as_ref()
            .map(|index| index.has_documents())
            .unwrap_or(false)
    }

    /// Documents currently in the chunk index (0 when absent).
    pub fn chunk_index_docs(&self) -> u64 {
        self.chunk_index
            .as_ref()
            .map(|index| index.num_docs())
            .unwrap_or(0)
    }

    /// Rows currently held by the vector model.
    pub fn vector_rows(&self) -> usize {
        self.vector.read().map(|model| model.len()).unwrap_or(0)
    }

    /// Refresh the item-level index entry for an item whose content did
    /// not change (title/category/tag edits).
    pub fn refresh_item(&self, item: &KnowledgeItem) {
        if let Some(index) = &self.item_index {
            if let Err(error) = index.update_item(item) {
                tracing::warn!(%error, item_id = %item.id, "item index refresh failed");
            }
        }
    }

    // ============ search ============

    /// Execute a search. Invalid options are the only error surfaced to
    /// callers; index trouble degrades silently through the fallback
    /// ladder.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResults> {
        options.validate()?;
        if query.trim().is_empty() {
            return Ok(SearchResults::empty(query));
        }

        let phase1 = if self.has_chunk_index() {
            self.chunk_phase(query, options.deadline).await
        } else {
            None
        };

        let raw = match phase1 {
            Some(results) => results,
            None => self.fallback_phase(query, &options).await?,
        };

        let mut results = apply_options(raw, &options);
        self.late_chunk_results(&mut results, query).await;
        let results = self.enforce_budgets(results);

        let grouped_by_category = if options.group_by_category || self.search_config.result_grouping
        {
            Some(group_by_category(&results))
        } else {
            None
        };

        Ok(SearchResults {
            query: query.to_string(),
            total: results.len(),
            results,
            grouped_by_category,
        })
    }

    /// Phase 1 + phase 2. `None` means "no usable chunk hits" and sends the
    /// caller down the fallback path.
    async fn chunk_phase(
        &self,
        query: &str,
        deadline: Option<Duration>,
    ) -> Option<Vec<SearchResult>> {
        let (keyword_hits, semantic_hits) = match self.run_phase1(query, deadline).await {
            Ok(hits) => hits,
            Err(error) => {
                tracing::warn!(%error, "phase-1 chunk retrieval failed");
                return None;
            }
        };

        let scored = merge_phase1(&keyword_hits, &semantic_hits);
        if scored.is_empty() {
            return None;
        }

        match self.aggregate(scored, query).await {
            Ok(results) => Some(results),
            Err(error) => {
                tracing::warn!(%error, "chunk aggregation failed");
                None
            }
        }
    }

    /// Run the two phase-1 sub-searches on worker threads and join. They
    /// are independent reads; the join cancels both on deadline expiry.
    async fn run_phase1(
        &self,
        query: &str,
        deadline: Option<Duration>,
    ) -> Result<(Vec<ChunkHit>, Vec<(KnowledgeChunk, f64)>)> {
        let keyword_task = {
            let index = self.chunk_index.clone();
            let enabled = self.search_config.enable_keyword;
            let query = query.to_string();
            tokio::task::spawn_blocking(move || match (enabled, index) {
                (true, Some(index)) => index.search_chunks(&query, PHASE1_LIMIT),
                _ => Ok(Vec::new()),
            })
        };
        let semantic_task = {
            let vector = self.vector.clone();
            let enabled = self.search_config.enable_semantic;
            let query = query.to_string();
            tokio::task::spawn_blocking(move || {
                if !enabled {
                    return Vec::new();
                }
                match vector.read() {
                    Ok(model) => model.search_chunks(&query, PHASE1_LIMIT, DEFAULT_MIN_SIMILARITY),
                    Err(_) => Vec::new(),
                }
            })
        };

        let join = async { tokio::join!(keyword_task, semantic_task) };
        let (keyword_joined, semantic_joined) = match deadline {
            Some(deadline) => tokio::time::timeout(deadline, join).await?,
            None => join.await,
        };

        let keyword_hits = match keyword_joined {
            Ok(Ok(hits)) => hits,
            Ok(Err(error)) => {
                tracing::warn!(%error, "keyword chunk search failed");
                Vec::new()
            }
            Err(error) => {
                tracing::warn!(%error, "keyword search task failed");
                Vec::new()
            }
        };
        let semantic_hits = match semantic_joined {
            Ok(hits) => hits,
            Err(error) => {
                tracing::warn!(%error, "semantic search task failed");
                Vec::new()
            }
        };

        Ok((keyword_hits, semantic_hits))
    }

    /// Phase 2: group scored chunks by item, load items, attach matched and
    /// context chunks.
    async fn aggregate(&self, scored: Vec<ScoredChunk>, query: &str) -> Result<Vec<SearchResult>> {
        let mut per_item: BTreeMap<String, Vec<ScoredChunk>> = BTreeMap::new();
        for hit in scored {
            per_item.entry(hit.item_id.clone()).or_default().push(hit);
        }

        let mut results = Vec::new();
        for (item_id, mut hits) in per_item {
            let Some(item) = self.store.get_item(&item_id).await? else {
                // stale index entry; the row is gone
                continue;
            };

            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.chunk_id.cmp(&b.chunk_id))
            });

            let relevance_score = hits
                .first()
                .map(|h| h.score.min(1.0))
                .unwrap_or(0.0);

            let mut matched_fields: BTreeSet<&'static str> = BTreeSet::new();
            let mut matched_chunks = Vec::new();
            for hit in hits.iter().take(MAX_MATCHED_CHUNKS_PER_ITEM) {
                let Some(chunk) = self.store.get_chunk_by_id(&hit.chunk_id).await? else {
                    continue;
                };
                if hit.from_keyword {
                    matched_fields.insert("heading");
                    matched_fields.insert("content");
                }
                if hit.from_semantic {
                    matched_fields.insert("semantic");
                }
                matched_chunks.push(MatchedChunk::from_chunk(&chunk, hit.score));
            }

            // Context: neighbors of each matched chunk, deduplicated across
            // the item, capped.
            let matched_ids: HashSet<String> =
                matched_chunks.iter().map(|c| c.chunk_id.clone()).collect();
            let mut context_ids: HashSet<String> = HashSet::new();
            let mut context_chunks = Vec::new();
            'outer: for matched in &matched_chunks {
                if context_chunks.len() >= MAX_CONTEXT_CHUNKS_PER_ITEM {
                    break;
                }
                let adjacent = self
                    .store
                    .get_adjacent_chunks(&item.id, matched.chunk_index)
                    .await?;
                for neighbor in adjacent {
                    if matched_ids.contains(&neighbor.id) || !context_ids.insert(neighbor.id.clone())
                    {
                        continue;
                    }
                    context_chunks.push(MatchedChunk::from_chunk(&neighbor, 0.0));
                    if context_chunks.len() >= MAX_CONTEXT_CHUNKS_PER_ITEM {
                        break 'outer;
                    }
                }
            }

            let highlights = if self.highlights_enabled() {
                build_highlights(query, &matched_chunks)
            } else {
                Vec::new()
            };

            results.push(SearchResult {
                item,
                relevance_score,
                matched_fields: matched_fields.iter().map(|s| s.to_string()).collect(),
                highlights,
                matched_chunks,
                context_chunks,
            });
        }
        Ok(results)
    }

    fn highlights_enabled(&self) -> bool {
        self.search_config.highlight_matches
    }

    /// Item-level search against the legacy item index. Results come back
    /// with empty chunk lists; late chunking fills them in afterwards.
    async fn fallback_phase(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let Some(item_index) = &self.item_index else {
            return Ok(Vec::new());
        };
        if !self.search_config.enable_keyword {
            return Ok(Vec::new());
        }

        let hits = match item_index.search_items(query, options.max_results.saturating_mul(2)) {
            Ok(hits) => hits,
            Err(error) => {
                tracing::warn!(%error, "item-level fallback search failed");
                return Ok(Vec::new());
            }
        };
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let max_score = hits
            .iter()
            .map(|h| h.score)
            .fold(f32::MIN, f32::max)
            .max(f32::EPSILON);

        let mut results = Vec::new();
        for hit in hits {
            let Some(item) = self.store.get_item(&hit.item_id).await? else {
                continue;
            };
            results.push(SearchResult {
                item,
                relevance_score: (hit.score / max_score).clamp(0.0, 1.0) as f64,
                matched_fields: vec!["title".to_string(), "content".to_string()],
                highlights: Vec::new(),
                matched_chunks: Vec::new(),
                context_chunks: Vec::new(),
            });
        }
        Ok(results)
    }

    // ============ late chunking ============

    /// For any result that carries no matched chunks but has substantial
    /// content, chunk it now, persist the chunks, bring both indices up to
    /// date, and select matching chunks locally. If chunking fails, fall
    /// back to snippet extraction around query-term occurrences.
    async fn late_chunk_results(&self, results: &mut [SearchResult], query: &str) {
        for result in results.iter_mut() {
            if !result.matched_chunks.is_empty()
                || result.item.content.len() <= LATE_CHUNK_THRESHOLD
            {
                continue;
            }
            self.late_chunk_one(result, query).await;
        }
    }

    async fn late_chunk_one(&self, result: &mut SearchResult, query: &str) {
        let item = &result.item;
        match self.chunker.try_chunk(&item.content, &item.title) {
            Ok(chunks) if !chunks.is_empty() => {
                let mut chunks = chunks;
                for chunk in &mut chunks {
                    chunk.item_id = item.id.clone();
                }

                if let Err(error) = self.store.save_chunks(&item.id, &chunks).await {
                    tracing::warn!(%error, item_id = %item.id, "late chunk persist failed");
                }
                if let Some(index) = &self.chunk_index {
                    if let Err(error) = index
                        .remove_chunks_for_item(&item.id)
                        .and_then(|_| index.add_chunks(&chunks))
                    {
                        tracing::warn!(%error, item_id = %item.id, "late chunk indexing failed");
                    }
                }
                if let Ok(mut model) = self.vector.write() {
                    if let Err(error) =
                        model.update_chunks_for_item(&item.id, chunks.clone())
                    {
                        tracing::warn!(%error, item_id = %item.id, "late chunk vector refit failed");
                    }
                }

                let tokens = vector::tokenize(query);
                let score = result.relevance_score;
                result.matched_chunks = chunks
                    .iter()
                    .filter(|chunk| {
                        let content = chunk.content.to_lowercase();
                        tokens.iter().any(|t| content.contains(t.as_str()))
                    })
                    .take(MAX_MATCHED_CHUNKS)
                    .map(|chunk| MatchedChunk::from_chunk(chunk, score))
                    .collect();

                if result.matched_chunks.is_empty() {
                    result.matched_chunks = extract_snippets(&result.item.content, query);
                }
            }
            _ => {
                result.matched_chunks = extract_snippets(&result.item.content, query);
            }
        }
    }

    // ============ budgets ============

    /// Hard result-size budgeting. Truncation is silent; the partial result
    /// set is returned, never an error.
    fn enforce_budgets(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let budgets = &self.budgets;
        let mut total = 0usize;
        let mut out = Vec::new();

        for mut result in results {
            truncate_chars(&mut result.item.content, CONTENT_TRUNCATION_THRESHOLD);
            result.matched_chunks.truncate(budgets.max_matched_chunks);
            result.context_chunks.truncate(budgets.max_context_chunks);
            for chunk in result
                .matched_chunks
                .iter_mut()
                .chain(result.context_chunks.iter_mut())
            {
                truncate_chars(&mut chunk.content, budgets.max_chunk_content_size);
            }

            // Per-result running size: item content plus chunks, stopping
            // before the result would exceed its cap.
            let mut result_size = result.item.content.len();
            let mut kept_matched = Vec::new();
            for chunk in result.matched_chunks.drain(..) {
                if result_size + chunk.content.len() > budgets.max_result_content_size {
                    break;
                }
                result_size += chunk.content.len();
                kept_matched.push(chunk);
            }
            result.matched_chunks = kept_matched;
            let mut kept_context = Vec::new();
            for chunk in result.context_chunks.drain(..) {
                if result_size + chunk.content.len() > budgets.max_result_content_size {
                    break;
                }
                result_size += chunk.content.len();
                kept_context.push(chunk);
            }
            result.context_chunks = kept_context;

            if total + result_size > budgets.max_total_content_size {
                break;
            }
            total += result_size;
            out.push(result);
        }
        out
    }

    // ============ maintenance hooks ============

    /// Persist an item's chunk set and bring every projection up to date.
    ///
    /// The store write is the one failure that propagates (the caller may
    /// retry it); index failures are logged and skipped so the system stays
    /// partially available. `rebuild_all` is the recovery path.
    pub async fn on_item_upserted(
        &self,
        item: &KnowledgeItem,
        chunks: &[KnowledgeChunk],
    ) -> Result<()> {
        self.store.save_chunks(&item.id, chunks).await?;

        if let Some(index) = &self.chunk_index {
            if let Err(error) = index
                .remove_chunks_for_item(&item.id)
                .and_then(|_| index.add_chunks(chunks))
            {
                tracing::warn!(%error, item_id = %item.id, "chunk index update failed");
            }
        }
        if let Ok(mut model) = self.vector.write() {
            if let Err(error) = model.update_chunks_for_item(&item.id, chunks.to_vec()) {
                tracing::warn!(%error, item_id = %item.id, "vector refit failed, keeping previous model");
            }
        }
        if let Some(index) = &self.item_index {
            if let Err(error) = index.update_item(item) {
                tracing::warn!(%error, item_id = %item.id, "item index update failed");
            }
        }
        Ok(())
    }

    /// Remove an item's projections from both indices. The store's cascade
    /// delete handles the rows themselves.
    pub async fn on_item_deleted(&self, item_id: &str) {
        if let Some(index) = &self.chunk_index {
            if let Err(error) = index.remove_chunks_for_item(item_id) {
                tracing::warn!(%error, item_id, "chunk index removal failed");
            }
        }
        if let Ok(mut model) = self.vector.write() {
            if let Err(error) = model.remove_chunks_for_item(item_id) {
                tracing::warn!(%error, item_id, "vector removal refit failed");
            }
        }
        if let Some(index) = &self.item_index {
            if let Err(error) = index.remove_item(item_id) {
                tracing::warn!(%error, item_id, "item index removal failed");
            }
        }
    }

    /// Reload every chunk from the store and rebuild all projections.
    pub async fn rebuild_all(&self) -> Result<()> {
        let chunks = self.store.load_all_chunks().await?;
        if let Some(index) = &self.chunk_index {
            index.rebuild(&chunks)?;
        }
        if let Ok(mut model) = self.vector.write() {
            if let Err(error) = model.fit_chunks(chunks) {
                tracing::warn!(%error, "vector rebuild failed, keeping previous model");
            }
        }
        if let Some(index) = &self.item_index {
            let items = self.store.get_all_items().await?;
            index.rebuild(&items)?;
        }
        Ok(())
    }
}

// ============ phase-1 merge ============

/// Merge keyword and semantic hits by `chunk_id`. Keyword scores are
/// rescaled to `[0, 1]` by the phase maximum; the combined score is
/// `α·kw + (1−α)·sem` with chunks present in only one source keeping that
/// source's weighted share. The per-item matched cap applies here, before
/// aggregation.
fn merge_phase1(
    keyword_hits: &[ChunkHit],
    semantic_hits: &[(KnowledgeChunk, f64)],
) -> Vec<ScoredChunk> {
    let max_keyword = keyword_hits
        .iter()
        .map(|h| h.score as f64)
        .fold(0.0f64, f64::max);

    let mut merged: HashMap<String, ScoredChunk> = HashMap::new();
    for hit in keyword_hits {
        let normalized = if max_keyword > 0.0 {
            (hit.score as f64) / max_keyword
        } else {
            0.0
        };
        merged.insert(
            hit.chunk_id.clone(),
            ScoredChunk {
                chunk_id: hit.chunk_id.clone(),
                item_id: hit.item_id.clone(),
                score: KEYWORD_WEIGHT * normalized,
                from_keyword: true,
                from_semantic: false,
            },
        );
    }
    for (chunk, similarity) in semantic_hits {
        let weighted = (1.0 - KEYWORD_WEIGHT) * similarity;
        merged
            .entry(chunk.id.clone())
            .and_modify(|existing| {
                existing.score += weighted;
                existing.from_semantic = true;
            })
            .or_insert_with(|| ScoredChunk {
                chunk_id: chunk.id.clone(),
                item_id: chunk.item_id.clone(),
                score: weighted,
                from_keyword: false,
                from_semantic: true,
            });
    }

    // Cap matched chunks per item before aggregation.
    let mut per_item: HashMap<String, Vec<ScoredChunk>> = HashMap::new();
    for (_, hit) in merged {
        per_item.entry(hit.item_id.clone()).or_default().push(hit);
    }
    let mut out = Vec::new();
    for (_, mut hits) in per_item {
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(MAX_MATCHED_CHUNKS_PER_ITEM);
        out.extend(hits);
    }
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    out
}

// ============ result processing ============

/// Filter, sort, and cut results per the caller's options.
fn apply_options(mut results: Vec<SearchResult>, options: &SearchOptions) -> Vec<SearchResult> {
    if !options.include_categories.is_empty() {
        results.retain(|r| {
            r.item
                .categories
                .iter()
                .any(|c| options.include_categories.contains(&c.name))
        });
    }
    if !options.include_tags.is_empty() {
        results.retain(|r| {
            r.item
                .tags
                .iter()
                .any(|t| options.include_tags.contains(&t.name))
        });
    }
    if !options.include_source_types.is_empty() {
        results.retain(|r| options.include_source_types.contains(&r.item.source_type));
    }
    results.retain(|r| r.relevance_score >= options.min_relevance);

    sort_results(&mut results, options.sort_by);
    results.truncate(options.max_results);
    results
}

fn sort_results(results: &mut [SearchResult], sort_by: SortBy) {
    match sort_by {
        SortBy::Relevance => results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.item.updated_at.cmp(&a.item.updated_at))
                .then_with(|| a.item.id.cmp(&b.item.id))
        }),
        SortBy::Date => results.sort_by(|a, b| {
            b.item
                .updated_at
                .cmp(&a.item.updated_at)
                .then_with(|| a.item.id.cmp(&b.item.id))
        }),
        SortBy::Title => results.sort_by(|a, b| {
            a.item
                .title
                .to_lowercase()
                .cmp(&b.item.title.to_lowercase())
                .then_with(|| a.item.id.cmp(&b.item.id))
        }),
    }
}

/// Partition results by their first category name; uncategorized items go
/// under "Uncategorized".
fn group_by_category(results: &[SearchResult]) -> BTreeMap<String, Vec<SearchResult>> {
    let mut grouped: BTreeMap<String, Vec<SearchResult>> = BTreeMap::new();
    for result in results {
        let key = result
            .item
            .categories
            .first()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "Uncategorized".to_string());
        grouped.entry(key).or_default().push(result.clone());
    }
    grouped
}

// ============ snippets & highlights ============

/// Snippet extraction for items whose chunking failed outright: a window
/// of ±[`SNIPPET_RADIUS`] characters around the first occurrence of each
/// query token, overlapping windows merged, emitted as synthetic chunks
/// with `chunk_index = -1`.
fn extract_snippets(content: &str, query: &str) -> Vec<MatchedChunk> {
    let mut windows: Vec<(usize, usize)> = Vec::new();
    for token in vector::tokenize(query) {
        let Some(pos) = find_case_insensitive(content, &token) else {
            continue;
        };
        let start = floor_char_boundary(content, pos.saturating_sub(SNIPPET_RADIUS));
        let end = floor_char_boundary(
            content,
            (pos + token.len() + SNIPPET_RADIUS).min(content.len()),
        );
        if end > start {
            windows.push((start, end));
        }
    }
    if windows.is_empty() {
        return Vec::new();
    }

    windows.sort_by_key(|(start, _)| *start);
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in windows {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = (*last_end).max(end),
            _ => merged.push((start, end)),
        }
    }

    merged
        .into_iter()
        .take(MAX_MATCHED_CHUNKS)
        .map(|(start, end)| MatchedChunk {
            chunk_id: Uuid::new_v4().to_string(),
            content: content[start..end].to_string(),
            heading: String::new(),
            chunk_index: -1,
            start_position: start,
            end_position: end,
            score: 0.0,
        })
        .collect()
}

/// Short excerpts around query-term occurrences in matched chunks.
fn build_highlights(query: &str, matched_chunks: &[MatchedChunk]) -> Vec<String> {
    let mut highlights = Vec::new();
    for token in vector::tokenize(query) {
        if highlights.len() >= MAX_HIGHLIGHTS {
            break;
        }
        for chunk in matched_chunks {
            let Some(pos) = find_case_insensitive(&chunk.content, &token) else {
                continue;
            };
            let start = floor_char_boundary(&chunk.content, pos.saturating_sub(HIGHLIGHT_RADIUS));
            let end = floor_char_boundary(
                &chunk.content,
                (pos + token.len() + HIGHLIGHT_RADIUS).min(chunk.content.len()),
            );
            highlights.push(chunk.content[start..end].trim().to_string());
            break;
        }
    }
    highlights
}

/// Byte offset of `needle` in `haystack`, case-insensitively. Offsets from
/// the lowercased copy are only trusted when lowercasing preserved length.
fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    if let Some(pos) = haystack.find(needle) {
        return Some(pos);
    }
    let lower = haystack.to_lowercase();
    if lower.len() == haystack.len() {
        lower.find(needle).map(|p| floor_char_boundary(haystack, p))
    } else {
        None
    }
}

fn truncate_chars(text: &mut String, max_len: usize) {
    if text.len() > max_len {
        let cut = floor_char_boundary(text, max_len);
        text.truncate(cut);
    }
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
