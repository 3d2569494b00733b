//! Explicit application context.
//!
//! One [`CoreContext`] is constructed at startup and threaded through
//! every operation; there is no hidden process-global state. It owns the
//! store, the processor table, and the search core, and hosts the
//! operations that have to keep store and indices in step (update,
//! delete, reindex).

use anyhow::{Context as _, Result};

use crate::config::Config;
use crate::chunker::Chunker;
use crate::ingest;
use crate::models::{DataSource, KnowledgeItem, SearchOptions, SearchResults};
use crate::processors::ProcessorRegistry;
use crate::search::SearchCore;
use crate::store::{ItemPatch, Store};

pub struct CoreContext {
    pub config: Config,
    pub store: Store,
    pub processors: ProcessorRegistry,
    pub search: SearchCore,
}

impl CoreContext {
    /// Open the store, the index directories, and refit the in-memory
    /// vector model from the stored chunk corpus.
    pub async fn init(config: Config) -> Result<Self> {
        let store = Store::open(&config.storage.path)
            .await
            .context("opening knowledge store")?;
        let chunker = Chunker::new(config.chunking.clone());
        let search = SearchCore::new(
            store.clone(),
            chunker,
            &config.index.dir,
            config.search.clone(),
            config.budgets.clone(),
        );
        search.warm_start().await?;

        Ok(Self {
            config,
            store,
            processors: ProcessorRegistry::with_builtins(),
            search,
        })
    }

    /// Ingest one source: extract, persist, chunk, index.
    pub async fn ingest(&self, source: DataSource) -> Result<KnowledgeItem> {
        ingest::collect(self, source).await
    }

    pub async fn search_knowledge(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<SearchResults> {
        self.search.search(query, options).await
    }

    /// Apply a partial update. A content change re-chunks the item and
    /// refreshes every index projection; other changes refresh only the
    /// item-level index. Returns `false` when the item does not exist.
    pub async fn update_item(&self, item_id: &str, patch: ItemPatch) -> Result<bool> {
        let content_changed = patch.content.is_some();
        if !self.store.update_item(item_id, patch).await? {
            return Ok(false);
        }

        let Some(item) = self.store.get_item(item_id).await? else {
            return Ok(false);
        };

        if content_changed {
            let mut chunks = self.search.chunker().chunk(&item.content, &item.title);
            for chunk in &mut chunks {
                chunk.item_id = item.id.clone();
            }
            self.search.on_item_upserted(&item, &chunks).await?;
        } else {
            self.search.refresh_item(&item);
        }
        Ok(true)
    }

    /// Delete an item: cascade in the store, then drop both index
    /// projections.
    pub async fn delete_item(&self, item_id: &str) -> Result<bool> {
        if !self.store.delete_item(item_id).await? {
            return Ok(false);
        }
        self.search.on_item_deleted(item_id).await;
        Ok(true)
    }

    /// Rebuild every index projection from the store.
    pub async fn rebuild_indexes(&self) -> Result<()> {
        self.search.rebuild_all().await
    }
}
