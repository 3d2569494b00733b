//! Ingestion pipeline.
//!
//! One source flows extract → item upsert → chunk → store + index update.
//! Re-ingesting the same source path updates the existing item in place;
//! a SHA-256 content hash short-circuits the whole pipeline when nothing
//! changed. Directory import walks a tree with include/exclude globs and
//! ingests file by file, logging and skipping failures instead of
//! aborting the batch.

use std::path::Path;

use anyhow::{bail, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::context::CoreContext;
use crate::models::{DataSource, KnowledgeItem, SourceType};
use crate::store::content_hash;

/// Outcome counters for a directory import.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportStats {
    pub ingested: u64,
    pub unchanged: u64,
    pub failed: u64,
}

/// Ingest a single source. Returns the stored item (existing one when the
/// content hash shows nothing changed).
pub async fn collect(ctx: &CoreContext, source: DataSource) -> Result<KnowledgeItem> {
    let extracted = ctx.processors.extract(&source)?;

    // Same source path → update in place rather than duplicating.
    let existing_id = ctx.store.find_item_by_source_path(&source.path).await?;

    if let Some(ref item_id) = existing_id {
        let stored_hash = ctx.store.content_hash_for(item_id).await?;
        if stored_hash.as_deref() == Some(content_hash(&extracted.content).as_str()) {
            if let Some(item) = ctx.store.get_item(item_id).await? {
                tracing::debug!(item_id, "content unchanged, skipping re-ingest");
                return Ok(item);
            }
        }
    }

    let item = match existing_id {
        Some(item_id) => {
            let mut item = ctx
                .store
                .get_item(&item_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("item vanished during ingest: {}", item_id))?;
            item.title = extracted.title;
            item.content = extracted.content;
            item.metadata.extend(extracted.metadata);
            item.updated_at = Utc::now();
            item
        }
        None => {
            let mut item = KnowledgeItem::new(
                extracted.title,
                extracted.content,
                source.source_type,
                source.path.clone(),
            );
            item.metadata = extracted.metadata;
            for (key, value) in &source.metadata {
                if key != "title" {
                    item.metadata.insert(key.clone(), value.clone());
                }
            }
            item
        }
    };

    ctx.store.save_item(&item).await?;

    let mut chunks = ctx.search.chunker().chunk(&item.content, &item.title);
    for chunk in &mut chunks {
        chunk.item_id = item.id.clone();
    }
    ctx.search.on_item_upserted(&item, &chunks).await?;

    tracing::info!(item_id = %item.id, chunks = chunks.len(), "ingested {}", source.path);
    Ok(item)
}

/// Walk `root` and ingest every file matching the configured include
/// globs. Per-file failures are logged and counted, not propagated.
pub async fn import_dir(
    ctx: &CoreContext,
    root: &Path,
    source_type: SourceType,
) -> Result<ImportStats> {
    if !root.is_dir() {
        bail!("import root is not a directory: {}", root.display());
    }

    let include = build_globset(&ctx.config.import.include_globs)?;
    let mut exclude_patterns = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    exclude_patterns.extend(ctx.config.import.exclude_globs.clone());
    let exclude = build_globset(&exclude_patterns)?;

    let mut stats = ImportStats::default();
    let walker = WalkDir::new(root)
        .follow_links(ctx.config.import.follow_symlinks)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }

        let before_hash = match ctx.store.find_item_by_source_path(&path.to_string_lossy()).await? {
            Some(id) => ctx.store.content_hash_for(&id).await?,
            None => None,
        };

        let source = DataSource::new(path.to_string_lossy(), source_type);
        match collect(ctx, source).await {
            Ok(item) => {
                let after_hash = ctx.store.content_hash_for(&item.id).await?;
                if before_hash.is_some() && before_hash == after_hash {
                    stats.unchanged += 1;
                } else {
                    stats.ingested += 1;
                }
            }
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "import skipped file");
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
