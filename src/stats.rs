//! Knowledge-base statistics.
//!
//! Quick summary of what's stored and indexed: per-table counts, store
//! file size, and index coverage. Used by `mnemo stats` to confirm ingest
//! and reindex runs did what they claimed.

use anyhow::Result;

use crate::context::CoreContext;

pub async fn run_stats(ctx: &CoreContext) -> Result<()> {
    let stats = ctx.store.stats().await?;

    let db_size = std::fs::metadata(&ctx.config.storage.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("mnemo — knowledge base stats");
    println!("============================");
    println!();
    println!("  Store:          {}", ctx.config.storage.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Items:          {}", stats.items);
    println!("  Chunks:         {}", stats.chunks);
    println!("  Categories:     {}", stats.categories);
    println!("  Tags:           {}", stats.tags);
    println!("  Relationships:  {}", stats.relationships);
    println!();
    println!(
        "  Chunk index:    {} ({} docs)",
        if ctx.search.has_chunk_index() {
            "available"
        } else {
            "absent"
        },
        ctx.search.chunk_index_docs()
    );
    println!("  Vector rows:    {}", ctx.search.vector_rows());
    println!();

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
