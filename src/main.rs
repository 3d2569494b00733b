//! # mnemo CLI
//!
//! The `mnemo` binary drives the knowledge store: database initialization,
//! ingestion, search, item management, relationships, reindexing, and
//! statistics.
//!
//! ```bash
//! mnemo init                                # create database + indices
//! mnemo add notes/design.md                 # ingest one file
//! mnemo import ./notes                      # ingest a directory tree
//! mnemo search "context window budgeting"   # two-phase chunk search
//! mnemo get <id>                            # full item with chunks
//! mnemo reindex                             # rebuild all index projections
//! ```
//!
//! All commands accept a `--config` flag pointing to a TOML configuration
//! file; missing files fall back to defaults rooted at `./data`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemo::config;
use mnemo::context::CoreContext;
use mnemo::ingest;
use mnemo::models::{
    DataSource, Relationship, RelationshipType, SearchOptions, SortBy, SourceType,
};
use mnemo::stats;
use mnemo::store::ItemPatch;

#[derive(Parser)]
#[command(
    name = "mnemo",
    about = "Local-first personal knowledge store with chunk-aware hybrid search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mnemo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store and index directories. Idempotent.
    Init,

    /// Ingest a single file.
    Add {
        /// Path to the file.
        path: PathBuf,

        /// Source type: document or code (pdf/web need external extractors).
        #[arg(long, default_value = "document")]
        source_type: String,

        /// Title override (defaults to the first heading or the file name).
        #[arg(long)]
        title: Option<String>,

        /// Categories to attach.
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Tags to attach.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Ingest every matching file under a directory.
    Import {
        /// Root directory to walk.
        dir: PathBuf,

        /// Source type applied to all files.
        #[arg(long, default_value = "document")]
        source_type: String,
    },

    /// Search the knowledge base.
    Search {
        /// The query string.
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum relevance score in [0, 1].
        #[arg(long)]
        min_relevance: Option<f64>,

        /// Keep only items in these categories.
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Keep only items carrying these tags.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Keep only these source types.
        #[arg(long = "source-type")]
        source_types: Vec<String>,

        /// Sort order: relevance, date, or title.
        #[arg(long, default_value = "relevance")]
        sort: String,

        /// Partition results by first category name.
        #[arg(long)]
        group_by_category: bool,

        /// Include short highlight excerpts.
        #[arg(long)]
        highlights: bool,
    },

    /// Print a full item with its chunks.
    Get {
        /// Item id.
        id: String,
    },

    /// List items with optional category/tag filter and pagination.
    List {
        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Update an item's title, content, categories, or tags.
    Update {
        /// Item id.
        id: String,

        #[arg(long)]
        title: Option<String>,

        /// Read the new content from this file.
        #[arg(long)]
        content_file: Option<PathBuf>,

        /// Replace the category set.
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Replace the tag set.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Delete an item (cascades to chunks, links, relationships).
    Delete {
        /// Item id.
        id: String,
    },

    /// Create a directed relationship between two items.
    Link {
        source_id: String,
        target_id: String,

        /// references, related_to, part_of, or derived_from.
        #[arg(long = "type", default_value = "related_to")]
        relationship_type: String,

        #[arg(long, default_value_t = 1.0)]
        strength: f64,

        #[arg(long, default_value = "")]
        description: String,
    },

    /// Walk outgoing relationships from an item.
    Related {
        /// Item id.
        id: String,

        /// Maximum traversal depth.
        #[arg(long, default_value_t = 2)]
        depth: usize,
    },

    /// Rebuild both inverted indices and the vector model from the store.
    Reindex,

    /// Show store and index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;
    let ctx = CoreContext::init(cfg).await?;

    match cli.command {
        Commands::Init => {
            println!("Knowledge store initialized at {}", ctx.config.storage.path.display());
        }

        Commands::Add {
            path,
            source_type,
            title,
            categories,
            tags,
        } => {
            let source_type = SourceType::parse(&source_type)?;
            let mut source = DataSource::new(path.to_string_lossy(), source_type);
            if let Some(title) = title {
                source
                    .metadata
                    .insert("title".to_string(), serde_json::json!(title));
            }
            let item = ctx.ingest(source).await?;

            if !categories.is_empty() || !tags.is_empty() {
                let mut category_objs = Vec::new();
                for name in &categories {
                    category_objs.push(ctx.store.find_or_create_category(name).await?);
                }
                let mut tag_objs = Vec::new();
                for name in &tags {
                    tag_objs.push(ctx.store.find_or_create_tag(name).await?);
                }
                ctx.update_item(
                    &item.id,
                    ItemPatch {
                        categories: (!category_objs.is_empty()).then_some(category_objs),
                        tags: (!tag_objs.is_empty()).then_some(tag_objs),
                        ..Default::default()
                    },
                )
                .await?;
            }

            println!("added {}", item.id);
            println!("  title: {}", item.title);
            println!("  chunks: {}", ctx.store.get_chunks_for_item(&item.id).await?.len());
        }

        Commands::Import { dir, source_type } => {
            let source_type = SourceType::parse(&source_type)?;
            let stats = ingest::import_dir(&ctx, &dir, source_type).await?;
            println!("import {}", dir.display());
            println!("  ingested:  {}", stats.ingested);
            println!("  unchanged: {}", stats.unchanged);
            println!("  failed:    {}", stats.failed);
        }

        Commands::Search {
            query,
            limit,
            min_relevance,
            categories,
            tags,
            source_types,
            sort,
            group_by_category,
            highlights,
        } => {
            let options = SearchOptions {
                max_results: limit.unwrap_or(ctx.config.search.max_results),
                min_relevance: min_relevance.unwrap_or(ctx.config.search.min_relevance),
                include_categories: categories,
                include_tags: tags,
                include_source_types: source_types
                    .iter()
                    .map(|s| SourceType::parse(s))
                    .collect::<anyhow::Result<Vec<_>>>()?,
                sort_by: SortBy::parse(&sort)?,
                group_by_category,
                include_highlights: highlights,
                deadline: None,
            };

            let results = ctx.search_knowledge(&query, options).await?;
            if results.results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (i, result) in results.results.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {}",
                    i + 1,
                    result.relevance_score,
                    result.item.title
                );
                println!("    source: {} ({})", result.item.source_path, result.item.source_type.as_str());
                if let Some(best) = result.matched_chunks.first() {
                    let excerpt: String = best.content.chars().take(160).collect();
                    if !best.heading.is_empty() {
                        println!("    section: {}", best.heading);
                    }
                    println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
                }
                for highlight in &result.highlights {
                    println!("    … {}", highlight.replace('\n', " "));
                }
                println!(
                    "    chunks: {} matched, {} context",
                    result.matched_chunks.len(),
                    result.context_chunks.len()
                );
                println!("    id: {}", result.item.id);
                println!();
            }

            if let Some(grouped) = &results.grouped_by_category {
                println!("By category:");
                for (category, members) in grouped {
                    println!("  {} ({})", category, members.len());
                }
            }
        }

        Commands::Get { id } => {
            let Some(item) = ctx.store.get_item(&id).await? else {
                eprintln!("Error: item not found: {}", id);
                std::process::exit(1);
            };

            println!("--- Item ---");
            println!("id:           {}", item.id);
            println!("title:        {}", item.title);
            println!("source_type:  {}", item.source_type.as_str());
            println!("source_path:  {}", item.source_path);
            if !item.categories.is_empty() {
                let names: Vec<&str> = item.categories.iter().map(|c| c.name.as_str()).collect();
                println!("categories:   {}", names.join(", "));
            }
            if !item.tags.is_empty() {
                let names: Vec<&str> = item.tags.iter().map(|t| t.name.as_str()).collect();
                println!("tags:         {}", names.join(", "));
            }
            println!("created_at:   {}", item.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
            println!("updated_at:   {}", item.updated_at.format("%Y-%m-%dT%H:%M:%SZ"));
            println!();
            println!("--- Content ---");
            println!("{}", item.content);
            println!();

            let chunks = ctx.store.get_chunks_for_item(&id).await?;
            println!("--- Chunks ({}) ---", chunks.len());
            for chunk in &chunks {
                println!(
                    "[chunk {} @ {}..{}]{}",
                    chunk.chunk_index,
                    chunk.start_position,
                    chunk.end_position,
                    if chunk.heading.is_empty() {
                        String::new()
                    } else {
                        format!(" {}", chunk.heading)
                    }
                );
                println!("{}", chunk.content);
                println!();
            }
        }

        Commands::List {
            category,
            tag,
            limit,
            offset,
        } => {
            let items = ctx
                .store
                .query_items(category.as_deref(), tag.as_deref(), limit, offset)
                .await?;
            if items.is_empty() {
                println!("No items.");
                return Ok(());
            }
            for item in &items {
                let categories: Vec<&str> =
                    item.categories.iter().map(|c| c.name.as_str()).collect();
                println!(
                    "{}  {}  [{}]  {}",
                    item.id,
                    item.updated_at.format("%Y-%m-%d"),
                    categories.join(","),
                    item.title
                );
            }
        }

        Commands::Update {
            id,
            title,
            content_file,
            categories,
            tags,
        } => {
            let content = match content_file {
                Some(path) => Some(std::fs::read_to_string(&path)?),
                None => None,
            };
            let mut category_objs = Vec::new();
            for name in &categories {
                category_objs.push(ctx.store.find_or_create_category(name).await?);
            }
            let mut tag_objs = Vec::new();
            for name in &tags {
                tag_objs.push(ctx.store.find_or_create_tag(name).await?);
            }

            let patch = ItemPatch {
                title,
                content,
                categories: (!category_objs.is_empty()).then_some(category_objs),
                tags: (!tag_objs.is_empty()).then_some(tag_objs),
            };
            if ctx.update_item(&id, patch).await? {
                println!("updated {}", id);
            } else {
                eprintln!("Error: item not found: {}", id);
                std::process::exit(1);
            }
        }

        Commands::Delete { id } => {
            if ctx.delete_item(&id).await? {
                println!("deleted {}", id);
            } else {
                eprintln!("Error: item not found: {}", id);
                std::process::exit(1);
            }
        }

        Commands::Link {
            source_id,
            target_id,
            relationship_type,
            strength,
            description,
        } => {
            let relationship = Relationship {
                source_id: source_id.clone(),
                target_id: target_id.clone(),
                relationship_type: RelationshipType::parse(&relationship_type)?,
                strength,
                description,
            };
            ctx.store.save_relationship(&relationship).await?;
            println!("linked {} -> {}", source_id, target_id);
        }

        Commands::Related { id, depth } => {
            let related = ctx.store.walk_related(&id, depth).await?;
            if related.is_empty() {
                println!("No related items.");
                return Ok(());
            }
            for (item_id, hops) in &related {
                let title = ctx
                    .store
                    .get_item(item_id)
                    .await?
                    .map(|i| i.title)
                    .unwrap_or_else(|| "(missing)".to_string());
                println!("{}  (depth {})  {}", item_id, hops, title);
            }
        }

        Commands::Reindex => {
            ctx.rebuild_indexes().await?;
            println!(
                "reindexed: {} chunk docs, {} vector rows",
                ctx.search.chunk_index_docs(),
                ctx.search.vector_rows()
            );
        }

        Commands::Stats => {
            stats::run_stats(&ctx).await?;
        }
    }

    Ok(())
}
