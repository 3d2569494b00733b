//! # mnemo
//!
//! **A local-first personal knowledge store with chunk-aware hybrid
//! search.**
//!
//! mnemo ingests heterogeneous documents, splits them into semantically
//! coherent chunks, and maintains parallel keyword (inverted) and semantic
//! (TF-IDF) indices at chunk granularity. Queries run in two phases —
//! match chunks, then aggregate matches back into documents with bounded
//! context windows — under strict result-size budgets so responses never
//! overflow a downstream consumer's context window.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────────┐
//! │Processors │──▶│   Pipeline   │──▶│   SQLite store    │
//! │ doc/code  │   │ chunk+index  │   │ items + chunks    │
//! └───────────┘   └──────────────┘   └──┬─────────────┬──┘
//!                                       │             │
//!                         ┌─────────────┴──┐   ┌──────┴───────┐
//!                         │  chunk index   │   │ vector model │
//!                         │ (tantivy BM25) │   │   (TF-IDF)   │
//!                         └─────────┬──────┘   └──────┬───────┘
//!                                   └───── search ────┘
//! ```
//!
//! ## Data flow
//!
//! 1. A [`models::DataSource`] is dispatched to a registered
//!    [`processors::ContentExtractor`], producing extracted text + title.
//! 2. The **ingest pipeline** ([`ingest`]) upserts the
//!    [`models::KnowledgeItem`] and runs the [`chunker`] over its content.
//! 3. [`search::SearchCore::on_item_upserted`] persists the chunk set
//!    (delete-then-insert) and brings the inverted index, the vector
//!    model, and the legacy item-level index up to date.
//! 4. [`search::SearchCore::search`] answers queries: phase 1 merges
//!    keyword and semantic chunk hits (α = 0.6), phase 2 groups them by
//!    item and attaches adjacent-chunk context, then filters, sorts, and
//!    budget-truncates.
//! 5. When the chunk index is absent the search degrades to item-level
//!    keyword search, late (query-time) chunking, and finally raw snippet
//!    extraction.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Core data types: items, chunks, categories, tags, relationships, search results |
//! | [`config`] | TOML configuration with defaults and validation |
//! | [`db`] | SQLite pool (WAL, foreign keys on) |
//! | [`store`] | Relational store with cascade deletes and chunk persistence |
//! | [`chunker`] | Three-tier splitter: headings → paragraphs → sliding window |
//! | [`chunk_index`] | Persistent tantivy index over chunks (`chunks/`) |
//! | [`item_index`] | Legacy item-level tantivy index (`items/`), fallback search |
//! | [`vector`] | In-memory TF-IDF cosine model over chunks |
//! | [`search`] | Two-phase search, merging, budgeting, maintenance hooks |
//! | [`processors`] | `ContentExtractor` trait + per-source-type registry |
//! | [`ingest`] | Ingest pipeline and directory import |
//! | [`context`] | `CoreContext`: explicit startup wiring, update/delete orchestration |
//! | [`stats`] | Store and index statistics |

pub mod chunk_index;
pub mod chunker;
pub mod config;
pub mod context;
pub mod db;
pub mod ingest;
pub mod item_index;
pub mod models;
pub mod processors;
pub mod search;
pub mod stats;
pub mod store;
pub mod vector;
