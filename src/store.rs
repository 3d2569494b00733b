//! SQLite-backed store for items, chunks, categories, tags, and
//! relationships.
//!
//! Single-writer, transactional. Cascade deletes are enforced by the
//! database itself (foreign keys are enabled at connection time in
//! [`crate::db::connect`]); deleting an item removes its chunks, its
//! category/tag links, and every relationship touching it. The chunk
//! projections held by the search indices are the caller's responsibility
//! to keep in sync after `save_chunks` / `delete_item`.
//!
//! # Schema
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `knowledge_items` | document unit: extracted text + source metadata |
//! | `knowledge_chunks` | search unit: chunk text, heading, offsets |
//! | `categories` / `tags` | auxiliary entities, M:N via link tables |
//! | `item_categories` / `item_tags` | link tables, cascade on both sides |
//! | `relationships` | directed typed edges between items |

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::models::{
    Category, KnowledgeChunk, KnowledgeItem, Metadata, Relationship, RelationshipType, SourceType,
    Tag,
};

/// Batch size used when streaming the full chunk corpus for index rebuilds.
const CHUNK_LOAD_BATCH: i64 = 500;

/// Partial update for [`Store::update_item`]. `None` fields are left alone.
#[derive(Debug, Default, Clone)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub categories: Option<Vec<Category>>,
    pub tags: Option<Vec<Tag>>,
}

/// COUNT aggregates per table.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub items: i64,
    pub chunks: i64,
    pub categories: i64,
    pub tags: i64,
    pub relationships: i64,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the store file and run schema migration.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_items (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                source_type TEXT NOT NULL,
                source_path TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_chunks (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                heading TEXT NOT NULL DEFAULT '',
                start_position INTEGER NOT NULL,
                end_position INTEGER NOT NULL,
                metadata TEXT,
                FOREIGN KEY (item_id) REFERENCES knowledge_items (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_item_id ON knowledge_chunks (item_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_item_chunk \
             ON knowledge_chunks (item_id, chunk_index)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                parent_id TEXT,
                confidence REAL NOT NULL DEFAULT 1.0,
                FOREIGN KEY (parent_id) REFERENCES categories (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                color TEXT NOT NULL DEFAULT '',
                usage_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS item_categories (
                item_id TEXT NOT NULL,
                category_id TEXT NOT NULL,
                PRIMARY KEY (item_id, category_id),
                FOREIGN KEY (item_id) REFERENCES knowledge_items (id) ON DELETE CASCADE,
                FOREIGN KEY (category_id) REFERENCES categories (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS item_tags (
                item_id TEXT NOT NULL,
                tag_id TEXT NOT NULL,
                PRIMARY KEY (item_id, tag_id),
                FOREIGN KEY (item_id) REFERENCES knowledge_items (id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relationships (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                relationship_type TEXT NOT NULL,
                strength REAL NOT NULL DEFAULT 1.0,
                description TEXT,
                PRIMARY KEY (source_id, target_id, relationship_type),
                FOREIGN KEY (source_id) REFERENCES knowledge_items (id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES knowledge_items (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============ items ============

    /// Insert or replace an item and its category/tag links.
    pub async fn save_item(&self, item: &KnowledgeItem) -> Result<()> {
        let metadata = serde_json::to_string(&item.metadata)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO knowledge_items
                (id, title, content, source_type, source_path, metadata,
                 content_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                source_type = excluded.source_type,
                source_path = excluded.source_path,
                metadata = excluded.metadata,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.content)
        .bind(item.source_type.as_str())
        .bind(&item.source_path)
        .bind(&metadata)
        .bind(content_hash(&item.content))
        .bind(item.created_at.timestamp())
        .bind(item.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM item_categories WHERE item_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM item_tags WHERE item_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;

        for category in &item.categories {
            upsert_category(&mut tx, category).await?;
            sqlx::query("INSERT OR IGNORE INTO item_categories (item_id, category_id) VALUES (?, ?)")
                .bind(&item.id)
                .bind(&category.id)
                .execute(&mut *tx)
                .await?;
        }
        for tag in &item.tags {
            upsert_tag(&mut tx, tag).await?;
            sqlx::query("INSERT OR IGNORE INTO item_tags (item_id, tag_id) VALUES (?, ?)")
                .bind(&item.id)
                .bind(&tag.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::debug!(item_id = %item.id, "saved knowledge item");
        Ok(())
    }

    /// Stored content hash for an item, used to skip re-chunking unchanged
    /// content on re-ingest.
    pub async fn content_hash_for(&self, item_id: &str) -> Result<Option<String>> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM knowledge_items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash)
    }

    /// Look up an existing item by its source path, if any.
    pub async fn find_item_by_source_path(&self, source_path: &str) -> Result<Option<String>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM knowledge_items WHERE source_path = ?")
                .bind(source_path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    pub async fn get_item(&self, item_id: &str) -> Result<Option<KnowledgeItem>> {
        let row = sqlx::query("SELECT * FROM knowledge_items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let categories = self.categories_for_item(item_id).await?;
        let tags = self.tags_for_item(item_id).await?;
        Ok(Some(item_from_row(&row, categories, tags)?))
    }

    async fn categories_for_item(&self, item_id: &str) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            r#"
            SELECT c.* FROM categories c
            JOIN item_categories ic ON c.id = ic.category_id
            WHERE ic.item_id = ?
            ORDER BY c.name
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(category_from_row).collect()
    }

    async fn tags_for_item(&self, item_id: &str) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM tags t
            JOIN item_tags it ON t.id = it.tag_id
            WHERE it.item_id = ?
            ORDER BY t.name
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tag_from_row).collect()
    }

    /// All items with categories and tags attached, assembled from at most
    /// three statements (items + category map + tag map).
    pub async fn get_all_items(&self) -> Result<Vec<KnowledgeItem>> {
        let rows = sqlx::query("SELECT * FROM knowledge_items ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let cat_rows = sqlx::query(
            r#"
            SELECT ic.item_id AS link_item_id, c.*
            FROM item_categories ic
            JOIN categories c ON ic.category_id = c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut categories_map: HashMap<String, Vec<Category>> = HashMap::new();
        for row in &cat_rows {
            let item_id: String = row.get("link_item_id");
            categories_map
                .entry(item_id)
                .or_default()
                .push(category_from_row(row)?);
        }

        let tag_rows = sqlx::query(
            r#"
            SELECT it.item_id AS link_item_id, t.*
            FROM item_tags it
            JOIN tags t ON it.tag_id = t.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut tags_map: HashMap<String, Vec<Tag>> = HashMap::new();
        for row in &tag_rows {
            let item_id: String = row.get("link_item_id");
            tags_map
                .entry(item_id)
                .or_default()
                .push(tag_from_row(row)?);
        }

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let categories = categories_map.remove(&id).unwrap_or_default();
            let tags = tags_map.remove(&id).unwrap_or_default();
            items.push(item_from_row(row, categories, tags)?);
        }
        Ok(items)
    }

    /// Filter + paginate at the database layer.
    ///
    /// `category`/`tag` filter by exact name. Pagination bounds are checked
    /// up front; a non-positive limit or negative offset is an error the
    /// caller sees.
    pub async fn query_items(
        &self,
        category: Option<&str>,
        tag: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<KnowledgeItem>> {
        if limit <= 0 {
            bail!("limit must be positive, got {}", limit);
        }
        if offset < 0 {
            bail!("offset must not be negative, got {}", offset);
        }

        let mut sql = String::from("SELECT DISTINCT ki.* FROM knowledge_items ki");
        if category.is_some() {
            sql.push_str(
                " JOIN item_categories ic ON ki.id = ic.item_id \
                  JOIN categories c ON ic.category_id = c.id",
            );
        }
        if tag.is_some() {
            sql.push_str(
                " JOIN item_tags it ON ki.id = it.item_id \
                  JOIN tags t ON it.tag_id = t.id",
            );
        }
        let mut conditions = Vec::new();
        if category.is_some() {
            conditions.push("c.name = ?");
        }
        if tag.is_some() {
            conditions.push("t.name = ?");
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY ki.updated_at DESC, ki.id LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(category) = category {
            query = query.bind(category);
        }
        if let Some(tag) = tag {
            query = query.bind(tag);
        }
        let rows = query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let categories = self.categories_for_item(&id).await?;
            let tags = self.tags_for_item(&id).await?;
            items.push(item_from_row(row, categories, tags)?);
        }
        Ok(items)
    }

    /// Apply a partial update. Bumps `updated_at`. Returns `false` when the
    /// item does not exist.
    pub async fn update_item(&self, item_id: &str, patch: ItemPatch) -> Result<bool> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM knowledge_items WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_none() {
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp();

        if let Some(ref title) = patch.title {
            sqlx::query("UPDATE knowledge_items SET title = ? WHERE id = ?")
                .bind(title)
                .bind(item_id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(ref content) = patch.content {
            sqlx::query("UPDATE knowledge_items SET content = ?, content_hash = ? WHERE id = ?")
                .bind(content)
                .bind(content_hash(content))
                .bind(item_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "UPDATE knowledge_items SET updated_at = MAX(updated_at, ?) WHERE id = ?",
        )
        .bind(now)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        if let Some(categories) = patch.categories {
            sqlx::query("DELETE FROM item_categories WHERE item_id = ?")
                .bind(item_id)
                .execute(&mut *tx)
                .await?;
            for category in &categories {
                upsert_category(&mut tx, category).await?;
                sqlx::query(
                    "INSERT OR IGNORE INTO item_categories (item_id, category_id) VALUES (?, ?)",
                )
                .bind(item_id)
                .bind(&category.id)
                .execute(&mut *tx)
                .await?;
            }
        }
        if let Some(tags) = patch.tags {
            sqlx::query("DELETE FROM item_tags WHERE item_id = ?")
                .bind(item_id)
                .execute(&mut *tx)
                .await?;
            for tag in &tags {
                upsert_tag(&mut tx, tag).await?;
                sqlx::query("INSERT OR IGNORE INTO item_tags (item_id, tag_id) VALUES (?, ?)")
                    .bind(item_id)
                    .bind(&tag.id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Delete an item. Chunks, links, and relationships go with it via
    /// cascade. Returns `false` when nothing was deleted.
    pub async fn delete_item(&self, item_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM knowledge_items WHERE id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ============ chunks ============

    /// Atomic delete-then-insert of an item's chunk set. No differential
    /// diffing: the new set fully replaces the old one.
    pub async fn save_chunks(&self, item_id: &str, chunks: &[KnowledgeChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM knowledge_chunks WHERE item_id = ?")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let metadata = if chunk.metadata.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&chunk.metadata)?)
            };
            sqlx::query(
                r#"
                INSERT INTO knowledge_chunks
                    (id, item_id, chunk_index, content, heading,
                     start_position, end_position, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(item_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.heading)
            .bind(chunk.start_position as i64)
            .bind(chunk.end_position as i64)
            .bind(metadata)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(item_id, count = chunks.len(), "saved chunks");
        Ok(())
    }

    pub async fn get_chunks_for_item(&self, item_id: &str) -> Result<Vec<KnowledgeChunk>> {
        let rows = sqlx::query(
            "SELECT * FROM knowledge_chunks WHERE item_id = ? ORDER BY chunk_index",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    pub async fn get_chunk_by_id(&self, chunk_id: &str) -> Result<Option<KnowledgeChunk>> {
        let row = sqlx::query("SELECT * FROM knowledge_chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(chunk_from_row).transpose()
    }

    /// Chunks at `chunk_index ± 1` for the given item (0, 1, or 2 rows).
    pub async fn get_adjacent_chunks(
        &self,
        item_id: &str,
        chunk_index: i64,
    ) -> Result<Vec<KnowledgeChunk>> {
        let rows = sqlx::query(
            "SELECT * FROM knowledge_chunks \
             WHERE item_id = ? AND chunk_index IN (?, ?) \
             ORDER BY chunk_index",
        )
        .bind(item_id)
        .bind(chunk_index - 1)
        .bind(chunk_index + 1)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    /// Load the entire chunk corpus in batches (for index rebuilds).
    pub async fn load_all_chunks(&self) -> Result<Vec<KnowledgeChunk>> {
        let mut all = Vec::new();
        let mut offset: i64 = 0;
        loop {
            let rows = sqlx::query(
                "SELECT * FROM knowledge_chunks ORDER BY item_id, chunk_index LIMIT ? OFFSET ?",
            )
            .bind(CHUNK_LOAD_BATCH)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
            if rows.is_empty() {
                break;
            }
            offset += rows.len() as i64;
            for row in &rows {
                all.push(chunk_from_row(row)?);
            }
        }
        Ok(all)
    }

    // ============ categories / tags ============

    pub async fn find_or_create_category(&self, name: &str) -> Result<Category> {
        let row = sqlx::query("SELECT * FROM categories WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return category_from_row(&row);
        }

        let category = Category::named(name);
        sqlx::query(
            "INSERT INTO categories (id, name, description, parent_id, confidence) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.parent_id)
        .bind(category.confidence)
        .execute(&self.pool)
        .await?;
        Ok(category)
    }

    pub async fn find_or_create_tag(&self, name: &str) -> Result<Tag> {
        let row = sqlx::query("SELECT * FROM tags WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return tag_from_row(&row);
        }

        let tag = Tag::named(name);
        sqlx::query("INSERT INTO tags (id, name, color, usage_count) VALUES (?, ?, ?, ?)")
            .bind(&tag.id)
            .bind(&tag.name)
            .bind(&tag.color)
            .bind(tag.usage_count)
            .execute(&self.pool)
            .await?;
        Ok(tag)
    }

    // ============ relationships ============

    pub async fn save_relationship(&self, rel: &Relationship) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO relationships
                (source_id, target_id, relationship_type, strength, description)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rel.source_id)
        .bind(&rel.target_id)
        .bind(rel.relationship_type.as_str())
        .bind(rel.strength)
        .bind(&rel.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All edges touching the item, in either direction.
    pub async fn relationships_for_item(&self, item_id: &str) -> Result<Vec<Relationship>> {
        let rows = sqlx::query(
            "SELECT * FROM relationships WHERE source_id = ? OR target_id = ? \
             ORDER BY source_id, target_id, relationship_type",
        )
        .bind(item_id)
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(relationship_from_row).collect()
    }

    /// Breadth-first walk of outgoing edges, at most `max_depth` hops out.
    /// The graph may contain cycles; each item is visited once. Returns
    /// `(item_id, depth)` pairs, excluding the start item.
    pub async fn walk_related(
        &self,
        item_id: &str,
        max_depth: usize,
    ) -> Result<Vec<(String, usize)>> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(item_id.to_string());
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((item_id.to_string(), 0));
        let mut found = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let targets: Vec<String> =
                sqlx::query_scalar("SELECT target_id FROM relationships WHERE source_id = ?")
                    .bind(&current)
                    .fetch_all(&self.pool)
                    .await?;
            for target in targets {
                if visited.insert(target.clone()) {
                    found.push((target.clone(), depth + 1));
                    queue.push_back((target, depth + 1));
                }
            }
        }
        Ok(found)
    }

    // ============ stats ============

    pub async fn stats(&self) -> Result<StoreStats> {
        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_items")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks")
            .fetch_one(&self.pool)
            .await?;
        let categories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
            .fetch_one(&self.pool)
            .await?;
        let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(&self.pool)
            .await?;
        let relationships: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreStats {
            items,
            chunks,
            categories,
            tags,
            relationships,
        })
    }
}

/// SHA-256 hex digest of item content, for unchanged-content detection.
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============ row mapping ============

fn item_from_row(
    row: &SqliteRow,
    categories: Vec<Category>,
    tags: Vec<Tag>,
) -> Result<KnowledgeItem> {
    let metadata_json: String = row.get("metadata");
    let metadata: Metadata =
        serde_json::from_str(&metadata_json).unwrap_or_default();
    let source_type: String = row.get("source_type");

    Ok(KnowledgeItem {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        source_type: SourceType::parse(&source_type)
            .with_context(|| format!("corrupt source_type column: {}", source_type))?,
        source_path: row.get("source_path"),
        categories,
        tags,
        metadata,
        created_at: ts_to_datetime(row.get("created_at")),
        updated_at: ts_to_datetime(row.get("updated_at")),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<KnowledgeChunk> {
    let metadata_json: Option<String> = row.get("metadata");
    let metadata: Metadata = metadata_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?
        .unwrap_or_default();

    Ok(KnowledgeChunk {
        id: row.get("id"),
        item_id: row.get("item_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        heading: row.get("heading"),
        start_position: row.get::<i64, _>("start_position") as usize,
        end_position: row.get::<i64, _>("end_position") as usize,
        metadata,
    })
}

fn category_from_row(row: &SqliteRow) -> Result<Category> {
    Ok(Category {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        parent_id: row.get("parent_id"),
        confidence: row.get("confidence"),
    })
}

fn tag_from_row(row: &SqliteRow) -> Result<Tag> {
    Ok(Tag {
        id: row.get("id"),
        name: row.get("name"),
        color: row.get("color"),
        usage_count: row.get("usage_count"),
    })
}

fn relationship_from_row(row: &SqliteRow) -> Result<Relationship> {
    let rel_type: String = row.get("relationship_type");
    let description: Option<String> = row.get("description");
    Ok(Relationship {
        source_id: row.get("source_id"),
        target_id: row.get("target_id"),
        relationship_type: RelationshipType::parse(&rel_type)?,
        strength: row.get("strength"),
        description: description.unwrap_or_default(),
    })
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

async fn upsert_category(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    category: &Category,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO categories (id, name, description, parent_id, confidence) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&category.id)
    .bind(&category.name)
    .bind(&category.description)
    .bind(&category.parent_id)
    .bind(category.confidence)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_tag(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, tag: &Tag) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO tags (id, name, color, usage_count) VALUES (?, ?, ?, ?)",
    )
    .bind(&tag.id)
    .bind(&tag.name)
    .bind(&tag.color)
    .bind(tag.usage_count)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KnowledgeItem, SourceType};
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(&tmp.path().join("test.sqlite")).await.unwrap();
        (tmp, store)
    }

    fn item_with_chunks(content: &str) -> (KnowledgeItem, Vec<KnowledgeChunk>) {
        let item = KnowledgeItem::new("Title", content, SourceType::Document, "/tmp/a.txt");
        let mid = content.len() / 2;
        let mut chunks = vec![
            KnowledgeChunk::new(&content[..mid], "", 0, 0, mid),
            KnowledgeChunk::new(&content[mid..], "", 1, mid, content.len()),
        ];
        for c in &mut chunks {
            c.item_id = item.id.clone();
        }
        (item, chunks)
    }

    #[tokio::test]
    async fn save_and_get_item_round_trip() {
        let (_tmp, store) = open_store().await;
        let mut item =
            KnowledgeItem::new("Notes", "Some content", SourceType::Code, "/src/lib.rs");
        item.categories.push(Category::named("rust"));
        item.tags.push(Tag::named("wip"));
        item.metadata
            .insert("lines".to_string(), serde_json::json!(42));

        store.save_item(&item).await.unwrap();
        let loaded = store.get_item(&item.id).await.unwrap().unwrap();

        assert_eq!(loaded.title, "Notes");
        assert_eq!(loaded.source_type, SourceType::Code);
        assert_eq!(loaded.categories.len(), 1);
        assert_eq!(loaded.categories[0].name, "rust");
        assert_eq!(loaded.tags[0].name, "wip");
        assert_eq!(loaded.metadata["lines"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn get_missing_item_returns_none() {
        let (_tmp, store) = open_store().await;
        assert!(store.get_item("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_chunks_replaces_existing_set() {
        let (_tmp, store) = open_store().await;
        let (item, chunks) = item_with_chunks("alpha beta gamma delta");
        store.save_item(&item).await.unwrap();
        store.save_chunks(&item.id, &chunks).await.unwrap();

        let mut replacement = vec![KnowledgeChunk::new("whole body", "", 0, 0, 10)];
        replacement[0].item_id = item.id.clone();
        store.save_chunks(&item.id, &replacement).await.unwrap();

        let loaded = store.get_chunks_for_item(&item.id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "whole body");
    }

    #[tokio::test]
    async fn chunks_come_back_ordered_by_index() {
        let (_tmp, store) = open_store().await;
        let item = KnowledgeItem::new("T", "abcdef", SourceType::Document, "/tmp/x");
        store.save_item(&item).await.unwrap();

        // insert out of order
        let mut chunks = vec![
            KnowledgeChunk::new("c", "", 2, 4, 6),
            KnowledgeChunk::new("a", "", 0, 0, 2),
            KnowledgeChunk::new("b", "", 1, 2, 4),
        ];
        for c in &mut chunks {
            c.item_id = item.id.clone();
        }
        store.save_chunks(&item.id, &chunks).await.unwrap();

        let loaded = store.get_chunks_for_item(&item.id).await.unwrap();
        let indices: Vec<i64> = loaded.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn adjacent_chunks_at_boundaries() {
        let (_tmp, store) = open_store().await;
        let item = KnowledgeItem::new("T", "abcdef", SourceType::Document, "/tmp/x");
        store.save_item(&item).await.unwrap();
        let mut chunks: Vec<KnowledgeChunk> = (0..4)
            .map(|i| KnowledgeChunk::new(format!("chunk {}", i), "", i, i as usize, i as usize + 1))
            .collect();
        for c in &mut chunks {
            c.item_id = item.id.clone();
        }
        store.save_chunks(&item.id, &chunks).await.unwrap();

        let middle = store.get_adjacent_chunks(&item.id, 2).await.unwrap();
        assert_eq!(
            middle.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![1, 3]
        );

        let first = store.get_adjacent_chunks(&item.id, 0).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].chunk_index, 1);

        let last = store.get_adjacent_chunks(&item.id, 3).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].chunk_index, 2);
    }

    #[tokio::test]
    async fn delete_cascades_to_chunks_and_links() {
        let (_tmp, store) = open_store().await;
        let (mut item, chunks) = item_with_chunks("cascade test content here");
        item.categories.push(Category::named("cat"));
        item.tags.push(Tag::named("tag"));
        store.save_item(&item).await.unwrap();
        store.save_chunks(&item.id, &chunks).await.unwrap();

        let other = KnowledgeItem::new("Other", "other", SourceType::Document, "/tmp/o");
        store.save_item(&other).await.unwrap();
        store
            .save_relationship(&Relationship {
                source_id: item.id.clone(),
                target_id: other.id.clone(),
                relationship_type: RelationshipType::RelatedTo,
                strength: 0.8,
                description: String::new(),
            })
            .await
            .unwrap();

        assert!(store.delete_item(&item.id).await.unwrap());

        // FK enforcement must actually cascade: chunks, links, and edges gone.
        assert!(store.get_chunks_for_item(&item.id).await.unwrap().is_empty());
        let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_categories")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(links, 0);
        assert!(store
            .relationships_for_item(&other.id)
            .await
            .unwrap()
            .is_empty());

        // second delete reports nothing removed
        assert!(!store.delete_item(&item.id).await.unwrap());
    }

    #[tokio::test]
    async fn update_item_bumps_updated_at_and_replaces_links() {
        let (_tmp, store) = open_store().await;
        let mut item = KnowledgeItem::new("Old", "old content", SourceType::Document, "/tmp/u");
        item.created_at = item.created_at - chrono::Duration::seconds(10);
        item.updated_at = item.created_at;
        store.save_item(&item).await.unwrap();

        let updated = store
            .update_item(
                &item.id,
                ItemPatch {
                    title: Some("New".to_string()),
                    content: Some("new content".to_string()),
                    categories: Some(vec![Category::named("fresh")]),
                    tags: None,
                },
            )
            .await
            .unwrap();
        assert!(updated);

        let loaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "New");
        assert_eq!(loaded.content, "new content");
        assert_eq!(loaded.categories[0].name, "fresh");
        assert!(loaded.updated_at >= loaded.created_at);
        assert!(loaded.updated_at > item.updated_at);

        assert!(!store
            .update_item("missing", ItemPatch::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn query_items_filters_and_paginates() {
        let (_tmp, store) = open_store().await;
        for i in 0..5 {
            let mut item = KnowledgeItem::new(
                format!("Item {}", i),
                "content",
                SourceType::Document,
                format!("/tmp/{}", i),
            );
            if i % 2 == 0 {
                item.categories.push(Category::named("even"));
            }
            store.save_item(&item).await.unwrap();
        }

        let even = store
            .query_items(Some("even"), None, 10, 0)
            .await
            .unwrap();
        assert_eq!(even.len(), 3);

        let page = store.query_items(None, None, 2, 2).await.unwrap();
        assert_eq!(page.len(), 2);

        assert!(store.query_items(None, None, 0, 0).await.is_err());
        assert!(store.query_items(None, None, 10, -1).await.is_err());
    }

    #[tokio::test]
    async fn get_all_items_is_eager() {
        let (_tmp, store) = open_store().await;
        for i in 0..3 {
            let mut item = KnowledgeItem::new(
                format!("I{}", i),
                "c",
                SourceType::Document,
                format!("/tmp/{}", i),
            );
            item.tags.push(Tag::named(format!("t{}", i)));
            store.save_item(&item).await.unwrap();
        }
        let all = store.get_all_items().await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|i| i.tags.len() == 1));
    }

    #[tokio::test]
    async fn walk_related_caps_depth_and_survives_cycles() {
        let (_tmp, store) = open_store().await;
        let ids: Vec<String> = {
            let mut ids = Vec::new();
            for i in 0..4 {
                let item = KnowledgeItem::new(
                    format!("N{}", i),
                    "c",
                    SourceType::Document,
                    format!("/tmp/n{}", i),
                );
                ids.push(item.id.clone());
                store.save_item(&item).await.unwrap();
            }
            ids
        };
        // chain 0 → 1 → 2 → 3 with a back-edge 2 → 0
        for (s, t) in [(0, 1), (1, 2), (2, 3), (2, 0)] {
            store
                .save_relationship(&Relationship {
                    source_id: ids[s].clone(),
                    target_id: ids[t].clone(),
                    relationship_type: RelationshipType::References,
                    strength: 1.0,
                    description: String::new(),
                })
                .await
                .unwrap();
        }

        let within_two = store.walk_related(&ids[0], 2).await.unwrap();
        let found: HashSet<&str> = within_two.iter().map(|(id, _)| id.as_str()).collect();
        assert!(found.contains(ids[1].as_str()));
        assert!(found.contains(ids[2].as_str()));
        assert!(!found.contains(ids[3].as_str()));

        let all = store.walk_related(&ids[0], 10).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let (_tmp, store) = open_store().await;
        let a = store.find_or_create_category("notes").await.unwrap();
        let b = store.find_or_create_category("notes").await.unwrap();
        assert_eq!(a.id, b.id);

        let t1 = store.find_or_create_tag("todo").await.unwrap();
        let t2 = store.find_or_create_tag("todo").await.unwrap();
        assert_eq!(t1.id, t2.id);
    }

    #[tokio::test]
    async fn stats_counts_tables() {
        let (_tmp, store) = open_store().await;
        let (item, chunks) = item_with_chunks("stat content for counting");
        store.save_item(&item).await.unwrap();
        store.save_chunks(&item.id, &chunks).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.items, 1);
        assert_eq!(stats.chunks, 2);
    }
}
