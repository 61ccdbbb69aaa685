use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::ident::normalize_source_id;
use crate::model::{
    now_utc, HealthStatus, ItemDraft, ItemPage, ItemSummary, MediaItem, SchemaInit, SourceCatalog,
    WriteReceipt, DEFAULT_PLATFORM,
};
use crate::repository::Repository;
use crate::sqlite::schema::initialize_store;
use crate::sqlite::sources;

pub const BACKEND_NAME: &str = "sqlite";

/// Embedded-store repository. All tenants share one database file; every
/// statement below scopes on `source_id`.
pub struct SqliteRepository {
    pool: Pool<SqliteConnectionManager>,
    config: Config,
}

impl SqliteRepository {
    /// Open (or create) the store and provision the shared tables once.
    pub fn open(config: Config) -> Result<Self> {
        if let Some(parent) = config.sqlite_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::ConnectionFailed {
                    backend: BACKEND_NAME.to_string(),
                    cause: format!("cannot create {}: {}", parent.display(), e),
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(&config.sqlite_path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "temp_store", "MEMORY")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.pool_max_size)
            .min_idle(Some(1))
            .build(manager)?;

        let conn = pool.get()?;
        initialize_store(&conn, config.enable_search_index)?;
        info!(path = %config.sqlite_path.display(), "embedded store ready");

        Ok(Self { pool, config })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn normalize(&self, source_id: &str) -> String {
        normalize_source_id(source_id, &self.config.default_source_id)
    }
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaItem> {
    Ok(MediaItem {
        source_id: row.get("source_id")?,
        id: row.get("id")?,
        platform: row.get("platform")?,
        author_id: row.get("author_id")?,
        author_handle: row.get("author_handle")?,
        author_name: row.get("author_name")?,
        followers: row.get("followers")?,
        hearts: row.get("hearts")?,
        item_count: row.get("item_count")?,
        signature: row.get("signature")?,
        is_private: row.get("is_private")?,
        caption: row.get("caption")?,
        bookmarked: row.get("bookmarked")?,
        bookmark_timestamp: row.get("bookmark_timestamp")?,
        media_path: row.get("media_path")?,
        cover_path: row.get("cover_path")?,
        row_hash: row.get("row_hash")?,
        updated_at: row.get("updated_at")?,
    })
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemSummary> {
    Ok(ItemSummary {
        id: row.get("id")?,
        platform: row.get("platform")?,
        author_id: row.get("author_id")?,
        author_handle: row.get("author_handle")?,
        author_name: row.get("author_name")?,
        caption: row.get("caption")?,
        bookmarked: row.get("bookmarked")?,
        media_path: row.get("media_path")?,
        cover_path: row.get("cover_path")?,
        updated_at: row.get("updated_at")?,
    })
}

#[async_trait]
impl Repository for SqliteRepository {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn init_schema(&self, source_id: &str) -> Result<SchemaInit> {
        let sid = self.normalize(source_id);
        let conn = self.conn()?;
        sources::ensure_source(&conn, &sid, Some(sid.as_str()), None, None, true)?;
        Ok(SchemaInit {
            ok: true,
            source_id: sid,
            backend: BACKEND_NAME.to_string(),
            schema: None,
        })
    }

    async fn get_health(&self, source_id: &str) -> Result<HealthStatus> {
        let sid = self.normalize(source_id);
        let conn = self.conn()?;
        sources::ensure_source(&conn, &sid, Some(sid.as_str()), None, None, true)?;
        Ok(HealthStatus {
            ok: true,
            backend: BACKEND_NAME.to_string(),
            active: true,
            source_id: sid,
            schema: None,
            search_path: None,
        })
    }

    async fn list_sources(&self) -> Result<SourceCatalog> {
        let conn = self.conn()?;
        let default_sid = normalize_source_id(&self.config.default_source_id, "default");
        sources::ensure_source(&conn, &default_sid, Some(default_sid.as_str()), None, None, true)?;
        if !sources::has_default_source(&conn)? {
            sources::set_default_source(&conn, &default_sid)?;
        }
        Ok(SourceCatalog {
            sources: sources::list_sources(&conn)?,
            default_source_id: sources::default_source_id(&conn, &default_sid)?,
        })
    }

    async fn list_items(&self, source_id: &str, limit: i64, offset: i64) -> Result<ItemPage> {
        let sid = self.normalize(source_id);
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, platform, author_id, author_handle, author_name, caption,
                    bookmarked, media_path, cover_path, updated_at
             FROM media_items
             WHERE source_id=?
             ORDER BY updated_at DESC
             LIMIT ? OFFSET ?",
        )?;
        let items = stmt
            .query_map(params![sid, limit, offset], summary_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM media_items WHERE source_id=?",
            params![sid],
            |r| r.get(0),
        )?;

        Ok(ItemPage {
            items,
            total,
            limit,
            offset,
        })
    }

    async fn get_item(&self, source_id: &str, item_id: &str) -> Result<Option<MediaItem>> {
        let sid = self.normalize(source_id);
        let conn = self.conn()?;
        let item = conn
            .query_row(
                "SELECT source_id, id, platform, author_id, author_handle, author_name,
                        followers, hearts, item_count, signature, is_private, caption,
                        bookmarked, bookmark_timestamp, media_path, cover_path, row_hash,
                        updated_at
                 FROM media_items
                 WHERE source_id=? AND id=?",
                params![sid, item_id],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    async fn write_item(&self, source_id: &str, draft: ItemDraft) -> Result<WriteReceipt> {
        let sid = self.normalize(source_id);
        let item_id = draft.id.trim().to_string();
        if item_id.is_empty() {
            return Err(StoreError::InvalidRequest {
                message: "payload.id is required".to_string(),
            });
        }

        let now = now_utc();
        let platform = draft
            .platform
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PLATFORM.to_string());
        let caption = draft.caption.clone().unwrap_or_default();
        let bookmarked = draft.bookmarked.unwrap_or(0);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO media_items(source_id, id, platform, caption, bookmarked, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_id, id) DO UPDATE SET
               platform=excluded.platform,
               caption=excluded.caption,
               bookmarked=excluded.bookmarked,
               updated_at=excluded.updated_at",
            params![sid, item_id, platform, caption, bookmarked, now],
        )?;

        Ok(WriteReceipt {
            ok: true,
            id: item_id,
            source_id: sid,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendMode;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            backend_mode: BackendMode::Sqlite,
            database_url: String::new(),
            schema_prefix: "media".to_string(),
            registry_table: "source_registry".to_string(),
            pool_max_size: 4,
            sqlite_path: dir.path().join("store.db"),
            enable_search_index: true,
            default_source_id: "default".to_string(),
            profile_index: None,
            schema_index_guard: true,
            legacy_remap: true,
        }
    }

    fn draft(id: &str, caption: &str) -> ItemDraft {
        ItemDraft {
            id: id.to_string(),
            platform: None,
            caption: Some(caption.to_string()),
            bookmarked: Some(1),
        }
    }

    #[tokio::test]
    async fn test_write_then_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(test_config(&dir)).unwrap();

        let receipt = repo.write_item("vault-a", draft("v1", "first clip")).await.unwrap();
        assert!(receipt.ok);
        assert_eq!(receipt.source_id, "vault-a");

        let item = repo.get_item("vault-a", "v1").await.unwrap().unwrap();
        assert_eq!(item.caption.as_deref(), Some("first clip"));
        assert_eq!(item.platform.as_deref(), Some(DEFAULT_PLATFORM));
        assert_eq!(item.bookmarked, Some(1));
    }

    #[tokio::test]
    async fn test_cross_tenant_isolation() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(test_config(&dir)).unwrap();

        repo.write_item("S1", draft("dup", "a")).await.unwrap();
        repo.write_item("S2", draft("dup", "b")).await.unwrap();

        let s1 = repo.get_item("S1", "dup").await.unwrap().unwrap();
        let s2 = repo.get_item("S2", "dup").await.unwrap().unwrap();
        assert_eq!(s1.caption.as_deref(), Some("a"));
        assert_eq!(s2.caption.as_deref(), Some("b"));

        // Listings stay scoped too.
        let page = repo.list_items("S1", 50, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].caption.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_in_place() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(test_config(&dir)).unwrap();

        repo.write_item("vault", draft("v1", "old")).await.unwrap();
        repo.write_item("vault", draft("v1", "new")).await.unwrap();

        let page = repo.list_items("vault", 50, 0).await.unwrap();
        assert_eq!(page.total, 1);
        let item = repo.get_item("vault", "v1").await.unwrap().unwrap();
        assert_eq!(item.caption.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_list_items_pagination() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(test_config(&dir)).unwrap();

        for i in 0..5 {
            repo.write_item("vault", draft(&format!("v{i}"), "x")).await.unwrap();
        }

        let page = repo.list_items("vault", 2, 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 5);
        assert_eq!(page.limit, 2);
        assert_eq!(page.offset, 2);
    }

    #[tokio::test]
    async fn test_write_requires_item_id() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(test_config(&dir)).unwrap();

        let err = repo
            .write_item("vault", draft("   ", "caption"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest { .. }));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_list_sources_registers_default() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(test_config(&dir)).unwrap();

        let catalog = repo.list_sources().await.unwrap();
        assert_eq!(catalog.default_source_id, "default");
        assert_eq!(catalog.sources.len(), 1);
        assert_eq!(catalog.sources[0].is_default, 1);

        // Stable on repeat calls.
        let again = repo.list_sources().await.unwrap();
        assert_eq!(again.sources.len(), 1);
    }

    #[test]
    fn test_init_schema_always_succeeds() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(test_config(&dir)).unwrap();

        tokio_test::block_on(async {
            let first = repo.init_schema("vault-a").await.unwrap();
            let second = repo.init_schema("vault-a").await.unwrap();
            assert!(first.ok && second.ok);
            assert_eq!(first.backend, BACKEND_NAME);
            assert!(first.schema.is_none());
        });
    }

    #[tokio::test]
    async fn test_source_id_normalization_applies() {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepository::open(test_config(&dir)).unwrap();

        let receipt = repo.write_item("Assets 1!", draft("v1", "x")).await.unwrap();
        assert_eq!(receipt.source_id, "Assets1");
        assert!(repo.get_item("Assets1", "v1").await.unwrap().is_some());

        let health = repo.get_health("").await.unwrap();
        assert_eq!(health.source_id, "default");
    }
}
