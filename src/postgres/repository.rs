use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::ident::{normalize_source_id, safe_ident};
use crate::model::{
    now_utc, HealthStatus, ItemDraft, ItemPage, ItemSummary, MediaItem, SchemaInit, Source,
    SourceCatalog, WriteReceipt, DEFAULT_PLATFORM,
};
use crate::postgres::compat::{CompatClient, CompatRow, SqlParams, SqlValue};
use crate::postgres::provision;
use crate::registry::SchemaRegistry;
use crate::repository::Repository;

pub const BACKEND_NAME: &str = "postgres_primary";

/// Relational-store repository: one schema per tenant, resolved through the
/// schema registry and reached via the session search path.
pub struct PostgresRepository {
    pool: Pool,
    registry: SchemaRegistry,
    config: Config,
}

impl PostgresRepository {
    /// Construct the repository and its pool. No connection is opened here;
    /// the pool connects lazily on first use.
    pub fn new(config: Config) -> Result<Self> {
        let pool = create_pool(&config.database_url, config.pool_max_size)?;
        let registry = SchemaRegistry::new(pool.clone(), &config)?;
        Ok(Self {
            pool,
            registry,
            config,
        })
    }

    /// Open a tenant-scoped connection.
    ///
    /// Callers must have run `init_schema` first: resolution here never
    /// creates, and the profile-index guard is re-validated. The search
    /// path is set on every checkout, so pooled connections cannot leak a
    /// previous tenant's scope.
    async fn connection_for_source(&self, source_id: &str) -> Result<(String, CompatClient)> {
        let sid = self.normalize(source_id);
        let schema = self.registry.resolve(&sid, false).await?;
        self.registry.assert_profile_guard(&sid, &schema)?;

        let client = self.pool.get().await?;
        let schema = safe_ident(&schema)?.to_string();
        client
            .batch_execute(&format!("SET search_path TO \"{schema}\", public"))
            .await?;
        debug!(source_id = %sid, schema = %schema, "tenant connection ready");

        Ok((sid, CompatClient::new(client)))
    }

    fn normalize(&self, source_id: &str) -> String {
        normalize_source_id(source_id, &self.config.default_source_id)
    }
}

fn create_pool(database_url: &str, max_size: u32) -> Result<Pool> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database_url.to_string());

    cfg.pool = Some(deadpool_postgres::PoolConfig {
        max_size: max_size as usize,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(5)),
            recycle: Some(Duration::from_secs(5)),
        },
        ..Default::default()
    });

    Ok(cfg.create_pool(Some(Runtime::Tokio1), NoTls)?)
}

fn summary_from_row(row: &CompatRow) -> ItemSummary {
    ItemSummary {
        id: row.text("id").unwrap_or_default(),
        platform: row.text("platform"),
        author_id: row.text("author_id"),
        author_handle: row.text("author_handle"),
        author_name: row.text("author_name"),
        caption: row.text("caption"),
        bookmarked: row.integer("bookmarked"),
        media_path: row.text("media_path"),
        cover_path: row.text("cover_path"),
        updated_at: row.text("updated_at"),
    }
}

fn item_from_row(row: &CompatRow) -> MediaItem {
    MediaItem {
        source_id: row.text("source_id").unwrap_or_default(),
        id: row.text("id").unwrap_or_default(),
        platform: row.text("platform"),
        author_id: row.text("author_id"),
        author_handle: row.text("author_handle"),
        author_name: row.text("author_name"),
        followers: row.integer("followers"),
        hearts: row.integer("hearts"),
        item_count: row.integer("item_count"),
        signature: row.text("signature"),
        is_private: row.integer("is_private"),
        caption: row.text("caption"),
        bookmarked: row.integer("bookmarked"),
        bookmark_timestamp: row.text("bookmark_timestamp"),
        media_path: row.text("media_path"),
        cover_path: row.text("cover_path"),
        row_hash: row.text("row_hash"),
        updated_at: row.text("updated_at"),
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn init_schema(&self, source_id: &str) -> Result<SchemaInit> {
        let sid = self.normalize(source_id);
        let schema = self.registry.resolve(&sid, true).await?;
        Ok(SchemaInit {
            ok: true,
            source_id: sid,
            backend: BACKEND_NAME.to_string(),
            schema: Some(schema),
        })
    }

    async fn get_health(&self, source_id: &str) -> Result<HealthStatus> {
        let sid = self.normalize(source_id);
        let schema = self.registry.resolve(&sid, false).await?;
        Ok(HealthStatus {
            ok: true,
            backend: BACKEND_NAME.to_string(),
            active: true,
            source_id: sid,
            search_path: Some(format!("{schema},public")),
            schema: Some(schema),
        })
    }

    async fn list_sources(&self) -> Result<SourceCatalog> {
        let client = self.pool.get().await?;
        provision::ensure_global_tables(&client, &self.config.registry_table).await?;

        let rows = client
            .query(
                "SELECT id, label, kind, description, enabled, is_default, created_at, updated_at \
                 FROM public.sources ORDER BY id",
                &[],
            )
            .await?;
        let sources: Vec<Source> = rows
            .iter()
            .map(|r| Source {
                id: r.get(0),
                label: r.get(1),
                kind: r.get(2),
                description: r.get(3),
                enabled: r.get(4),
                is_default: r.get(5),
                created_at: r.get(6),
                updated_at: r.get(7),
            })
            .collect();

        let default_row = client
            .query_opt("SELECT id FROM public.sources WHERE is_default=1 LIMIT 1", &[])
            .await?;
        let default_source_id = match default_row {
            Some(row) => row.get::<_, String>(0),
            None => {
                let sid = normalize_source_id(&self.config.default_source_id, "default");
                let now = now_utc();
                client
                    .execute(
                        "INSERT INTO public.sources(id, label, enabled, is_default, created_at, updated_at) \
                         VALUES($1, $2, 1, 1, $3, $4) \
                         ON CONFLICT(id) DO UPDATE SET is_default=1, updated_at=EXCLUDED.updated_at",
                        &[&sid, &sid, &now, &now],
                    )
                    .await?;
                sid
            }
        };

        Ok(SourceCatalog {
            sources,
            default_source_id,
        })
    }

    async fn list_items(&self, source_id: &str, limit: i64, offset: i64) -> Result<ItemPage> {
        let (sid, conn) = self.connection_for_source(source_id).await?;

        let rows = conn
            .query(
                "SELECT id, platform, author_id, author_handle, author_name, caption,
                        bookmarked, media_path, cover_path, updated_at
                 FROM media_items
                 WHERE source_id=?
                 ORDER BY updated_at DESC
                 LIMIT ? OFFSET ?",
                SqlParams::Positional(vec![
                    SqlValue::from(sid.as_str()),
                    SqlValue::Integer(limit),
                    SqlValue::Integer(offset),
                ]),
            )
            .await?;
        let items = rows.iter().map(summary_from_row).collect();

        let total = conn
            .query_opt(
                "SELECT COUNT(*) AS total FROM media_items WHERE source_id=?",
                SqlParams::Positional(vec![SqlValue::from(sid.as_str())]),
            )
            .await?
            .and_then(|row| row.integer("total"))
            .unwrap_or(0);

        Ok(ItemPage {
            items,
            total,
            limit,
            offset,
        })
    }

    async fn get_item(&self, source_id: &str, item_id: &str) -> Result<Option<MediaItem>> {
        let (sid, conn) = self.connection_for_source(source_id).await?;

        let row = conn
            .query_opt(
                "SELECT source_id, id, platform, author_id, author_handle, author_name,
                        followers, hearts, item_count, signature, is_private, caption,
                        bookmarked, bookmark_timestamp, media_path, cover_path, row_hash,
                        updated_at
                 FROM media_items
                 WHERE source_id=? AND id=?",
                SqlParams::Positional(vec![
                    SqlValue::from(sid.as_str()),
                    SqlValue::from(item_id),
                ]),
            )
            .await?;

        Ok(row.as_ref().map(item_from_row))
    }

    async fn write_item(&self, source_id: &str, draft: ItemDraft) -> Result<WriteReceipt> {
        let item_id = draft.id.trim().to_string();
        if item_id.is_empty() {
            return Err(StoreError::InvalidRequest {
                message: "payload.id is required".to_string(),
            });
        }

        let (sid, conn) = self.connection_for_source(source_id).await?;
        let now = now_utc();
        let platform = draft
            .platform
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PLATFORM.to_string());
        let caption = draft.caption.clone().unwrap_or_default();
        let bookmarked = draft.bookmarked.unwrap_or(0);

        conn.execute(
            "INSERT INTO media_items(source_id, id, platform, caption, bookmarked, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_id, id) DO UPDATE SET
               platform=excluded.platform,
               caption=excluded.caption,
               bookmarked=excluded.bookmarked,
               updated_at=excluded.updated_at",
            SqlParams::Positional(vec![
                SqlValue::from(sid.as_str()),
                SqlValue::from(item_id.as_str()),
                SqlValue::from(platform),
                SqlValue::from(caption),
                SqlValue::Integer(bookmarked),
                SqlValue::from(now.as_str()),
            ]),
        )
        .await?;

        Ok(WriteReceipt {
            ok: true,
            id: item_id,
            source_id: sid,
            updated_at: now,
        })
    }
}
