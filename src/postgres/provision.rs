//! Tenant schema provisioning for the relational backend.
//!
//! Schema names cannot be parameterized in DDL, so every statement here is
//! string-built. All interpolated identifiers pass through `safe_ident`
//! immediately before use; that call is the single trust boundary.
//!
//! Integer columns are BIGINT so the shim can bind and read one integer
//! width on both backends.

use deadpool_postgres::Object;
use tracing::debug;

use crate::error::Result;
use crate::ident::safe_ident;

/// Global cross-tenant tables live in a fixed non-tenant schema and are
/// provisioned lazily. Safe to call on every operation that needs them.
pub async fn ensure_global_tables(client: &Object, registry_table: &str) -> Result<()> {
    let table = safe_ident(registry_table)?;

    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS public.sources (
                id TEXT PRIMARY KEY,
                label TEXT,
                kind TEXT,
                description TEXT,
                enabled BIGINT NOT NULL DEFAULT 1,
                is_default BIGINT NOT NULL DEFAULT 0,
                created_at TEXT,
                updated_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sources_enabled ON public.sources(enabled);
            CREATE INDEX IF NOT EXISTS idx_sources_default ON public.sources(is_default);",
        )
        .await?;

    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS public.{table} (
                source_id TEXT PRIMARY KEY,
                schema_name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
        ))
        .await?;

    Ok(())
}

/// Create the full table/index/constraint set for one tenant schema.
/// Idempotent; every object is created only if missing.
pub async fn provision_tenant_schema(client: &Object, schema: &str) -> Result<()> {
    let schema = safe_ident(schema)?;
    debug!(schema, "ensuring tenant schema objects");

    client
        .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
        .await?;

    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS \"{schema}\".media_items (
                source_id TEXT NOT NULL DEFAULT 'default',
                id TEXT NOT NULL,
                platform TEXT,
                author_id TEXT,
                author_handle TEXT,
                author_name TEXT,
                followers BIGINT,
                hearts BIGINT,
                item_count BIGINT,
                signature TEXT,
                is_private BIGINT,
                caption TEXT,
                bookmarked BIGINT DEFAULT 0,
                bookmark_timestamp TEXT,
                media_path TEXT,
                cover_path TEXT,
                row_hash TEXT,
                updated_at TEXT,
                PRIMARY KEY(source_id, id)
            );
            CREATE TABLE IF NOT EXISTS \"{schema}\".item_meta (
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                rating BIGINT,
                status TEXT,
                statuses TEXT,
                tags TEXT,
                notes TEXT,
                product_link TEXT,
                author_links TEXT,
                platform_targets TEXT,
                workflow_log TEXT,
                post_url TEXT,
                published_time TEXT,
                updated_at TEXT,
                PRIMARY KEY(source_id, item_id)
            );
            CREATE TABLE IF NOT EXISTS \"{schema}\".item_notes (
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                markdown TEXT NOT NULL,
                template_version TEXT,
                updated_at TEXT,
                PRIMARY KEY(source_id, item_id)
            );"
        ))
        .await?;

    // FKs are added NOT VALID so pre-populated schemas onboard without a
    // full scan; new rows are still checked.
    client
        .batch_execute(&format!(
            "DO $$
            BEGIN
                IF NOT EXISTS (
                    SELECT 1
                    FROM pg_constraint c
                    JOIN pg_namespace n ON n.oid = c.connamespace
                    WHERE n.nspname = '{schema}'
                      AND c.conname = 'fk_item_meta_media_items'
                ) THEN
                    ALTER TABLE \"{schema}\".item_meta
                      ADD CONSTRAINT fk_item_meta_media_items
                      FOREIGN KEY (source_id, item_id)
                      REFERENCES \"{schema}\".media_items(source_id, id)
                      ON DELETE CASCADE
                      NOT VALID;
                END IF;
            END
            $$;"
        ))
        .await?;

    client
        .batch_execute(&format!(
            "DO $$
            BEGIN
                IF NOT EXISTS (
                    SELECT 1
                    FROM pg_constraint c
                    JOIN pg_namespace n ON n.oid = c.connamespace
                    WHERE n.nspname = '{schema}'
                      AND c.conname = 'fk_item_notes_media_items'
                ) THEN
                    ALTER TABLE \"{schema}\".item_notes
                      ADD CONSTRAINT fk_item_notes_media_items
                      FOREIGN KEY (source_id, item_id)
                      REFERENCES \"{schema}\".media_items(source_id, id)
                      ON DELETE CASCADE
                      NOT VALID;
                END IF;
            END
            $$;"
        ))
        .await?;

    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS \"{schema}\".import_rows_raw (
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                row_json TEXT NOT NULL,
                row_hash TEXT,
                imported_at TEXT,
                PRIMARY KEY(source_id, item_id)
            );
            CREATE TABLE IF NOT EXISTS \"{schema}\".import_authors_raw (
                source_id TEXT NOT NULL DEFAULT 'default',
                author_id TEXT NOT NULL,
                row_json TEXT NOT NULL,
                imported_at TEXT,
                PRIMARY KEY(source_id, author_id)
            );
            CREATE TABLE IF NOT EXISTS \"{schema}\".import_bookmarks_raw (
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                row_json TEXT NOT NULL,
                imported_at TEXT,
                PRIMARY KEY(source_id, item_id)
            );
            CREATE TABLE IF NOT EXISTS \"{schema}\".publish_artifacts (
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                artifact_json TEXT NOT NULL,
                media_url TEXT,
                status TEXT NOT NULL DEFAULT 'draft_review',
                created_at TEXT,
                updated_at TEXT,
                PRIMARY KEY(source_id, item_id, platform)
            );
            CREATE TABLE IF NOT EXISTS \"{schema}\".publish_queue (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                action TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                scheduled_time TEXT,
                execute_after TEXT,
                result_json TEXT,
                error_message TEXT,
                retry_count BIGINT DEFAULT 0,
                created_at TEXT,
                updated_at TEXT
            );"
        ))
        .await?;

    client
        .batch_execute(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{schema}_media_items_updated ON \"{schema}\".media_items(updated_at DESC);
            CREATE INDEX IF NOT EXISTS idx_{schema}_media_items_author_handle ON \"{schema}\".media_items(author_handle);
            CREATE INDEX IF NOT EXISTS idx_{schema}_media_items_bookmarked ON \"{schema}\".media_items(bookmarked);
            CREATE INDEX IF NOT EXISTS idx_{schema}_item_meta_status ON \"{schema}\".item_meta(status);
            CREATE INDEX IF NOT EXISTS idx_{schema}_item_meta_source_id ON \"{schema}\".item_meta(source_id);
            CREATE INDEX IF NOT EXISTS idx_{schema}_item_meta_statuses ON \"{schema}\".item_meta(statuses);
            CREATE INDEX IF NOT EXISTS idx_{schema}_item_notes_source_id ON \"{schema}\".item_notes(source_id);
            CREATE INDEX IF NOT EXISTS idx_{schema}_import_rows_hash ON \"{schema}\".import_rows_raw(row_hash);"
        ))
        .await?;

    Ok(())
}

/// Structural probe: does the mapped schema look like one of ours?
///
/// A mapping may point at a legacy or foreign schema that reuses our table
/// names with a different structure; a lightweight column check prevents
/// writing into it. A schema without a `media_items` table is fresh and
/// safe to initialize.
pub async fn schema_matches_layout(client: &Object, schema: &str) -> Result<bool> {
    let schema = safe_ident(schema)?;

    let rows = client
        .query(
            "SELECT column_name
             FROM information_schema.columns
             WHERE table_schema=$1 AND table_name='media_items'",
            &[&schema],
        )
        .await?;

    if rows.is_empty() {
        return Ok(true);
    }

    let cols: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    for required in ["source_id", "id", "author_handle", "updated_at"] {
        if !cols.iter().any(|c| c == required) {
            return Ok(false);
        }
    }

    let companion = client
        .query_opt(
            "SELECT 1
             FROM information_schema.tables
             WHERE table_schema=$1 AND table_name='import_authors_raw'
             LIMIT 1",
            &[&schema],
        )
        .await?;

    Ok(companion.is_some())
}
