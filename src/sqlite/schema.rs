//! Shared-table schema for the embedded store.
//!
//! Provisioning is idempotent and additive: `CREATE TABLE IF NOT EXISTS`
//! for fresh databases, column backfill plus composite-key rebuild for
//! databases created before tenancy was introduced.

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::Result;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    label TEXT,
    kind TEXT,
    description TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    is_default INTEGER NOT NULL DEFAULT 0,
    created_at TEXT,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS media_items (
    source_id TEXT NOT NULL DEFAULT 'default',
    id TEXT NOT NULL,
    platform TEXT,
    author_id TEXT,
    author_handle TEXT,
    author_name TEXT,
    followers INTEGER,
    hearts INTEGER,
    item_count INTEGER,
    signature TEXT,
    is_private INTEGER,
    caption TEXT,
    bookmarked INTEGER DEFAULT 0,
    bookmark_timestamp TEXT,
    media_path TEXT,
    cover_path TEXT,
    row_hash TEXT,
    updated_at TEXT,
    PRIMARY KEY(source_id, id)
);

-- User-editable metadata (owned by the user; never overwritten by imports)
CREATE TABLE IF NOT EXISTS item_meta (
    source_id TEXT NOT NULL DEFAULT 'default',
    item_id TEXT NOT NULL,
    rating INTEGER,
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
    PRIMARY KEY(source_id, item_id),
    FOREIGN KEY(source_id, item_id) REFERENCES media_items(source_id, id) ON DELETE CASCADE
);

-- Rendered note markdown cache (fast sync into the vault)
CREATE TABLE IF NOT EXISTS item_notes (
    source_id TEXT NOT NULL DEFAULT 'default',
    item_id TEXT NOT NULL,
    markdown TEXT NOT NULL,
    template_version TEXT,
    updated_at TEXT,
    PRIMARY KEY(source_id, item_id),
    FOREIGN KEY(source_id, item_id) REFERENCES media_items(source_id, id) ON DELETE CASCADE
);

-- Raw import row retention (full-fidelity source data as JSON)
CREATE TABLE IF NOT EXISTS import_rows_raw (
    source_id TEXT NOT NULL DEFAULT 'default',
    item_id TEXT NOT NULL,
    row_json TEXT NOT NULL,
    row_hash TEXT,
    imported_at TEXT,
    PRIMARY KEY(source_id, item_id)
);

CREATE TABLE IF NOT EXISTS import_authors_raw (
    source_id TEXT NOT NULL DEFAULT 'default',
    author_id TEXT NOT NULL,
    row_json TEXT NOT NULL,
    imported_at TEXT,
    PRIMARY KEY(source_id, author_id)
);

CREATE TABLE IF NOT EXISTS import_bookmarks_raw (
    source_id TEXT NOT NULL DEFAULT 'default',
    item_id TEXT NOT NULL,
    row_json TEXT NOT NULL,
    imported_at TEXT,
    PRIMARY KEY(source_id, item_id)
);

CREATE TABLE IF NOT EXISTS publish_artifacts (
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

CREATE TABLE IF NOT EXISTS publish_queue (
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
    retry_count INTEGER DEFAULT 0,
    created_at TEXT,
    updated_at TEXT
);
";

const SEARCH_INDEX_SQL: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS media_items_fts USING fts5(
  source_id UNINDEXED,
  id UNINDEXED,
  caption,
  author_handle,
  author_name,
  content=''
);
";

/// Create or upgrade the shared tables. Safe to call on every open.
pub fn initialize_store(conn: &Connection, enable_search_index: bool) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    ensure_columns(conn)?;
    ensure_composite_primary_keys(conn)?;
    ensure_indexes(conn)?;
    if enable_search_index {
        conn.execute_batch(SEARCH_INDEX_SQL)?;
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<String>>>()?;
    Ok(cols)
}

/// Primary-key columns of a table in key order; empty when the table is
/// missing or keyless.
fn primary_key_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut pks = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(5)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<(i64, String)>>>()?
        .into_iter()
        .filter(|(pk, _)| *pk > 0)
        .collect::<Vec<_>>();
    pks.sort_by_key(|(pk, _)| *pk);
    Ok(pks.into_iter().map(|(_, name)| name).collect())
}

fn add_column_if_missing(conn: &Connection, table: &str, name: &str, decl: &str) -> Result<()> {
    if table_columns(conn, table)?.contains(name) {
        return Ok(());
    }
    debug!(table, column = name, "adding missing column");
    conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {name} {decl}"), [])?;
    Ok(())
}

fn backfill_source_id(conn: &Connection, table: &str) -> Result<()> {
    if table_columns(conn, table)?.contains("source_id") {
        conn.execute(
            &format!(
                "UPDATE {table} SET source_id='default' \
                 WHERE source_id IS NULL OR TRIM(source_id)=''"
            ),
            [],
        )?;
    }
    Ok(())
}

/// Best-effort additive migration for existing databases.
///
/// SQLite supports few ALTER TABLE operations, but adding columns is safe.
fn ensure_columns(conn: &Connection) -> Result<()> {
    for (name, decl) in [
        ("source_id", "TEXT NOT NULL DEFAULT 'default'"),
        ("followers", "INTEGER"),
        ("hearts", "INTEGER"),
        ("item_count", "INTEGER"),
        ("signature", "TEXT"),
        ("is_private", "INTEGER"),
    ] {
        add_column_if_missing(conn, "media_items", name, decl)?;
    }
    backfill_source_id(conn, "media_items")?;

    for (name, decl) in [
        ("source_id", "TEXT NOT NULL DEFAULT 'default'"),
        ("rating", "INTEGER"),
        ("status", "TEXT"),
        ("statuses", "TEXT"),
        ("tags", "TEXT"),
        ("notes", "TEXT"),
        ("product_link", "TEXT"),
        ("author_links", "TEXT"),
        ("platform_targets", "TEXT"),
        ("workflow_log", "TEXT"),
        ("post_url", "TEXT"),
        ("published_time", "TEXT"),
    ] {
        add_column_if_missing(conn, "item_meta", name, decl)?;
    }
    backfill_source_id(conn, "item_meta")?;

    add_column_if_missing(
        conn,
        "item_notes",
        "source_id",
        "TEXT NOT NULL DEFAULT 'default'",
    )?;
    backfill_source_id(conn, "item_notes")?;

    for table in ["import_rows_raw", "import_authors_raw", "import_bookmarks_raw"] {
        if !table_columns(conn, table)?.is_empty() {
            add_column_if_missing(conn, table, "source_id", "TEXT NOT NULL DEFAULT 'default'")?;
            backfill_source_id(conn, table)?;
        }
    }

    for (name, decl) in [
        ("label", "TEXT"),
        ("kind", "TEXT"),
        ("description", "TEXT"),
        ("enabled", "INTEGER NOT NULL DEFAULT 1"),
        ("is_default", "INTEGER NOT NULL DEFAULT 0"),
        ("created_at", "TEXT"),
        ("updated_at", "TEXT"),
    ] {
        add_column_if_missing(conn, "sources", name, decl)?;
    }

    Ok(())
}

struct Rebuild {
    table: &'static str,
    key: &'static [&'static str],
    create_sql: &'static str,
    columns: &'static [&'static str],
}

const REBUILDS: &[Rebuild] = &[
    Rebuild {
        table: "media_items",
        key: &["source_id", "id"],
        create_sql: "
            CREATE TABLE IF NOT EXISTS media_items__new (
                source_id TEXT NOT NULL DEFAULT 'default',
                id TEXT NOT NULL,
                platform TEXT,
                author_id TEXT,
                author_handle TEXT,
                author_name TEXT,
                followers INTEGER,
                hearts INTEGER,
                item_count INTEGER,
                signature TEXT,
                is_private INTEGER,
                caption TEXT,
                bookmarked INTEGER DEFAULT 0,
                bookmark_timestamp TEXT,
                media_path TEXT,
                cover_path TEXT,
                row_hash TEXT,
                updated_at TEXT,
                PRIMARY KEY(source_id, id)
            )",
        columns: &[
            "id",
            "platform",
            "author_id",
            "author_handle",
            "author_name",
            "followers",
            "hearts",
            "item_count",
            "signature",
            "is_private",
            "caption",
            "bookmarked",
            "bookmark_timestamp",
            "media_path",
            "cover_path",
            "row_hash",
            "updated_at",
        ],
    },
    Rebuild {
        table: "item_meta",
        key: &["source_id", "item_id"],
        create_sql: "
            CREATE TABLE IF NOT EXISTS item_meta__new (
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                rating INTEGER,
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
                PRIMARY KEY(source_id, item_id),
                FOREIGN KEY(source_id, item_id) REFERENCES media_items(source_id, id) ON DELETE CASCADE
            )",
        columns: &[
            "item_id",
            "rating",
            "status",
            "statuses",
            "tags",
            "notes",
            "product_link",
            "author_links",
            "platform_targets",
            "workflow_log",
            "post_url",
            "published_time",
            "updated_at",
        ],
    },
    Rebuild {
        table: "item_notes",
        key: &["source_id", "item_id"],
        create_sql: "
            CREATE TABLE IF NOT EXISTS item_notes__new (
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                markdown TEXT NOT NULL,
                template_version TEXT,
                updated_at TEXT,
                PRIMARY KEY(source_id, item_id),
                FOREIGN KEY(source_id, item_id) REFERENCES media_items(source_id, id) ON DELETE CASCADE
            )",
        columns: &["item_id", "markdown", "template_version", "updated_at"],
    },
    Rebuild {
        table: "import_rows_raw",
        key: &["source_id", "item_id"],
        create_sql: "
            CREATE TABLE IF NOT EXISTS import_rows_raw__new (
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                row_json TEXT NOT NULL,
                row_hash TEXT,
                imported_at TEXT,
                PRIMARY KEY(source_id, item_id)
            )",
        columns: &["item_id", "row_json", "row_hash", "imported_at"],
    },
    Rebuild {
        table: "import_bookmarks_raw",
        key: &["source_id", "item_id"],
        create_sql: "
            CREATE TABLE IF NOT EXISTS import_bookmarks_raw__new (
                source_id TEXT NOT NULL DEFAULT 'default',
                item_id TEXT NOT NULL,
                row_json TEXT NOT NULL,
                imported_at TEXT,
                PRIMARY KEY(source_id, item_id)
            )",
        columns: &["item_id", "row_json", "imported_at"],
    },
    Rebuild {
        table: "import_authors_raw",
        key: &["source_id", "author_id"],
        create_sql: "
            CREATE TABLE IF NOT EXISTS import_authors_raw__new (
                source_id TEXT NOT NULL DEFAULT 'default',
                author_id TEXT NOT NULL,
                row_json TEXT NOT NULL,
                imported_at TEXT,
                PRIMARY KEY(source_id, author_id)
            )",
        columns: &["author_id", "row_json", "imported_at"],
    },
];

/// Rebuild legacy tables so primary keys are source-aware composites.
///
/// Duplicate item ids may then exist across different sources while staying
/// unique within one source.
fn ensure_composite_primary_keys(conn: &Connection) -> Result<()> {
    for rebuild in REBUILDS {
        let want: Vec<String> = rebuild.key.iter().map(|s| s.to_string()).collect();
        if primary_key_columns(conn, rebuild.table)? == want {
            continue;
        }
        info!(table = rebuild.table, "rebuilding table with composite primary key");

        conn.execute(rebuild.create_sql, [])?;
        let cols = rebuild.columns.join(", ");
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {table}__new(source_id, {cols}) \
                 SELECT COALESCE(NULLIF(TRIM(source_id), ''), 'default'), {cols} \
                 FROM {table}",
                table = rebuild.table,
            ),
            [],
        )?;
        conn.execute(&format!("DROP TABLE {}", rebuild.table), [])?;
        conn.execute(
            &format!(
                "ALTER TABLE {table}__new RENAME TO {table}",
                table = rebuild.table
            ),
            [],
        )?;
    }
    Ok(())
}

/// Index creation runs after `ensure_columns` because CREATE TABLE IF NOT
/// EXISTS does not add missing columns on existing databases, and CREATE
/// INDEX errors if a column is missing.
fn ensure_indexes(conn: &Connection) -> Result<()> {
    let guarded: &[(&str, &str, &str)] = &[
        ("media_items", "author_handle", "idx_media_items_author_handle"),
        ("media_items", "source_id", "idx_media_items_source_id"),
        ("media_items", "bookmarked", "idx_media_items_bookmarked"),
        ("item_meta", "status", "idx_item_meta_status"),
        ("item_meta", "source_id", "idx_item_meta_source_id"),
        ("item_meta", "statuses", "idx_item_meta_statuses"),
        ("item_notes", "source_id", "idx_item_notes_source_id"),
        ("import_rows_raw", "row_hash", "idx_import_rows_hash"),
        ("sources", "enabled", "idx_sources_enabled"),
        ("sources", "is_default", "idx_sources_default"),
    ];

    for (table, column, index) in guarded {
        if table_columns(conn, table)?.contains(*column) {
            conn.execute(
                &format!("CREATE INDEX IF NOT EXISTS {index} ON {table}({column})"),
                [],
            )?;
        }
    }
    Ok(())
}

fn has_search_index(conn: &Connection) -> Result<bool> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='media_items_fts'",
    )?;
    Ok(stmt.exists([])?)
}

/// Push one item into the search index; no-op when the index is disabled.
pub(crate) fn upsert_search_index(
    conn: &Connection,
    source_id: &str,
    item_id: &str,
    caption: &str,
    author_handle: &str,
    author_name: &str,
) -> Result<()> {
    if !has_search_index(conn)? {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO media_items_fts(source_id, id, caption, author_handle, author_name) \
         VALUES(?, ?, ?, ?, ?)",
        rusqlite::params![source_id, item_id, caption, author_handle, author_name],
    )?;
    Ok(())
}

/// Rebuild the search index from the canonical `media_items` table.
///
/// The index is a contentless FTS5 table (`content=''`) and cannot be
/// cleared with DELETE; drop and recreate instead.
pub fn rebuild_search_index(conn: &Connection) -> Result<()> {
    if !has_search_index(conn)? {
        return Ok(());
    }

    conn.execute("DROP TABLE IF EXISTS media_items_fts", [])?;
    conn.execute_batch(SEARCH_INDEX_SQL)?;

    let mut stmt = conn.prepare(
        "SELECT source_id, id, caption, author_handle, author_name FROM media_items",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (source_id, id, caption, handle, name) in rows {
        upsert_search_index(
            conn,
            &source_id,
            &id,
            caption.as_deref().unwrap_or(""),
            handle.as_deref().unwrap_or(""),
            name.as_deref().unwrap_or(""),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = open_memory();
        initialize_store(&conn, true).unwrap();
        initialize_store(&conn, true).unwrap();
        assert!(table_columns(&conn, "media_items").unwrap().contains("source_id"));
        assert!(has_search_index(&conn).unwrap());
    }

    #[test]
    fn test_legacy_single_key_table_is_rebuilt() {
        let conn = open_memory();
        // Pre-tenancy layout: no source_id, single-column key.
        conn.execute_batch(
            "CREATE TABLE media_items (
                id TEXT PRIMARY KEY,
                platform TEXT,
                author_id TEXT,
                author_handle TEXT,
                author_name TEXT,
                caption TEXT,
                bookmarked INTEGER DEFAULT 0,
                bookmark_timestamp TEXT,
                media_path TEXT,
                cover_path TEXT,
                row_hash TEXT,
                updated_at TEXT
            );
            INSERT INTO media_items(id, caption) VALUES('v1', 'old row');",
        )
        .unwrap();

        initialize_store(&conn, false).unwrap();

        assert_eq!(
            primary_key_columns(&conn, "media_items").unwrap(),
            vec!["source_id".to_string(), "id".to_string()]
        );
        let (sid, caption): (String, String) = conn
            .query_row(
                "SELECT source_id, caption FROM media_items WHERE id='v1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(sid, "default");
        assert_eq!(caption, "old row");
    }

    #[test]
    fn test_search_index_rebuild() {
        let conn = open_memory();
        initialize_store(&conn, true).unwrap();
        conn.execute(
            "INSERT INTO media_items(source_id, id, caption, author_handle, updated_at) \
             VALUES('default', 'v1', 'sunset timelapse', 'creator1', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        rebuild_search_index(&conn).unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM media_items_fts WHERE media_items_fts MATCH 'sunset'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_disabled_search_index_is_skipped() {
        let conn = open_memory();
        initialize_store(&conn, false).unwrap();
        assert!(!has_search_index(&conn).unwrap());
        // Maintenance helpers are no-ops without the index.
        upsert_search_index(&conn, "default", "v1", "", "", "").unwrap();
        rebuild_search_index(&conn).unwrap();
    }
}
