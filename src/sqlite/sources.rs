//! Source registry helpers for the embedded store.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::model::{now_utc, Source};

/// Upsert a Source row. Existing label/kind/description survive a re-register
/// with blanks; `enabled` and `updated_at` always follow the caller.
pub fn ensure_source(
    conn: &Connection,
    source_id: &str,
    label: Option<&str>,
    kind: Option<&str>,
    description: Option<&str>,
    enabled: bool,
) -> Result<()> {
    let sid = {
        let s = source_id.trim();
        if s.is_empty() { "default" } else { s }
    };
    let now = now_utc();

    conn.execute(
        "INSERT INTO sources(id, label, kind, description, enabled, is_default, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 0, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           label=COALESCE(excluded.label, sources.label),
           kind=COALESCE(excluded.kind, sources.kind),
           description=COALESCE(excluded.description, sources.description),
           enabled=excluded.enabled,
           updated_at=excluded.updated_at",
        params![sid, label, kind, description, enabled as i64, now, now],
    )?;
    Ok(())
}

pub fn list_sources(conn: &Connection) -> Result<Vec<Source>> {
    let mut stmt = conn.prepare(
        "SELECT id, label, kind, description, enabled, is_default, created_at, updated_at
         FROM sources
         ORDER BY is_default DESC, enabled DESC, id ASC",
    )?;
    let sources = stmt
        .query_map([], |row| {
            Ok(Source {
                id: row.get(0)?,
                label: row.get(1)?,
                kind: row.get(2)?,
                description: row.get(3)?,
                enabled: row.get(4)?,
                is_default: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sources)
}

/// Flip the single `is_default` flag to the given source, registering it if
/// needed.
pub fn set_default_source(conn: &Connection, source_id: &str) -> Result<()> {
    let sid = {
        let s = source_id.trim();
        if s.is_empty() { "default" } else { s }
    };
    let now = now_utc();
    conn.execute("UPDATE sources SET is_default=0 WHERE is_default=1", [])?;
    conn.execute(
        "INSERT INTO sources(id, label, enabled, is_default, created_at, updated_at)
         VALUES(?, ?, 1, 1, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           enabled=1,
           is_default=1,
           updated_at=excluded.updated_at",
        params![sid, sid, now, now],
    )?;
    Ok(())
}

pub fn default_source_id(conn: &Connection, fallback: &str) -> Result<String> {
    let row: Option<String> = conn
        .query_row(
            "SELECT id FROM sources WHERE is_default=1 ORDER BY updated_at DESC, id ASC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?;
    Ok(row.unwrap_or_else(|| {
        let fb = fallback.trim();
        if fb.is_empty() { "default" } else { fb }.to_string()
    }))
}

pub fn has_default_source(conn: &Connection) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM sources WHERE is_default=1 LIMIT 1")?;
    Ok(stmt.exists([])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::schema::initialize_store;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize_store(&conn, false).unwrap();
        conn
    }

    #[test]
    fn test_ensure_source_upserts() {
        let conn = open();
        ensure_source(&conn, "vault-a", Some("Vault A"), None, None, true).unwrap();
        ensure_source(&conn, "vault-a", None, Some("library"), None, true).unwrap();

        let sources = list_sources(&conn).unwrap();
        assert_eq!(sources.len(), 1);
        // COALESCE keeps the earlier label while the new kind lands.
        assert_eq!(sources[0].label.as_deref(), Some("Vault A"));
        assert_eq!(sources[0].kind.as_deref(), Some("library"));
    }

    #[test]
    fn test_default_source_flag_is_exclusive() {
        let conn = open();
        ensure_source(&conn, "a", None, None, None, true).unwrap();
        ensure_source(&conn, "b", None, None, None, true).unwrap();
        assert!(!has_default_source(&conn).unwrap());

        set_default_source(&conn, "a").unwrap();
        set_default_source(&conn, "b").unwrap();

        let defaults: Vec<Source> = list_sources(&conn)
            .unwrap()
            .into_iter()
            .filter(|s| s.is_default == 1)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, "b");
        assert_eq!(default_source_id(&conn, "fallback").unwrap(), "b");
    }

    #[test]
    fn test_default_source_id_fallback() {
        let conn = open();
        assert_eq!(default_source_id(&conn, "main").unwrap(), "main");
        assert_eq!(default_source_id(&conn, "  ").unwrap(), "default");
    }
}
