//! Domain types shared by both storage backends.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Registered media-library identity (tenant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub label: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub enabled: i64,
    pub is_default: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Full imported media item row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub source_id: String,
    pub id: String,
    pub platform: Option<String>,
    pub author_id: Option<String>,
    pub author_handle: Option<String>,
    pub author_name: Option<String>,
    pub followers: Option<i64>,
    pub hearts: Option<i64>,
    pub item_count: Option<i64>,
    pub signature: Option<String>,
    pub is_private: Option<i64>,
    pub caption: Option<String>,
    pub bookmarked: Option<i64>,
    pub bookmark_timestamp: Option<String>,
    pub media_path: Option<String>,
    pub cover_path: Option<String>,
    pub row_hash: Option<String>,
    pub updated_at: Option<String>,
}

/// Listing projection of a media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub platform: Option<String>,
    pub author_id: Option<String>,
    pub author_handle: Option<String>,
    pub author_name: Option<String>,
    pub caption: Option<String>,
    pub bookmarked: Option<i64>,
    pub media_path: Option<String>,
    pub cover_path: Option<String>,
    pub updated_at: Option<String>,
}

/// Incoming item payload for `write_item`. The id is mandatory; everything
/// else falls back to import defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemDraft {
    #[serde(default)]
    pub id: String,
    pub platform: Option<String>,
    pub caption: Option<String>,
    pub bookmarked: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub backend: String,
    pub active: bool,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceCatalog {
    pub sources: Vec<Source>,
    pub default_source_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemPage {
    pub items: Vec<ItemSummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteReceipt {
    pub ok: bool,
    pub id: String,
    pub source_id: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaInit {
    pub ok: bool,
    pub source_id: String,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

/// UTC timestamp in the second-resolution ISO-8601 form stored everywhere
/// in the library (`2026-01-31T12:00:00Z`).
pub fn now_utc() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Default platform tag applied when an import row carries none.
pub const DEFAULT_PLATFORM: &str = "tiktok";
