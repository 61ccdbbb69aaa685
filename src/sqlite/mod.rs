//! Embedded single-file store.
//!
//! All tenants share one SQLite database; every table carries a `source_id`
//! column and every composite key starts with it. There is no schema
//! barrier: isolation holds only as long as every predicate includes the
//! tenant id.

mod repository;
mod schema;
mod sources;

pub use repository::SqliteRepository;
pub use schema::{initialize_store, rebuild_search_index};
