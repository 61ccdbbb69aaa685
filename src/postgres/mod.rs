//! Relational-server backend.
//!
//! Each tenant owns a dedicated schema; statements issued through a
//! tenant-scoped connection are unqualified and land in that schema via
//! the session search path.

pub mod compat;
pub mod provision;
mod repository;

pub use compat::{CompatClient, CompatRow, SqlParams, SqlValue};
pub use repository::PostgresRepository;
