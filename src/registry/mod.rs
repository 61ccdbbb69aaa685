//! Schema registry
//!
//! Persistent mapping from source id to physical schema name on the
//! relational backend. The registry exclusively owns that mapping; tenant
//! DDL execution belongs to the relational repository's provisioning code.

mod schema;

pub use schema::{derive_schema_name, enforce_profile_guard, GuardPolicy, SchemaRegistry};
