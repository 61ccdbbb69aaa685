use deadpool_postgres::Pool;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::ident::{
    normalize_source_id, safe_ident, schema_profile_index, trailing_profile_index,
};
use crate::model::now_utc;
use crate::postgres::provision;

/// Profile-index guard settings.
///
/// A deployment may run several configured data-source profiles against one
/// server, with the profile number encoded both in source ids (`assets_2`)
/// and in unified schema names (`media_p02_assets`). The guard refuses to
/// resolve when those two encodings disagree, so a process can never be
/// cross-wired to another profile's schema.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    pub enabled: bool,
    pub profile_index: Option<String>,
}

/// Derive the canonical schema name for a source id:
/// `prefix + "_" + normalized id` with `.`/`-` folded to `_`.
/// Deterministic; the result must pass the safe-identifier gate.
pub fn derive_schema_name(source_id: &str, prefix: &str, fallback: &str) -> Result<String> {
    let sid = normalize_source_id(source_id, fallback);
    let raw = format!("{prefix}_{sid}").replace(['.', '-'], "_");
    Ok(safe_ident(&raw)?.to_string())
}

/// Enforce the profile-index guard for a resolved schema.
///
/// Only unified indexed schemas (`..._pNN_...`) are guarded; a plain
/// derived name carries no profile token and always passes.
pub fn enforce_profile_guard(
    guard: &GuardPolicy,
    source_id: &str,
    schema: &str,
) -> Result<()> {
    if !guard.enabled {
        return Ok(());
    }

    let schema_idx = match schema_profile_index(schema) {
        Some(idx) => idx,
        None => return Ok(()),
    };

    let source_idx = trailing_profile_index(source_id);
    let profile_idx = guard
        .profile_index
        .as_deref()
        .and_then(trailing_profile_index);

    if let (Some(source), Some(profile)) = (source_idx, profile_idx) {
        if source != profile {
            return Err(StoreError::SchemaIndexMismatch {
                source_id: source_id.to_string(),
                schema: schema.to_string(),
                expected: profile,
                found: source,
            });
        }
    }

    let expected = match source_idx.or(profile_idx) {
        Some(idx) => idx,
        None => return Ok(()),
    };

    if schema_idx != expected {
        return Err(StoreError::SchemaIndexMismatch {
            source_id: source_id.to_string(),
            schema: schema.to_string(),
            expected,
            found: schema_idx,
        });
    }

    Ok(())
}

/// Persistent source-id to schema-name mapping for the relational backend.
pub struct SchemaRegistry {
    pool: Pool,
    prefix: String,
    table: String,
    default_source_id: String,
    guard: GuardPolicy,
    legacy_remap: bool,
}

impl SchemaRegistry {
    pub fn new(pool: Pool, config: &Config) -> Result<Self> {
        // Fail fast on bad configuration rather than at first resolution.
        let prefix = safe_ident(&config.schema_prefix)?.to_string();
        let table = safe_ident(&config.registry_table)?.to_string();

        Ok(Self {
            pool,
            prefix,
            table,
            default_source_id: config.default_source_id.clone(),
            guard: GuardPolicy {
                enabled: config.schema_index_guard,
                profile_index: config.profile_index.clone(),
            },
            legacy_remap: config.legacy_remap,
        })
    }

    pub fn derive(&self, source_id: &str) -> Result<String> {
        derive_schema_name(source_id, &self.prefix, &self.default_source_id)
    }

    pub fn assert_profile_guard(&self, source_id: &str, schema: &str) -> Result<()> {
        enforce_profile_guard(&self.guard, source_id, schema)
    }

    /// Resolve the schema for a source id.
    ///
    /// With `create_if_missing`, an unmapped source is registered under the
    /// canonical derived name and provisioned; an already-mapped schema is
    /// structurally probed and, when it turns out to be a legacy layout,
    /// remapped to the canonical name instead of repaired in place.
    pub async fn resolve(&self, source_id: &str, create_if_missing: bool) -> Result<String> {
        let sid = normalize_source_id(source_id, &self.default_source_id);
        let canonical = self.derive(&sid)?;
        let table = safe_ident(&self.table)?;

        let client = self.pool.get().await?;
        provision::ensure_global_tables(&client, table).await?;

        let mapped = client
            .query_opt(
                format!("SELECT schema_name FROM public.{table} WHERE source_id=$1").as_str(),
                &[&sid],
            )
            .await?;

        if let Some(row) = mapped {
            let schema = safe_ident(&row.get::<_, String>(0))?.to_string();

            if create_if_missing {
                if !provision::schema_matches_layout(&client, &schema).await? {
                    if !self.legacy_remap {
                        return Err(StoreError::LegacySchemaLayout {
                            source_id: sid,
                            schema,
                        });
                    }
                    // Never repair a foreign schema in place; move the
                    // mapping to the canonical dedicated schema.
                    warn!(
                        source_id = %sid,
                        from = %schema,
                        to = %canonical,
                        "legacy schema layout; remapping to canonical schema"
                    );
                    let now = now_utc();
                    client
                        .execute(
                            format!(
                                "UPDATE public.{table} \
                                 SET schema_name=$1, updated_at=$2 \
                                 WHERE source_id=$3"
                            )
                            .as_str(),
                            &[&canonical, &now, &sid],
                        )
                        .await?;
                    provision::provision_tenant_schema(&client, &canonical).await?;
                    self.assert_profile_guard(&sid, &canonical)?;
                    return Ok(canonical);
                }

                // Compatible mapped schema: idempotently ensure all objects.
                provision::provision_tenant_schema(&client, &schema).await?;
            }

            self.assert_profile_guard(&sid, &schema)?;
            return Ok(schema);
        }

        if !create_if_missing {
            return Err(StoreError::SchemaNotMapped { source_id: sid });
        }

        // First registration. Upserts keep concurrent provisioning of the
        // same source convergent without an external lock.
        let now = now_utc();
        client
            .execute(
                format!(
                    "INSERT INTO public.{table}(source_id, schema_name, created_at, updated_at) \
                     VALUES($1, $2, $3, $4) \
                     ON CONFLICT(source_id) DO UPDATE SET \
                       schema_name=EXCLUDED.schema_name, \
                       updated_at=EXCLUDED.updated_at"
                )
                .as_str(),
                &[&sid, &canonical, &now, &now],
            )
            .await?;
        client
            .execute(
                "INSERT INTO public.sources(id, label, enabled, is_default, created_at, updated_at) \
                 VALUES($1, $2, 1, 0, $3, $4) \
                 ON CONFLICT(id) DO UPDATE SET updated_at=EXCLUDED.updated_at",
                &[&sid, &sid, &now, &now],
            )
            .await?;

        provision::provision_tenant_schema(&client, &canonical).await?;
        self.assert_profile_guard(&sid, &canonical)?;
        info!(source_id = %sid, schema = %canonical, "registered tenant schema");
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_schema_name_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(
                derive_schema_name("assets_2", "sx", "default").unwrap(),
                "sx_assets_2"
            );
        }
    }

    #[test]
    fn test_derive_schema_name_folds_separators() {
        assert_eq!(
            derive_schema_name("vault.main-1", "media", "default").unwrap(),
            "media_vault_main_1"
        );
        assert_eq!(
            derive_schema_name("", "media", "fallback").unwrap(),
            "media_fallback"
        );
    }

    #[test]
    fn test_derive_schema_name_rejects_bad_prefix() {
        assert!(derive_schema_name("assets", "1bad", "default").is_err());
    }

    fn guard(enabled: bool, profile: Option<&str>) -> GuardPolicy {
        GuardPolicy {
            enabled,
            profile_index: profile.map(|p| p.to_string()),
        }
    }

    #[test]
    fn test_guard_blocks_cross_profile_schema() {
        // Source implies profile #2, schema token says profile #1.
        let err = enforce_profile_guard(&guard(true, None), "assets-2", "media_p01_assets")
            .unwrap_err();
        match err {
            StoreError::SchemaIndexMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_guard_blocks_source_profile_conflict() {
        let err = enforce_profile_guard(&guard(true, Some("3")), "assets-2", "media_p02_assets")
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaIndexMismatch { .. }));
    }

    #[test]
    fn test_guard_passes_matching_profiles() {
        enforce_profile_guard(&guard(true, Some("2")), "assets-2", "media_p02_assets").unwrap();
        enforce_profile_guard(&guard(true, None), "assets-1", "media_p01_assets_1").unwrap();
    }

    #[test]
    fn test_guard_only_applies_to_unified_schemas() {
        // Plain derived names carry no profile token.
        enforce_profile_guard(&guard(true, Some("3")), "assets-2", "media_assets_2").unwrap();
    }

    #[test]
    fn test_guard_can_be_disabled() {
        enforce_profile_guard(&guard(false, None), "assets-2", "media_p01_assets").unwrap();
    }

    #[test]
    fn test_guard_uses_configured_profile_without_source_index() {
        let err =
            enforce_profile_guard(&guard(true, Some("2")), "assets", "media_p01_assets")
                .unwrap_err();
        assert!(matches!(err, StoreError::SchemaIndexMismatch { .. }));
        enforce_profile_guard(&guard(true, Some("1")), "assets", "media_p01_assets").unwrap();
    }
}
