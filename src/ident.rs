//! Identifier safety
//!
//! Every string that ends up interpolated into DDL/DML goes through this
//! module first. `safe_ident` is the single trust boundary for dynamically
//! composed SQL; a rejection aborts the operation and is never coerced.

use crate::error::{Result, StoreError};

/// Normalize a raw source id into the restricted tenant-id alphabet.
///
/// Strips whitespace, substitutes `fallback` when blank, drops every
/// character outside `[A-Za-z0-9._-]`, and falls back again if nothing
/// survives. Pure and idempotent.
pub fn normalize_source_id(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    let base = if trimmed.is_empty() {
        let fb = fallback.trim();
        if fb.is_empty() { "default" } else { fb }
    } else {
        trimmed
    };

    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

/// Accept a string as a SQL identifier or fail.
///
/// Grammar: `^[A-Za-z_][A-Za-z0-9_]*$`. Call this immediately before any
/// interpolation into DDL/DML that cannot be parameterized.
pub fn safe_ident(name: &str) -> Result<&str> {
    let s = name.trim();
    let mut chars = s.chars();

    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if !valid {
        return Err(StoreError::InvalidIdentifier {
            name: name.to_string(),
        });
    }
    Ok(s)
}

/// Extract a trailing profile index from a source id or configured profile
/// value: `assets_2`, `assets-2` and `vault_p2` all yield 2. Indices start
/// at 1; a trailing zero is not a profile.
pub fn trailing_profile_index(value: &str) -> Option<u32> {
    let s = value.trim().to_ascii_lowercase();
    if s.is_empty() {
        return None;
    }
    let re = regex::Regex::new(r"(?:^|[_-])(?:p)?(\d{1,2})$").unwrap();
    let n: u32 = re.captures(&s)?.get(1)?.as_str().parse().ok()?;
    (n >= 1).then_some(n)
}

/// Extract the profile token embedded in a unified schema name.
///
/// Unified schema convention examples:
/// - `media_p01_assets_1`
/// - `myprefix_p02`
pub fn schema_profile_index(schema_name: &str) -> Option<u32> {
    let s = schema_name.trim().to_ascii_lowercase();
    if s.is_empty() {
        return None;
    }
    let re = regex::Regex::new(r"(?:^|_)p(\d{2})(?:_|$)").unwrap();
    let n: u32 = re.captures(&s)?.get(1)?.as_str().parse().ok()?;
    (n >= 1).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_and_filters() {
        assert_eq!(normalize_source_id("Assets 1!", "default"), "Assets1");
        assert_eq!(normalize_source_id("  vault-a  ", "default"), "vault-a");
        assert_eq!(normalize_source_id("a.b_c-d", "default"), "a.b_c-d");
    }

    #[test]
    fn test_normalize_fallback() {
        assert_eq!(normalize_source_id("", "default"), "default");
        assert_eq!(normalize_source_id("   ", "default"), "default");
        assert_eq!(normalize_source_id("!!!", "default"), "default");
        assert_eq!(normalize_source_id("", ""), "default");
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in ["Assets 1!", "", "   ", "a.b-c_9", "!!!"] {
            let once = normalize_source_id(raw, "fb");
            let twice = normalize_source_id(&once, "fb");
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_safe_ident_accepts() {
        assert_eq!(safe_ident("sx_assets_2").unwrap(), "sx_assets_2");
        assert_eq!(safe_ident("_private").unwrap(), "_private");
        assert_eq!(safe_ident("  padded  ").unwrap(), "padded");
    }

    #[test]
    fn test_safe_ident_rejects() {
        assert!(safe_ident("sx;DROP SCHEMA public").is_err());
        assert!(safe_ident("sx.bad").is_err());
        assert!(safe_ident("1abc").is_err());
        assert!(safe_ident("").is_err());
        assert!(safe_ident("has space").is_err());
    }

    #[test]
    fn test_trailing_profile_index() {
        assert_eq!(trailing_profile_index("assets_2"), Some(2));
        assert_eq!(trailing_profile_index("assets-2"), Some(2));
        assert_eq!(trailing_profile_index("vault_p3"), Some(3));
        assert_eq!(trailing_profile_index("2"), Some(2));
        assert_eq!(trailing_profile_index("assets_0"), None);
        assert_eq!(trailing_profile_index("assets"), None);
        assert_eq!(trailing_profile_index(""), None);
    }

    #[test]
    fn test_schema_profile_index() {
        assert_eq!(schema_profile_index("media_p01_assets_1"), Some(1));
        assert_eq!(schema_profile_index("myprefix_p02"), Some(2));
        assert_eq!(schema_profile_index("p03_things"), Some(3));
        assert_eq!(schema_profile_index("media_assets_2"), None);
        assert_eq!(schema_profile_index("media_p1_assets"), None);
        assert_eq!(schema_profile_index("media_p00"), None);
    }
}
