//! Named scalar metadata carried by the device descriptor.
//!
//! Metadata is the channel through which scan parameters (`xstep`, `xn`, ...)
//! reach the controller and through which per-cell provenance (`xi`, `zi`)
//! reaches the data files. Values can also be injected from the command line
//! as typed `key=value` overrides.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ScanError;

/// Longest accepted metadata key
pub const META_KEY_MAX: usize = 32;

/// Largest number of entries the metadata table holds
pub const META_MAX_ENTRIES: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetaValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetaValue::Int(_) => "integer",
            MetaValue::Float(_) => "float",
            MetaValue::Str(_) => "string",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view; integers widen
    pub fn as_float(&self) -> Option<f64> {
        match self {
            MetaValue::Float(v) => Some(*v),
            MetaValue::Int(v) => Some(*v as f64),
            MetaValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::Str(v) => write!(f, "\"{v}\""),
        }
    }
}

/// Check a key against the metadata table's naming rules
pub fn validate_key(key: &str) -> Result<(), ScanError> {
    if key.is_empty() {
        return Err(ScanError::Config("metadata key must not be empty".to_string()));
    }
    if key.len() > META_KEY_MAX {
        return Err(ScanError::Config(format!(
            "metadata key '{key}' exceeds {META_KEY_MAX} characters"
        )));
    }
    if key.chars().any(|c| c.is_whitespace() || c == '=') {
        return Err(ScanError::Config(format!(
            "metadata key '{key}' contains whitespace or '='"
        )));
    }
    Ok(())
}

/// Type requested for a command-line override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    Int,
    Float,
    Str,
}

/// An override as typed on the command line, not yet parsed
#[derive(Debug, Clone, PartialEq)]
pub struct RawMetaOverride {
    pub kind: MetaKind,
    pub text: String,
}

/// Collect raw `key=value` strings from each typed flag into one list.
///
/// Nothing is validated here; see [`resolve_overrides`].
pub fn collect_overrides(ints: &[String], floats: &[String], strings: &[String]) -> Vec<RawMetaOverride> {
    let tagged = |kind: MetaKind, items: &[String]| {
        items
            .iter()
            .map(|text| RawMetaOverride {
                kind,
                text: text.clone(),
            })
            .collect::<Vec<_>>()
    };

    let mut raw = tagged(MetaKind::Int, ints);
    raw.extend(tagged(MetaKind::Float, floats));
    raw.extend(tagged(MetaKind::Str, strings));
    raw
}

/// Parse and validate every collected override in one pass.
///
/// Fails on the first malformed entry so that no partial set of overrides is
/// ever applied to the descriptor.
pub fn resolve_overrides(raw: &[RawMetaOverride]) -> Result<Vec<(String, MetaValue)>, ScanError> {
    raw.iter().map(resolve_one).collect()
}

fn resolve_one(raw: &RawMetaOverride) -> Result<(String, MetaValue), ScanError> {
    let (key, value) = raw.text.split_once('=').ok_or_else(|| {
        ScanError::Config(format!(
            "metadata override '{}' must have the form key=value",
            raw.text
        ))
    })?;
    let key = key.trim();
    validate_key(key)?;

    let value = value.trim();
    let parsed = match raw.kind {
        MetaKind::Int => value.parse::<i64>().map(MetaValue::Int).map_err(|_| {
            ScanError::Config(format!("metadata override '{key}': '{value}' is not an integer"))
        })?,
        MetaKind::Float => value.parse::<f64>().map(MetaValue::Float).map_err(|_| {
            ScanError::Config(format!("metadata override '{key}': '{value}' is not a number"))
        })?,
        MetaKind::Str => MetaValue::Str(value.to_string()),
    };

    Ok((key.to_string(), parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_collect_keeps_flag_types() {
        let raw = collect_overrides(
            &strings(&["xn=5"]),
            &strings(&["standoff_in=1.5"]),
            &strings(&["gas=argon"]),
        );
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].kind, MetaKind::Int);
        assert_eq!(raw[1].kind, MetaKind::Float);
        assert_eq!(raw[2].kind, MetaKind::Str);
    }

    #[test]
    fn test_resolve_typed_values() {
        let raw = collect_overrides(
            &strings(&["xn=5"]),
            &strings(&["standoff_in=1.5", "zini_in=-2"]),
            &strings(&["gas = argon"]),
        );
        let resolved = resolve_overrides(&raw).unwrap();
        assert_eq!(resolved[0], ("xn".to_string(), MetaValue::Int(5)));
        assert_eq!(resolved[1], ("standoff_in".to_string(), MetaValue::Float(1.5)));
        assert_eq!(resolved[2], ("zini_in".to_string(), MetaValue::Float(-2.0)));
        assert_eq!(resolved[3], ("gas".to_string(), MetaValue::Str("argon".to_string())));
    }

    #[test]
    fn test_resolve_rejects_malformed_entries() {
        let missing_eq = collect_overrides(&strings(&["xn"]), &[], &[]);
        assert!(matches!(resolve_overrides(&missing_eq), Err(ScanError::Config(_))));

        let bad_int = collect_overrides(&strings(&["xn=1.5"]), &[], &[]);
        assert!(matches!(resolve_overrides(&bad_int), Err(ScanError::Config(_))));

        let empty_key = collect_overrides(&[], &strings(&["=2.0"]), &[]);
        assert!(matches!(resolve_overrides(&empty_key), Err(ScanError::Config(_))));
    }

    #[test]
    fn test_float_view_widens_integers() {
        assert_eq!(MetaValue::Int(4).as_float(), Some(4.0));
        assert_eq!(MetaValue::Float(0.5).as_int(), None);
        assert_eq!(MetaValue::Str("a".into()).as_float(), None);
    }

    #[test]
    fn test_validate_key_length() {
        assert!(validate_key("xstep").is_ok());
        assert!(validate_key(&"k".repeat(META_KEY_MAX + 1)).is_err());
        assert!(validate_key("two words").is_err());
    }
}
