//! Area identifiers.
//!
//! An [`AreaKey`] is the cache key used throughout the store. The store treats
//! it as opaque: two keys are the same area only when their strings are
//! byte-for-byte equal. CBS area codes carry their administrative level in a
//! two-letter prefix (`BU` buurt, `WK` wijk, `GM` gemeente), which the PDOK
//! backend uses to pick a collection.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Identifier for a buurt, wijk or gemeente.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AreaKey(String);

impl AreaKey {
    /// Creates a key from any string. No normalisation is applied.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the raw code.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Administrative level encoded in the code prefix, if recognised.
    pub fn kind(&self) -> Option<AreaKind> {
        AreaKind::from_code(&self.0)
    }

    /// Whether the key looks like a well-formed CBS code (`BU`/`WK`/`GM` + digits).
    pub fn is_cbs_code(&self) -> bool {
        cbs_code_pattern().is_match(&self.0)
    }
}

fn cbs_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(BU|WK|GM)\d{4,8}$").expect("valid CBS code pattern"))
}

impl fmt::Display for AreaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AreaKey {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for AreaKey {
    fn from(code: String) -> Self {
        Self(code)
    }
}

/// Administrative level of an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaKind {
    /// Neighbourhood (`BU` prefix).
    Buurt,
    /// District (`WK` prefix).
    Wijk,
    /// Municipality (`GM` prefix).
    Gemeente,
}

impl AreaKind {
    /// Classifies a code by its prefix.
    pub fn from_code(code: &str) -> Option<Self> {
        if code.starts_with("BU") {
            Some(Self::Buurt)
        } else if code.starts_with("WK") {
            Some(Self::Wijk)
        } else if code.starts_with("GM") {
            Some(Self::Gemeente)
        } else {
            None
        }
    }

    /// Lower-case singular name, as used in PDOK collection names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Buurt => "buurt",
            Self::Wijk => "wijk",
            Self::Gemeente => "gemeente",
        }
    }

    /// PDOK collection holding features of this level.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Buurt => "buurten",
            Self::Wijk => "wijken",
            Self::Gemeente => "gemeenten",
        }
    }

    /// Feature properties that may hold the area code, in lookup order.
    pub fn code_properties(&self) -> [&'static str; 3] {
        match self {
            Self::Buurt => ["buurtcode", "statcode", "code"],
            Self::Wijk => ["wijkcode", "statcode", "code"],
            Self::Gemeente => ["gemeentecode", "statcode", "code"],
        }
    }
}

impl fmt::Display for AreaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_equality_is_exact() {
        assert_eq!(AreaKey::new("BU03630000"), AreaKey::from("BU03630000"));
        assert_ne!(AreaKey::new("BU03630000"), AreaKey::new("bu03630000"));
        assert_ne!(AreaKey::new("BU03630000"), AreaKey::new("BU03630000 "));
    }

    #[test]
    fn test_kind_from_prefix() {
        assert_eq!(AreaKey::new("BU03630000").kind(), Some(AreaKind::Buurt));
        assert_eq!(AreaKey::new("WK036300").kind(), Some(AreaKind::Wijk));
        assert_eq!(AreaKey::new("GM0363").kind(), Some(AreaKind::Gemeente));
        assert_eq!(AreaKey::new("PV27").kind(), None);
        assert_eq!(AreaKey::new("").kind(), None);
    }

    #[test]
    fn test_cbs_code_validation() {
        assert!(AreaKey::new("BU03630000").is_cbs_code());
        assert!(AreaKey::new("GM0363").is_cbs_code());
        assert!(!AreaKey::new("BU").is_cbs_code());
        assert!(!AreaKey::new("XX0363").is_cbs_code());
        assert!(!AreaKey::new("GM0363a").is_cbs_code());
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(AreaKind::Buurt.collection(), "buurten");
        assert_eq!(AreaKind::Wijk.code_properties()[0], "wijkcode");
        assert_eq!(AreaKind::Gemeente.to_string(), "gemeente");
    }

    #[test]
    fn test_display_roundtrips_raw_code() {
        let key = AreaKey::new("WK036300");
        assert_eq!(key.to_string(), "WK036300");
        assert_eq!(key.as_str(), "WK036300");
    }
}
