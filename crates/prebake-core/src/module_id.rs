//! Module identifiers.
//!
//! A module is first known by the raw absolute URL its specifier resolved to
//! (*tentative*), and later also by the canonical URL the fetcher chain
//! settled on (*canonical*). The raw absolute form is deliberately kept as
//! the exact string produced by resolution: two specifiers that differ only
//! in percent-encoding stay distinct until canonicalization proves them
//! equal.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use url::Url;

/// Identifier for a module: a raw absolute URL plus, once known, the
/// canonical URL used to decide module identity.
///
/// Ids are immutable once created; canonicalization produces a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleId {
    abs: String,
    canon: Option<Url>,
}

impl ModuleId {
    /// A tentative id known only by its raw absolute URL.
    pub fn tentative(abs: impl Into<String>) -> Self {
        Self {
            abs: abs.into(),
            canon: None,
        }
    }

    /// An id carrying both the absolute and the canonical URL.
    pub fn canonical(abs: impl Into<String>, canon: Url) -> Self {
        Self {
            abs: abs.into(),
            canon: Some(canon),
        }
    }

    /// Produce the canonical form of this id.
    pub fn canonicalize(&self, canon: Url) -> Self {
        Self {
            abs: self.abs.clone(),
            canon: Some(canon),
        }
    }

    /// The raw absolute URL this module was first addressed by.
    pub fn abs(&self) -> &str {
        &self.abs
    }

    /// The canonical URL, when canonicalization has happened.
    pub fn canon(&self) -> Option<&Url> {
        self.canon.as_ref()
    }

    pub fn is_canonical(&self) -> bool {
        self.canon.is_some()
    }

    /// The equality key: the canonical URL string when present, the raw
    /// absolute URL string otherwise.
    pub fn key(&self) -> &str {
        match &self.canon {
            Some(canon) => canon.as_str(),
            None => &self.abs,
        }
    }

    /// The absolute-URL key, always present.
    pub fn abs_key(&self) -> &str {
        &self.abs
    }

    /// The canonical-URL key, when present.
    pub fn canon_key(&self) -> Option<&str> {
        self.canon.as_ref().map(Url::as_str)
    }
}

impl PartialEq for ModuleId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ModuleId {}

impl Hash for ModuleId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tentative_key_is_raw_absolute() {
        let id = ModuleId::tentative("file:///src/alert( 1 ).js");
        assert_eq!(id.key(), "file:///src/alert( 1 ).js");
        assert!(!id.is_canonical());
    }

    #[test]
    fn canonical_key_prefers_canonical_url() {
        let canon = Url::parse("file:///src/alert(%201%20).js").unwrap();
        let id = ModuleId::canonical("file:///src/alert( 1 ).js", canon.clone());
        assert_eq!(id.key(), canon.as_str());
        assert_eq!(id.abs(), "file:///src/alert( 1 ).js");
    }

    #[test]
    fn ids_with_same_canonical_url_are_equal() {
        let canon = Url::parse("file:///src/a.js").unwrap();
        let a = ModuleId::canonical("file:///src/a.js", canon.clone());
        let b = ModuleId::canonical("file:///./src/a.js", canon);
        assert_eq!(a, b);
    }

    #[test]
    fn tentative_ids_differing_in_encoding_are_distinct() {
        let a = ModuleId::tentative("file:///x/a b.js");
        let b = ModuleId::tentative("file:///x/a%20b.js");
        assert_ne!(a, b);
    }

    #[test]
    fn canonicalize_preserves_raw_absolute() {
        let id = ModuleId::tentative("file:///x/a b.js");
        let canon = Url::parse("file:///x/a%20b.js").unwrap();
        let canonical = id.canonicalize(canon);
        assert_eq!(canonical.abs(), "file:///x/a b.js");
        assert!(canonical.is_canonical());
    }
}
