//! Header schema.
//!
//! A vault's header set names the metadata fields documents may carry and
//! how each one is indexed. The set only ever grows: once a field is known
//! it keeps its kind for the lifetime of the vault.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use reevault_common::{Error, Result};

/// Reserved header key holding a document's most recent version-id.
pub const LATEST_KEY: &str = "latest";

/// Document header: field name to JSON value.
pub type Header = serde_json::Map<String, serde_json::Value>;

/// How a header field is indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// One scalar value per document.
    Single,
    /// A list of values, each indexed to the documents carrying it.
    List,
    /// Nested mapping. Reserved, not indexed.
    Tree,
    /// Kind written by a newer version; ignored when indexing.
    #[serde(other)]
    Unknown,
}

impl FromStr for FieldKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(FieldKind::Single),
            "list" => Ok(FieldKind::List),
            "tree" => Ok(FieldKind::Tree),
            other => Err(Error::InvalidInput(format!("Unknown field kind: {}", other))),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKind::Single => "single",
            FieldKind::List => "list",
            FieldKind::Tree => "tree",
            FieldKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Additive-only mapping of header field names to their kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderSet(BTreeMap<String, FieldKind>);

impl HeaderSet {
    /// Create an empty header set.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Build from explicit fields. Later duplicates do not retype earlier ones.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldKind)>,
        S: Into<String>,
    {
        let mut set = Self::empty();
        for (name, kind) in fields {
            set.add_field(name, kind);
        }
        set
    }

    /// Insert a field if it is not present yet.
    ///
    /// Returns `true` if the field was inserted. Existing fields are never
    /// retyped and the reserved [`LATEST_KEY`] is refused.
    pub fn add_field(&mut self, name: impl Into<String>, kind: FieldKind) -> bool {
        let name = name.into();
        if name.is_empty() || name == LATEST_KEY || self.0.contains_key(&name) {
            return false;
        }
        self.0.insert(name, kind);
        true
    }

    /// Add every field of `other` that is missing here.
    pub fn merge(&mut self, other: &HeaderSet) {
        for (name, kind) in &other.0 {
            self.add_field(name.clone(), *kind);
        }
    }

    /// Kind of a field, if declared.
    pub fn kind(&self, name: &str) -> Option<FieldKind> {
        self.0.get(name).copied()
    }

    /// Whether a field is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterate over declared fields.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldKind)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no field is declared.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for HeaderSet {
    /// `urls` and `tags`, both lists.
    fn default() -> Self {
        Self::from_fields([("urls", FieldKind::List), ("tags", FieldKind::List)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set() {
        let set = HeaderSet::default();
        assert_eq!(set.kind("urls"), Some(FieldKind::List));
        assert_eq!(set.kind("tags"), Some(FieldKind::List));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_add_field_is_additive_only() {
        let mut set = HeaderSet::default();

        assert!(set.add_field("owner", FieldKind::Single));
        assert!(!set.add_field("owner", FieldKind::List));
        assert!(!set.add_field("tags", FieldKind::Single));

        assert_eq!(set.kind("owner"), Some(FieldKind::Single));
        assert_eq!(set.kind("tags"), Some(FieldKind::List));
    }

    #[test]
    fn test_reserved_field_refused() {
        let mut set = HeaderSet::empty();
        assert!(!set.add_field(LATEST_KEY, FieldKind::Single));
        assert!(!set.add_field("", FieldKind::Single));
        assert!(set.is_empty());
    }

    #[test]
    fn test_merge_keeps_existing_kinds() {
        let mut ours = HeaderSet::from_fields([("tags", FieldKind::List)]);
        let theirs = HeaderSet::from_fields([("tags", FieldKind::Single), ("owner", FieldKind::Single)]);

        ours.merge(&theirs);

        assert_eq!(ours.kind("tags"), Some(FieldKind::List));
        assert_eq!(ours.kind("owner"), Some(FieldKind::Single));
    }

    #[test]
    fn test_unknown_kind_deserializes() {
        let set: HeaderSet = serde_json::from_str(r#"{"tags":"list","shape":"hexagon"}"#).unwrap();
        assert_eq!(set.kind("shape"), Some(FieldKind::Unknown));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("LIST".parse::<FieldKind>().unwrap(), FieldKind::List);
        assert!("graph".parse::<FieldKind>().is_err());
    }
}
