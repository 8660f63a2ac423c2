//! In-memory header index.
//!
//! Rebuilt from disk by decrypting every blob under `data/`. Holds the
//! header of each document and, per indexed field, which documents carry
//! which value.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::BLOB_EXTENSION;
use crate::document::DocumentStore;
use crate::header::{FieldKind, Header, HeaderSet};
use reevault_common::Result;
use reevault_crypto::EncryptionProvider;

/// Index entry for one header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEntry {
    /// Value to the sorted names of the documents carrying it.
    Values(BTreeMap<String, Vec<String>>),
    /// Last value seen for a `single` field. Not searchable.
    Single(String),
}

/// Header index for one vault.
#[derive(Debug, Default, Clone)]
pub struct HeaderIndex {
    headers: BTreeMap<String, Header>,
    groups: BTreeMap<String, GroupEntry>,
}

impl HeaderIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index with a fresh scan of `data_dir`.
    ///
    /// Blobs are visited in sorted filename order.
    pub fn rebuild(
        &mut self,
        data_dir: &Path,
        provider: &dyn EncryptionProvider,
        header_set: &HeaderSet,
    ) -> Result<()> {
        let mut fresh = HeaderIndex::new();

        for path in blob_paths(data_dir)? {
            let document = DocumentStore::read(&path, provider)?;
            fresh.index_document(&document.name, document.public_header(), header_set);
        }

        debug!(documents = fresh.headers.len(), "Header index rebuilt");
        *self = fresh;
        Ok(())
    }

    /// Add one document's header.
    pub fn index_document(&mut self, name: &str, header: Header, header_set: &HeaderSet) {
        for (field, value) in &header {
            match header_set.kind(field) {
                Some(FieldKind::List) => {
                    let entry = self
                        .groups
                        .entry(field.clone())
                        .or_insert_with(|| GroupEntry::Values(BTreeMap::new()));

                    if let GroupEntry::Values(values) = entry {
                        for item in list_items(value) {
                            let names = values.entry(item).or_default();
                            if let Err(pos) = names.binary_search_by(|n| n.as_str().cmp(name)) {
                                names.insert(pos, name.to_string());
                            }
                        }
                    }
                }
                Some(FieldKind::Single) => {
                    self.groups
                        .insert(field.clone(), GroupEntry::Single(scalar(value)));
                }
                Some(FieldKind::Tree) | Some(FieldKind::Unknown) => {}
                None => {
                    warn!(document = name, field = %field, "Header field not in header set");
                }
            }
        }

        self.headers.insert(name.to_string(), header);
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.headers.clear();
        self.groups.clear();
    }

    /// All headers by document name.
    pub fn headers(&self) -> &BTreeMap<String, Header> {
        &self.headers
    }

    /// Header of one document.
    pub fn header(&self, name: &str) -> Option<&Header> {
        self.headers.get(name)
    }

    /// Whether a document is indexed.
    pub fn contains(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Field groups.
    pub fn groups(&self) -> &BTreeMap<String, GroupEntry> {
        &self.groups
    }

    /// Group of one field.
    pub fn group(&self, field: &str) -> Option<&GroupEntry> {
        self.groups.get(field)
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn list_items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(scalar).collect(),
        Value::Null => Vec::new(),
        other => vec![scalar(other)],
    }
}

/// Blob files under `data_dir`, sorted by filename.
///
/// A missing directory yields no blobs.
pub fn blob_paths(data_dir: &Path) -> Result<Vec<PathBuf>> {
    if !data_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == BLOB_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
