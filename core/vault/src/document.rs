//! Versioned documents and their encrypted on-disk form.
//!
//! A document is a header plus an ordered map of version-id to payload.
//! On disk it is JSON, encrypted by the vault's provider, then base64.
//! Reading a document merges its versions in ascending order, later keys
//! overwriting earlier ones.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::header::{Header, HeaderSet, LATEST_KEY};
use reevault_common::{Error, Result};
use reevault_crypto::EncryptionProvider;

/// Monotonic per-document version identifier, starting at 1.
pub type VersionId = u64;

/// Document content: string keys to JSON values.
pub type Payload = serde_json::Map<String, Value>;

/// A write to a document: header changes plus a new body version.
///
/// Header entries with a `null` value remove the field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    /// Header fields to set or remove.
    #[serde(default)]
    pub header: Header,
    /// Payload stored as the new version.
    #[serde(default)]
    pub body: Payload,
}

impl DocumentUpdate {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update carrying only a body.
    pub fn from_body(body: Payload) -> Self {
        Self {
            header: Header::new(),
            body,
        }
    }

    /// Set a header field.
    pub fn with_header(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.header.insert(field.into(), value.into());
        self
    }

    /// Set a body key.
    pub fn with_body(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }
}

/// A decrypted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Logical name.
    pub name: String,
    /// Header, including the reserved `latest` field.
    pub header: Header,
    /// Every version ever written.
    pub body: BTreeMap<VersionId, Payload>,
}

impl Document {
    /// Create an empty document.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            header: Header::new(),
            body: BTreeMap::new(),
        }
    }

    /// Most recent version-id, as recorded in the header.
    pub fn latest(&self) -> Option<VersionId> {
        self.header.get(LATEST_KEY).and_then(Value::as_u64)
    }

    /// Id the next appended version will receive.
    pub fn next_version(&self) -> VersionId {
        self.body.keys().next_back().map_or(1, |last| last + 1)
    }

    /// Apply `update` as a new version.
    ///
    /// Only header fields declared in `header_set` are applied. The
    /// reserved `latest` field cannot be written by callers.
    pub fn append(&mut self, update: DocumentUpdate, header_set: &HeaderSet) -> VersionId {
        for (field, value) in update.header {
            if field == LATEST_KEY {
                warn!(document = %self.name, "Ignoring write to reserved header field");
                continue;
            }
            if !header_set.contains(&field) {
                warn!(document = %self.name, field = %field, "Ignoring undeclared header field");
                continue;
            }
            if value.is_null() {
                self.header.remove(&field);
            } else {
                self.header.insert(field, value);
            }
        }

        let version = self.next_version();
        self.body.insert(version, update.body);
        self.header.insert(LATEST_KEY.to_string(), Value::from(version));
        version
    }

    /// Header without the reserved `latest` field.
    pub fn public_header(&self) -> Header {
        let mut header = self.header.clone();
        header.remove(LATEST_KEY);
        header
    }

    /// All versions merged in ascending order.
    pub fn merged_body(&self) -> Payload {
        merge_versions(&self.body)
    }

    /// Serialize, encrypt and base64 encode.
    pub fn encode(&self, provider: &dyn EncryptionProvider) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        let sealed = provider.encrypt(&json)?;
        Ok(STANDARD.encode(sealed))
    }

    /// Inverse of [`Document::encode`].
    pub fn decode(text: &str, provider: &dyn EncryptionProvider) -> Result<Self> {
        let sealed = STANDARD
            .decode(text.trim())
            .map_err(|e| Error::Serialization(format!("Invalid document encoding: {}", e)))?;
        let json = provider.decrypt(&sealed)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Merge versions in ascending order; later keys win.
pub fn merge_versions(body: &BTreeMap<VersionId, Payload>) -> Payload {
    body.values().fold(Payload::new(), |mut merged, version| {
        for (key, value) in version {
            merged.insert(key.clone(), value.clone());
        }
        merged
    })
}

/// When a [`DocumentStore`] writes to disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushMode {
    /// Persist after every insert.
    #[default]
    Immediate,
    /// Persist on [`DocumentStore::sync`] or [`DocumentStore::close`].
    Deferred,
}

/// One document's blob, open for reading and appending.
pub struct DocumentStore<'a> {
    path: PathBuf,
    provider: &'a dyn EncryptionProvider,
    document: Document,
    dirty: bool,
}

impl<'a> DocumentStore<'a> {
    /// Start a new document that does not exist on disk yet.
    pub fn create(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        provider: &'a dyn EncryptionProvider,
    ) -> Self {
        Self {
            path: path.into(),
            provider,
            document: Document::new(name),
            dirty: false,
        }
    }

    /// Open an existing blob.
    pub fn open(path: impl Into<PathBuf>, provider: &'a dyn EncryptionProvider) -> Result<Self> {
        let path = path.into();
        let document = Self::read(&path, provider)?;

        Ok(Self {
            path,
            provider,
            document,
            dirty: false,
        })
    }

    /// Read and decrypt a blob without keeping it open.
    pub fn read(path: &Path, provider: &dyn EncryptionProvider) -> Result<Document> {
        let text = fs::read_to_string(path)?;
        Document::decode(&text, provider)
    }

    /// Current in-memory document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Blob location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a version, persisting according to `mode`.
    pub fn insert(
        &mut self,
        update: DocumentUpdate,
        header_set: &HeaderSet,
        mode: FlushMode,
    ) -> Result<VersionId> {
        let version = self.document.append(update, header_set);
        self.dirty = true;
        debug!(document = %self.document.name, version, "Version appended");

        if mode == FlushMode::Immediate {
            self.sync()?;
        }
        Ok(version)
    }

    /// Write pending changes atomically.
    pub fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let encoded = self.document.encode(self.provider)?;
        let temp_path = self.path.with_extension("tmp");

        fs::write(&temp_path, encoded)?;
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        self.dirty = false;
        debug!(path = %self.path.display(), "Document flushed");
        Ok(())
    }

    /// Flush and release the document.
    pub fn close(mut self) -> Result<Document> {
        self.sync()?;
        Ok(self.document)
    }
}

impl std::fmt::Debug for DocumentStore<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("path", &self.path)
            .field("name", &self.document.name)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FieldKind;
    use reevault_crypto::{Cipher, CipherProvider, KdfParams};
    use serde_json::json;
    use tempfile::TempDir;

    fn provider() -> CipherProvider {
        let mut provider = CipherProvider::new(Cipher::Aes).with_kdf_params(KdfParams::low_memory());
        provider.start_encryption(b"password").unwrap();
        provider
    }

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn test_versions_start_at_one_and_increase() {
        let set = HeaderSet::default();
        let mut doc = Document::new("doc");

        assert_eq!(doc.append(DocumentUpdate::new().with_body("a", 1), &set), 1);
        assert_eq!(doc.append(DocumentUpdate::new().with_body("a", 2), &set), 2);
        assert_eq!(doc.latest(), Some(2));
        assert_eq!(doc.body.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_merge_later_versions_win() {
        let set = HeaderSet::default();
        let mut doc = Document::new("doc");

        doc.append(DocumentUpdate::from_body(payload(json!({"a": 1, "b": 2}))), &set);
        doc.append(DocumentUpdate::from_body(payload(json!({"b": 3, "c": 4}))), &set);

        assert_eq!(Value::Object(doc.merged_body()), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_header_rules() {
        let set = HeaderSet::from_fields([("tags", FieldKind::List), ("owner", FieldKind::Single)]);
        let mut doc = Document::new("doc");

        doc.append(
            DocumentUpdate::new()
                .with_header("tags", json!(["x"]))
                .with_header("owner", "ana")
                .with_header("colour", "red")
                .with_header(LATEST_KEY, 99),
            &set,
        );

        assert_eq!(doc.header.get("tags"), Some(&json!(["x"])));
        assert!(!doc.header.contains_key("colour"));
        assert_eq!(doc.latest(), Some(1));

        doc.append(DocumentUpdate::new().with_header("owner", Value::Null), &set);
        assert!(!doc.header.contains_key("owner"));
        assert_eq!(doc.header.get("tags"), Some(&json!(["x"])));
        assert!(!doc.public_header().contains_key(LATEST_KEY));
    }

    #[test]
    fn test_store_roundtrip_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.ree");
        let provider = provider();
        let set = HeaderSet::default();

        let mut store = DocumentStore::create(&path, "doc", &provider);
        store
            .insert(DocumentUpdate::new().with_body("k", "v"), &set, FlushMode::Immediate)
            .unwrap();
        store.close().unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("\"k\""));

        let mut reopened = DocumentStore::open(&path, &provider).unwrap();
        assert_eq!(reopened.document().name, "doc");
        let version = reopened
            .insert(DocumentUpdate::new().with_body("k", "w"), &set, FlushMode::Immediate)
            .unwrap();
        assert_eq!(version, 2);

        let doc = DocumentStore::read(&path, &provider).unwrap();
        assert_eq!(doc.merged_body().get("k"), Some(&json!("w")));
        assert!(!dir.path().join("doc.tmp").exists());
    }

    #[test]
    fn test_deferred_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.ree");
        let provider = provider();
        let set = HeaderSet::default();

        let mut store = DocumentStore::create(&path, "doc", &provider);
        store
            .insert(DocumentUpdate::new().with_body("k", 1), &set, FlushMode::Deferred)
            .unwrap();
        assert!(!path.exists());

        store.sync().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_decode_with_wrong_keys_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.ree");
        let set = HeaderSet::default();

        let writer = provider();
        let mut store = DocumentStore::create(&path, "doc", &writer);
        store
            .insert(DocumentUpdate::new().with_body("k", 1), &set, FlushMode::Immediate)
            .unwrap();

        let other = provider();
        assert!(DocumentStore::read(&path, &other).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn merge_matches_sequential_overwrite(
                versions in proptest::collection::vec(
                    proptest::collection::btree_map("[a-d]", 0i64..100, 0..4),
                    1..6,
                )
            ) {
                let set = HeaderSet::default();
                let mut doc = Document::new("doc");
                let mut expected = Payload::new();

                for version in &versions {
                    let mut update = DocumentUpdate::new();
                    for (key, value) in version {
                        update = update.with_body(key.clone(), *value);
                        expected.insert(key.clone(), Value::from(*value));
                    }
                    doc.append(update, &set);
                }

                prop_assert_eq!(doc.latest(), Some(versions.len() as u64));
                prop_assert_eq!(doc.merged_body(), expected);
            }
        }
    }
}
