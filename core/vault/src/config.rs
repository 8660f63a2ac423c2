//! Vault configuration and on-disk layout.
//!
//! The configuration record lives at the vault root. In plain mode it is
//! pretty-printed JSON. In secure mode it is compact JSON wrapped in
//! base64 and a `pom` marker file sits next to it.

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::header::HeaderSet;
use reevault_common::{Error, Result};

/// Configuration file name in vault root.
pub const CONFIG_FILENAME: &str = "config";

/// Marker file whose presence switches the config to secure mode.
pub const SECURE_MARKER_FILENAME: &str = "pom";

/// Persisted wrapped key, base64.
pub const KEY_FILENAME: &str = "cey";

/// Directory holding encrypted document blobs.
pub const DATA_DIRNAME: &str = "data";

/// Reserved for content checksums.
pub const SHASUMS_DIRNAME: &str = "shasums";

/// Directory for the vault's log file.
pub const LOGS_DIRNAME: &str = "logs";

/// Extension of the vault root directory.
pub const VAULT_EXTENSION: &str = "reevault";

/// Extension of document blobs inside `data/`.
pub const BLOB_EXTENSION: &str = "ree";

const SECURE_MARKER_TEXT: &str = "Nothing here is what it seems.";

/// Version of this library, recorded in every config it writes.
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Vault configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Logical vault name.
    pub vault_name: String,
    /// When the vault was created.
    pub creation_date: DateTime<Utc>,
    /// When the vault was last written to.
    pub last_updated: DateTime<Utc>,
    /// Host that created the vault.
    pub creation_machine: String,
    /// Host that last wrote to the vault.
    pub updating_machine: String,
    /// User that created the vault.
    pub creation_user: String,
    /// User that last wrote to the vault.
    pub updating_user: String,
    /// Declared header fields.
    pub header_set: HeaderSet,
    /// Library version that created the vault.
    pub creation_version: String,
    /// Library version of the last write, if any.
    #[serde(default)]
    pub last_version: Option<String>,
}

impl ConfigRecord {
    /// Create a fresh record stamped with the current host and user.
    pub fn new(vault_name: impl Into<String>, header_set: HeaderSet) -> Self {
        let now = Utc::now();
        let machine = current_machine();
        let user = current_user();

        Self {
            vault_name: vault_name.into(),
            creation_date: now,
            last_updated: now,
            creation_machine: machine.clone(),
            updating_machine: machine,
            creation_user: user.clone(),
            updating_user: user,
            header_set,
            creation_version: LIBRARY_VERSION.to_string(),
            last_version: None,
        }
    }

    /// Refresh the update provenance after a write.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
        self.updating_machine = current_machine();
        self.updating_user = current_user();
        self.last_version = Some(LIBRARY_VERSION.to_string());
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Serialize to compact bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn current_machine() -> String {
    whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string())
}

fn current_user() -> String {
    whoami::username()
}

/// Reads and writes the config record and base64 side files of one vault.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
    secure: bool,
}

impl ConfigStore {
    /// Create a store rooted at a vault directory.
    pub fn new(root: impl Into<PathBuf>, secure: bool) -> Self {
        Self {
            root: root.into(),
            secure,
        }
    }

    /// Vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the config is written in secure mode.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Whether a config record exists.
    pub fn exists(&self) -> bool {
        self.root.join(CONFIG_FILENAME).exists()
    }

    /// Write the record in the store's mode.
    pub fn save(&self, record: &ConfigRecord) -> Result<()> {
        let path = self.root.join(CONFIG_FILENAME);

        if self.secure {
            fs::write(&path, STANDARD.encode(record.to_bytes()?))?;
            fs::write(
                self.root.join(SECURE_MARKER_FILENAME),
                STANDARD.encode(SECURE_MARKER_TEXT),
            )?;
        } else {
            fs::write(&path, record.to_json()?)?;
        }

        debug!(path = %path.display(), secure = self.secure, "Config saved");
        Ok(())
    }

    /// Read the record, detecting the mode from the marker file.
    ///
    /// The store adopts the detected mode so later saves keep it.
    pub fn load(&mut self) -> Result<ConfigRecord> {
        let path = self.root.join(CONFIG_FILENAME);
        if !path.exists() {
            return Err(Error::VaultDoesNotExist(self.root.clone()));
        }

        self.secure = self.root.join(SECURE_MARKER_FILENAME).exists();
        let raw = fs::read_to_string(&path)?;

        if self.secure {
            ConfigRecord::from_bytes(&decode_base64(&raw)?)
        } else {
            ConfigRecord::from_json(&raw)
        }
    }

    /// Persist raw bytes as base64 under the vault root.
    pub fn write_secure_info(&self, name: &str, data: &[u8]) -> Result<()> {
        fs::write(self.root.join(name), STANDARD.encode(data))?;
        Ok(())
    }

    /// Read base64 bytes written by [`ConfigStore::write_secure_info`].
    pub fn read_secure_info(&self, name: &str) -> Result<Vec<u8>> {
        let raw = fs::read_to_string(self.root.join(name))?;
        decode_base64(&raw)
    }
}

fn decode_base64(raw: &str) -> Result<Vec<u8>> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::Serialization(format!("Invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FieldKind;
    use tempfile::TempDir;

    fn record() -> ConfigRecord {
        ConfigRecord::new("notes", HeaderSet::default())
    }

    #[test]
    fn test_new_record_provenance() {
        let record = record();

        assert_eq!(record.vault_name, "notes");
        assert_eq!(record.creation_date, record.last_updated);
        assert_eq!(record.creation_user, record.updating_user);
        assert_eq!(record.creation_version, LIBRARY_VERSION);
        assert!(record.last_version.is_none());
    }

    #[test]
    fn test_touch_updates_provenance() {
        let mut record = record();
        let created = record.creation_date;

        record.touch();

        assert!(record.last_updated >= created);
        assert_eq!(record.creation_date, created);
        assert_eq!(record.last_version.as_deref(), Some(LIBRARY_VERSION));
    }

    #[test]
    fn test_plain_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::new(dir.path(), false);

        let mut original = record();
        original.header_set.add_field("owner", FieldKind::Single);
        store.save(&original).unwrap();

        let raw = fs::read_to_string(dir.path().join(CONFIG_FILENAME)).unwrap();
        assert!(raw.contains("\"vault_name\": \"notes\""));
        assert!(!dir.path().join(SECURE_MARKER_FILENAME).exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded, original);
        assert!(!store.is_secure());
    }

    #[test]
    fn test_secure_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path(), true);

        let original = record();
        store.save(&original).unwrap();

        let raw = fs::read_to_string(dir.path().join(CONFIG_FILENAME)).unwrap();
        assert!(!raw.contains("vault_name"));
        assert!(dir.path().join(SECURE_MARKER_FILENAME).exists());

        // Mode comes from the marker, not from the caller.
        let mut reader = ConfigStore::new(dir.path(), false);
        assert_eq!(reader.load().unwrap(), original);
        assert!(reader.is_secure());
    }

    #[test]
    fn test_load_missing_config() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::new(dir.path(), false);

        assert!(!store.exists());
        assert!(matches!(store.load(), Err(Error::VaultDoesNotExist(_))));
    }

    #[test]
    fn test_secure_info_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path(), false);

        store.write_secure_info(KEY_FILENAME, b"\x00\x01wrapped").unwrap();

        assert_eq!(
            store.read_secure_info(KEY_FILENAME).unwrap(),
            b"\x00\x01wrapped"
        );
    }

    #[test]
    fn test_secure_info_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(KEY_FILENAME), "not base64!!").unwrap();

        let store = ConfigStore::new(dir.path(), false);
        assert!(matches!(
            store.read_secure_info(KEY_FILENAME),
            Err(Error::Serialization(_))
        ));
    }
}
