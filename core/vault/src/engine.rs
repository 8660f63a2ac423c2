//! Vault engine.
//!
//! `VaultEngine` is the single entry point for a vault on disk. Lifecycle
//! calls (`create`, `load`, `close`) need exclusive access. Data calls take
//! `&self` and guard shared state internally, so a loaded engine can be
//! shared between threads within one process.
//!
//! Locking is advisory and in-process only. Two processes opening the same
//! vault are not coordinated.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::config::{
    ConfigRecord, ConfigStore, BLOB_EXTENSION, CONFIG_FILENAME, DATA_DIRNAME, KEY_FILENAME,
    LOGS_DIRNAME, SHASUMS_DIRNAME, VAULT_EXTENSION,
};
use crate::document::{DocumentStore, DocumentUpdate, FlushMode, Payload, VersionId};
use crate::header::{FieldKind, Header, HeaderSet};
use crate::index::{blob_paths, HeaderIndex};
use crate::lock::LockTable;
use crate::logger::VaultLogger;
use crate::query::QueryEngine;
use reevault_common::{DocumentName, Error, Result, VaultName};
use reevault_crypto::{
    Blake2Hasher, CipherProvider, ContentHasher, EncryptionProvider, EncryptionType, KdfParams,
    WrappedKey,
};

/// Default minimum password length.
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 4;

/// Body returned by [`VaultEngine::read_file`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentBody {
    /// Every version merged, later keys winning.
    Merged(Payload),
    /// Each version as written.
    History(BTreeMap<VersionId, Payload>),
}

impl DocumentBody {
    /// Merged payload, if this is a merged body.
    pub fn as_merged(&self) -> Option<&Payload> {
        match self {
            DocumentBody::Merged(payload) => Some(payload),
            DocumentBody::History(_) => None,
        }
    }

    /// Version history, if this is a history body.
    pub fn as_history(&self) -> Option<&BTreeMap<VersionId, Payload>> {
        match self {
            DocumentBody::History(history) => Some(history),
            DocumentBody::Merged(_) => None,
        }
    }
}

/// A document as returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentView {
    /// Header without the reserved `latest` field.
    pub header: Header,
    /// Merged body or full history.
    pub body: DocumentBody,
}

/// Handle to one vault directory.
pub struct VaultEngine {
    name: VaultName,
    path: PathBuf,
    header_set: RwLock<HeaderSet>,
    provider: Box<dyn EncryptionProvider>,
    hasher: Box<dyn ContentHasher>,
    index: RwLock<HeaderIndex>,
    locks: LockTable,
    config_store: ConfigStore,
    config: Mutex<Option<ConfigRecord>>,
    min_password_length: usize,
    file_logging: bool,
    logger: Option<VaultLogger>,
}

impl VaultEngine {
    /// Build a handle for `<parent>/<name>.reevault`.
    ///
    /// No filesystem access happens here. `header_override` replaces the
    /// default header set.
    ///
    /// # Errors
    /// - [`Error::MissingEncryptionType`] for an unknown selector
    /// - [`Error::InvalidInput`] for an invalid vault name
    pub fn new(
        name: &str,
        parent: impl AsRef<Path>,
        encryption: &str,
        header_override: Option<HeaderSet>,
    ) -> Result<Self> {
        let selector: EncryptionType = encryption.parse()?;
        let provider = CipherProvider::from_type(selector);
        Self::with_provider(name, parent, Box::new(provider), header_override)
    }

    /// Build a handle around a caller-supplied provider.
    pub fn with_provider(
        name: &str,
        parent: impl AsRef<Path>,
        provider: Box<dyn EncryptionProvider>,
        header_override: Option<HeaderSet>,
    ) -> Result<Self> {
        let name = VaultName::new(name)?;
        let path = parent
            .as_ref()
            .join(format!("{}.{}", name.as_str(), VAULT_EXTENSION));

        Ok(Self {
            name,
            config_store: ConfigStore::new(&path, false),
            path,
            header_set: RwLock::new(header_override.unwrap_or_default()),
            provider,
            hasher: Box::new(Blake2Hasher),
            index: RwLock::new(HeaderIndex::new()),
            locks: LockTable::new(),
            config: Mutex::new(None),
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            file_logging: true,
            logger: None,
        })
    }

    /// Write the config in secure mode when the vault is created.
    pub fn secure_config(mut self, secure: bool) -> Self {
        self.config_store = ConfigStore::new(&self.path, secure);
        self
    }

    /// Use `params` for password-based key wrapping.
    ///
    /// Replaces the provider with a [`CipherProvider`] of the same cipher.
    pub fn kdf_params(mut self, params: KdfParams) -> Self {
        let cipher = self.provider.cipher();
        self.provider = Box::new(CipherProvider::new(cipher).with_kdf_params(params));
        self
    }

    /// Minimum accepted password length, in characters.
    pub fn min_password_length(mut self, min: usize) -> Self {
        self.min_password_length = min;
        self
    }

    /// Whether to install the per-vault file logger.
    pub fn file_logging(mut self, enabled: bool) -> Self {
        self.file_logging = enabled;
        self
    }

    /// Replace the name hasher. Must stay the same for a vault's lifetime.
    pub fn hasher(mut self, hasher: Box<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Create the vault on disk, then load it.
    ///
    /// # Errors
    /// - [`Error::MissingUserPassword`] / [`Error::InsecureUserPassword`]
    /// - [`Error::VaultExistsAtLocation`] if a config already exists
    pub fn create(&mut self, password: &str) -> Result<()> {
        self.check_password(password)?;

        if self.exists() {
            return Err(Error::VaultExistsAtLocation(self.path.clone()));
        }

        for dir in [DATA_DIRNAME, SHASUMS_DIRNAME, LOGS_DIRNAME] {
            fs::create_dir_all(self.path.join(dir))?;
        }
        restrict_permissions(&self.path)?;
        self.init_logger();

        let wrapped = self.provider.start_encryption(password.as_bytes())?;
        let record = ConfigRecord::new(self.name.as_str(), self.header_set.read().clone());
        self.config_store.save(&record)?;
        self.config_store
            .write_secure_info(KEY_FILENAME, &wrapped.to_bytes()?)?;

        info!(
            vault = %self.name,
            path = %self.path.display(),
            cipher = %self.provider.cipher(),
            secure = self.config_store.is_secure(),
            "Vault created"
        );

        self.load(password)
    }

    /// Unlock an existing vault.
    ///
    /// # Errors
    /// - [`Error::MissingUserPassword`] / [`Error::InsecureUserPassword`]
    /// - [`Error::VaultDoesNotExist`] if there is no config
    /// - [`Error::WrongUserPassword`] if the key cannot be unwrapped
    pub fn load(&mut self, password: &str) -> Result<()> {
        self.check_password(password)?;

        if !self.exists() {
            return Err(Error::VaultDoesNotExist(self.path.clone()));
        }
        self.init_logger();

        let record = self.config_store.load()?;
        self.header_set.write().merge(&record.header_set);

        let wrapped = WrappedKey::from_bytes(&self.config_store.read_secure_info(KEY_FILENAME)?)?;
        if let Err(e) = self.provider.unwrap_encryption(password.as_bytes(), &wrapped) {
            debug!(error = %e, "Key unwrap failed");
            self.provider.stop_encryption();
            return Err(Error::WrongUserPassword);
        }

        *self.config.lock() = Some(record);
        self.rebuild_index()?;

        info!(vault = %self.name, documents = self.index.read().len(), "Vault loaded");
        Ok(())
    }

    /// Number of document blobs. Works without unlocking.
    pub fn count(&self) -> Result<usize> {
        Ok(blob_paths(&self.data_dir())?.len())
    }

    /// Declare a header field if it is not declared yet.
    ///
    /// Returns whether the field was added. A loaded vault persists the
    /// new schema immediately.
    pub fn add_header_field(&self, name: &str, kind: FieldKind) -> Result<bool> {
        let inserted = self.header_set.write().add_field(name, kind);
        if !inserted {
            debug!(field = name, "Header field already declared or reserved");
            return Ok(false);
        }

        let mut config = self.config.lock();
        if let Some(record) = config.as_mut() {
            record.header_set = self.header_set.read().clone();
            self.config_store.save(record)?;
        }

        info!(field = name, kind = %kind, "Header field added");
        Ok(true)
    }

    /// Read a document, merged or with its full history.
    ///
    /// # Errors
    /// - [`Error::NotPermitted`] if the vault is not unlocked
    /// - [`Error::FileNotFound`] if no such document exists
    pub fn read_file(&self, name: &str, history: bool) -> Result<DocumentView> {
        self.require_unlocked()?;
        if !self.refreshed_index()?.contains(name) {
            return Err(Error::FileNotFound(name.to_string()));
        }

        let document = DocumentStore::read(&self.document_path(name), self.provider.as_ref())?;
        debug!(document = name, history, "Document read");

        let body = if history {
            DocumentBody::History(document.body.clone())
        } else {
            DocumentBody::Merged(document.merged_body())
        };

        Ok(DocumentView {
            header: document.public_header(),
            body,
        })
    }

    /// Append `data` as a new version of `name`, creating the document if
    /// needed. Returns the new version-id.
    ///
    /// # Errors
    /// - [`Error::NotPermitted`] if the vault is not unlocked
    /// - [`Error::FileBusy`] if `name` is being written
    pub fn update(&self, name: &str, data: DocumentUpdate) -> Result<VersionId> {
        self.require_unlocked()?;
        let name = DocumentName::new(name)?;
        self.rebuild_index()?;

        let _guard = self.locks.acquire(name.as_str())?;

        let path = self.document_path(name.as_str());
        let exists = path.is_file();
        let provider = self.provider.as_ref();

        let mut store = if exists {
            DocumentStore::open(&path, provider)?
        } else {
            DocumentStore::create(&path, name.as_str(), provider)
        };

        let header_set = self.header_set.read().clone();
        let version = store.insert(data, &header_set, FlushMode::Immediate)?;
        store.close()?;

        self.rebuild_index()?;
        self.touch_config()?;

        debug!(document = %name, version, created = !exists, "Document updated");
        Ok(version)
    }

    /// Delete a document.
    ///
    /// # Errors
    /// - [`Error::FileNotFound`] if no such document exists
    /// - [`Error::FileBusy`] if `name` is being written
    pub fn remove_file(&self, name: &str) -> Result<()> {
        self.require_unlocked()?;
        if !self.refreshed_index()?.contains(name) {
            return Err(Error::FileNotFound(name.to_string()));
        }

        let _guard = self.locks.acquire(name)?;
        let path = self.document_path(name);
        if !path.is_file() {
            return Err(Error::FileNotFound(name.to_string()));
        }
        fs::remove_file(path)?;
        self.rebuild_index()?;

        debug!(document = name, "Document removed");
        Ok(())
    }

    /// Headers of every document, or of those matching `expression`.
    ///
    /// A blank expression matches nothing.
    pub fn list_headers(&self, expression: Option<&str>) -> Result<BTreeMap<String, Header>> {
        self.require_unlocked()?;

        let index = self.refreshed_index()?;
        let Some(expression) = expression else {
            return Ok(index.headers().clone());
        };

        let names = QueryEngine::new(&index).search(expression)?;
        Ok(names
            .into_iter()
            .filter_map(|name| index.header(&name).cloned().map(|header| (name, header)))
            .collect())
    }

    /// Sorted names of documents matching `expression`.
    pub fn search(&self, expression: &str) -> Result<Vec<String>> {
        self.require_unlocked()?;

        let index = self.refreshed_index()?;
        QueryEngine::new(&index).search(expression)
    }

    /// Discard cached headers. Keys stay active.
    pub fn unload(&self, idle_minutes: u64) {
        self.index.write().clear();
        debug!(vault = %self.name, idle_minutes, "Header cache unloaded");
    }

    /// Zeroize keys and release the vault.
    pub fn close(mut self) {
        self.provider.stop_encryption();
        self.index.write().clear();
        info!(vault = %self.name, "Vault closed");
    }

    /// Whether `marker` exists directly under the vault root.
    pub fn includes(&self, marker: &str) -> bool {
        self.path.join(marker).exists()
    }

    /// Whether the vault has been created.
    pub fn exists(&self) -> bool {
        self.includes(CONFIG_FILENAME)
    }

    /// Whether any document is being written.
    pub fn is_locked(&self) -> bool {
        self.locks.any_locked()
    }

    /// Whether keys are active.
    pub fn is_unlocked(&self) -> bool {
        self.provider.is_initialized()
    }

    /// Snapshot of the loaded config record.
    pub fn config(&self) -> Option<ConfigRecord> {
        self.config.lock().clone()
    }

    /// Vault name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Vault root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the declared header fields.
    pub fn header_set(&self) -> HeaderSet {
        self.header_set.read().clone()
    }

    /// Whether the config is written in secure mode.
    pub fn is_secure_config(&self) -> bool {
        self.config_store.is_secure()
    }

    /// Per-document write locks.
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    fn check_password(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::MissingUserPassword);
        }
        if password.chars().count() < self.min_password_length {
            return Err(Error::InsecureUserPassword {
                min: self.min_password_length,
            });
        }
        Ok(())
    }

    fn require_unlocked(&self) -> Result<()> {
        if !self.provider.is_initialized() {
            return Err(Error::NotPermitted("Vault is not unlocked".to_string()));
        }
        Ok(())
    }

    fn init_logger(&mut self) {
        if self.file_logging && self.logger.is_none() {
            self.logger = VaultLogger::try_init(&self.path.join(LOGS_DIRNAME));
        }
    }

    fn rebuild_index(&self) -> Result<()> {
        self.refreshed_index().map(|_| ())
    }

    /// Rebuild and keep reading the result without letting a concurrent
    /// `unload` in between.
    fn refreshed_index(&self) -> Result<RwLockReadGuard<'_, HeaderIndex>> {
        let header_set = self.header_set.read().clone();
        let mut index = self.index.write();
        index.rebuild(&self.data_dir(), self.provider.as_ref(), &header_set)?;
        Ok(RwLockWriteGuard::downgrade(index))
    }

    fn touch_config(&self) -> Result<()> {
        let mut config = self.config.lock();
        match config.as_mut() {
            Some(record) => {
                record.header_set = self.header_set.read().clone();
                record.touch();
                self.config_store.save(record)
            }
            None => {
                warn!(vault = %self.name, "No config loaded, provenance not updated");
                Ok(())
            }
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.path.join(DATA_DIRNAME)
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.data_dir()
            .join(format!("{}.{}", self.hasher.hash_name(name), BLOB_EXTENSION))
    }
}

impl Drop for VaultEngine {
    fn drop(&mut self) {
        self.provider.stop_encryption();
    }
}

impl std::fmt::Display for VaultEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Vault: {}, Path: {}, File count: ", self.name, self.path.display())?;
        match self.count() {
            Ok(count) => write!(f, "{}", count),
            Err(_) => f.write_str("unknown"),
        }
    }
}

impl std::fmt::Debug for VaultEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultEngine")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("cipher", &self.provider.cipher())
            .field("unlocked", &self.is_unlocked())
            .field("secure_config", &self.config_store.is_secure())
            .finish()
    }
}

#[cfg(unix)]
fn restrict_permissions(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for dir in [
        root.to_path_buf(),
        root.join(DATA_DIRNAME),
        root.join(SHASUMS_DIRNAME),
        root.join(LOGS_DIRNAME),
    ] {
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_root: &Path) -> Result<()> {
    Ok(())
}
