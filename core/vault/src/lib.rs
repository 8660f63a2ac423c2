//! Vault engine for reevault.
//!
//! This crate provides:
//! - Vault creation, unlocking and teardown
//! - Versioned, encrypted documents with merge-on-read
//! - A header index and a small search language over it
//! - Plain or secure persistence of the vault configuration
//!
//! # Architecture
//! [`VaultEngine`] is the only entry point. It owns an
//! [`EncryptionProvider`](reevault_crypto::EncryptionProvider) and a
//! [`ContentHasher`](reevault_crypto::ContentHasher) and drives the
//! [`DocumentStore`], [`HeaderIndex`] and [`QueryEngine`] on their behalf.

pub mod config;
pub mod document;
pub mod engine;
pub mod header;
pub mod index;
pub mod lock;
pub mod logger;
pub mod query;

pub use config::{ConfigRecord, ConfigStore};
pub use document::{Document, DocumentStore, DocumentUpdate, FlushMode, Payload, VersionId};
pub use engine::{DocumentBody, DocumentView, VaultEngine};
pub use header::{FieldKind, Header, HeaderSet, LATEST_KEY};
pub use index::{GroupEntry, HeaderIndex};
pub use lock::{LockGuard, LockTable};
pub use logger::VaultLogger;
pub use query::{QueryEngine, SearchQuery};
