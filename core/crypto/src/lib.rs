//! Cryptographic primitives for reevault.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using AES-256-GCM and XChaCha20-Poly1305
//! - The pluggable [`EncryptionProvider`] capability and its tagged
//!   [`CipherProvider`] implementation
//! - Content hashing of document names into on-disk filenames
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged

pub mod aead;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod provider;

pub use aead::{aes_decrypt, aes_encrypt, decrypt, encrypt};
pub use hash::{Blake2Hasher, ContentHasher};
pub use kdf::{derive_key, KdfParams};
pub use keys::{DataKey, Salt, WrappingKey};
pub use provider::{Cipher, CipherProvider, EncryptionProvider, EncryptionType, WrappedKey};
