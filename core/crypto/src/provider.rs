//! Pluggable encryption capability.
//!
//! The vault only ever talks to an [`EncryptionProvider`]. The shipped
//! implementation, [`CipherProvider`], is a single struct whose behaviour is
//! selected by a [`Cipher`] tag:
//!
//! | tag       | layers                                            |
//! |-----------|---------------------------------------------------|
//! | `Aes`     | AES-256-GCM                                       |
//! | `XChaCha` | XChaCha20-Poly1305                                |
//! | `Multi`   | AES-256-GCM inside XChaCha20-Poly1305, two keys   |
//!
//! Data keys are random. They are sealed with XChaCha20-Poly1305 under a
//! key derived from the user password, and that sealed form ([`WrappedKey`])
//! is what gets persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::aead::{aes_decrypt, aes_encrypt, decrypt, encrypt};
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{DataKey, Salt, KEY_LENGTH};
use reevault_common::{Error, Result, SensitiveBytes};

/// Cipher composition used for document blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cipher {
    /// AES-256-GCM.
    Aes,
    /// XChaCha20-Poly1305.
    XChaCha,
    /// AES-256-GCM wrapped in XChaCha20-Poly1305 with independent keys.
    Multi,
}

impl Cipher {
    /// Number of independent data keys this cipher needs.
    pub fn key_count(self) -> usize {
        match self {
            Cipher::Aes | Cipher::XChaCha => 1,
            Cipher::Multi => 2,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Cipher::Aes => "aes",
            Cipher::XChaCha => "xchacha",
            Cipher::Multi => "multi",
        }
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encryption selector accepted when constructing a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionType {
    /// Primary cipher (AES-256-GCM).
    Aes,
    /// Secondary cipher (XChaCha20-Poly1305).
    XChaCha,
    /// Layered composition of both.
    Multi,
    /// Let the library pick; currently the primary cipher.
    #[default]
    Auto,
}

impl EncryptionType {
    /// Resolve the selector to a concrete cipher.
    pub fn cipher(self) -> Cipher {
        match self {
            EncryptionType::Aes | EncryptionType::Auto => Cipher::Aes,
            EncryptionType::XChaCha => Cipher::XChaCha,
            EncryptionType::Multi => Cipher::Multi,
        }
    }
}

impl FromStr for EncryptionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes" => Ok(EncryptionType::Aes),
            "xchacha" | "chacha" => Ok(EncryptionType::XChaCha),
            "multi" => Ok(EncryptionType::Multi),
            "auto" => Ok(EncryptionType::Auto),
            _ => Err(Error::MissingEncryptionType(s.to_string())),
        }
    }
}

/// Persisted, password-sealed form of a vault's data keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Cipher the sealed keys belong to.
    pub cipher: Cipher,
    /// Salt for the password KDF.
    pub salt: Salt,
    /// Parameters for the password KDF.
    pub kdf_params: KdfParams,
    /// `nonce || sealed key material || tag`.
    pub sealed: Vec<u8>,
}

impl WrappedKey {
    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Cipher capability consumed by the vault engine.
///
/// Implementations own their active key material exclusively. After
/// [`stop_encryption`](EncryptionProvider::stop_encryption) the key material
/// must be gone and [`is_initialized`](EncryptionProvider::is_initialized)
/// must report `false`.
pub trait EncryptionProvider: Send + Sync {
    /// Cipher this provider implements.
    fn cipher(&self) -> Cipher;

    /// Create fresh key material, activate it and return its sealed form.
    fn start_encryption(&mut self, password: &[u8]) -> Result<WrappedKey>;

    /// Unseal existing key material with `password` and activate it.
    ///
    /// # Errors
    /// - `Error::Crypto` if the password is wrong or the key does not match
    ///   this provider's cipher; the provider stays uninitialized
    fn unwrap_encryption(&mut self, password: &[u8], wrapped: &WrappedKey) -> Result<()>;

    /// Encrypt with the active key material.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt with the active key material.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Drop and zeroize the active key material.
    fn stop_encryption(&mut self);

    /// Whether key material is active.
    fn is_initialized(&self) -> bool;
}

/// Tagged [`EncryptionProvider`] implementation.
pub struct CipherProvider {
    cipher: Cipher,
    kdf_params: KdfParams,
    keys: Option<Vec<DataKey>>,
}

impl CipherProvider {
    /// Create an uninitialized provider for `cipher`.
    pub fn new(cipher: Cipher) -> Self {
        Self {
            cipher,
            kdf_params: KdfParams::default(),
            keys: None,
        }
    }

    /// Create an uninitialized provider from a selector.
    pub fn from_type(selector: EncryptionType) -> Self {
        Self::new(selector.cipher())
    }

    /// Override the KDF parameters used when wrapping new keys.
    ///
    /// Unwrapping always uses the parameters stored in the [`WrappedKey`].
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    fn active_keys(&self) -> Result<&[DataKey]> {
        self.keys
            .as_deref()
            .ok_or_else(|| Error::NotPermitted("Encryption has not been started".to_string()))
    }
}

impl EncryptionProvider for CipherProvider {
    fn cipher(&self) -> Cipher {
        self.cipher
    }

    fn start_encryption(&mut self, password: &[u8]) -> Result<WrappedKey> {
        let keys: Vec<DataKey> = (0..self.cipher.key_count())
            .map(|_| DataKey::generate())
            .collect();

        let mut material = Vec::with_capacity(keys.len() * KEY_LENGTH);
        for key in &keys {
            material.extend_from_slice(key.as_bytes());
        }
        let material = SensitiveBytes::new(material);

        let salt = Salt::generate();
        let wrapping_key = derive_key(password, &salt, &self.kdf_params)?;
        let sealed = encrypt(wrapping_key.as_bytes(), material.as_bytes())?;

        self.keys = Some(keys);
        debug!(cipher = %self.cipher, "Encryption started with new keys");

        Ok(WrappedKey {
            cipher: self.cipher,
            salt,
            kdf_params: self.kdf_params.clone(),
            sealed,
        })
    }

    fn unwrap_encryption(&mut self, password: &[u8], wrapped: &WrappedKey) -> Result<()> {
        self.keys = None;

        if wrapped.cipher != self.cipher {
            return Err(Error::Crypto(format!(
                "Key was created for cipher {}, provider uses {}",
                wrapped.cipher, self.cipher
            )));
        }

        let wrapping_key = derive_key(password, &wrapped.salt, &wrapped.kdf_params)?;
        let material = SensitiveBytes::new(decrypt(wrapping_key.as_bytes(), &wrapped.sealed)?);

        if material.len() != self.cipher.key_count() * KEY_LENGTH {
            return Err(Error::Crypto("Unexpected key material length".to_string()));
        }

        let keys = material
            .as_bytes()
            .chunks(KEY_LENGTH)
            .map(|chunk| {
                DataKey::from_slice(chunk)
                    .ok_or_else(|| Error::Crypto("Invalid key chunk".to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        self.keys = Some(keys);
        debug!(cipher = %self.cipher, "Encryption started from wrapped key");
        Ok(())
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let keys = self.active_keys()?;
        match self.cipher {
            Cipher::Aes => aes_encrypt(keys[0].as_bytes(), plaintext),
            Cipher::XChaCha => encrypt(keys[0].as_bytes(), plaintext),
            Cipher::Multi => {
                let inner = aes_encrypt(keys[0].as_bytes(), plaintext)?;
                encrypt(keys[1].as_bytes(), &inner)
            }
        }
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let keys = self.active_keys()?;
        match self.cipher {
            Cipher::Aes => aes_decrypt(keys[0].as_bytes(), ciphertext),
            Cipher::XChaCha => decrypt(keys[0].as_bytes(), ciphertext),
            Cipher::Multi => {
                let inner = decrypt(keys[1].as_bytes(), ciphertext)?;
                aes_decrypt(keys[0].as_bytes(), &inner)
            }
        }
    }

    fn stop_encryption(&mut self) {
        // DataKey zeroizes on drop
        if self.keys.take().is_some() {
            debug!(cipher = %self.cipher, "Encryption stopped");
        }
    }

    fn is_initialized(&self) -> bool {
        self.keys.is_some()
    }
}

impl fmt::Debug for CipherProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherProvider")
            .field("cipher", &self.cipher)
            .field("initialized", &self.keys.is_some())
            .finish()
    }
}
