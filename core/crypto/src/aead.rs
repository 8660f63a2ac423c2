//! Authenticated encryption primitives.
//!
//! Two AEADs are available: AES-256-GCM (12-byte nonce) and
//! XChaCha20-Poly1305 (24-byte nonce). Both produce `nonce || ciphertext || tag`
//! with a freshly generated random nonce.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use reevault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Nonce size for AES-256-GCM (12 bytes).
pub const AES_NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes), shared by both ciphers.
pub const TAG_SIZE: usize = 16;

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Crypto(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(())
}

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The ciphertext length is plaintext length + TAG_SIZE + NONCE_SIZE
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if encryption fails
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if ciphertext is too short
/// - Returns error if authentication fails (tampered data or wrong key)
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key));

    cipher
        .decrypt(nonce, encrypted)
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
}

/// Encrypt plaintext using AES-256-GCM.
///
/// Same framing as [`encrypt`] with a 12-byte nonce.
pub fn aes_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(AES_NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt ciphertext produced by [`aes_encrypt`].
pub fn aes_decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    if ciphertext.len() < AES_NONCE_SIZE + TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(AES_NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));

    cipher
        .decrypt(nonce, encrypted)
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Hello, World!";

        let ciphertext = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &ciphertext).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Test message";

        let ciphertext = encrypt(&key, plaintext).unwrap();
        assert_eq!(ciphertext.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let ciphertext = aes_encrypt(&key, plaintext).unwrap();
        assert_eq!(ciphertext.len(), AES_NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Same plaintext";

        let ct1 = encrypt(&key, plaintext).unwrap();
        let ct2 = encrypt(&key, plaintext).unwrap();

        assert_ne!(&ct1[..NONCE_SIZE], &ct2[..NONCE_SIZE]);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = [1u8; KEY_LENGTH];
        let key2 = [2u8; KEY_LENGTH];
        let plaintext = b"Secret data";

        let ciphertext = encrypt(&key1, plaintext).unwrap();
        assert!(decrypt(&key2, &ciphertext).is_err());

        let ciphertext = aes_encrypt(&key1, plaintext).unwrap();
        assert!(aes_decrypt(&key2, &ciphertext).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Important data";

        let mut ciphertext = aes_encrypt(&key, plaintext).unwrap();
        ciphertext[AES_NONCE_SIZE + 5] ^= 0xFF;

        assert!(aes_decrypt(&key, &ciphertext).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        let short_key = [0u8; 16];

        assert!(encrypt(&short_key, b"data").is_err());
        assert!(aes_encrypt(&short_key, b"data").is_err());
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let key = [42u8; KEY_LENGTH];

        assert!(decrypt(&key, &[0u8; 10]).is_err());
        assert!(aes_decrypt(&key, &[0u8; 10]).is_err());
    }

    #[test]
    fn test_aes_empty_plaintext() {
        let key = [42u8; KEY_LENGTH];

        let ciphertext = aes_encrypt(&key, b"").unwrap();
        let decrypted = aes_decrypt(&key, &ciphertext).unwrap();

        assert!(decrypted.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
                let key = [9u8; KEY_LENGTH];

                let sealed = encrypt(&key, &data).unwrap();
                prop_assert_eq!(&decrypt(&key, &sealed).unwrap(), &data);

                let sealed = aes_encrypt(&key, &data).unwrap();
                prop_assert_eq!(aes_decrypt(&key, &sealed).unwrap(), data);
            }
        }
    }
}
