//! Common types used throughout reevault.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Name of a vault.
///
/// The name becomes a directory component (`<name>.reevault`), so it must be
/// non-empty and free of path separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultName(String);

impl VaultName {
    /// Create a new VaultName from a string.
    ///
    /// # Errors
    /// - Returns error if name is empty or contains a path separator
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Vault name cannot be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Vault name cannot contain separators".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VaultName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical name of a document inside a vault.
///
/// Any non-empty string is accepted; the on-disk name is a hash of it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentName(String);

impl DocumentName {
    /// Create a new DocumentName.
    ///
    /// # Errors
    /// - Returns error if name is empty
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Document name cannot be empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DocumentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_name_creation() {
        let name = VaultName::new("personal").unwrap();
        assert_eq!(name.as_str(), "personal");
    }

    #[test]
    fn test_vault_name_rejects_bad_input() {
        assert!(VaultName::new("").is_err());
        assert!(VaultName::new("a/b").is_err());
        assert!(VaultName::new("a\\b").is_err());
    }

    #[test]
    fn test_document_name() {
        assert!(DocumentName::new("").is_err());
        let name = DocumentName::new("mail/work account").unwrap();
        assert_eq!(name.to_string(), "mail/work account");
    }

    #[test]
    fn test_sensitive_bytes_debug_redacts() {
        let secret = SensitiveBytes::new(vec![1, 2, 3]);
        assert_eq!(format!("{:?}", secret), "SensitiveBytes([REDACTED; 3 bytes])");
        assert_eq!(secret.len(), 3);
    }
}
