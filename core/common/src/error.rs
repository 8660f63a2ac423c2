//! Common error types for reevault.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for vault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A vault configuration already exists at the target path.
    #[error("Vault already exists at {}", .0.display())]
    VaultExistsAtLocation(PathBuf),

    /// No vault configuration was found at the target path.
    #[error("No vault found at {}", .0.display())]
    VaultDoesNotExist(PathBuf),

    /// The named document is not part of the vault.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// The named document is currently being written.
    #[error("File busy: {0}")]
    FileBusy(String),

    /// A search expression could not be parsed.
    #[error("Malformed search: {0}")]
    MalformedSearch(String),

    /// No password was supplied.
    #[error("Missing user password")]
    MissingUserPassword,

    /// The supplied password is shorter than the configured minimum.
    #[error("Password too short: at least {min} characters required")]
    InsecureUserPassword {
        /// Minimum accepted length.
        min: usize,
    },

    /// The password did not unlock the vault key.
    #[error("Incorrect user password, could not unlock vault")]
    WrongUserPassword,

    /// The encryption selector did not name a known cipher.
    #[error("Missing encryption type: {0:?} is not a known cipher")]
    MissingEncryptionType(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// The vault logger could not be initialised.
    #[error("Logger error: {0}")]
    Logger(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted in the current vault state.
    #[error("Not permitted: {0}")]
    NotPermitted(String),
}

impl Error {
    /// Whether this error is one of the structural conditions that callers
    /// are expected to handle (existing vault, busy file, bad search, ...).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::VaultExistsAtLocation(_)
                | Error::VaultDoesNotExist(_)
                | Error::FileNotFound(_)
                | Error::FileBusy(_)
                | Error::MalformedSearch(_)
                | Error::MissingEncryptionType(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(Error::FileBusy("doc".into()).is_structural());
        assert!(Error::MalformedSearch("x".into()).is_structural());
        assert!(!Error::WrongUserPassword.is_structural());
        assert!(!Error::Crypto("bad tag".into()).is_structural());
    }

    #[test]
    fn test_json_error_converts() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_display_messages() {
        let err = Error::InsecureUserPassword { min: 4 };
        assert_eq!(
            err.to_string(),
            "Password too short: at least 4 characters required"
        );
        let err = Error::VaultExistsAtLocation(PathBuf::from("/tmp/v.reevault"));
        assert_eq!(err.to_string(), "Vault already exists at /tmp/v.reevault");
    }
}
