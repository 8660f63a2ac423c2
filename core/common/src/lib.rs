//! Common utilities and types shared across reevault modules.
//!
//! This module provides the error taxonomy every crate in the workspace
//! reports through, plus small shared types.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DocumentName, SensitiveBytes, VaultName};
