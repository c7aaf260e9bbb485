//! Error types for vault operations

use thiserror::Error;

use crate::models::CryptMode;

/// Errors that can occur during vault operations
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Malformed secret string: {0}")]
    FormatError(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Crypto failure: {0}")]
    CryptoFailure(String),

    #[error("Secret key cannot be empty")]
    EmptyKey,

    #[error("Secret value cannot be empty")]
    EmptyValue,

    #[error("Invalid mode transition from {from} to {to}: {reason}")]
    InvalidModeTransition {
        from: CryptMode,
        to: CryptMode,
        reason: String,
    },

    #[error("Payload does not match its encoding: {0}")]
    EncodingError(String),

    #[error("Invalid master password")]
    InvalidPassword,

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("{operation} failed for secret '{key}': {source}")]
    ItemError {
        operation: &'static str,
        key: String,
        #[source]
        source: Box<VaultError>,
    },

    #[error("Stopped after {completed} of {total} secrets: '{key}' failed: {source}")]
    PartialRotation {
        completed: usize,
        total: usize,
        key: String,
        #[source]
        source: Box<VaultError>,
    },

    #[error("Secret '{0}' changed while a re-key was in progress")]
    ConcurrentModification(String),

    #[error("Key derivation error: {0}")]
    KeyDerivationError(String),

    #[error("Vault file corrupted or tampered")]
    VaultCorrupted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl VaultError {
    /// Wrap an error with the operation and secret key it happened under
    pub fn for_item(operation: &'static str, key: impl Into<String>, source: VaultError) -> Self {
        VaultError::ItemError {
            operation,
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root_cause(&self) -> &VaultError {
        match self {
            VaultError::ItemError { source, .. } | VaultError::PartialRotation { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// True when the underlying failure is a rejected decryption
    pub fn is_crypto_failure(&self) -> bool {
        matches!(self.root_cause(), VaultError::CryptoFailure(_))
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
