//! Data models: secret wire-format tags, vault configuration and persisted records

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Which form a secret payload is currently stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptMode {
    Encrypted,
    Decrypted,
}

impl CryptMode {
    /// Wire token (`e` / `d`)
    pub fn token(&self) -> &'static str {
        match self {
            CryptMode::Encrypted => "e",
            CryptMode::Decrypted => "d",
        }
    }
}

impl fmt::Display for CryptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptMode::Encrypted => write!(f, "encrypted"),
            CryptMode::Decrypted => write!(f, "decrypted"),
        }
    }
}

impl FromStr for CryptMode {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "e" => Ok(CryptMode::Encrypted),
            "d" => Ok(CryptMode::Decrypted),
            other => Err(VaultError::FormatError(format!(
                "invalid crypt mode '{}' (expected 'e' or 'd')",
                other
            ))),
        }
    }
}

/// Textual encoding of the (possibly encrypted) payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingType {
    Base64,
    Hex,
    Plain,
}

impl EncodingType {
    pub fn token(&self) -> &'static str {
        match self {
            EncodingType::Base64 => "base64",
            EncodingType::Hex => "hex",
            EncodingType::Plain => "plain",
        }
    }

    /// Render cleartext bytes in this encoding
    pub fn encode(&self, bytes: &[u8]) -> VaultResult<String> {
        match self {
            EncodingType::Base64 => Ok(BASE64.encode(bytes)),
            EncodingType::Hex => Ok(hex::encode(bytes)),
            EncodingType::Plain => String::from_utf8(bytes.to_vec()).map_err(|_| {
                VaultError::EncodingError("plain encoding requires UTF-8 cleartext".to_string())
            }),
        }
    }

    /// Inverse of [`EncodingType::encode`]
    pub fn decode(&self, text: &str) -> VaultResult<Vec<u8>> {
        match self {
            EncodingType::Base64 => BASE64
                .decode(text.trim())
                .map_err(|e| VaultError::EncodingError(format!("invalid base64: {}", e))),
            EncodingType::Hex => hex::decode(text.trim())
                .map_err(|e| VaultError::EncodingError(format!("invalid hex: {}", e))),
            EncodingType::Plain => Ok(text.as_bytes().to_vec()),
        }
    }
}

impl fmt::Display for EncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for EncodingType {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base64" => Ok(EncodingType::Base64),
            "hex" => Ok(EncodingType::Hex),
            "plain" => Ok(EncodingType::Plain),
            other => Err(VaultError::UnsupportedScheme(format!("unknown encoding '{}'", other))),
        }
    }
}

/// Symmetric scheme / key-size selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionType {
    Aes128,
    Aes192,
    Aes256,
}

impl EncryptionType {
    pub fn token(&self) -> &'static str {
        match self {
            EncryptionType::Aes128 => "aes128",
            EncryptionType::Aes192 => "aes192",
            EncryptionType::Aes256 => "aes256",
        }
    }

    /// Symmetric key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            EncryptionType::Aes128 => 16,
            EncryptionType::Aes192 => 24,
            EncryptionType::Aes256 => 32,
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for EncryptionType {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes128" => Ok(EncryptionType::Aes128),
            "aes192" => Ok(EncryptionType::Aes192),
            "aes256" => Ok(EncryptionType::Aes256),
            other => Err(VaultError::UnsupportedScheme(format!(
                "unknown encryption '{}'",
                other
            ))),
        }
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KB
    pub memory_kb: u32,

    /// Iterations
    pub iterations: u32,

    /// Parallelism
    pub parallelism: u32,
}

impl KdfParams {
    /// Cheap parameters for tests and throwaway vaults
    pub fn testing() -> Self {
        Self {
            memory_kb: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kb: 65536, // 64 MB
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Vault configuration (non-sensitive, stored in plaintext)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Password key-derivation cost
    pub kdf: KdfParams,

    /// Mode new secrets are stored in
    pub default_mode: CryptMode,

    /// Encoding new secrets are stored with
    pub default_encoding: EncodingType,

    /// Scheme new secrets are encrypted with
    pub default_encryption: EncryptionType,

    /// Generate a random master password when none is supplied
    pub generate_if_empty: bool,

    /// Length in bytes of generated secrets
    pub generated_secret_length: usize,

    /// Grace period for the previous value after a rotation
    pub default_grace_minutes: i64,

    /// Lifetime of a secret value after it is set or rotated (0 = never expires)
    pub max_duration_minutes: i64,
}

impl VaultConfig {
    /// Reject durations that cannot be turned into a point in time
    pub fn validate(&self) -> VaultResult<()> {
        check_duration_minutes("max_duration_minutes", self.max_duration_minutes)?;
        check_duration_minutes("default_grace_minutes", self.default_grace_minutes)
    }
}

/// Longest lifetime or grace period accepted, in minutes (100 years)
pub const MAX_DURATION_MINUTES: i64 = 100 * 365 * 24 * 60;

/// Check that `minutes` lies in `0..=MAX_DURATION_MINUTES`
pub fn check_duration_minutes(what: &str, minutes: i64) -> VaultResult<()> {
    if (0..=MAX_DURATION_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(VaultError::ConfigError(format!(
            "{what} must be between 0 and {MAX_DURATION_MINUTES} minutes, got {minutes}"
        )))
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            default_mode: CryptMode::Encrypted,
            default_encoding: EncodingType::Base64,
            default_encryption: EncryptionType::Aes256,
            generate_if_empty: false,
            generated_secret_length: 32,
            default_grace_minutes: 60,
            max_duration_minutes: 0,
        }
    }
}

/// Persisted value envelope mirroring `SecretValue`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretValueRecord {
    /// Current wire string
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value_expires_at: Option<DateTime<Utc>>,

    /// Lifetime in minutes (0 = never expires)
    #[serde(default)]
    pub max_duration: i64,
}

/// Persisted `{key, value}` pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretRecord {
    pub key: String,
    pub value: SecretValueRecord,
}

/// Serialized registry document
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistrySnapshot {
    /// Schema version for migrations
    pub version: u32,

    pub secrets: Vec<SecretRecord>,

    /// Known value encrypted under the master password, checked on load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
}

impl RegistrySnapshot {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(secrets: Vec<SecretRecord>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            secrets,
            verifier: None,
        }
    }
}
