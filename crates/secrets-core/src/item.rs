//! Secret keys and keyed secret items

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::codec::SecretCodec;
use crate::error::{VaultError, VaultResult};
use crate::models::{CryptMode, SecretRecord};
use crate::value::SecretValue;

/// Case-insensitive, non-empty name of a secret slot
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretsKey {
    name: String,
    folded: String,
}

impl SecretsKey {
    pub fn new(name: impl Into<String>) -> VaultResult<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(VaultError::EmptyKey);
        }
        let folded = name.to_lowercase();
        Ok(Self { name, folded })
    }

    /// The key as originally written
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Environment variable form, e.g. `api/openai` -> `API_OPENAI`
    pub fn to_env_var(&self) -> String {
        self.name.replace(['/', '-', '.'], "_").to_uppercase()
    }
}

impl PartialEq for SecretsKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for SecretsKey {}

impl Hash for SecretsKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for SecretsKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SecretsKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl fmt::Display for SecretsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for SecretsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretsKey({:?})", self.name)
    }
}

impl TryFrom<String> for SecretsKey {
    type Error = VaultError;

    fn try_from(value: String) -> VaultResult<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SecretsKey {
    type Error = VaultError;

    fn try_from(value: &str) -> VaultResult<Self> {
        Self::new(value)
    }
}

impl From<SecretsKey> for String {
    fn from(key: SecretsKey) -> Self {
        key.name
    }
}

/// A named secret value guarded by its own reader/writer lock
pub struct SecretItem {
    key: SecretsKey,
    value: RwLock<SecretValue>,
}

impl SecretItem {
    pub fn new(key: SecretsKey, value: SecretValue) -> Self {
        Self {
            key,
            value: RwLock::new(value),
        }
    }

    /// Build from a key name and an operator-supplied raw string
    pub fn from_raw(key: &str, raw: &str) -> VaultResult<Self> {
        Ok(Self::new(SecretsKey::new(key)?, SecretValue::from_raw(raw)))
    }

    pub fn from_record(record: &SecretRecord) -> VaultResult<Self> {
        let value = SecretValue::from_record(&record.value)
            .map_err(|e| VaultError::for_item("load", &record.key, e))?;
        Ok(Self::new(SecretsKey::new(record.key.as_str())?, value))
    }

    pub fn to_record(&self) -> SecretRecord {
        SecretRecord {
            key: self.key.to_string(),
            value: self.read().to_record(),
        }
    }

    pub fn key(&self) -> &SecretsKey {
        &self.key
    }

    /// Copy of the current value
    pub fn snapshot(&self) -> SecretValue {
        self.read().clone()
    }

    /// Current wire string
    pub fn raw_string(&self) -> String {
        self.read().raw().to_string()
    }

    pub fn crypt_mode(&self) -> CryptMode {
        self.read().crypt_mode()
    }

    /// Plaintext of the current value. Only the transient cache is touched.
    pub fn get_decoded_value(
        &self,
        codec: &SecretCodec,
        password: &str,
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.write()
            .decode(codec, password, true)
            .map_err(|e| VaultError::for_item("decode", self.key.as_str(), e))
    }

    pub fn ensure_crypt_mode(
        &self,
        codec: &SecretCodec,
        password: &str,
        target: CryptMode,
    ) -> VaultResult<()> {
        self.write()
            .ensure_crypt_mode(codec, password, target)
            .map_err(|e| VaultError::for_item("change crypt mode", self.key.as_str(), e))
    }

    pub fn rotate(
        &self,
        codec: &SecretCodec,
        password: &str,
        new_raw: &str,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> VaultResult<()> {
        self.write()
            .rotate(codec, password, new_raw, grace, now)
            .map_err(|e| VaultError::for_item("rotate", self.key.as_str(), e))
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.read().has_expired(now)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, SecretValue> {
        self.value.read().unwrap_or_else(|e| {
            tracing::warn!(key = %self.key, "recovering poisoned secret lock");
            e.into_inner()
        })
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, SecretValue> {
        self.value.write().unwrap_or_else(|e| {
            tracing::warn!(key = %self.key, "recovering poisoned secret lock");
            e.into_inner()
        })
    }
}

impl fmt::Debug for SecretItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretItem")
            .field("key", &self.key)
            .field("value", &*self.read())
            .finish()
    }
}
