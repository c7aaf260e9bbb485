//! `CryptValueMap`: process-local rotating secrets without a password
//!
//! Values are stored as `base64;<payload>`. There is no crypt mode and no
//! password; rotation keeps the previous value for a grace window the same
//! way `SecretValue` does.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroizing;

use crate::clock::{Clock, SystemClock};
use crate::crypto::generate_secret_bytes;
use crate::error::{VaultError, VaultResult};
use crate::item::SecretsKey;
use crate::models::{check_duration_minutes, SecretRecord, SecretValueRecord};
use crate::value::{grace_end, lifetime_end};

const PREFIX: &str = "base64;";

#[derive(Clone)]
struct CryptValue {
    encoded: String,
    expires_at: Option<DateTime<Utc>>,
    old_encoded: Option<String>,
    old_expires_at: Option<DateTime<Utc>>,
}

impl CryptValue {
    fn fresh(len: usize, lifetime: Option<DateTime<Utc>>) -> Self {
        Self {
            encoded: encode(&generate_secret_bytes(len)),
            expires_at: lifetime,
            old_encoded: None,
            old_expires_at: None,
        }
    }

    fn has_expired(&self, now: DateTime<Utc>) -> bool {
        let past = |at: Option<DateTime<Utc>>| at.map(|t| t <= now).unwrap_or(false);
        past(self.expires_at) || past(self.old_expires_at)
    }
}

fn encode(bytes: &[u8]) -> String {
    format!("{PREFIX}{}", BASE64.encode(bytes))
}

fn decode(encoded: &str) -> VaultResult<Zeroizing<Vec<u8>>> {
    let payload = encoded
        .strip_prefix(PREFIX)
        .ok_or_else(|| VaultError::FormatError("expected 'base64;<payload>'".to_string()))?;
    BASE64
        .decode(payload)
        .map(Zeroizing::new)
        .map_err(|e| VaultError::EncodingError(e.to_string()))
}

pub struct CryptValueMap {
    key_length: usize,
    max_duration_minutes: i64,
    clock: Arc<dyn Clock>,
    values: RwLock<HashMap<SecretsKey, CryptValue>>,
}

impl CryptValueMap {
    /// `max_duration_minutes` of 0 means values never expire on their own
    pub fn new(key_length: usize, max_duration_minutes: i64) -> VaultResult<Self> {
        let max_duration_minutes = max_duration_minutes.max(0);
        check_duration_minutes("max duration", max_duration_minutes)?;

        Ok(Self {
            key_length: key_length.max(1),
            max_duration_minutes,
            clock: Arc::new(SystemClock),
            values: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lifetime(&self, now: DateTime<Utc>) -> VaultResult<Option<DateTime<Utc>>> {
        lifetime_end(self.max_duration_minutes, now)
    }

    /// Generate a value for every required key that has none.
    ///
    /// Returns the keys that were created.
    pub fn initialize(&self, required: &[&str]) -> VaultResult<Vec<SecretsKey>> {
        let keys = parse_keys(required)?;
        let lifetime = self.lifetime(self.clock.now())?;

        let mut values = self.write();
        let mut created = Vec::new();
        for key in keys {
            if values.contains_key(&key) {
                continue;
            }
            values.insert(key.clone(), CryptValue::fresh(self.key_length, lifetime));
            created.push(key);
        }

        if !created.is_empty() {
            tracing::debug!(count = created.len(), "generated process-local secrets");
        }
        Ok(created)
    }

    /// Replace the values of `keys`, keeping each previous value for `grace`.
    ///
    /// Every key must exist; if one is missing nothing is rotated.
    pub fn rotate(&self, keys: &[&str], grace: Duration) -> VaultResult<()> {
        let keys = parse_keys(keys)?;
        let now = self.clock.now();
        let lifetime = self.lifetime(now)?;
        let old_expires_at = grace_end(grace, now)?;

        let mut values = self.write();
        if let Some(missing) = keys.iter().find(|key| !values.contains_key(*key)) {
            return Err(VaultError::SecretNotFound(missing.to_string()));
        }

        for key in &keys {
            if let Some(value) = values.get_mut(key) {
                let fresh = CryptValue::fresh(self.key_length, lifetime);
                let previous = std::mem::replace(&mut value.encoded, fresh.encoded);
                value.old_encoded = Some(previous);
                value.old_expires_at = old_expires_at;
                value.expires_at = fresh.expires_at;
            }
        }

        tracing::debug!(count = keys.len(), grace_minutes = grace.num_minutes(), "process-local secrets rotated");
        Ok(())
    }

    /// Check that every required key is present and decodable
    pub fn validate(&self, required: &[&str]) -> VaultResult<()> {
        let keys = parse_keys(required)?;
        let values = self.read();
        for key in keys {
            let value = values
                .get(&key)
                .ok_or_else(|| VaultError::SecretNotFound(key.to_string()))?;
            decode(&value.encoded).map_err(|e| VaultError::for_item("validate", key.as_str(), e))?;
        }
        Ok(())
    }

    pub fn has_any_expired(&self) -> bool {
        let now = self.clock.now();
        self.read().values().any(|value| value.has_expired(now))
    }

    pub fn get(&self, key: &str) -> Option<Zeroizing<Vec<u8>>> {
        let key = SecretsKey::new(key).ok()?;
        let values = self.read();
        decode(&values.get(&key)?.encoded).ok()
    }

    /// The previous value while its grace window is open
    pub fn get_previous(&self, key: &str) -> Option<Zeroizing<Vec<u8>>> {
        let key = SecretsKey::new(key).ok()?;
        let now = self.clock.now();
        let values = self.read();
        let value = values.get(&key)?;
        match (&value.old_encoded, value.old_expires_at) {
            (Some(old), Some(until)) if now < until => decode(old).ok(),
            _ => None,
        }
    }

    /// Store an externally produced `base64;<payload>` value
    pub fn insert_encoded(&self, key: &str, encoded: &str) -> VaultResult<()> {
        let key = SecretsKey::new(key)?;
        let bytes = decode(encoded)?;
        if bytes.is_empty() {
            return Err(VaultError::EmptyValue);
        }

        let lifetime = self.lifetime(self.clock.now())?;
        self.write().insert(
            key,
            CryptValue {
                encoded: encoded.to_string(),
                expires_at: lifetime,
                old_encoded: None,
                old_expires_at: None,
            },
        );
        Ok(())
    }

    pub fn keys(&self) -> Vec<SecretsKey> {
        let mut keys: Vec<_> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Persistable records, sorted by key
    pub fn export(&self) -> Vec<SecretRecord> {
        let values = self.read();
        let mut records: Vec<_> = values
            .iter()
            .map(|(key, value)| SecretRecord {
                key: key.to_string(),
                value: SecretValueRecord {
                    value: value.encoded.clone(),
                    expires_at: value.expires_at,
                    old_value: value.old_encoded.clone(),
                    old_value_expires_at: value.old_expires_at,
                    max_duration: self.max_duration_minutes,
                },
            })
            .collect();
        records.sort_by(|a, b| a.key.to_lowercase().cmp(&b.key.to_lowercase()));
        records
    }

    /// Load records written by [`export`](Self::export), replacing matching keys
    pub fn import(&self, records: &[SecretRecord]) -> VaultResult<usize> {
        let mut parsed = Vec::with_capacity(records.len());
        for record in records {
            let key = SecretsKey::new(record.key.as_str())?;
            decode(&record.value.value).map_err(|e| VaultError::for_item("import", key.as_str(), e))?;
            if let Some(old) = &record.value.old_value {
                decode(old).map_err(|e| VaultError::for_item("import", key.as_str(), e))?;
            }
            parsed.push((
                key,
                CryptValue {
                    encoded: record.value.value.clone(),
                    expires_at: record.value.expires_at,
                    old_encoded: record.value.old_value.clone(),
                    old_expires_at: record.value.old_value_expires_at,
                },
            ));
        }

        let count = parsed.len();
        self.write().extend(parsed);
        Ok(count)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SecretsKey, CryptValue>> {
        self.values.read().unwrap_or_else(|e| {
            tracing::warn!("recovering poisoned value map lock");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SecretsKey, CryptValue>> {
        self.values.write().unwrap_or_else(|e| {
            tracing::warn!("recovering poisoned value map lock");
            e.into_inner()
        })
    }
}

impl fmt::Debug for CryptValueMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptValueMap")
            .field("key_length", &self.key_length)
            .field("max_duration_minutes", &self.max_duration_minutes)
            .field("keys", &self.keys())
            .finish()
    }
}

fn parse_keys(names: &[&str]) -> VaultResult<Vec<SecretsKey>> {
    names.iter().map(|name| SecretsKey::new(*name)).collect()
}
