//! `SecretsRegistry`: many secrets under one master password
//!
//! Locking: the registry lock guards the item list, the decoded index and the
//! master password. It is always taken before any item lock, and items never
//! reach back into the registry. Crypto work runs with the registry lock
//! released; only the commit re-acquires it.
//!
//! Every master-password change bumps a generation counter. Work done under a
//! password is only committed if the generation is unchanged at commit time,
//! otherwise it fails with `ConcurrentModification`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::clock::{Clock, SystemClock};
use crate::codec::{RawSecret, SecretCodec};
use crate::crypto::{constant_time_compare, generate_secret_bytes};
use crate::error::{VaultError, VaultResult};
use crate::item::{SecretItem, SecretsKey};
use crate::models::{
    CryptMode, EncodingType, EncryptionType, RegistrySnapshot, SecretRecord, VaultConfig,
};
use crate::storage;
use crate::value::SecretValue;

struct RegistryState {
    items: Vec<Arc<SecretItem>>,
    /// Cache of decoded values; always rebuildable from `items`
    decoded: HashMap<SecretsKey, Zeroizing<Vec<u8>>>,
    master_password: SecretString,
    /// Known plaintext sealed under the master password
    verifier: RawSecret,
    /// Bumped whenever the master password changes
    generation: u64,
}

impl RegistryState {
    fn find(&self, key: &SecretsKey) -> Option<&Arc<SecretItem>> {
        self.items.iter().find(|item| item.key() == key)
    }

    fn position(&self, key: &SecretsKey) -> Option<usize> {
        self.items.iter().position(|item| item.key() == key)
    }
}

const VERIFIER_PLAINTEXT: &[u8] = b"secrets-vault:verifier:v1";

/// Defaults applied to secrets created from cleartext
#[derive(Debug, Clone, Copy)]
struct StoreDefaults {
    mode: CryptMode,
    encoding: EncodingType,
    encryption: EncryptionType,
    generated_len: usize,
    max_duration_minutes: i64,
}

pub struct SecretsRegistry {
    codec: SecretCodec,
    clock: Arc<dyn Clock>,
    defaults: StoreDefaults,
    state: RwLock<RegistryState>,
}

impl std::fmt::Debug for SecretsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsRegistry").finish_non_exhaustive()
    }
}

impl SecretsRegistry {
    /// Create an empty registry.
    ///
    /// An empty master password is rejected unless the config asks for one
    /// to be generated.
    pub fn new(master_password: &str, codec: SecretCodec, config: &VaultConfig) -> VaultResult<Self> {
        config.validate()?;

        let master_password = if master_password.is_empty() {
            if !config.generate_if_empty {
                return Err(VaultError::EmptyValue);
            }
            tracing::warn!("no master password supplied, generating a random one");
            generate_password(config.generated_secret_length)
        } else {
            master_password.to_string()
        };

        let verifier = seal_verifier(&codec, &master_password)?;

        Ok(Self {
            codec,
            clock: Arc::new(SystemClock),
            defaults: StoreDefaults {
                mode: config.default_mode,
                encoding: config.default_encoding,
                encryption: config.default_encryption,
                generated_len: config.generated_secret_length,
                max_duration_minutes: config.max_duration_minutes,
            },
            state: RwLock::new(RegistryState {
                items: Vec::new(),
                decoded: HashMap::new(),
                master_password: SecretString::new(master_password),
                verifier,
                generation: 0,
            }),
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn codec(&self) -> &SecretCodec {
        &self.codec
    }

    /// The master password. Exposed so a bootstrap-generated one can be shown once.
    pub fn master_password(&self) -> SecretString {
        SecretString::new(self.read_state().master_password.expose_secret().clone())
    }

    /// The master password together with its generation
    fn credentials(&self) -> (SecretString, u64) {
        let state = self.read_state();
        (
            SecretString::new(state.master_password.expose_secret().clone()),
            state.generation,
        )
    }

    pub fn verify_master_password(&self, candidate: &str) -> bool {
        let state = self.read_state();
        constant_time_compare(
            state.master_password.expose_secret().as_bytes(),
            candidate.as_bytes(),
        )
    }

    pub fn len(&self) -> usize {
        self.read_state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        match SecretsKey::new(key) {
            Ok(key) => self.read_state().find(&key).is_some(),
            Err(_) => false,
        }
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<SecretsKey> {
        self.read_state()
            .items
            .iter()
            .map(|item| item.key().clone())
            .collect()
    }

    /// Handle to a stored item
    pub fn item(&self, key: &str) -> Option<Arc<SecretItem>> {
        let key = SecretsKey::new(key).ok()?;
        self.read_state().find(&key).cloned()
    }

    /// Insert or overwrite an item. It must decode under the master password.
    pub fn set_secret(&self, item: SecretItem) -> VaultResult<()> {
        let (password, generation) = self.credentials();
        let plaintext = item.get_decoded_value(&self.codec, password.expose_secret())?;
        self.insert_decoded(item, plaintext, generation)
    }

    /// Insert an item whose plaintext was obtained under the password of `generation`
    fn insert_decoded(
        &self,
        item: SecretItem,
        plaintext: Zeroizing<Vec<u8>>,
        generation: u64,
    ) -> VaultResult<()> {
        let key = item.key().clone();
        let mut state = self.write_state();
        if state.generation != generation {
            tracing::warn!(key = %key, "master password changed while storing secret");
            return Err(VaultError::ConcurrentModification(key.to_string()));
        }
        match state.position(&key) {
            Some(idx) => state.items[idx] = Arc::new(item),
            None => state.items.push(Arc::new(item)),
        }
        state.decoded.insert(key.clone(), plaintext);
        drop(state);

        tracing::debug!(key = %key, "secret stored");
        Ok(())
    }

    /// Encode cleartext with the configured defaults and store it
    pub fn store(&self, key: &str, cleartext: &[u8]) -> VaultResult<()> {
        self.store_with_mode(key, cleartext, self.defaults.mode)
    }

    pub fn store_with_mode(&self, key: &str, cleartext: &[u8], mode: CryptMode) -> VaultResult<()> {
        let key = SecretsKey::new(key)?;
        let (password, generation) = self.credentials();
        let mut value = SecretValue::from_cleartext(
            &self.codec,
            cleartext,
            password.expose_secret(),
            mode,
            self.defaults.encoding,
            self.defaults.encryption,
        )
        .and_then(|mut value| {
            value.set_max_duration(self.defaults.max_duration_minutes, self.clock.now())?;
            Ok(value)
        })
        .map_err(|e| VaultError::for_item("store", key.as_str(), e))?;

        let plaintext = value.decode(&self.codec, password.expose_secret(), true)?;
        self.insert_decoded(SecretItem::new(key, value), plaintext, generation)
    }

    /// Plaintext for `key`, or `None` if it is missing or cannot be decoded
    pub fn get_secret(&self, key: &str) -> Option<Zeroizing<Vec<u8>>> {
        let key = SecretsKey::new(key).ok()?;

        {
            let state = self.read_state();
            if state.decoded.len() == state.items.len() {
                return state.decoded.get(&key).cloned();
            }
        }

        self.rebuild_index();
        self.read_state().decoded.get(&key).cloned()
    }

    pub fn get_secret_string(&self, key: &str) -> Option<String> {
        let bytes = self.get_secret(key)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    /// Recompute the decoded index from the items.
    ///
    /// Items that no longer decode are left out and logged.
    pub fn rebuild_index(&self) {
        let (items, password) = {
            let state = self.read_state();
            (
                state.items.clone(),
                SecretString::new(state.master_password.expose_secret().clone()),
            )
        };

        let mut decoded = HashMap::with_capacity(items.len());
        for item in &items {
            match item.get_decoded_value(&self.codec, password.expose_secret()) {
                Ok(plaintext) => {
                    decoded.insert(item.key().clone(), plaintext);
                }
                Err(e) => {
                    tracing::warn!(key = %item.key(), error = %e, "skipping undecodable secret in index");
                }
            }
        }

        let mut state = self.write_state();
        decoded.retain(|key, _| state.find(key).is_some());
        state.decoded = decoded;
        tracing::debug!(entries = state.decoded.len(), "decoded index rebuilt");
    }

    /// Delete a secret. Returns whether it existed.
    pub fn remove_secret(&self, key: &str) -> bool {
        let Ok(key) = SecretsKey::new(key) else {
            return false;
        };

        let mut state = self.write_state();
        let removed = match state.position(&key) {
            Some(idx) => {
                state.items.remove(idx);
                true
            }
            None => false,
        };
        state.decoded.remove(&key);
        drop(state);

        if removed {
            tracing::debug!(key = %key, "secret removed");
        }
        removed
    }

    /// Rotate one secret, keeping its previous value for `grace`
    pub fn rotate_secret(&self, key: &str, new_raw: &str, grace: Duration) -> VaultResult<()> {
        let (item, password, generation) = self.lookup_for_update(key)?;
        let candidate = RawSecret::validate(new_raw);
        let plaintext = self
            .codec
            .decode(&candidate, password.expose_secret())
            .map_err(|e| VaultError::for_item("rotate", item.key().as_str(), e))?;

        self.commit_rotation(
            &item,
            generation,
            candidate,
            plaintext,
            password.expose_secret(),
            grace,
        )?;

        tracing::debug!(key = %item.key(), grace_minutes = grace.num_minutes(), "secret rotated");
        Ok(())
    }

    /// Rotate one secret to a fresh random value in its current format
    pub fn rotate_generated(&self, key: &str, grace: Duration) -> VaultResult<()> {
        let (item, password, generation) = self.lookup_for_update(key)?;
        let (candidate, plaintext) = item
            .snapshot()
            .generated_successor(&self.codec, password.expose_secret(), self.defaults.generated_len)
            .map_err(|e| VaultError::for_item("rotate", item.key().as_str(), e))?;

        self.commit_rotation(
            &item,
            generation,
            candidate,
            plaintext,
            password.expose_secret(),
            grace,
        )?;

        tracing::debug!(key = %item.key(), "secret rotated to generated value");
        Ok(())
    }

    fn lookup_for_update(&self, key: &str) -> VaultResult<(Arc<SecretItem>, SecretString, u64)> {
        let key = SecretsKey::new(key)?;
        let state = self.read_state();
        let item = state
            .find(&key)
            .cloned()
            .ok_or_else(|| VaultError::SecretNotFound(key.to_string()))?;
        let password = SecretString::new(state.master_password.expose_secret().clone());
        Ok((item, password, state.generation))
    }

    /// Install a decoded rotation candidate and refresh the index
    fn commit_rotation(
        &self,
        item: &Arc<SecretItem>,
        generation: u64,
        candidate: RawSecret,
        plaintext: Zeroizing<Vec<u8>>,
        password: &str,
        grace: Duration,
    ) -> VaultResult<()> {
        let now = self.clock.now();
        self.commit_to_item(item, generation, |value| {
            value.commit_rotation(candidate, plaintext.clone(), password, grace, now)
        })
        .map_err(|e| VaultError::for_item("rotate", item.key().as_str(), e))?;

        let mut state = self.write_state();
        let registered = state
            .find(item.key())
            .map(|current| Arc::ptr_eq(current, item))
            .unwrap_or(false);
        if registered {
            state.decoded.insert(item.key().clone(), plaintext);
        }
        Ok(())
    }

    /// Run `commit` on the item's value unless the master password has
    /// changed since `generation`. Holds the registry lock, so no crypto here.
    fn commit_to_item<T>(
        &self,
        item: &SecretItem,
        generation: u64,
        commit: impl FnOnce(&mut SecretValue) -> VaultResult<T>,
    ) -> VaultResult<T> {
        let state = self.read_state();
        if state.generation != generation {
            tracing::warn!(key = %item.key(), "master password changed during update");
            return Err(VaultError::ConcurrentModification(item.key().to_string()));
        }
        let mut value = item.write();
        let result = commit(&mut *value);
        drop(value);
        drop(state);
        result
    }

    pub fn has_any_expired(&self) -> bool {
        let now = self.clock.now();
        self.read_state().items.iter().any(|item| item.has_expired(now))
    }

    pub fn expired_keys(&self) -> Vec<SecretsKey> {
        let now = self.clock.now();
        self.read_state()
            .items
            .iter()
            .filter(|item| item.has_expired(now))
            .map(|item| item.key().clone())
            .collect()
    }

    /// Move every secret into `target` mode.
    ///
    /// `password` must be the master password. Items are converted one at a
    /// time; the first failure stops the pass and items already converted
    /// stay converted.
    pub fn ensure_crypt_mode(&self, target: CryptMode, password: &str) -> VaultResult<usize> {
        let (items, generation) = {
            let state = self.read_state();
            if !constant_time_compare(
                state.master_password.expose_secret().as_bytes(),
                password.as_bytes(),
            ) {
                return Err(VaultError::InvalidPassword);
            }
            (state.items.clone(), state.generation)
        };
        let total = items.len();

        for (completed, item) in items.iter().enumerate() {
            if let Err(e) = self.change_item_mode(item, target, password, generation) {
                tracing::warn!(
                    key = %item.key(),
                    completed,
                    total,
                    "crypt mode change stopped part way"
                );
                return Err(VaultError::PartialRotation {
                    completed,
                    total,
                    key: item.key().to_string(),
                    source: Box::new(e),
                });
            }
        }

        tracing::info!(mode = %target, count = total, "crypt mode applied to all secrets");
        Ok(total)
    }

    /// Convert a copy of the item, then swap it in if the item is unchanged
    fn change_item_mode(
        &self,
        item: &SecretItem,
        target: CryptMode,
        password: &str,
        generation: u64,
    ) -> VaultResult<()> {
        let staged = item.snapshot();
        if staged.crypt_mode() == target {
            return Ok(());
        }

        let mut converted = staged.clone();
        converted
            .ensure_crypt_mode(&self.codec, password, target)
            .map_err(|e| VaultError::for_item("change crypt mode", item.key().as_str(), e))?;

        self.commit_to_item(item, generation, |value| {
            if value.raw() != staged.raw() {
                return Err(VaultError::ConcurrentModification(item.key().to_string()));
            }
            value.adopt_mode_change(converted);
            Ok(())
        })
    }

    /// Re-encrypt every secret under a new master password.
    ///
    /// All re-encodings are staged first; nothing is committed unless every
    /// item succeeds and none changed in the meantime.
    pub fn set_master_password(&self, old_password: &str, new_password: &str) -> VaultResult<()> {
        if new_password.is_empty() {
            return Err(VaultError::EmptyValue);
        }
        if !self.verify_master_password(old_password) {
            return Err(VaultError::InvalidPassword);
        }

        let items = self.read_state().items.clone();

        let verifier = seal_verifier(&self.codec, new_password)?;
        let mut staged = Vec::with_capacity(items.len());
        for item in &items {
            let rekeyed = item
                .snapshot()
                .rekeyed(&self.codec, old_password, new_password)
                .map_err(|e| VaultError::for_item("re-key", item.key().as_str(), e))?;
            staged.push(rekeyed);
        }

        let mut state = self.write_state();
        if !constant_time_compare(
            state.master_password.expose_secret().as_bytes(),
            old_password.as_bytes(),
        ) {
            return Err(VaultError::InvalidPassword);
        }

        let mut guards = Vec::with_capacity(items.len());
        for (item, rekeyed) in items.iter().zip(&staged) {
            let still_registered = state
                .find(item.key())
                .map(|current| Arc::ptr_eq(current, item))
                .unwrap_or(false);
            let guard = item.write();
            if !still_registered || !guard.matches_staged(rekeyed) {
                return Err(VaultError::ConcurrentModification(item.key().to_string()));
            }
            guards.push(guard);
        }
        if state.items.len() != items.len() {
            return Err(VaultError::ConcurrentModification(
                "secret added during re-key".to_string(),
            ));
        }

        for (guard, rekeyed) in guards.iter_mut().zip(staged) {
            guard.apply_rekey(rekeyed);
        }
        drop(guards);

        state.master_password = SecretString::new(new_password.to_string());
        state.verifier = verifier;
        state.generation += 1;
        drop(state);

        tracing::info!(count = items.len(), "master password rotated");
        Ok(())
    }

    /// Generate random values for any of `keys` that are missing.
    ///
    /// Returns the keys that were created.
    pub fn ensure_generated(&self, keys: &[&str]) -> VaultResult<Vec<SecretsKey>> {
        let (password, generation) = self.credentials();
        let mut created = Vec::new();

        for name in keys {
            let key = SecretsKey::new(*name)?;
            if self.read_state().find(&key).is_some() {
                continue;
            }

            let mut value = SecretValue::generate(
                &self.codec,
                self.defaults.generated_len,
                password.expose_secret(),
                self.defaults.mode,
                self.defaults.encoding,
                self.defaults.encryption,
            )
            .and_then(|mut value| {
                value.set_max_duration(self.defaults.max_duration_minutes, self.clock.now())?;
                Ok(value)
            })
            .map_err(|e| VaultError::for_item("generate", key.as_str(), e))?;

            let plaintext = value.decode(&self.codec, password.expose_secret(), true)?;
            self.insert_decoded(SecretItem::new(key.clone(), value), plaintext, generation)?;
            created.push(key);
        }

        if !created.is_empty() {
            tracing::info!(count = created.len(), "generated missing secrets");
        }
        Ok(created)
    }

    /// Serializable copy of every item
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.read_state();
        let secrets: Vec<SecretRecord> = state.items.iter().map(|item| item.to_record()).collect();
        let mut snapshot = RegistrySnapshot::new(secrets);
        snapshot.verifier = Some(state.verifier.to_string());
        snapshot
    }

    /// Rebuild a registry from a snapshot.
    ///
    /// The master password is checked against the stored verifier and every
    /// item must decode under it.
    pub fn from_snapshot(
        snapshot: &RegistrySnapshot,
        master_password: &str,
        codec: SecretCodec,
        config: &VaultConfig,
    ) -> VaultResult<Self> {
        if let Some(verifier) = &snapshot.verifier {
            let sealed = RawSecret::parse(verifier)?;
            let opened = codec
                .decode(&sealed, master_password)
                .map_err(|_| VaultError::InvalidPassword)?;
            if !constant_time_compare(&opened, VERIFIER_PLAINTEXT) {
                return Err(VaultError::InvalidPassword);
            }
        }

        let registry = Self::new(master_password, codec, config)?;
        for record in &snapshot.secrets {
            registry.set_secret(SecretItem::from_record(record)?)?;
        }
        Ok(registry)
    }

    /// Write the registry to `path`, whole-file encrypted if `file_password` is given
    pub async fn save_to_file(&self, path: &Path, file_password: Option<&str>) -> VaultResult<()> {
        let snapshot = self.snapshot();
        storage::write_snapshot(path, &snapshot, file_password, self.codec.provider().as_ref())
            .await?;

        tracing::info!(path = %path.display(), count = snapshot.secrets.len(), "registry saved");
        Ok(())
    }

    /// Load a registry previously written by [`save_to_file`](Self::save_to_file)
    pub async fn load_from_file(
        path: &Path,
        master_password: &str,
        file_password: Option<&str>,
        codec: SecretCodec,
        config: &VaultConfig,
    ) -> VaultResult<Self> {
        let snapshot =
            storage::read_snapshot(path, file_password, codec.provider().as_ref()).await?;
        let registry = Self::from_snapshot(&snapshot, master_password, codec, config)?;

        tracing::info!(path = %path.display(), count = registry.len(), "registry loaded");
        Ok(registry)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| {
            tracing::warn!("recovering poisoned registry lock");
            e.into_inner()
        })
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| {
            tracing::warn!("recovering poisoned registry lock");
            e.into_inner()
        })
    }
}

fn seal_verifier(codec: &SecretCodec, password: &str) -> VaultResult<RawSecret> {
    codec.encode(
        VERIFIER_PLAINTEXT,
        password,
        CryptMode::Encrypted,
        EncodingType::Base64,
        EncryptionType::Aes256,
    )
}

fn generate_password(len: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(generate_secret_bytes(len.max(16)))
}
