//! `SecretValue`: a stored secret with rotation history and a decoded cache
//!
//! The crypt mode is read from the raw form; there is no separate flag. The
//! decoded cache always mirrors the current raw form and is dropped whenever
//! the raw form changes.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroizing;

use crate::codec::{RawSecret, SecretCodec};
use crate::crypto::{constant_time_compare, generate_secret_bytes, password_fingerprint};
use crate::error::{VaultError, VaultResult};
use crate::models::{
    check_duration_minutes, CryptMode, EncodingType, EncryptionType, SecretValueRecord,
};

/// Transient plaintext of the current raw form
#[derive(Clone)]
struct DecodedCache {
    plaintext: Zeroizing<Vec<u8>>,
    /// Fingerprint of the password that opened an encrypted value
    fingerprint: Option<[u8; 32]>,
}

impl DecodedCache {
    fn new(raw: &RawSecret, password: &str, plaintext: Zeroizing<Vec<u8>>) -> Self {
        let fingerprint = raw
            .is_encrypted()
            .then(|| password_fingerprint(password.as_bytes()));
        Self {
            plaintext,
            fingerprint,
        }
    }

    fn serves(&self, password: &str) -> bool {
        match &self.fingerprint {
            None => true,
            Some(expected) => {
                constant_time_compare(expected, &password_fingerprint(password.as_bytes()))
            }
        }
    }
}

/// Re-encoded raw forms staged for a master-password change
#[derive(Debug, Clone)]
pub struct Rekeyed {
    pub(crate) previous: RawSecret,
    pub(crate) raw: RawSecret,
    pub(crate) old_raw: Option<RawSecret>,
}

#[derive(Clone)]
pub struct SecretValue {
    raw: RawSecret,
    decoded: Option<DecodedCache>,
    expires_at: Option<DateTime<Utc>>,
    old_raw: Option<RawSecret>,
    old_expires_at: Option<DateTime<Utc>>,
    max_duration_minutes: i64,
}

impl SecretValue {
    /// An empty plain value
    pub fn empty() -> Self {
        Self::from_raw_secret(RawSecret::literal(""))
    }

    /// Wrap an operator-supplied string; malformed input becomes literal cleartext
    pub fn from_raw(candidate: &str) -> Self {
        Self::from_raw_secret(RawSecret::validate(candidate))
    }

    pub fn from_raw_secret(raw: RawSecret) -> Self {
        Self {
            raw,
            decoded: None,
            expires_at: None,
            old_raw: None,
            old_expires_at: None,
            max_duration_minutes: 0,
        }
    }

    /// Encode cleartext into a new value
    pub fn from_cleartext(
        codec: &SecretCodec,
        cleartext: &[u8],
        password: &str,
        mode: CryptMode,
        encoding: EncodingType,
        encryption: EncryptionType,
    ) -> VaultResult<Self> {
        if cleartext.is_empty() {
            return Err(VaultError::EmptyValue);
        }

        let raw = codec.encode(cleartext, password, mode, encoding, encryption)?;
        let cache = DecodedCache::new(&raw, password, Zeroizing::new(cleartext.to_vec()));

        let mut value = Self::from_raw_secret(raw);
        value.decoded = Some(cache);
        Ok(value)
    }

    /// A fresh random value of `len` bytes
    pub fn generate(
        codec: &SecretCodec,
        len: usize,
        password: &str,
        mode: CryptMode,
        encoding: EncodingType,
        encryption: EncryptionType,
    ) -> VaultResult<Self> {
        let bytes = Zeroizing::new(generate_secret_bytes(len));
        let encoding = match encoding {
            // random bytes are rarely UTF-8
            EncodingType::Plain => EncodingType::Base64,
            other => other,
        };
        Self::from_cleartext(codec, &bytes, password, mode, encoding, encryption)
    }

    /// Rebuild from a persisted envelope
    pub fn from_record(record: &SecretValueRecord) -> VaultResult<Self> {
        check_duration_minutes("maxDuration", record.max_duration)?;

        Ok(Self {
            raw: RawSecret::validate(&record.value),
            decoded: None,
            expires_at: record.expires_at,
            old_raw: record.old_value.as_deref().map(RawSecret::validate),
            old_expires_at: record.old_value_expires_at,
            max_duration_minutes: record.max_duration,
        })
    }

    pub fn to_record(&self) -> SecretValueRecord {
        SecretValueRecord {
            value: self.raw.to_string(),
            expires_at: self.expires_at,
            old_value: self.old_raw.as_ref().map(|r| r.to_string()),
            old_value_expires_at: self.old_expires_at,
            max_duration: self.max_duration_minutes,
        }
    }

    pub fn raw(&self) -> &RawSecret {
        &self.raw
    }

    pub fn old_raw(&self) -> Option<&RawSecret> {
        self.old_raw.as_ref()
    }

    pub fn crypt_mode(&self) -> CryptMode {
        self.raw.mode()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn old_expires_at(&self) -> Option<DateTime<Utc>> {
        self.old_expires_at
    }

    pub fn max_duration_minutes(&self) -> i64 {
        self.max_duration_minutes
    }

    pub fn is_cached(&self) -> bool {
        self.decoded.is_some()
    }

    /// Set the lifetime and restart the expiry window from `now`
    pub fn set_max_duration(&mut self, minutes: i64, now: DateTime<Utc>) -> VaultResult<()> {
        let minutes = minutes.max(0);
        check_duration_minutes("max duration", minutes)?;
        self.expires_at = lifetime_end(minutes, now)?;
        self.max_duration_minutes = minutes;
        Ok(())
    }

    /// Move the payload into `target` mode; a no-op if already there
    pub fn ensure_crypt_mode(
        &mut self,
        codec: &SecretCodec,
        password: &str,
        target: CryptMode,
    ) -> VaultResult<()> {
        if self.raw.mode() == target {
            return Ok(());
        }

        match target {
            CryptMode::Encrypted => {
                let sealed = codec.encrypt_raw(&self.raw, password)?;
                self.raw = sealed;
                self.decoded = None;
            }
            CryptMode::Decrypted => {
                let opened = codec.decrypt_raw(&self.raw, password)?;
                let plaintext = codec.decode(&opened, password)?;
                self.decoded = Some(DecodedCache::new(&opened, password, plaintext));
                self.raw = opened;
            }
        }
        Ok(())
    }

    /// Plaintext of the current value, served from cache when warm
    pub fn decode(
        &mut self,
        codec: &SecretCodec,
        password: &str,
        cache_result: bool,
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        if let Some(cache) = &self.decoded {
            if cache.serves(password) {
                return Ok(cache.plaintext.clone());
            }
        }

        let plaintext = codec.decode(&self.raw, password)?;
        if cache_result {
            self.decoded = Some(DecodedCache::new(&self.raw, password, plaintext.clone()));
        }
        Ok(plaintext)
    }

    /// Replace the current value, keeping the previous one for `grace`.
    ///
    /// The new value must decode under `password`; otherwise nothing changes.
    pub fn rotate(
        &mut self,
        codec: &SecretCodec,
        password: &str,
        new_raw: &str,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> VaultResult<()> {
        let candidate = RawSecret::validate(new_raw);
        let plaintext = codec.decode(&candidate, password)?;
        self.commit_rotation(candidate, plaintext, password, grace, now)
    }

    /// Rotate to a freshly generated random value with the current format
    pub fn rotate_generated(
        &mut self,
        codec: &SecretCodec,
        password: &str,
        len: usize,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> VaultResult<()> {
        let (candidate, plaintext) = self.generated_successor(codec, password, len)?;
        self.commit_rotation(candidate, plaintext, password, grace, now)
    }

    /// A random value in this value's current format, with its plaintext
    pub(crate) fn generated_successor(
        &self,
        codec: &SecretCodec,
        password: &str,
        len: usize,
    ) -> VaultResult<(RawSecret, Zeroizing<Vec<u8>>)> {
        let fresh = Self::generate(
            codec,
            len,
            password,
            self.raw.mode(),
            self.raw.encoding(),
            self.raw.encryption(),
        )?;
        let plaintext = match fresh.decoded {
            Some(ref cache) => cache.plaintext.clone(),
            None => codec.decode(&fresh.raw, password)?,
        };
        Ok((fresh.raw.clone(), plaintext))
    }

    /// Install an already decoded candidate as the current value.
    ///
    /// Both deadlines are computed before anything is replaced, so an
    /// out-of-range `grace` leaves the value untouched.
    pub(crate) fn commit_rotation(
        &mut self,
        candidate: RawSecret,
        plaintext: Zeroizing<Vec<u8>>,
        password: &str,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> VaultResult<()> {
        let old_expires_at = grace_end(grace, now)?;
        let expires_at = lifetime_end(self.max_duration_minutes, now)?;

        let cache = DecodedCache::new(&candidate, password, plaintext);
        let previous = std::mem::replace(&mut self.raw, candidate);

        self.old_raw = Some(previous);
        self.old_expires_at = old_expires_at;
        self.expires_at = expires_at;
        self.decoded = Some(cache);
        Ok(())
    }

    /// True once the value's lifetime or the previous value's grace window has passed
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        let past = |at: Option<DateTime<Utc>>| at.map(|t| t <= now).unwrap_or(false);
        past(self.expires_at) || past(self.old_expires_at)
    }

    /// Whether the previous value is still inside its grace window
    pub fn previous_is_valid(&self, now: DateTime<Utc>) -> bool {
        match (&self.old_raw, self.old_expires_at) {
            (Some(_), Some(until)) => now < until,
            _ => false,
        }
    }

    /// Plaintext of the previous value while its grace window is open
    pub fn decode_previous(
        &self,
        codec: &SecretCodec,
        password: &str,
        now: DateTime<Utc>,
    ) -> VaultResult<Option<Zeroizing<Vec<u8>>>> {
        match &self.old_raw {
            Some(old) if self.previous_is_valid(now) => Ok(Some(codec.decode(old, password)?)),
            _ => Ok(None),
        }
    }

    /// Check a presented credential against the current value, or the
    /// previous one while its grace window is open
    pub fn accepts(
        &mut self,
        codec: &SecretCodec,
        password: &str,
        candidate: &[u8],
        now: DateTime<Utc>,
    ) -> VaultResult<bool> {
        let current = self.decode(codec, password, true)?;
        if constant_time_compare(&current, candidate) {
            return Ok(true);
        }

        match self.decode_previous(codec, password, now)? {
            Some(previous) => Ok(constant_time_compare(&previous, candidate)),
            None => Ok(false),
        }
    }

    /// Forget the previous value once its grace window has closed
    pub fn purge_expired_previous(&mut self, now: DateTime<Utc>) -> bool {
        let closed = self.old_raw.is_some()
            && self.old_expires_at.map(|t| t <= now).unwrap_or(true);
        if closed {
            self.old_raw = None;
            self.old_expires_at = None;
        }
        closed
    }

    /// Stage re-encryption of the current and previous values under a new password
    pub fn rekeyed(
        &self,
        codec: &SecretCodec,
        old_password: &str,
        new_password: &str,
    ) -> VaultResult<Rekeyed> {
        let rekey = |raw: &RawSecret| -> VaultResult<RawSecret> {
            if !raw.is_encrypted() {
                return Ok(raw.clone());
            }
            let opened = codec.decrypt_raw(raw, old_password)?;
            codec.encrypt_raw(&opened, new_password)
        };

        Ok(Rekeyed {
            previous: self.raw.clone(),
            raw: rekey(&self.raw)?,
            old_raw: self.old_raw.as_ref().map(rekey).transpose()?,
        })
    }

    /// True if `staged` was computed from this value's current state
    pub fn matches_staged(&self, staged: &Rekeyed) -> bool {
        self.raw == staged.previous
    }

    /// Take the raw form and cache of a copy that was moved to another mode
    pub(crate) fn adopt_mode_change(&mut self, converted: SecretValue) {
        self.raw = converted.raw;
        self.decoded = converted.decoded;
    }

    /// Commit a staged re-key
    pub fn apply_rekey(&mut self, staged: Rekeyed) {
        self.raw = staged.raw;
        self.old_raw = staged.old_raw;
        self.decoded = None;
    }
}

impl Default for SecretValue {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("raw", &self.raw)
            .field("cached", &self.decoded.is_some())
            .field("expires_at", &self.expires_at)
            .field("old_raw", &self.old_raw)
            .field("old_expires_at", &self.old_expires_at)
            .field("max_duration_minutes", &self.max_duration_minutes)
            .finish()
    }
}

/// End of a `minutes`-long lifetime starting at `now`; `None` when unbounded
pub(crate) fn lifetime_end(minutes: i64, now: DateTime<Utc>) -> VaultResult<Option<DateTime<Utc>>> {
    if minutes <= 0 {
        return Ok(None);
    }
    Duration::try_minutes(minutes)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .map(Some)
        .ok_or_else(|| {
            VaultError::ConfigError(format!("max duration of {minutes} minutes is out of range"))
        })
}

/// End of the previous value's grace window; `None` when no grace is granted
pub(crate) fn grace_end(grace: Duration, now: DateTime<Utc>) -> VaultResult<Option<DateTime<Utc>>> {
    if grace <= Duration::zero() {
        return Ok(None);
    }
    now.checked_add_signed(grace)
        .map(Some)
        .ok_or_else(|| VaultError::ConfigError("grace period out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::testing::CountingProvider;
    use crate::models::KdfParams;
    use std::sync::Arc;

    fn codec() -> SecretCodec {
        SecretCodec::with_kdf(KdfParams::testing())
    }

    fn encrypted(codec: &SecretCodec, text: &[u8], password: &str) -> SecretValue {
        SecretValue::from_cleartext(
            codec,
            text,
            password,
            CryptMode::Encrypted,
            EncodingType::Base64,
            EncryptionType::Aes256,
        )
        .unwrap()
    }

    #[test]
    fn test_serialize_and_reopen() {
        let codec = codec();
        let mut value = SecretValue::from_cleartext(
            &codec,
            b"hello",
            "pw1",
            CryptMode::Decrypted,
            EncodingType::Base64,
            EncryptionType::Aes256,
        )
        .unwrap();

        value.ensure_crypt_mode(&codec, "pw1", CryptMode::Encrypted).unwrap();
        assert_eq!(value.crypt_mode(), CryptMode::Encrypted);
        assert!(!value.is_cached());

        let record = value.to_record();
        let json = serde_json::to_string(&record).unwrap();
        let mut reloaded =
            SecretValue::from_record(&serde_json::from_str::<SecretValueRecord>(&json).unwrap())
                .unwrap();

        reloaded.ensure_crypt_mode(&codec, "pw1", CryptMode::Decrypted).unwrap();
        assert_eq!(reloaded.crypt_mode(), CryptMode::Decrypted);
        assert_eq!(reloaded.decode(&codec, "pw1", true).unwrap().as_slice(), b"hello");
    }

    #[test]
    fn test_ensure_same_mode_is_noop() {
        let codec = codec();
        let mut value = SecretValue::from_raw("d;plain;aes256;hello");
        let before = value.raw().to_string();
        value.ensure_crypt_mode(&codec, "pw", CryptMode::Decrypted).unwrap();
        assert_eq!(value.raw().to_string(), before);
    }

    #[test]
    fn test_ensure_mode_failure_leaves_value_intact() {
        let codec = codec();
        let mut value = encrypted(&codec, b"hello", "pw");
        let before = value.raw().to_string();

        let err = value
            .ensure_crypt_mode(&codec, "wrong", CryptMode::Decrypted)
            .unwrap_err();
        assert!(matches!(err, VaultError::CryptoFailure(_)));
        assert_eq!(value.raw().to_string(), before);
    }

    #[test]
    fn test_decrypting_populates_cache() {
        let provider = Arc::new(CountingProvider::new());
        let codec = SecretCodec::new(provider.clone());

        let raw = codec
            .encode(b"hello", "pw", CryptMode::Encrypted, EncodingType::Base64, EncryptionType::Aes256)
            .unwrap();
        let mut value = SecretValue::from_raw(&raw.to_string());
        assert!(!value.is_cached());

        value.ensure_crypt_mode(&codec, "pw", CryptMode::Decrypted).unwrap();
        assert!(value.is_cached());

        let calls = provider.decrypt_calls();
        assert_eq!(value.decode(&codec, "pw", true).unwrap().as_slice(), b"hello");
        assert_eq!(provider.decrypt_calls(), calls);
    }

    #[test]
    fn test_encrypting_invalidates_cache() {
        let provider = Arc::new(CountingProvider::new());
        let codec = SecretCodec::new(provider.clone());
        let mut value = SecretValue::from_cleartext(
            &codec,
            b"hello",
            "pw",
            CryptMode::Decrypted,
            EncodingType::Plain,
            EncryptionType::Aes256,
        )
        .unwrap();
        assert!(value.is_cached());

        value.ensure_crypt_mode(&codec, "pw", CryptMode::Encrypted).unwrap();
        assert!(!value.is_cached());

        let calls = provider.decrypt_calls();
        assert_eq!(value.decode(&codec, "pw", true).unwrap().as_slice(), b"hello");
        assert_eq!(provider.decrypt_calls(), calls + 1);
    }

    #[test]
    fn test_decode_cache_avoids_provider() {
        let provider = Arc::new(CountingProvider::new());
        let codec = SecretCodec::new(provider.clone());

        let raw = codec
            .encode(b"hello", "pw", CryptMode::Encrypted, EncodingType::Hex, EncryptionType::Aes128)
            .unwrap();
        let mut value = SecretValue::from_raw(&raw.to_string());

        let first = value.decode(&codec, "pw", true).unwrap();
        assert_eq!(provider.decrypt_calls(), 1);

        let second = value.decode(&codec, "pw", true).unwrap();
        assert_eq!(provider.decrypt_calls(), 1);
        assert_eq!(first.as_slice(), second.as_slice());
    }

    #[test]
    fn test_uncached_decode_repeats_work() {
        let provider = Arc::new(CountingProvider::new());
        let codec = SecretCodec::new(provider.clone());

        let raw = codec
            .encode(b"hello", "pw", CryptMode::Encrypted, EncodingType::Base64, EncryptionType::Aes256)
            .unwrap();
        let mut value = SecretValue::from_raw(&raw.to_string());

        value.decode(&codec, "pw", false).unwrap();
        value.decode(&codec, "pw", false).unwrap();
        assert_eq!(provider.decrypt_calls(), 2);
        assert!(!value.is_cached());
    }

    #[test]
    fn test_warm_cache_still_rejects_wrong_password() {
        let codec = codec();
        let mut value = encrypted(&codec, b"hello", "pw1");
        assert!(value.is_cached());

        let err = value.decode(&codec, "pw2", true).unwrap_err();
        assert!(err.is_crypto_failure());
        assert_eq!(value.decode(&codec, "pw1", true).unwrap().as_slice(), b"hello");
    }

    #[test]
    fn test_rotate_with_grace() {
        let codec = codec();
        let now = Utc::now();
        let mut value = SecretValue::from_raw("d;plain;aes256;first");
        let previous = value.raw().clone();

        value
            .rotate(&codec, "pw", "d;plain;aes256;second", Duration::minutes(1), now)
            .unwrap();

        assert_eq!(value.old_raw(), Some(&previous));
        assert_eq!(value.old_expires_at(), Some(now + Duration::minutes(1)));
        assert!(!value.has_expired(now));
        assert!(value.has_expired(now + Duration::minutes(1) + Duration::seconds(1)));
        assert_eq!(value.decode(&codec, "pw", true).unwrap().as_slice(), b"second");
    }

    #[test]
    fn test_rotate_without_grace_sets_no_expiry() {
        let codec = codec();
        let now = Utc::now();
        let mut value = SecretValue::from_raw("d;plain;aes256;first");

        value
            .rotate(&codec, "pw", "d;plain;aes256;second", Duration::zero(), now)
            .unwrap();

        assert!(value.old_raw().is_some());
        assert_eq!(value.old_expires_at(), None);
        assert!(!value.has_expired(now + Duration::days(365)));
        assert!(!value.previous_is_valid(now));
    }

    #[test]
    fn test_rotate_rejects_unrepresentable_grace() {
        let codec = codec();
        let mut value = SecretValue::from_raw("d;plain;aes256;first");
        let before = value.raw().to_string();

        let err = value
            .rotate(&codec, "pw", "d;plain;aes256;second", Duration::days(100_000_000), Utc::now())
            .unwrap_err();
        assert!(matches!(err, VaultError::ConfigError(_)));
        assert_eq!(value.raw().to_string(), before);
        assert!(value.old_raw().is_none());
    }

    #[test]
    fn test_oversized_max_duration_is_rejected() {
        let record = SecretValueRecord {
            value: "d;plain;aes256;v1".to_string(),
            expires_at: None,
            old_value: None,
            old_value_expires_at: None,
            max_duration: i64::MAX,
        };
        assert!(matches!(
            SecretValue::from_record(&record),
            Err(VaultError::ConfigError(_))
        ));

        let mut value = SecretValue::from_raw("d;plain;aes256;v1");
        assert!(value.set_max_duration(i64::MAX, Utc::now()).is_err());
        assert_eq!(value.max_duration_minutes(), 0);
        assert_eq!(value.expires_at(), None);
    }

    #[test]
    fn test_rotate_rejects_undecodable_value() {
        let codec = codec();
        let mut value = encrypted(&codec, b"current", "pw");
        let before = value.raw().to_string();

        let foreign = codec
            .encode(b"other", "not-pw", CryptMode::Encrypted, EncodingType::Base64, EncryptionType::Aes256)
            .unwrap();

        let result = value.rotate(&codec, "pw", &foreign.to_string(), Duration::minutes(5), Utc::now());
        assert!(result.is_err());
        assert_eq!(value.raw().to_string(), before);
        assert!(value.old_raw().is_none());
    }

    #[test]
    fn test_max_duration_expiry() {
        let codec = codec();
        let now = Utc::now();
        let mut value = SecretValue::from_raw("d;plain;aes256;v1");
        value.set_max_duration(10, now).unwrap();
        assert_eq!(value.expires_at(), Some(now + Duration::minutes(10)));
        assert!(!value.has_expired(now + Duration::minutes(9)));
        assert!(value.has_expired(now + Duration::minutes(10)));

        let later = now + Duration::minutes(30);
        value.rotate(&codec, "", "d;plain;aes256;v2", Duration::zero(), later).unwrap();
        assert_eq!(value.expires_at(), Some(later + Duration::minutes(10)));
    }

    #[test]
    fn test_accepts_previous_during_grace() {
        let codec = codec();
        let now = Utc::now();
        let mut value = encrypted(&codec, b"old-token", "pw");
        let next = codec
            .encode(b"new-token", "pw", CryptMode::Encrypted, EncodingType::Base64, EncryptionType::Aes256)
            .unwrap();
        value.rotate(&codec, "pw", &next.to_string(), Duration::minutes(5), now).unwrap();

        assert!(value.accepts(&codec, "pw", b"new-token", now).unwrap());
        assert!(value.accepts(&codec, "pw", b"old-token", now).unwrap());
        assert!(!value.accepts(&codec, "pw", b"old-token", now + Duration::minutes(6)).unwrap());
        assert!(!value.accepts(&codec, "pw", b"garbage", now).unwrap());

        assert!(value.purge_expired_previous(now + Duration::minutes(6)));
        assert!(value.old_raw().is_none());
    }

    #[test]
    fn test_generate_produces_requested_length() {
        let codec = codec();
        let mut value = SecretValue::generate(
            &codec,
            24,
            "pw",
            CryptMode::Encrypted,
            EncodingType::Plain,
            EncryptionType::Aes192,
        )
        .unwrap();

        assert_eq!(value.raw().encoding(), EncodingType::Base64);
        assert_eq!(value.decode(&codec, "pw", true).unwrap().len(), 24);
    }

    #[test]
    fn test_from_cleartext_rejects_empty() {
        let codec = codec();
        let result = SecretValue::from_cleartext(
            &codec,
            b"",
            "pw",
            CryptMode::Decrypted,
            EncodingType::Plain,
            EncryptionType::Aes256,
        );
        assert!(matches!(result, Err(VaultError::EmptyValue)));
    }

    #[test]
    fn test_rekey_moves_value_to_new_password() {
        let codec = codec();
        let now = Utc::now();
        let mut value = encrypted(&codec, b"v1", "old");
        let next = codec
            .encode(b"v2", "old", CryptMode::Encrypted, EncodingType::Base64, EncryptionType::Aes256)
            .unwrap();
        value.rotate(&codec, "old", &next.to_string(), Duration::minutes(5), now).unwrap();

        let staged = value.rekeyed(&codec, "old", "new").unwrap();
        assert!(value.matches_staged(&staged));
        value.apply_rekey(staged);

        assert_eq!(value.decode(&codec, "new", true).unwrap().as_slice(), b"v2");
        let previous = value.decode_previous(&codec, "new", now).unwrap().unwrap();
        assert_eq!(previous.as_slice(), b"v1");
        assert!(value.decode(&codec, "old", false).is_err());
    }
}
