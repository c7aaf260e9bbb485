//! Cryptographic operations for secret values
//!
//! - `CryptoProvider` is the seam the rest of the vault encrypts through
//! - `AesGcmProvider`: Argon2id key derivation + AES-GCM (128/192/256)
//! - Ciphertext layout: `salt || nonce || ciphertext+tag`

use aes_gcm::{
    aead::{consts::U12, Aead, KeyInit, Nonce, OsRng},
    aes::Aes192,
    Aes128Gcm, Aes256Gcm, AesGcm,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{VaultError, VaultResult};
use crate::models::{EncryptionType, KdfParams};

/// Size of the per-encryption Argon2 salt in bytes
pub const SALT_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Password-based symmetric encryption used by the codec.
///
/// Implementations own key derivation, salt and nonce management and
/// authentication; callers only see opaque ciphertext bytes.
pub trait CryptoProvider: Send + Sync {
    /// Encrypt `plaintext` under a key derived from `password`
    fn encrypt(
        &self,
        plaintext: &[u8],
        password: &[u8],
        scheme: EncryptionType,
    ) -> VaultResult<Vec<u8>>;

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt).
    ///
    /// Must fail with `CryptoFailure` on a wrong password or tampered input.
    fn decrypt(
        &self,
        ciphertext: &[u8],
        password: &[u8],
        scheme: EncryptionType,
    ) -> VaultResult<Vec<u8>>;
}

/// Default provider: Argon2id + AES-GCM
#[derive(Debug, Clone, Default)]
pub struct AesGcmProvider {
    kdf: KdfParams,
}

impl AesGcmProvider {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    /// Derive a scheme-sized key from a password using Argon2id
    fn derive_key(
        &self,
        password: &[u8],
        salt: &[u8],
        scheme: EncryptionType,
    ) -> VaultResult<Secret<Vec<u8>>> {
        let params = Params::new(
            self.kdf.memory_kb,
            self.kdf.iterations,
            self.kdf.parallelism,
            Some(scheme.key_len()),
        )
        .map_err(|e| VaultError::KeyDerivationError(e.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = vec![0u8; scheme.key_len()];
        if let Err(e) = argon2.hash_password_into(password, salt, &mut output) {
            output.zeroize();
            return Err(VaultError::KeyDerivationError(e.to_string()));
        }

        Ok(Secret::new(output))
    }
}

impl CryptoProvider for AesGcmProvider {
    fn encrypt(
        &self,
        plaintext: &[u8],
        password: &[u8],
        scheme: EncryptionType,
    ) -> VaultResult<Vec<u8>> {
        let salt = generate_salt();
        let nonce = generate_nonce();
        let key = self.derive_key(password, &salt, scheme)?;

        let sealed = match scheme {
            EncryptionType::Aes128 => seal::<Aes128Gcm>(key.expose_secret(), &nonce, plaintext),
            EncryptionType::Aes192 => seal::<Aes192Gcm>(key.expose_secret(), &nonce, plaintext),
            EncryptionType::Aes256 => seal::<Aes256Gcm>(key.expose_secret(), &nonce, plaintext),
        }?;

        let mut out = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + sealed.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        password: &[u8],
        scheme: EncryptionType,
    ) -> VaultResult<Vec<u8>> {
        if ciphertext.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(VaultError::CryptoFailure(
                "ciphertext too short".to_string(),
            ));
        }

        let (salt, rest) = ciphertext.split_at(SALT_SIZE);
        let (nonce, sealed) = rest.split_at(NONCE_SIZE);
        let key = self.derive_key(password, salt, scheme)?;

        match scheme {
            EncryptionType::Aes128 => open::<Aes128Gcm>(key.expose_secret(), nonce, sealed),
            EncryptionType::Aes192 => open::<Aes192Gcm>(key.expose_secret(), nonce, sealed),
            EncryptionType::Aes256 => open::<Aes256Gcm>(key.expose_secret(), nonce, sealed),
        }
    }
}

fn seal<C>(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> VaultResult<Vec<u8>>
where
    C: Aead + KeyInit,
{
    let cipher =
        C::new_from_slice(key).map_err(|e| VaultError::CryptoFailure(e.to_string()))?;

    cipher
        .encrypt(Nonce::<C>::from_slice(nonce), plaintext)
        .map_err(|e| VaultError::CryptoFailure(e.to_string()))
}

fn open<C>(key: &[u8], nonce: &[u8], sealed: &[u8]) -> VaultResult<Vec<u8>>
where
    C: Aead + KeyInit,
{
    let cipher =
        C::new_from_slice(key).map_err(|e| VaultError::CryptoFailure(e.to_string()))?;

    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), sealed)
        .map_err(|_| {
            VaultError::CryptoFailure(
                "Decryption failed - wrong password or corrupted data".to_string(),
            )
        })
}

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a cryptographically secure random nonce
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Random secret material of the given length
pub fn generate_secret_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// SHA-256 fingerprint of a password, used to key in-memory caches
pub fn password_fingerprint(password: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.finalize().into()
}

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the real provider and counts invocations
    pub struct CountingProvider {
        inner: AesGcmProvider,
        encrypts: AtomicUsize,
        decrypts: AtomicUsize,
    }

    impl CountingProvider {
        pub fn new() -> Self {
            Self {
                inner: AesGcmProvider::new(KdfParams::testing()),
                encrypts: AtomicUsize::new(0),
                decrypts: AtomicUsize::new(0),
            }
        }

        pub fn decrypt_calls(&self) -> usize {
            self.decrypts.load(Ordering::SeqCst)
        }

        pub fn encrypt_calls(&self) -> usize {
            self.encrypts.load(Ordering::SeqCst)
        }
    }

    impl CryptoProvider for CountingProvider {
        fn encrypt(
            &self,
            plaintext: &[u8],
            password: &[u8],
            scheme: EncryptionType,
        ) -> VaultResult<Vec<u8>> {
            self.encrypts.fetch_add(1, Ordering::SeqCst);
            self.inner.encrypt(plaintext, password, scheme)
        }

        fn decrypt(
            &self,
            ciphertext: &[u8],
            password: &[u8],
            scheme: EncryptionType,
        ) -> VaultResult<Vec<u8>> {
            self.decrypts.fetch_add(1, Ordering::SeqCst);
            self.inner.decrypt(ciphertext, password, scheme)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMES: [EncryptionType; 3] = [
        EncryptionType::Aes128,
        EncryptionType::Aes192,
        EncryptionType::Aes256,
    ];

    fn provider() -> AesGcmProvider {
        AesGcmProvider::new(KdfParams::testing())
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let provider = provider();
        for scheme in SCHEMES {
            let sealed = provider.encrypt(b"Hello, secure world!", b"pw", scheme).unwrap();
            assert_eq!(sealed.len(), SALT_SIZE + NONCE_SIZE + 20 + TAG_SIZE);

            let opened = provider.decrypt(&sealed, b"pw", scheme).unwrap();
            assert_eq!(opened, b"Hello, secure world!");
        }
    }

    #[test]
    fn test_wrong_password_fails() {
        let provider = provider();
        for scheme in SCHEMES {
            let sealed = provider.encrypt(b"Secret data", b"password1", scheme).unwrap();
            let result = provider.decrypt(&sealed, b"password2", scheme);
            assert!(matches!(result, Err(VaultError::CryptoFailure(_))));
        }
    }

    #[test]
    fn test_scheme_mismatch_fails() {
        let provider = provider();
        let sealed = provider.encrypt(b"data", b"pw", EncryptionType::Aes128).unwrap();
        assert!(provider.decrypt(&sealed, b"pw", EncryptionType::Aes256).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let provider = provider();
        let mut sealed = provider.encrypt(b"data", b"pw", EncryptionType::Aes256).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(provider.decrypt(&sealed, b"pw", EncryptionType::Aes256).is_err());

        let truncated = &sealed[..SALT_SIZE];
        assert!(matches!(
            provider.decrypt(truncated, b"pw", EncryptionType::Aes256),
            Err(VaultError::CryptoFailure(_))
        ));
    }

    #[test]
    fn test_same_input_encrypts_differently() {
        let provider = provider();
        let a = provider.encrypt(b"data", b"pw", EncryptionType::Aes256).unwrap();
        let b = provider.encrypt(b"data", b"pw", EncryptionType::Aes256).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_nonce_uniqueness() {
        let nonce1 = generate_nonce();
        let nonce2 = generate_nonce();
        assert_ne!(nonce1, nonce2);
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"abc", b"abc"));
        assert!(!constant_time_compare(b"abc", b"abd"));
        assert!(!constant_time_compare(b"abc", b"abcd"));
    }
}
