//! Secret wire format: `<mode>;<encoding>;<encryption>;<payload>`
//!
//! `RawSecret` is the typed, validated form; the semicolon string only exists
//! at the serialization boundary. `SecretCodec` turns raw secrets into
//! plaintext and back through a `CryptoProvider`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{AesGcmProvider, CryptoProvider};
use crate::error::{VaultError, VaultResult};
use crate::models::{CryptMode, EncodingType, EncryptionType, KdfParams};

/// Field separator of the wire format
pub const FIELD_SEPARATOR: char = ';';

/// A secret in its stored form
#[derive(Clone, PartialEq, Eq)]
pub struct RawSecret {
    mode: CryptMode,
    encoding: EncodingType,
    encryption: EncryptionType,
    payload: String,
}

impl RawSecret {
    pub fn new(
        mode: CryptMode,
        encoding: EncodingType,
        encryption: EncryptionType,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            encoding,
            encryption,
            payload: payload.into(),
        }
    }

    /// Cleartext stored verbatim: `(Decrypted, Plain, AES256, text)`
    pub fn literal(text: impl Into<String>) -> Self {
        Self::new(
            CryptMode::Decrypted,
            EncodingType::Plain,
            EncryptionType::Aes256,
            text,
        )
    }

    /// Strict parse of the 4-field wire string.
    ///
    /// Everything after the third separator is payload, so payloads may
    /// themselves contain `;`.
    pub fn parse(raw: &str) -> VaultResult<Self> {
        let mut parts = raw.splitn(4, FIELD_SEPARATOR);
        let (Some(mode), Some(encoding), Some(encryption), Some(payload)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(VaultError::FormatError(
                "expected 4 ';'-separated fields".to_string(),
            ));
        };

        Ok(Self {
            mode: mode.parse()?,
            encoding: encoding.parse()?,
            encryption: encryption.parse()?,
            payload: payload.to_string(),
        })
    }

    /// Fail-soft parse: anything that is not a well-formed wire string is
    /// taken as literal cleartext.
    pub fn validate(candidate: &str) -> Self {
        match Self::parse(candidate) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "secret is not in wire format, storing as plain cleartext");
                Self::literal(candidate)
            }
        }
    }

    pub fn mode(&self) -> CryptMode {
        self.mode
    }

    pub fn encoding(&self) -> EncodingType {
        self.encoding
    }

    pub fn encryption(&self) -> EncryptionType {
        self.encryption
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn is_encrypted(&self) -> bool {
        self.mode == CryptMode::Encrypted
    }

    fn with_payload(&self, mode: CryptMode, payload: String) -> Self {
        Self {
            mode,
            encoding: self.encoding,
            encryption: self.encryption,
            payload,
        }
    }
}

impl fmt::Display for RawSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.mode.token(),
            self.encoding.token(),
            self.encryption.token(),
            self.payload,
            sep = FIELD_SEPARATOR
        )
    }
}

impl fmt::Debug for RawSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSecret")
            .field("mode", &self.mode)
            .field("encoding", &self.encoding)
            .field("encryption", &self.encryption)
            .field("payload", &"[REDACTED]")
            .finish()
    }
}

impl FromStr for RawSecret {
    type Err = VaultError;

    fn from_str(s: &str) -> VaultResult<Self> {
        Self::parse(s)
    }
}

impl Drop for RawSecret {
    fn drop(&mut self) {
        self.payload.zeroize();
    }
}

/// Encodes, decodes and transitions raw secrets
#[derive(Clone)]
pub struct SecretCodec {
    provider: Arc<dyn CryptoProvider>,
}

impl SecretCodec {
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self { provider }
    }

    /// Codec backed by the default AES-GCM provider
    pub fn with_kdf(kdf: KdfParams) -> Self {
        Self::new(Arc::new(AesGcmProvider::new(kdf)))
    }

    pub fn provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.provider
    }

    /// Recover the cleartext bytes of a raw secret
    pub fn decode(&self, raw: &RawSecret, password: &str) -> VaultResult<Zeroizing<Vec<u8>>> {
        match raw.mode {
            CryptMode::Decrypted => Ok(Zeroizing::new(raw.encoding.decode(&raw.payload)?)),
            CryptMode::Encrypted => {
                let encoded = self.open_payload(raw, password)?;
                Ok(Zeroizing::new(raw.encoding.decode(&encoded)?))
            }
        }
    }

    /// Compose a raw secret from cleartext
    pub fn encode(
        &self,
        cleartext: &[u8],
        password: &str,
        mode: CryptMode,
        encoding: EncodingType,
        encryption: EncryptionType,
    ) -> VaultResult<RawSecret> {
        let encoded = Zeroizing::new(encoding.encode(cleartext)?);
        let plain = RawSecret::new(CryptMode::Decrypted, encoding, encryption, encoded.as_str());

        match mode {
            CryptMode::Decrypted => Ok(plain),
            CryptMode::Encrypted => self.encrypt_raw(&plain, password),
        }
    }

    /// Decrypted -> Encrypted, keeping encoding and scheme
    pub fn encrypt_raw(&self, raw: &RawSecret, password: &str) -> VaultResult<RawSecret> {
        check_transition(raw.mode, CryptMode::Encrypted, password)?;

        let sealed = self
            .provider
            .encrypt(raw.payload.as_bytes(), password.as_bytes(), raw.encryption)?;

        Ok(raw.with_payload(CryptMode::Encrypted, BASE64.encode(sealed)))
    }

    /// Encrypted -> Decrypted, keeping encoding and scheme
    pub fn decrypt_raw(&self, raw: &RawSecret, password: &str) -> VaultResult<RawSecret> {
        check_transition(raw.mode, CryptMode::Decrypted, password)?;

        let encoded = self.open_payload(raw, password)?;
        Ok(raw.with_payload(CryptMode::Decrypted, encoded.to_string()))
    }

    /// Base64-decode and decrypt the payload, yielding the encoded text
    fn open_payload(&self, raw: &RawSecret, password: &str) -> VaultResult<Zeroizing<String>> {
        let sealed = BASE64.decode(raw.payload.trim()).map_err(|_| {
            VaultError::CryptoFailure("ciphertext payload is not valid base64".to_string())
        })?;

        let opened = Zeroizing::new(self.provider.decrypt(
            &sealed,
            password.as_bytes(),
            raw.encryption,
        )?);

        let text = std::str::from_utf8(&opened).map_err(|_| {
            VaultError::EncodingError("decrypted payload is not valid UTF-8".to_string())
        })?;

        Ok(Zeroizing::new(text.to_string()))
    }
}

fn check_transition(from: CryptMode, to: CryptMode, password: &str) -> VaultResult<()> {
    if from == to {
        return Err(VaultError::InvalidModeTransition {
            from,
            to,
            reason: format!("secret is already {}", from),
        });
    }
    if password.is_empty() {
        return Err(VaultError::InvalidModeTransition {
            from,
            to,
            reason: "a password is required".to_string(),
        });
    }
    Ok(())
}
