use std::sync::Arc;

use chrono::{Duration, Utc};
use secrets_core::{
    CryptMode, EncodingType, EncryptionType, KdfParams, ManualClock, SecretCodec, SecretItem,
    SecretValue, SecretsRegistry, VaultConfig, VaultError,
};
use tempfile::TempDir;

fn codec() -> SecretCodec {
    SecretCodec::with_kdf(KdfParams::testing())
}

fn config() -> VaultConfig {
    VaultConfig {
        kdf: KdfParams::testing(),
        ..VaultConfig::default()
    }
}

#[test]
fn value_survives_encrypt_serialize_decrypt() {
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
    assert!(value.raw().to_string().starts_with("e;base64;aes256;"));

    let json = serde_json::to_string(&value.to_record()).unwrap();
    let mut restored = SecretValue::from_record(&serde_json::from_str(&json).unwrap()).unwrap();
    assert_eq!(restored.crypt_mode(), CryptMode::Encrypted);

    restored.ensure_crypt_mode(&codec, "pw1", CryptMode::Decrypted).unwrap();
    assert_eq!(restored.decode(&codec, "pw1", false).unwrap().as_slice(), b"hello");
}

#[test]
fn master_password_change_keeps_every_secret() {
    let registry = SecretsRegistry::new("old", codec(), &config()).unwrap();
    let secrets = [("api/openai", "sk-123"), ("db/url", "postgres://u:p@h/db"), ("smtp", "hunter2")];
    for (key, text) in secrets {
        registry.store(key, text.as_bytes()).unwrap();
    }
    registry
        .set_secret(SecretItem::from_raw("legacy", "not;a;valid;mode;string").unwrap())
        .unwrap();

    registry.set_master_password("old", "new").unwrap();
    registry.rebuild_index();

    for (key, text) in secrets {
        assert_eq!(registry.get_secret_string(key).unwrap(), text);
        let item = registry.item(key).unwrap();
        assert_eq!(item.get_decoded_value(registry.codec(), "new").unwrap().as_slice(), text.as_bytes());
    }
    assert!(registry.get_secret("legacy").is_some());
    assert!(!registry.verify_master_password("old"));
}

#[test]
fn rotated_secret_expires_after_grace() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let registry = SecretsRegistry::new("master", codec(), &config())
        .unwrap()
        .with_clock(clock.clone());
    registry.store("signing-key", b"first").unwrap();

    let rotated = registry
        .codec()
        .encode(b"second", "master", CryptMode::Encrypted, EncodingType::Hex, EncryptionType::Aes128)
        .unwrap();
    registry
        .rotate_secret("signing-key", &rotated.to_string(), Duration::minutes(1))
        .unwrap();
    assert!(!registry.has_any_expired());
    assert_eq!(registry.get_secret_string("signing-key").unwrap(), "second");

    clock.advance(Duration::seconds(61));
    assert!(registry.has_any_expired());
}

#[test]
fn rotation_with_wrong_password_leaves_value_unchanged() {
    let registry = SecretsRegistry::new("master", codec(), &config()).unwrap();
    registry.store("token", b"keep-me").unwrap();

    let foreign = registry
        .codec()
        .encode(b"other", "not-master", CryptMode::Encrypted, EncodingType::Base64, EncryptionType::Aes256)
        .unwrap();
    let err = registry
        .rotate_secret("token", &foreign.to_string(), Duration::minutes(1))
        .unwrap_err();

    assert!(err.is_crypto_failure());
    assert!(matches!(err, VaultError::ItemError { .. }));
    assert_eq!(registry.get_secret_string("token").unwrap(), "keep-me");
}

#[tokio::test]
async fn registry_roundtrips_through_encrypted_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = secrets_core::vault_file_path(temp_dir.path());

    let registry = SecretsRegistry::new("master", codec(), &config()).unwrap();
    registry.store("a", b"alpha").unwrap();
    registry.store_with_mode("b", b"beta", CryptMode::Decrypted).unwrap();
    registry.save_to_file(&path, Some("file-pw")).await.unwrap();

    let loaded = SecretsRegistry::load_from_file(&path, "master", Some("file-pw"), codec(), &config())
        .await
        .unwrap();
    assert_eq!(loaded.keys(), registry.keys());
    assert_eq!(loaded.get_secret_string("a").unwrap(), "alpha");
    assert_eq!(loaded.get_secret_string("b").unwrap(), "beta");

    let wrong_master =
        SecretsRegistry::load_from_file(&path, "other", Some("file-pw"), codec(), &config()).await;
    assert!(wrong_master.is_err());
}
