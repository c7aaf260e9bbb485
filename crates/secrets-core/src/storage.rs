//! File storage for registry snapshots
//!
//! Handles reading/writing vault files with:
//! - Atomic writes (write to temp, then rename)
//! - A backup of the previous file before each write
//! - Version checking for migrations
//! - Optional whole-file encryption behind a magic header

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use zeroize::Zeroizing;

use crate::crypto::CryptoProvider;
use crate::error::{VaultError, VaultResult};
use crate::models::{EncryptionType, RegistrySnapshot, VaultConfig};

/// Default vault directory name
const VAULT_DIR: &str = ".secrets-vault";

/// Main vault file name
const VAULT_FILE: &str = "vault.json";

/// Config file name
const CONFIG_FILE: &str = "config.toml";

/// Header of a whole-file encrypted vault
pub const ENCRYPTED_MAGIC: &[u8; MAGIC_LEN] = b"SVLTENC1";

const MAGIC_LEN: usize = 8;

/// Scheme used for whole-file encryption
const FILE_SCHEME: EncryptionType = EncryptionType::Aes256;

/// Get the default vault directory path (`$VAULT_DIR` overrides it)
pub fn default_vault_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("VAULT_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(VAULT_DIR)
}

/// Get the vault file path
pub fn vault_file_path(base_dir: &Path) -> PathBuf {
    base_dir.join(VAULT_FILE)
}

/// Get the backup path for a vault file
pub fn backup_file_path(vault_path: &Path) -> PathBuf {
    with_suffix(vault_path, ".backup")
}

/// Get the config file path
pub fn config_file_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CONFIG_FILE)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Ensure the vault directory exists with proper permissions
pub async fn ensure_vault_dir(base_dir: &Path) -> VaultResult<()> {
    if !base_dir.exists() {
        fs::create_dir_all(base_dir).await?;

        // Set directory permissions to 700 (owner only) on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            fs::set_permissions(base_dir, perms).await?;
        }
    }
    Ok(())
}

/// Check if a vault exists in the given directory
pub fn vault_exists(base_dir: &Path) -> bool {
    vault_file_path(base_dir).exists()
}

/// True if the file at `path` starts with the encrypted-vault header
pub async fn is_encrypted_file(path: &Path) -> VaultResult<bool> {
    let mut file = fs::File::open(path).await?;
    let mut header = [0u8; MAGIC_LEN];
    match file.read_exact(&mut header).await {
        Ok(_) => Ok(&header == ENCRYPTED_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Serialize a snapshot and write it atomically.
///
/// With a file password the JSON document is encrypted as a whole and
/// prefixed with [`ENCRYPTED_MAGIC`].
pub async fn write_snapshot(
    path: &Path,
    snapshot: &RegistrySnapshot,
    file_password: Option<&str>,
    provider: &dyn CryptoProvider,
) -> VaultResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_vault_dir(parent).await?;
    }

    let plaintext = Zeroizing::new(serde_json::to_vec_pretty(snapshot)?);
    let data = match file_password {
        Some(password) => {
            if password.is_empty() {
                return Err(VaultError::EmptyValue);
            }
            let ciphertext = provider.encrypt(&plaintext, password.as_bytes(), FILE_SCHEME)?;
            let mut data = Vec::with_capacity(MAGIC_LEN + ciphertext.len());
            data.extend_from_slice(ENCRYPTED_MAGIC);
            data.extend_from_slice(&ciphertext);
            Zeroizing::new(data)
        }
        None => plaintext,
    };

    // Keep one copy of the previous file
    if path.exists() {
        let backup_path = backup_file_path(path);
        if backup_path.exists() {
            fs::remove_file(&backup_path).await?;
        }
        fs::copy(path, &backup_path).await?;
    }

    // Write atomically (write to temp, then rename)
    let temp_path = with_suffix(path, ".tmp");
    write_file(&temp_path, &data).await?;
    fs::rename(&temp_path, path).await?;

    tracing::debug!(path = %path.display(), encrypted = file_password.is_some(), "snapshot written");
    Ok(())
}

/// Read a snapshot written by [`write_snapshot`]
pub async fn read_snapshot(
    path: &Path,
    file_password: Option<&str>,
    provider: &dyn CryptoProvider,
) -> VaultResult<RegistrySnapshot> {
    if !path.exists() {
        return Err(VaultError::ConfigError(format!(
            "Vault file not found: {}",
            path.display()
        )));
    }

    let mut file = fs::File::open(path).await?;
    let mut data = Zeroizing::new(Vec::new());
    file.read_to_end(&mut data).await?;

    let encrypted = data.starts_with(ENCRYPTED_MAGIC);
    let plaintext = match (encrypted, file_password) {
        (true, Some(password)) => Zeroizing::new(provider.decrypt(
            &data[MAGIC_LEN..],
            password.as_bytes(),
            FILE_SCHEME,
        )?),
        (true, None) => {
            return Err(VaultError::ConfigError(
                "Vault file is encrypted; a file password is required".to_string(),
            ))
        }
        (false, Some(_)) => return Err(VaultError::VaultCorrupted),
        (false, None) => data,
    };

    let snapshot: RegistrySnapshot = serde_json::from_slice(&plaintext)?;

    // Check version
    if snapshot.version > RegistrySnapshot::CURRENT_VERSION {
        return Err(VaultError::ConfigError(format!(
            "Vault version {} is newer than supported version {}",
            snapshot.version,
            RegistrySnapshot::CURRENT_VERSION
        )));
    }

    Ok(snapshot)
}

/// Write bytes to a file readable only by the owner
async fn write_file(path: &Path, data: &[u8]) -> VaultResult<()> {
    // A leftover file would keep its old permissions
    if path.exists() {
        fs::remove_file(path).await?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;

    Ok(())
}

/// Load vault configuration
pub async fn load_config(base_dir: &Path) -> VaultResult<VaultConfig> {
    let config_path = config_file_path(base_dir);

    if !config_path.exists() {
        return Ok(VaultConfig::default());
    }

    let content = fs::read_to_string(&config_path).await?;
    let config: VaultConfig =
        toml::from_str(&content).map_err(|e| VaultError::ConfigError(e.to_string()))?;
    config.validate()?;

    Ok(config)
}

/// Save vault configuration
pub async fn save_config(base_dir: &Path, config: &VaultConfig) -> VaultResult<()> {
    ensure_vault_dir(base_dir).await?;

    let config_path = config_file_path(base_dir);
    let content =
        toml::to_string_pretty(config).map_err(|e| VaultError::ConfigError(e.to_string()))?;

    fs::write(&config_path, content).await?;

    Ok(())
}

/// Delete the vault file and its backup
pub async fn delete_vault(base_dir: &Path) -> VaultResult<()> {
    let vault_path = vault_file_path(base_dir);
    let backup_path = backup_file_path(&vault_path);

    if vault_path.exists() {
        fs::remove_file(&vault_path).await?;
    }

    if backup_path.exists() {
        fs::remove_file(&backup_path).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesGcmProvider;
    use crate::models::{KdfParams, SecretRecord, SecretValueRecord};
    use tempfile::TempDir;

    fn provider() -> AesGcmProvider {
        AesGcmProvider::new(KdfParams::testing())
    }

    fn sample() -> RegistrySnapshot {
        RegistrySnapshot::new(vec![SecretRecord {
            key: "api/openai".to_string(),
            value: SecretValueRecord {
                value: "d;plain;aes256;sk-test".to_string(),
                expires_at: None,
                old_value: None,
                old_value_expires_at: None,
                max_duration: 0,
            },
        }])
    }

    #[tokio::test]
    async fn test_plain_snapshot_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = vault_file_path(temp_dir.path());

        write_snapshot(&path, &sample(), None, &provider()).await.unwrap();
        assert!(vault_exists(temp_dir.path()));
        assert!(!is_encrypted_file(&path).await.unwrap());

        let loaded = read_snapshot(&path, None, &provider()).await.unwrap();
        assert_eq!(loaded.secrets, sample().secrets);

        let text = fs::read_to_string(&path).await.unwrap();
        assert!(text.contains("\"maxDuration\""));
    }

    #[tokio::test]
    async fn test_encrypted_snapshot_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = vault_file_path(temp_dir.path());

        write_snapshot(&path, &sample(), Some("file-pw"), &provider()).await.unwrap();
        assert!(is_encrypted_file(&path).await.unwrap());

        let raw = fs::read(&path).await.unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("sk-test"));

        let loaded = read_snapshot(&path, Some("file-pw"), &provider()).await.unwrap();
        assert_eq!(loaded.secrets, sample().secrets);
    }

    #[tokio::test]
    async fn test_wrong_file_password() {
        let temp_dir = TempDir::new().unwrap();
        let path = vault_file_path(temp_dir.path());
        write_snapshot(&path, &sample(), Some("right"), &provider()).await.unwrap();

        let err = read_snapshot(&path, Some("wrong"), &provider()).await.unwrap_err();
        assert!(err.is_crypto_failure());

        let err = read_snapshot(&path, None, &provider()).await.unwrap_err();
        assert!(matches!(err, VaultError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_missing_magic_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = vault_file_path(temp_dir.path());
        write_snapshot(&path, &sample(), None, &provider()).await.unwrap();

        let err = read_snapshot(&path, Some("pw"), &provider()).await.unwrap_err();
        assert!(matches!(err, VaultError::VaultCorrupted));
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = vault_file_path(temp_dir.path());
        let mut snapshot = sample();
        snapshot.version = RegistrySnapshot::CURRENT_VERSION + 1;
        write_snapshot(&path, &snapshot, None, &provider()).await.unwrap();

        let err = read_snapshot(&path, None, &provider()).await.unwrap_err();
        assert!(matches!(err, VaultError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_backup_keeps_previous_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = vault_file_path(temp_dir.path());

        write_snapshot(&path, &sample(), None, &provider()).await.unwrap();
        write_snapshot(&path, &RegistrySnapshot::new(Vec::new()), None, &provider())
            .await
            .unwrap();

        let backup = read_snapshot(&backup_file_path(&path), None, &provider()).await.unwrap();
        assert_eq!(backup.secrets.len(), 1);
        let current = read_snapshot(&path, None, &provider()).await.unwrap();
        assert!(current.secrets.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_vault_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = vault_file_path(temp_dir.path());
        write_snapshot(&path, &sample(), None, &provider()).await.unwrap();

        let mode = fs::metadata(&path).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_leftover_temp_file_does_not_leak_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = vault_file_path(temp_dir.path());
        let temp_path = with_suffix(&path, ".tmp");
        fs::write(&temp_path, b"stale").await.unwrap();
        fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o644))
            .await
            .unwrap();

        write_file(&temp_path, b"{}").await.unwrap();
        let mode = fs::metadata(&temp_path).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read(&temp_path).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_config_with_out_of_range_duration_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            config_file_path(temp_dir.path()),
            format!("max_duration_minutes = {}\n", i64::MAX),
        )
        .await
        .unwrap();

        let err = load_config(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, VaultError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(load_config(temp_dir.path()).await.unwrap().generated_secret_length, 32);

        let mut config = VaultConfig::default();
        config.default_grace_minutes = 5;
        config.generate_if_empty = true;
        save_config(temp_dir.path(), &config).await.unwrap();

        let loaded = load_config(temp_dir.path()).await.unwrap();
        assert_eq!(loaded.default_grace_minutes, 5);
        assert!(loaded.generate_if_empty);
    }
}
