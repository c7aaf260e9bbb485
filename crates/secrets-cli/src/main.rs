//! Secrets Vault CLI
//!
//! Thin front-end over `secrets-core`: each command loads the vault,
//! performs one registry operation and saves it again.

use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Duration;
use secrecy::ExposeSecret;
use secrets_core::{
    backup_file_path, default_vault_dir, is_encrypted_file, load_config, save_config,
    vault_exists, vault_file_path, CryptMode, SecretCodec, SecretItem, SecretsRegistry,
    VaultConfig,
};
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "secrets")]
#[command(version)]
#[command(about = "Secrets Vault - encrypted credentials with rotation and grace periods")]
#[command(after_help = "EXAMPLES:
  secrets init                      Create a new vault
  secrets set API_KEY               Store a secret (prompts securely)
  secrets get API_KEY               Print a secret's plaintext
  secrets rotate API_KEY --grace 1h Replace a secret, keep the old one for an hour
  secrets rekey                     Change the master password

ENVIRONMENT:
  VAULT_DIR            Vault directory (default ~/.secrets-vault)
  VAULT_PASSWORD       Master password (skips the prompt)
  VAULT_FILE_PASSWORD  Whole-file password for encrypted vault files")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Vault directory
    #[arg(long, global = true)]
    vault_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new vault
    Init {
        /// Encrypt the whole vault file with a separate file password
        #[arg(long)]
        encrypt_file: bool,
    },

    /// Store a secret (overwrites an existing one)
    #[command(after_help = "EXAMPLES:
  secrets set API_KEY                        Prompts for value (hidden)
  secrets set DB_URL --from-env DATABASE_URL Import from environment variable
  secrets set TOKEN --raw                    Value is already 'mode;encoding;encryption;payload'")]
    Set {
        /// Name of the secret
        name: String,
        /// Import from environment variable
        #[arg(long)]
        from_env: Option<String>,
        /// Treat the value as a formatted secret string
        #[arg(long)]
        raw: bool,
        /// Store the payload unencrypted
        #[arg(long)]
        decrypted: bool,
    },

    /// Print a secret's plaintext
    Get {
        /// Name of the secret
        name: String,
    },

    /// Remove a secret from the vault
    Remove {
        /// Name of the secret
        name: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List secret names and their state (never values)
    List,

    /// Replace a secret's value, keeping the previous one for a grace period
    #[command(after_help = "EXAMPLES:
  secrets rotate API_KEY                 Prompts for new value
  secrets rotate SESSION --generate      Generate a random value
  secrets rotate API_KEY --grace 0       Previous value is dropped immediately")]
    Rotate {
        /// Name of the secret
        name: String,
        /// Grace period for the previous value (e.g. 30m, 2h, 1d)
        #[arg(long)]
        grace: Option<String>,
        /// Generate a random value instead of prompting
        #[arg(long)]
        generate: bool,
    },

    /// Encrypt every secret in place
    Encrypt,

    /// Decrypt every secret in place
    Decrypt,

    /// Change the master password
    Rekey,

    /// Check vault health status
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let vault_dir = cli.vault_dir.unwrap_or_else(default_vault_dir);

    match cli.command {
        None => {
            println!("Secrets Vault - encrypted credentials with rotation and grace periods");
            println!();
            println!("Run 'secrets --help' for usage information.");
            println!("Run 'secrets init' to create a new vault.");
        }
        Some(cmd) => {
            debug!("Using vault directory: {}", vault_dir.display());
            if let Err(e) = handle_command(&vault_dir, cmd).await {
                error!("Command failed: {}", e);
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .compact(),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

async fn handle_command(vault_dir: &Path, cmd: Commands) -> CliResult<()> {
    match cmd {
        Commands::Init { encrypt_file } => handle_init(vault_dir, encrypt_file).await?,
        Commands::Set { name, from_env, raw, decrypted } => {
            handle_set(vault_dir, &name, from_env, raw, decrypted).await?
        }
        Commands::Get { name } => handle_get(vault_dir, &name).await?,
        Commands::Remove { name, yes } => handle_remove(vault_dir, &name, yes).await?,
        Commands::List => handle_list(vault_dir).await?,
        Commands::Rotate { name, grace, generate } => {
            handle_rotate(vault_dir, &name, grace, generate).await?
        }
        Commands::Encrypt => handle_crypt_mode(vault_dir, CryptMode::Encrypted).await?,
        Commands::Decrypt => handle_crypt_mode(vault_dir, CryptMode::Decrypted).await?,
        Commands::Rekey => handle_rekey(vault_dir).await?,
        Commands::Status => handle_status(vault_dir).await?,
    }

    Ok(())
}

/// An opened vault: registry plus what is needed to write it back
struct Session {
    path: PathBuf,
    config: VaultConfig,
    file_password: Option<String>,
    registry: SecretsRegistry,
}

impl Session {
    async fn open(vault_dir: &Path) -> CliResult<Self> {
        if !vault_exists(vault_dir) {
            return Err("No vault found. Run 'secrets init' first.".into());
        }

        let path = vault_file_path(vault_dir);
        let config = load_config(vault_dir).await?;
        let file_password = if is_encrypted_file(&path).await? {
            Some(read_secret("VAULT_FILE_PASSWORD", "Enter file password: ")?)
        } else {
            None
        };
        let password = read_secret("VAULT_PASSWORD", "Enter master password: ")?;

        let registry = SecretsRegistry::load_from_file(
            &path,
            &password,
            file_password.as_deref(),
            SecretCodec::with_kdf(config.kdf),
            &config,
        )
        .await?;

        Ok(Self {
            path,
            config,
            file_password,
            registry,
        })
    }

    async fn save(&self) -> CliResult<()> {
        self.registry
            .save_to_file(&self.path, self.file_password.as_deref())
            .await?;
        Ok(())
    }
}

// === Command Handlers ===

async fn handle_init(vault_dir: &Path, encrypt_file: bool) -> CliResult<()> {
    if vault_exists(vault_dir) {
        println!("Vault already exists at {}", vault_dir.display());
        return Ok(());
    }

    println!("Creating new vault at {}", vault_dir.display());

    let config = load_config(vault_dir).await?;
    let password = read_new_secret("VAULT_PASSWORD", "master password", config.generate_if_empty)?;
    let file_password = if encrypt_file {
        Some(read_new_secret("VAULT_FILE_PASSWORD", "file password", false)?)
    } else {
        None
    };

    let registry =
        SecretsRegistry::new(&password, SecretCodec::with_kdf(config.kdf), &config)?;
    registry
        .save_to_file(&vault_file_path(vault_dir), file_password.as_deref())
        .await?;
    save_config(vault_dir, &config).await?;

    if password.is_empty() {
        println!();
        println!("Generated master password (shown once, store it safely):");
        println!("  {}", registry.master_password().expose_secret());
    }

    println!();
    println!("Vault created successfully!");
    println!();
    println!("Next steps:");
    println!("  secrets set <name>     Store a secret");
    println!("  secrets list           List stored secrets");

    Ok(())
}

async fn handle_set(
    vault_dir: &Path,
    name: &str,
    from_env: Option<String>,
    raw: bool,
    decrypted: bool,
) -> CliResult<()> {
    let session = Session::open(vault_dir).await?;

    let value = match from_env {
        Some(env_var) => std::env::var(&env_var)
            .map_err(|_| format!("Environment variable '{}' not found", env_var))?,
        None => {
            let entered = prompt_password(&format!("Enter value for '{}': ", name))?;
            if !raw {
                println!("Value: {}", mask_value(&entered));
            }
            entered
        }
    };

    if value.is_empty() {
        return Err("Secret value cannot be empty".into());
    }

    if raw {
        session.registry.set_secret(SecretItem::from_raw(name, &value)?)?;
    } else {
        let mode = if decrypted {
            CryptMode::Decrypted
        } else {
            session.config.default_mode
        };
        session.registry.store_with_mode(name, value.as_bytes(), mode)?;
    }

    session.save().await?;
    println!("Secret '{}' stored", name);

    Ok(())
}

async fn handle_get(vault_dir: &Path, name: &str) -> CliResult<()> {
    let session = Session::open(vault_dir).await?;

    if !session.registry.contains(name) {
        return Err(format!("Secret '{}' not found", name).into());
    }
    let value = session
        .registry
        .get_secret_string(name)
        .ok_or_else(|| format!("Secret '{}' could not be decoded as text", name))?;
    println!("{}", value);

    Ok(())
}

async fn handle_remove(vault_dir: &Path, name: &str, yes: bool) -> CliResult<()> {
    let session = Session::open(vault_dir).await?;

    if !session.registry.contains(name) {
        return Err(format!("Secret '{}' not found", name).into());
    }

    if !yes && !confirm(&format!("Delete secret '{}'? [y/N]: ", name))? {
        println!("Cancelled.");
        return Ok(());
    }

    session.registry.remove_secret(name);
    session.save().await?;
    println!("Secret '{}' removed", name);

    Ok(())
}

async fn handle_list(vault_dir: &Path) -> CliResult<()> {
    let session = Session::open(vault_dir).await?;
    let keys = session.registry.keys();

    if keys.is_empty() {
        println!("No secrets stored.");
        println!();
        println!("Add your first secret with: secrets set <name>");
        return Ok(());
    }

    let expired = session.registry.expired_keys();
    println!("Secrets in vault:");
    for key in &keys {
        let Some(item) = session.registry.item(key.as_str()) else {
            continue;
        };
        let value = item.snapshot();
        let mut tags = vec![value.crypt_mode().to_string()];
        if value.old_raw().is_some() {
            tags.push("previous value held".to_string());
        }
        if expired.contains(key) {
            tags.push("EXPIRED".to_string());
        } else if let Some(at) = value.expires_at() {
            tags.push(format!("expires {}", at.format("%Y-%m-%d %H:%M UTC")));
        }
        println!("  * {} [{}]", key, tags.join(", "));
    }

    println!();
    println!("Total: {} secret(s)", keys.len());

    Ok(())
}

async fn handle_rotate(
    vault_dir: &Path,
    name: &str,
    grace: Option<String>,
    generate: bool,
) -> CliResult<()> {
    let session = Session::open(vault_dir).await?;
    let grace = match grace {
        Some(text) => parse_duration(&text)?,
        None => Duration::try_minutes(session.config.default_grace_minutes)
            .ok_or("default_grace_minutes is out of range")?,
    };

    if generate {
        session.registry.rotate_generated(name, grace)?;
    } else {
        let item = session
            .registry
            .item(name)
            .ok_or_else(|| format!("Secret '{}' not found", name))?;
        let current = item.snapshot();

        let entered = prompt_password(&format!("Enter new value for '{}': ", name))?;
        if entered.is_empty() {
            return Err("Secret value cannot be empty".into());
        }
        println!("Value: {}", mask_value(&entered));

        let master = session.registry.master_password();
        let encoded = session.registry.codec().encode(
            entered.as_bytes(),
            master.expose_secret(),
            current.crypt_mode(),
            current.raw().encoding(),
            current.raw().encryption(),
        )?;
        session
            .registry
            .rotate_secret(name, &encoded.to_string(), grace)?;
    }

    session.save().await?;
    if grace > Duration::zero() {
        println!(
            "Secret '{}' rotated; previous value valid for {}",
            name,
            format_grace(grace)
        );
    } else {
        println!("Secret '{}' rotated; previous value discarded (no grace period)", name);
    }

    Ok(())
}

async fn handle_crypt_mode(vault_dir: &Path, target: CryptMode) -> CliResult<()> {
    let session = Session::open(vault_dir).await?;

    let master = session.registry.master_password();
    let result = session
        .registry
        .ensure_crypt_mode(target, master.expose_secret());

    // Converted items stay converted, so persist even on failure
    session.save().await?;
    let count = result?;
    println!("{} secret(s) now {}", count, target);

    Ok(())
}

async fn handle_rekey(vault_dir: &Path) -> CliResult<()> {
    let session = Session::open(vault_dir).await?;

    let old = read_secret("VAULT_PASSWORD", "Confirm current master password: ")?;
    let new = read_new_secret("VAULT_NEW_PASSWORD", "new master password", false)?;

    session.registry.set_master_password(&old, &new)?;
    session.save().await?;
    println!("Master password changed for {} secret(s)", session.registry.len());

    Ok(())
}

async fn handle_status(vault_dir: &Path) -> CliResult<()> {
    println!("Vault Health Check");
    println!("==================");
    println!();

    if !vault_exists(vault_dir) {
        println!("[!!] No vault found. Run 'secrets init' to create one.");
        return Ok(());
    }

    let path = vault_file_path(vault_dir);
    println!("[OK] Vault found at {}", path.display());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path)?.permissions().mode() & 0o777;
        if mode == 0o600 {
            println!("[OK] Vault file permissions: 600 (owner only)");
        } else {
            println!("[!!] Vault file permissions: {:o} (should be 600)", mode);
        }
    }

    if is_encrypted_file(&path).await? {
        println!("[OK] Vault file is encrypted as a whole");
    } else {
        println!("[--] Vault file is plain JSON (secret payloads carry their own encryption)");
    }

    if backup_file_path(&path).exists() {
        println!("[OK] Backup of previous version present");
    }

    let session = Session::open(vault_dir).await?;
    let keys = session.registry.keys();
    let decrypted = keys
        .iter()
        .filter_map(|key| session.registry.item(key.as_str()))
        .filter(|item| item.crypt_mode() == CryptMode::Decrypted)
        .count();
    println!("[OK] {} secret(s) stored", keys.len());
    if decrypted > 0 {
        println!("[!!] {} secret(s) stored decrypted; run 'secrets encrypt'", decrypted);
    }

    let expired = session.registry.expired_keys();
    if expired.is_empty() {
        println!("[OK] No expired secrets");
    } else {
        for key in expired {
            println!("[!!] Expired: {}", key);
        }
    }

    Ok(())
}

// === Helpers ===

fn prompt_password(prompt: &str) -> CliResult<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let password = rpassword::read_password()?;
    Ok(password)
}

/// Read a secret from `env_var`, or prompt for it
fn read_secret(env_var: &str, prompt: &str) -> CliResult<String> {
    match std::env::var(env_var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => prompt_password(prompt),
    }
}

/// Read a new secret with confirmation; empty is only allowed when `allow_empty`
fn read_new_secret(env_var: &str, what: &str, allow_empty: bool) -> CliResult<String> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    let entered = prompt_password(&format!("Enter {}: ", what))?;
    if entered.is_empty() {
        if allow_empty {
            return Ok(entered);
        }
        return Err(format!("The {} cannot be empty", what).into());
    }

    let confirmed = prompt_password(&format!("Confirm {}: ", what))?;
    if entered != confirmed {
        return Err("Passwords do not match".into());
    }
    Ok(entered)
}

fn confirm(prompt: &str) -> CliResult<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Parse a grace period like `90s`, `30m`, `2h`, `1d`; a bare number is minutes
fn parse_duration(s: &str) -> CliResult<Duration> {
    let s = s.trim().to_lowercase();

    let (amount, unit): (&str, fn(i64) -> Option<Duration>) =
        if let Some(secs) = s.strip_suffix('s') {
            (secs, Duration::try_seconds)
        } else if let Some(minutes) = s.strip_suffix('m') {
            (minutes, Duration::try_minutes)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, Duration::try_hours)
        } else if let Some(days) = s.strip_suffix('d') {
            (days, Duration::try_days)
        } else {
            (s.as_str(), Duration::try_minutes)
        };

    let amount: i64 = amount
        .parse()
        .map_err(|_| format!("Invalid duration '{}'. Use format like 30m, 2h, or 1d", s))?;
    if amount < 0 {
        return Err(format!("Duration '{}' cannot be negative", s).into());
    }
    unit(amount).ok_or_else(|| format!("Duration '{}' is too large", s).into())
}

/// Largest whole unit that divides the grace period exactly
fn format_grace(grace: Duration) -> String {
    let secs = grace.num_seconds();
    match secs {
        s if s % 86_400 == 0 => format!("{} day(s)", s / 86_400),
        s if s % 3_600 == 0 => format!("{} hour(s)", s / 3_600),
        s if s % 60 == 0 => format!("{} minute(s)", s / 60),
        s => format!("{} second(s)", s),
    }
}

/// Mask a secret value for confirmation display
fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{}...{}", head, tail)
}
