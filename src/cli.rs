//! CLI argument parsing, validation, and startup helpers.

use crate::db::{Database, UserRole};
use crate::jwt::{ACCESS_TOKEN_DURATION_SECS, REFRESH_TOKEN_DURATION_SECS, TokenLifetimes};
use crate::keys::{KeyMaterial, load_public_pem};
use crate::registry::{MemoryRegistry, RefreshRegistry};
use crate::rotation::DEFAULT_RENEWAL_WINDOW_SECS;
use crate::{GatewaySettings, ServerConfig, build_gateway};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Environment variable holding the PKCS#8 PEM signing key.
pub const SIGNING_KEY_ENV: &str = "SIGNING_KEY";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Where refresh token registrations live.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegistryBackend {
    /// Process memory; sessions do not survive a restart
    Memory,
    /// The SQLite database
    #[default]
    Sqlite,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "Sentinel",
    about = "Session gateway with CSRF-bound signed tokens"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "SENTINEL_PORT", default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "SENTINEL_DATABASE", default_value = "sentinel.db")]
    pub database: String,

    /// Path to an Ed25519 private key (PKCS#8 PEM). Prefer the SIGNING_KEY env var instead
    #[arg(long)]
    pub signing_key_file: Option<String>,

    /// Generate a throwaway key pair on startup. Sessions do not survive a restart
    #[arg(long, conflicts_with = "signing_key_file")]
    pub ephemeral_keys: bool,

    /// Write a new Ed25519 private key to PATH and exit
    #[arg(long, value_name = "PATH")]
    pub generate_key: Option<String>,

    /// Additional public key (PEM) accepted for verification only. Repeatable
    #[arg(long, value_name = "PATH")]
    pub verify_key_file: Vec<String>,

    /// Refresh token registry backend
    #[arg(long, env = "SENTINEL_REGISTRY", value_enum, default_value = "sqlite")]
    pub registry: RegistryBackend,

    /// Access token lifetime in seconds
    #[arg(long, env = "SENTINEL_ACCESS_TTL_SECS", default_value_t = ACCESS_TOKEN_DURATION_SECS,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "SENTINEL_REFRESH_TTL_SECS", default_value_t = REFRESH_TOKEN_DURATION_SECS,
        value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_ttl_secs: u64,

    /// Renew a refresh token during rotation when it has less than this many seconds left (0 disables)
    #[arg(long, env = "SENTINEL_RENEWAL_WINDOW_SECS", default_value_t = DEFAULT_RENEWAL_WINDOW_SECS)]
    pub renewal_window_secs: u64,

    /// Omit the Secure flag on cookies (plain HTTP development only)
    #[arg(long)]
    pub insecure_cookies: bool,

    /// Disable new user signups
    #[arg(long)]
    pub no_signup: bool,

    /// Grant the admin role to an existing user on startup
    #[arg(long, value_name = "USERNAME")]
    pub make_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Handle the --generate-key flag: write a fresh private key to `path`.
/// Never overwrites an existing file. Returns false and logs an error on failure.
pub fn handle_generate_key(path: &str) -> bool {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            error!(path = %path, "Refusing to overwrite existing key file");
            return false;
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to create key file");
            return false;
        }
    };

    let keys = match KeyMaterial::generate() {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "Failed to generate key");
            let _ = std::fs::remove_file(path);
            return false;
        }
    };

    if let Err(e) = file.write_all(keys.private_pem()) {
        error!(path = %path, error = %e, "Failed to write key file");
        let _ = std::fs::remove_file(path);
        return false;
    }

    info!(path = %path, "Signing key written");
    true
}

/// Load the signing key from environment variable or file, or generate one.
/// Must run before any other thread is spawned.
/// Returns None and logs an error if the key cannot be loaded.
pub fn load_signing_key(signing_key_file: Option<&str>, ephemeral: bool) -> Option<KeyMaterial> {
    let pem = if let Ok(pem) = std::env::var(SIGNING_KEY_ENV) {
        // Clear the environment variable to prevent leaking
        // SAFETY: called from `main` before the tokio runtime is built, so no
        // other thread exists to read the environment concurrently.
        unsafe { std::env::remove_var(SIGNING_KEY_ENV) };
        pem.into_bytes()
    } else if let Some(path) = signing_key_file {
        match std::fs::read(path) {
            Ok(content) => content,
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read signing key file");
                return None;
            }
        }
    } else if ephemeral {
        warn!("Using an ephemeral signing key; all sessions end on restart");
        return match KeyMaterial::generate() {
            Ok(keys) => Some(keys),
            Err(e) => {
                error!(error = %e, "Failed to generate key");
                None
            }
        };
    } else {
        error!(
            "Signing key is required. Set SIGNING_KEY environment variable (recommended), use --signing-key-file, or --ephemeral-keys"
        );
        return None;
    };

    match KeyMaterial::from_private_pem(&pem) {
        Ok(keys) => Some(keys),
        Err(e) => {
            error!(error = %e, "Invalid signing key");
            None
        }
    }
}

/// Load verification-only public keys.
/// Returns None and logs an error if any key cannot be loaded.
pub fn load_verification_keys(paths: &[String]) -> Option<Vec<Vec<u8>>> {
    let mut keys = Vec::with_capacity(paths.len());
    for path in paths {
        let pem = match std::fs::read(path) {
            Ok(pem) => pem,
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read verification key file");
                return None;
            }
        };
        match load_public_pem(&pem) {
            Ok(key) => keys.push(key),
            Err(e) => {
                error!(path = %path, error = %e, "Invalid verification key");
                return None;
            }
        }
    }
    Some(keys)
}

/// Handle the --make-admin flag.
/// Returns false and logs an error if the user cannot be promoted.
pub async fn handle_make_admin(db: &Database, username: &str) -> bool {
    let user = match db.users().get_by_username(username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            error!(username = %username, "No such user");
            return false;
        }
        Err(e) => {
            error!(error = %e, "Failed to look up user");
            return false;
        }
    };

    match db.users().set_role(&user.uuid, UserRole::Admin).await {
        Ok(_) => {
            info!(username = %user.username, subject = %user.uuid, "User promoted to admin");
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to promote user");
            false
        }
    }
}

/// Pick the refresh token registry backend.
pub fn build_registry(backend: RegistryBackend, db: &Database) -> Arc<dyn RefreshRegistry> {
    match backend {
        RegistryBackend::Memory => {
            warn!("Using in-memory registry; all sessions end on restart");
            Arc::new(MemoryRegistry::new())
        }
        RegistryBackend::Sqlite => Arc::new(db.tokens()),
    }
}

/// Build ServerConfig from validated arguments.
/// Returns None and logs an error if the gateway cannot be assembled.
pub fn build_config(
    args: &Args,
    db: Database,
    keys: KeyMaterial,
    verification_keys: Vec<Vec<u8>>,
    registry: Arc<dyn RefreshRegistry>,
) -> Option<ServerConfig> {
    let settings = GatewaySettings {
        keys,
        verification_keys,
        lifetimes: TokenLifetimes {
            access_secs: args.access_ttl_secs,
            refresh_secs: args.refresh_ttl_secs,
        },
        renewal_window_secs: args.renewal_window_secs,
    };

    let gateway = match build_gateway(&settings, registry) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "Failed to initialize token codec");
            return None;
        }
    };

    if args.insecure_cookies {
        warn!("Cookies are sent without the Secure flag");
    }

    Some(ServerConfig {
        db,
        gateway: Arc::new(gateway),
        secure_cookies: !args.insecure_cookies,
        no_signup: args.no_signup,
    })
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
