use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Self-hosted reading tracker with multi-device sync.
#[derive(Parser, Debug, Clone)]
#[command(name = "shelfsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "SHELFSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Device management commands.
    Device {
        /// Device subcommand action.
        #[command(subcommand)]
        action: DeviceCommand,
    },

    /// Document catalog commands.
    Document {
        /// Document subcommand action.
        #[command(subcommand)]
        action: DocumentCommand,
    },

    /// Statistics cache commands.
    Cache {
        /// Cache subcommand action.
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// Grant administrator rights.
        #[arg(long)]
        admin: bool,
    },

    /// Delete a user.
    Del {
        /// Username to delete.
        username: String,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Set the timezone used for streaks and daily totals.
    Timezone {
        /// Username.
        username: String,
        /// IANA timezone name, e.g. Europe/Paris.
        timezone: String,
    },
}

/// Device management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum DeviceCommand {
    /// List devices of a user.
    List {
        /// Username.
        username: String,
    },

    /// Enable or disable full sync for a device.
    Sync {
        /// Username.
        username: String,
        /// Device ID.
        device: String,
        /// Disable instead of enable.
        #[arg(long)]
        off: bool,
    },
}

/// Document catalog subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum DocumentCommand {
    /// Mark a document deleted so devices drop it.
    Delete {
        /// Document ID.
        id: String,
    },

    /// Clear a document's deleted mark.
    Restore {
        /// Document ID.
        id: String,
    },
}

/// Statistics cache subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Rebuild the statistics cache now.
    Refresh,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Document file storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Statistics cache configuration.
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8585,
    )
}

fn default_log_level() -> String {
    "shelfsync=info,tower_http=info".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/shelfsync.db")
}

/// Document file storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory uploaded document files are written to.
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    /// Largest accepted document upload in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("data/documents")
}

fn default_max_upload_bytes() -> u64 {
    256 * 1024 * 1024
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
        }
    }
}

fn default_registration() -> String {
    "disabled".to_string()
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Statistics cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Seconds between scheduled cache rebuilds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,

    /// Rebuild once right after startup.
    #[serde(default = "default_refresh_on_startup")]
    pub refresh_on_startup: bool,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval(),
            refresh_on_startup: default_refresh_on_startup(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    900
}

fn default_refresh_on_startup() -> bool {
    true
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> crate::error::Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })?;

        if config.storage.max_upload_bytes == 0 {
            return Err(crate::error::AppError::Config(
                "storage.max_upload_bytes must be positive".to_string(),
            ));
        }

        if config.stats.refresh_interval_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "stats.refresh_interval_seconds must be positive".to_string(),
            ));
        }

        Ok(config)
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("shelfsync.toml"),
            dirs::config_dir()
                .map(|p| p.join("shelfsync").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/shelfsync/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# shelfsync configuration

[server]
bind = "0.0.0.0:8585"
# Overridden by RUST_LOG when set
log_level = "shelfsync=info,tower_http=info"

[database]
# path = "/var/lib/shelfsync/shelfsync.db"

[storage]
# documents_dir = "/var/lib/shelfsync/documents"
# Largest accepted upload (256 MiB)
max_upload_bytes = 268435456

[auth]
# Registration mode: "open" or "disabled"
registration = "disabled"

[stats]
# Seconds between statistics cache rebuilds
refresh_interval_seconds = 900
refresh_on_startup = true
"#
        .to_string()
    }
}
