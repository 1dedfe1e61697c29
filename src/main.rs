//! shelfsync server entry point.

use clap::Parser;
use shelfsync::{
    auth::AuthService,
    config::{CacheCommand, Cli, Command, Config, DeviceCommand, DocumentCommand, UserCommand},
    db::Database,
    server,
    stats::{self, RefreshScheduler},
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Device { action }) => cmd_device(action, &config).await,
        Some(Command::Document { action }) => cmd_document(action, &config).await,
        Some(Command::Cache { action }) => cmd_cache(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    // Write default config
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    // Initialize database and storage
    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    std::fs::create_dir_all(&config.storage.documents_dir)?;
    println!(
        "Created documents directory: {}",
        config.storage.documents_dir.display()
    );

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: shelfsync user add <username> --password <password> --admin");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(db.clone(), config.auth.registration_enabled());

    match action {
        UserCommand::Add {
            username,
            password,
            admin,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.create_user(&username, &password, admin)?;
            println!("Created user: {} (admin: {})", user.id, user.admin);
        }

        UserCommand::Del { username } => {
            if auth.delete_user(&username)? {
                println!("Deleted user: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<24} {:<6} {:<28} CREATED", "USERNAME", "ADMIN", "TIMEZONE");
                println!("{}", "-".repeat(80));
                for user in users {
                    println!(
                        "{:<24} {:<6} {:<28} {}",
                        user.id,
                        if user.admin { "yes" } else { "no" },
                        user.timezone,
                        format_timestamp(user.created_at)
                    );
                }
            }
        }

        UserCommand::Passwd { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            if auth.change_password(&username, &password)? {
                println!("Password changed for: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }

        UserCommand::Timezone { username, timezone } => {
            let stale = auth.set_timezone(&username, &timezone)?;
            println!("Timezone for {} set to {}", username, timezone);

            if stale {
                let summary = stats::refresh_cache(&db, chrono::Utc::now(), &CancellationToken::new())?;
                println!("Rebuilt statistics for {} users", summary.users);
            }
        }
    }

    Ok(())
}

/// Device management commands.
async fn cmd_device(action: DeviceCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        DeviceCommand::List { username } => {
            let devices = db.list_devices(&username)?;
            if devices.is_empty() {
                println!("No devices found.");
            } else {
                println!("{:<24} {:<24} {:<5} LAST SYNCED", "ID", "NAME", "SYNC");
                println!("{}", "-".repeat(80));
                for device in devices {
                    println!(
                        "{:<24} {:<24} {:<5} {}",
                        device.id,
                        device.device_name,
                        if device.sync { "yes" } else { "no" },
                        format_timestamp(device.last_synced)
                    );
                }
            }
        }

        DeviceCommand::Sync {
            username,
            device,
            off,
        } => {
            if db.set_device_sync(&username, &device, !off)? {
                println!(
                    "Full sync {} for device {} of {}",
                    if off { "disabled" } else { "enabled" },
                    device,
                    username
                );
            } else {
                println!("Device not found: {}", device);
            }
        }
    }

    Ok(())
}

/// Document catalog commands.
async fn cmd_document(action: DocumentCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;

    let (id, deleted) = match action {
        DocumentCommand::Delete { id } => (id, true),
        DocumentCommand::Restore { id } => (id, false),
    };

    if db.set_deleted(&id, deleted)? {
        println!(
            "{} document: {}",
            if deleted { "Deleted" } else { "Restored" },
            id
        );
    } else {
        println!("Document not found: {}", id);
    }

    Ok(())
}

/// Statistics cache commands.
async fn cmd_cache(action: CacheCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        CacheCommand::Refresh => {
            let start = std::time::Instant::now();
            let summary = stats::refresh_cache(&db, chrono::Utc::now(), &CancellationToken::new())?;
            println!(
                "Rebuilt statistics: {} users, {} documents in {:?}",
                summary.users,
                summary.documents,
                start.elapsed()
            );
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Open database
    let db = Database::open(&config.database.path)?;
    std::fs::create_dir_all(&config.storage.documents_dir)?;

    let auth = AuthService::new(db.clone(), config.auth.registration_enabled());

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        documents = %config.storage.documents_dir.display(),
        "Starting shelfsync server"
    );

    // Statistics cache runs in the background
    let scheduler = RefreshScheduler::start(
        db.clone(),
        Duration::from_secs(config.stats.refresh_interval_seconds),
        config.stats.refresh_on_startup,
    );

    let shutdown = CancellationToken::new();
    let state = server::AppState::new_with_db(
        config.clone(),
        db,
        auth,
        scheduler.handle(),
        shutdown.clone(),
    );

    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    scheduler.shutdown().await;
    Ok(())
}

/// Format a unix timestamp for listings.
fn format_timestamp(ts: i64) -> String {
    shelfsync::db::timestamp_to_datetime(ts)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
