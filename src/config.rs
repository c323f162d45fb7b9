use crate::services::diary_observer::DEFAULT_DEBOUNCE;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub queue_database_url: String,
    pub entries_database_url: String,
    /// Identity signed in at startup, if any.
    pub user: Option<String>,
    pub debounce: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Offline-resilient journal sync service")]
pub struct Args {
    /// Host to bind to (overrides JOURNAL_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides JOURNAL_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where images are stored (overrides JOURNAL_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Retry queue database URL (overrides JOURNAL_QUEUE_DATABASE_URL)
    #[arg(long)]
    pub queue_database_url: Option<String>,

    /// Entry store database URL (overrides JOURNAL_ENTRIES_DATABASE_URL)
    #[arg(long)]
    pub entries_database_url: Option<String>,

    /// User id to sign in as (overrides JOURNAL_USER)
    #[arg(long)]
    pub user: Option<String>,

    /// Debounce for the unfiltered view in milliseconds (overrides JOURNAL_DEBOUNCE_MS)
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Create schemas and exit
    #[arg(long)]
    pub migrate: bool,
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::merge(Args::parse())
    }

    fn merge(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("JOURNAL_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let env_port = env_parsed("JOURNAL_PORT", 3000u16)?;
        let env_storage =
            env::var("JOURNAL_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_queue = env::var("JOURNAL_QUEUE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/retry_queue.db".into());
        let env_entries = env::var("JOURNAL_ENTRIES_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/entries.db".into());
        let env_user = env::var("JOURNAL_USER").ok().filter(|u| !u.is_empty());
        let env_debounce = env_parsed("JOURNAL_DEBOUNCE_MS", DEFAULT_DEBOUNCE.as_millis() as u64)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            queue_database_url: args.queue_database_url.unwrap_or(env_queue),
            entries_database_url: args.entries_database_url.unwrap_or(env_entries),
            user: args.user.or(env_user),
            debounce: Duration::from_millis(args.debounce_ms.unwrap_or(env_debounce)),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
