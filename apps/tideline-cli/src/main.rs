//! # Tideline CLI
//!
//! Command-line front end for an offline database of untyped JSON values.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          tideline <command>                             │
//! │                                                                         │
//! │  set / patch / property / post / delete / pull                          │
//! │     └──► queue entry locally ──► sync until settled (unless --offline)  │
//! │                                                                         │
//! │  sync   ──► run cycles until --cycles reached or Ctrl+C                 │
//! │  list   ──► dump local entries with their pending state                 │
//! │  config ──► show / init / path                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Queued entries survive between invocations only when `store.path` points
//! at a SQLite file; otherwise they live for one command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tideline_core::{KeyPath, SyncOptions, ValueKind};
use tideline_db::{Database, DbConfig, SqliteEntryStore};
use tideline_sync::{HttpRemote, OfflineDatabase, SyncConfig, SyncError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// =============================================================================
// Command Line
// =============================================================================

#[derive(Debug, Parser)]
#[command(name = "tideline", version, about = "Offline-first sync for remote JSON stores")]
struct Cli {
    /// Configuration file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Remote collection the command works on
    #[arg(long, global = true, default_value = "items")]
    collection: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replace the value at KEY
    Set {
        key: String,
        /// JSON document
        value: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Merge a JSON object into the value at KEY
    Patch {
        key: String,
        value: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Change one field of the value at KEY
    Property {
        key: String,
        /// `/`-separated field path, e.g. `address/city`
        path: String,
        /// JSON value for the field
        value: String,
        #[arg(long)]
        patch: bool,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Store a value under a new chronologically ordered key
    Post {
        value: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Remove the remote value at KEY
    Delete {
        key: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Fetch KEY from the remote
    Pull {
        key: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Print every local entry
    List,
    /// Run sync cycles
    Sync {
        /// Stop after this many cycles (runs until Ctrl+C when omitted)
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Args)]
struct WriteArgs {
    /// Higher priorities reconcile first
    #[arg(long)]
    priority: Option<i32>,

    /// Only queue the change locally
    #[arg(long)]
    offline: bool,

    /// Give up settling after this many cycles
    #[arg(long, default_value_t = 3)]
    max_cycles: u64,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the effective configuration to disk
    Init,
    /// Print the default configuration path
    Path,
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if let Command::Config { action } = &cli.command {
        return run_config(action, cli.config.clone());
    }

    let config = SyncConfig::load(cli.config.clone()).map_err(with_config_hint)?;
    info!(
        collection = %cli.collection,
        base_url = config.base_url().unwrap_or("<unset>"),
        store = ?config.store.path,
        "Configuration loaded"
    );

    let session = Session::open(config, &cli.collection).await?;
    let outcome = session.run(cli.command).await;
    session.close().await?;
    outcome
}

/// Logs go to stderr so command output stays pipeable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tideline=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run_config(action: &ConfigAction, path: Option<PathBuf>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = SyncConfig::load_or_default(path);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Init => {
            let config = SyncConfig::load_or_default(path.clone());
            config.save(path).context("Failed to write configuration")?;
            info!("Configuration written");
        }
        ConfigAction::Path => match path.or_else(SyncConfig::default_config_path) {
            Some(path) => println!("{}", path.display()),
            None => bail!("No configuration directory on this platform"),
        },
    }
    Ok(())
}

// =============================================================================
// Session
// =============================================================================

/// One open offline database plus the SQLite handles that back it.
struct Session {
    db: OfflineDatabase<Value>,
    sqlite: Option<(Database, Arc<SqliteEntryStore>)>,
    default_priority: i32,
}

impl Session {
    async fn open(config: SyncConfig, collection: &str) -> Result<Self> {
        let remote = Arc::new(HttpRemote::from_config(&config).map_err(with_config_hint)?);
        let default_priority = config.default_priority();

        let mut builder = OfflineDatabase::<Value>::builder(collection)
            .with_remote(remote, collection)
            .with_config(config.clone());

        let sqlite = match &config.store.path {
            Some(path) => {
                let database = Database::new(DbConfig::new(path))
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                let store = Arc::new(
                    SqliteEntryStore::open(&database, collection, &config.store.discriminator)
                        .await?,
                );
                builder = builder.with_store(store.clone());
                Some((database, store))
            }
            None => {
                warn!("No store.path configured, queued entries are lost on exit");
                None
            }
        };

        Ok(Session {
            db: builder.build()?,
            sqlite,
            default_priority,
        })
    }

    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Set { key, value, write } => {
                self.db
                    .set_value(&key, parse_json(&value)?, SyncOptions::Put, self.priority(&write));
                self.settle(&write).await
            }
            Command::Patch { key, value, write } => {
                let value = parse_json(&value)?;
                if !value.is_object() {
                    bail!("patch expects a JSON object");
                }
                self.db
                    .set_value(&key, value, SyncOptions::Patch, self.priority(&write));
                self.settle(&write).await
            }
            Command::Property {
                key,
                path,
                value,
                patch,
                write,
            } => {
                let value = parse_json(&value)?;
                let key_path = KeyPath::parse(&path, ValueKind::of_json(&value));
                let options = if patch { SyncOptions::Patch } else { SyncOptions::Put };
                self.db
                    .set_path(&key, &key_path, value, options, self.priority(&write))?;
                self.settle(&write).await
            }
            Command::Post { value, write } => {
                let key = self.db.post(&parse_json(&value)?, self.priority(&write))?;
                println!("{key}");
                self.settle(&write).await
            }
            Command::Delete { key, write } => {
                self.db.delete(&key, self.priority(&write));
                self.settle(&write).await
            }
            Command::Pull { key, write } => {
                self.db.pull(&key, self.priority(&write));
                self.settle(&write).await?;
                if let Some(value) = self.db.get(&key)? {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                Ok(())
            }
            Command::List => {
                for entry in self.db.store().entries() {
                    println!(
                        "{:<32} {:<6} p={:<3} {}{}",
                        entry.key,
                        entry.sync_options,
                        entry.priority,
                        if entry.is_partial { "(partial) " } else { "" },
                        entry.value
                    );
                }
                Ok(())
            }
            Command::Sync { cycles } => self.sync(cycles).await,
            Command::Config { .. } => Ok(()),
        }
    }

    fn priority(&self, write: &WriteArgs) -> i32 {
        write.priority.unwrap_or(self.default_priority)
    }

    /// Runs cycles until nothing is pending or `max_cycles` have passed.
    async fn settle(&self, write: &WriteArgs) -> Result<()> {
        if write.offline {
            return Ok(());
        }

        let start = self.db.status().cycles;
        let mut pending = self.db.store().pending().len();
        while pending > 0 {
            let done = self.db.status().cycles;
            if done >= start + write.max_cycles {
                report_exceptions(&self.db);
                bail!("{pending} entries still pending after {} cycles", write.max_cycles);
            }
            self.db.wait_for_cycles(done + 1).await?;
            pending = self.db.store().pending().len();
        }

        info!(cycles = self.db.status().cycles - start, "Local changes settled");
        Ok(())
    }

    async fn sync(&self, cycles: Option<u64>) -> Result<()> {
        let wait = async {
            match cycles {
                Some(n) => self.db.wait_for_cycles(n).await.map(|_| ()),
                None => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        };

        tokio::select! {
            result = wait => result?,
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }

        let status = self.db.status();
        info!(
            cycles = status.cycles,
            pending = status.pending,
            exceptions = status.total_exceptions,
            "Sync finished"
        );
        report_exceptions(&self.db);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.db.shutdown().await?;
        if let Some((database, store)) = &self.sqlite {
            store.close().await?;
            database.close().await;
        }
        Ok(())
    }
}

/// Points configuration problems at the file (or variables) to fix.
fn with_config_hint(error: SyncError) -> anyhow::Error {
    if error.is_config_error() {
        anyhow::Error::new(error).context(
            "Configuration problem: check `tideline config path` or the TIDELINE_* variables",
        )
    } else {
        anyhow::Error::new(error)
    }
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("Invalid JSON: {text}"))
}

fn report_exceptions(db: &OfflineDatabase<Value>) {
    for exception in db.recent_exceptions() {
        warn!(retryable = exception.is_retryable(), "{exception}");
    }
}
