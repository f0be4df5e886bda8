//! Store and configuration shared by the stateful commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use layout_core::LayoutConfig;
use layout_store::{SqliteLayoutStore, SqliteLayoutStoreConfig};

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// SQLite database file; created and migrated on first use.
    #[arg(long, global = true, env = "LAYOUT_DB", default_value = "layout.db")]
    pub db: PathBuf,

    /// TOML file with layout settings (slots per array, identifier digits, ...).
    #[arg(long, global = true, env = "LAYOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds a writer waits for a locked database.
    #[arg(long, global = true, default_value_t = 5)]
    pub busy_timeout: u64,
}

pub struct Session {
    pub config: LayoutConfig,
    pub store: SqliteLayoutStore,
}

impl SessionArgs {
    pub fn config(&self) -> Result<LayoutConfig> {
        match &self.config {
            Some(path) => LayoutConfig::from_path(path)
                .with_context(|| format!("failed to load config {}", path.display())),
            None => Ok(LayoutConfig::default()),
        }
    }

    pub fn open(&self) -> Result<Session> {
        let config = self.config()?;
        let store_config = SqliteLayoutStoreConfig {
            busy_timeout: std::time::Duration::from_secs(self.busy_timeout),
        };
        let store = SqliteLayoutStore::open(&self.db, &store_config)
            .with_context(|| format!("failed to open database {}", self.db.display()))?;
        tracing::debug!(db = %self.db.display(), "store opened");
        Ok(Session { config, store })
    }
}
