//! Configuration file support for hubsync.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `HUBSYNC_`, nested keys joined by
//!    `__`, e.g. `HUBSYNC_ENGINE__CLIENT__BASE_URL`)
//! 3. Config file (./hubsync.toml, then ~/.config/hubsync/config.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/hubsync/hubsync.db` on Linux
//! (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite:///var/lib/hubsync/cache.db"
//!
//! [credentials]
//! # GitHub user id = access token
//! 583231 = "ghp_..."
//!
//! [engine.client]
//! requests_per_second = 10
//!
//! [engine.actors]
//! max_concurrent_syncs = 32
//! idle_timeout_secs = 300
//!
//! [engine.dispatch]
//! max_delivery_attempts = 5
//!
//! [run]
//! concurrency = 16
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use hubsync::{AccessToken, EngineConfig, UserId};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Access tokens keyed by the GitHub user id they belong to.
    pub credentials: BTreeMap<String, String>,
    /// Engine tunables.
    pub engine: EngineConfig,
    /// Defaults for the `run` command.
    pub run: RunConfig,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL for cache metadata.
    /// Supports sqlite:// and postgres:// schemes.
    /// Defaults to `sqlite://~/.local/state/hubsync/hubsync.db` if not specified.
    pub url: Option<String>,
}

/// Defaults for the `run` command.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Messages dispatched at once.
    pub concurrency: usize,
    /// Capacity of the in-process channel carrying derived messages.
    pub fan_out_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            fan_out_capacity: 1024,
        }
    }
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/hubsync/config.toml)
    /// 3. Local config file (./hubsync.toml)
    /// 4. Environment variables with the HUBSYNC_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(proj_dirs) = ProjectDirs::from("", "", "hubsync") {
            let xdg_config = proj_dirs.config_dir().join("config.toml");
            if xdg_config.exists() {
                tracing::debug!("Loading config from {:?}", xdg_config);
                builder = builder.add_source(
                    File::from(xdg_config)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        let local_config = PathBuf::from("hubsync.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./hubsync.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // Field names contain underscores, so nesting uses a double underscore:
        // HUBSYNC_ENGINE__ACTORS__MAX_CONCURRENT_SYNCS -> engine.actors.max_concurrent_syncs
        builder = builder.add_source(
            Environment::with_prefix("HUBSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter creates the SQLite file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("hubsync.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    /// Configured credentials, skipping entries whose key is not a user id.
    pub fn credential_pairs(&self) -> Vec<(UserId, AccessToken)> {
        self.credentials
            .iter()
            .filter_map(|(user, token)| match user.trim().parse::<i64>() {
                Ok(id) if !token.trim().is_empty() => {
                    Some((UserId(id), AccessToken::new(token.trim())))
                }
                Ok(_) => {
                    tracing::warn!(user = %user, "Ignoring empty access token");
                    None
                }
                Err(_) => {
                    tracing::warn!(user = %user, "Ignoring credential: key is not a numeric user id");
                    None
                }
            })
            .collect()
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/hubsync` or `~/.local/state/hubsync`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "hubsync").map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}
