use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::{WorklogConfig, default_home};

/// Loads and reloads the worklog configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<WorklogConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > WORKLOG_CONFIG env > ~/.claude/worklog/worklog.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("WORKLOG_CONFIG") {
            return PathBuf::from(p);
        }
        default_home().join("worklog.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> worklog_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            WorklogConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(worklog_core::WorklogError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Parse a config file, reporting the failing line on syntax errors.
    pub fn read_file(path: &Path) -> worklog_core::Result<WorklogConfig> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw, path)
    }

    /// Parse config text; `path` is only used for error context.
    pub fn parse(raw: &str, path: &Path) -> worklog_core::Result<WorklogConfig> {
        let mut config = toml::from_str::<WorklogConfig>(raw).map_err(|e| {
            let line = e
                .span()
                .map(|span| raw[..span.start.min(raw.len())].matches('\n').count() + 1)
                .unwrap_or(0);
            worklog_core::WorklogError::Parse {
                path: path.to_path_buf(),
                line,
                reason: e.message().to_string(),
            }
        })?;
        config.database.path = expand_home(&config.database.path);
        config.handoff.dir = expand_home(&config.handoff.dir);
        Ok(config)
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> WorklogConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<WorklogConfig>> {
        Arc::clone(&self.config)
    }

    /// Path the config was (or would be) loaded from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (WORKLOG_DB_PATH, WORKLOG_HANDOFF_DIR, etc.)
    pub fn apply_env_overrides(config: WorklogConfig) -> WorklogConfig {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(mut config: WorklogConfig, lookup: F) -> WorklogConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WORKLOG_DB_PATH") {
            config.database.path = expand_home(Path::new(&v));
        }
        if let Some(v) = get("WORKLOG_HANDOFF_DIR") {
            config.handoff.dir = expand_home(Path::new(&v));
        }
        if let Some(v) = get("WORKLOG_HOOK_MODE") {
            config.hooks.mode = v.to_lowercase();
        }
        if let Some(v) = get("WORKLOG_AGENT") {
            config.hooks.agent = v;
        }
        if let Some(v) = get("WORKLOG_SYSTEM") {
            config.handoff.origin = Some(v);
        }
        if let Some(v) = get("WORKLOG_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> worklog_core::Result<()> {
        if !self.config_path.exists() {
            return Err(worklog_core::WorklogError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read_file(&self.config_path)?);
        new_config
            .validate()
            .map_err(worklog_core::WorklogError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}
