//! Configuration loading (.env + environment)

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

pub const DEFAULT_API_BASE: &str = "https://api.fastly.com";
pub const DEFAULT_LOG_FILE: &str = "log.txt";
pub const DEFAULT_STALE_DAYS: u32 = 30;

/// Project directory (where .env, the log and backups live)
pub fn project_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FASTLY_TOOLS_DIR") {
        return PathBuf::from(dir);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Load .env from the project directory if there is one
pub fn load_env() -> Result<bool> {
    let env_path = project_dir().join(".env");
    if !env_path.exists() {
        return Ok(false);
    }
    dotenvy::from_path(&env_path)
        .with_context(|| format!("Failed to load .env from {:?}", env_path))?;
    Ok(true)
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub log_file: PathBuf,
    pub api_base: String,
    pub backup_dir: PathBuf,
    pub stale_after_days: u32,
    pub prune_backups: bool,
}

impl Settings {
    /// Read settings from .env and the process environment
    pub fn load() -> Result<Self> {
        load_env()?;
        Self::from_lookup(project_dir(), |key| std::env::var(key).ok())
    }

    pub fn from_lookup(project_dir: PathBuf, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_file = lookup("FASTLY_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| project_dir.join(DEFAULT_LOG_FILE));

        let api_base = lookup("FASTLY_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let backup_dir = lookup("FASTLY_BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| project_dir.clone());

        let stale_after_days = match lookup("FASTLY_STALE_DAYS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("FASTLY_STALE_DAYS must be a whole number of days, got {:?}", raw))?,
            None => DEFAULT_STALE_DAYS,
        };

        let prune_backups = match lookup("FASTLY_PRUNE_BACKUPS").as_deref().map(str::trim) {
            None | Some("") => false,
            Some(v) if ["1", "true", "yes"].contains(&v.to_ascii_lowercase().as_str()) => true,
            Some(v) if ["0", "false", "no"].contains(&v.to_ascii_lowercase().as_str()) => false,
            Some(v) => bail!("FASTLY_PRUNE_BACKUPS must be true or false, got {:?}", v),
        };

        Ok(Self {
            log_file,
            api_base,
            backup_dir,
            stale_after_days,
            prune_backups,
        })
    }
}
