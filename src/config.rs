use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::constants::*;
use crate::error::{HarvestError, Result};

/// Tunables for every subcommand. All sections and fields are optional in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub harvest: HarvestConfig,
    pub instagram: InstagramConfig,
    pub repost: RepostConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub images_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            images_root: PathBuf::from(DEFAULT_IMAGES_ROOT),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Upper bound on submitted downloads per (subreddit, term) run.
    pub max_items: usize,
    pub workers: usize,
    pub page_size: usize,
    /// Total bound on API calls.
    pub fetch_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Media downloads have no total bound; each read must arrive within this.
    pub read_timeout_secs: u64,
    /// Write a history row for failed downloads too, so they are never retried.
    pub record_failed_attempts: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            workers: DEFAULT_WORKERS,
            page_size: DEFAULT_PAGE_SIZE,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            record_failed_attempts: false,
        }
    }
}

impl HarvestConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstagramConfig {
    pub lookback_days: i64,
    pub request_delay_ms: u64,
    pub rate_limit_sleep_secs: u64,
    pub page_size: usize,
    pub stitch_min: usize,
    pub stitch_max: usize,
    pub output_root: PathBuf,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            lookback_days: 10,
            request_delay_ms: 10_000,
            rate_limit_sleep_secs: 600,
            page_size: 25,
            stitch_min: 2,
            stitch_max: 3,
            output_root: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepostConfig {
    pub base_folder: PathBuf,
    pub subreddit: String,
    pub flair: String,
    pub archive_folder: String,
    pub archive_after_post: bool,
}

impl Default for RepostConfig {
    fn default() -> Self {
        Self {
            base_folder: PathBuf::from("whats_happening_in_tvm"),
            subreddit: "Trivandrum".to_string(),
            flair: "Events".to_string(),
            archive_folder: "archived".to_string(),
            archive_after_post: true,
        }
    }
}

impl Config {
    /// Load from `$HARVEST_CONFIG` or `harvester.toml`. A missing file means defaults.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!("No config file at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            HarvestError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.harvest.workers == 0 {
            return Err(HarvestError::Config("harvest.workers must be at least 1".into()));
        }
        if self.harvest.read_timeout_secs == 0 {
            return Err(HarvestError::Config("harvest.read_timeout_secs must be at least 1".into()));
        }
        if self.harvest.page_size == 0 {
            return Err(HarvestError::Config("harvest.page_size must be at least 1".into()));
        }
        if self.instagram.stitch_min > self.instagram.stitch_max {
            return Err(HarvestError::Config(
                "instagram.stitch_min must not exceed instagram.stitch_max".into(),
            ));
        }
        Ok(())
    }
}

/// Collect every named variable, failing with all missing names at once.
fn require_vars<F>(names: &[&str], lookup: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut values = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        match lookup(name).filter(|v| !v.trim().is_empty()) {
            Some(v) => values.push(v),
            None => missing.push(*name),
        }
    }
    if !missing.is_empty() {
        return Err(HarvestError::Config(format!(
            "Missing required environment variables: {}",
            missing.join(", ")
        )));
    }
    Ok(values)
}

#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub username: String,
    pub password: String,
}

impl RedditCredentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut v = require_vars(
            &[
                "REDDIT_CLIENT_ID",
                "REDDIT_CLIENT_SECRET",
                "REDDIT_USER_AGENT",
                "REDDIT_USERNAME",
                "REDDIT_PASSWORD",
            ],
            lookup,
        )?
        .into_iter();
        let mut next = || v.next().unwrap_or_default();
        Ok(Self {
            client_id: next(),
            client_secret: next(),
            user_agent: next(),
            username: next(),
            password: next(),
        })
    }
}

impl fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("user_agent", &self.user_agent)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct InstagramCredentials {
    pub access_token: String,
    pub user_id: String,
}

impl InstagramCredentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut v = require_vars(&["INSTAGRAM_ACCESS_TOKEN", "INSTAGRAM_USER_ID"], lookup)?.into_iter();
        let mut next = || v.next().unwrap_or_default();
        Ok(Self {
            access_token: next(),
            user_id: next(),
        })
    }
}

impl fmt::Debug for InstagramCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstagramCredentials")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.harvest.max_items, 1000);
        assert_eq!(config.harvest.workers, 30);
        assert_eq!(config.harvest.page_size, 100);
        assert!(!config.harvest.record_failed_attempts);
        assert_eq!(config.harvest.read_timeout(), Duration::from_secs(30));
        assert_eq!(config.instagram.lookback_days, 10);
        assert_eq!(config.repost.archive_folder, "archived");
        assert_eq!(config.storage.images_root, PathBuf::from("images"));
    }

    #[test]
    fn test_partial_sections_override() {
        let config = Config::from_toml_str(
            r#"
            [harvest]
            max_items = 50
            record_failed_attempts = true

            [repost]
            subreddit = "pics"
            "#,
        )
        .unwrap();
        assert_eq!(config.harvest.max_items, 50);
        assert_eq!(config.harvest.workers, 30);
        assert!(config.harvest.record_failed_attempts);
        assert_eq!(config.repost.subreddit, "pics");
        assert_eq!(config.repost.flair, "Events");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::from_toml_str("[harvest]\nworkers = 0\n").unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }

    #[test]
    fn test_zero_read_timeout_rejected() {
        let err = Config::from_toml_str("[harvest]\nread_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }

    #[test]
    fn test_missing_config_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.harvest.max_items, 1000);
    }

    #[test]
    fn test_reddit_credentials_report_all_missing() {
        let mut env = HashMap::new();
        env.insert("REDDIT_CLIENT_ID", "id");
        env.insert("REDDIT_USER_AGENT", "agent");
        env.insert("REDDIT_USERNAME", "  ");

        let err = RedditCredentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("REDDIT_CLIENT_SECRET"));
        assert!(msg.contains("REDDIT_USERNAME"));
        assert!(msg.contains("REDDIT_PASSWORD"));
        assert!(!msg.contains("REDDIT_CLIENT_ID"));
    }

    #[test]
    fn test_reddit_credentials_complete() {
        let creds = RedditCredentials::from_lookup(|k| Some(format!("{k}-value"))).unwrap();
        assert_eq!(creds.client_id, "REDDIT_CLIENT_ID-value");
        assert_eq!(creds.password, "REDDIT_PASSWORD-value");
        assert!(!format!("{creds:?}").contains("REDDIT_PASSWORD-value"));
    }

    #[test]
    fn test_instagram_credentials_missing_token() {
        let err = InstagramCredentials::from_lookup(|k| {
            (k == "INSTAGRAM_USER_ID").then(|| "1784".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("INSTAGRAM_ACCESS_TOKEN"));
    }
}
