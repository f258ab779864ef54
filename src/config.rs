use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::reddit::SortOption;

const DEFAULT_ENV_PREFIX: &str = "SUBVIEW";
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

impl RedditConfig {
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.refresh_token.trim().is_empty()
    }
}

fn default_user_agent() -> String {
    format!("subview/{} (terminal subreddit viewer)", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_load_threshold")]
    pub load_threshold: f64,
    #[serde(default)]
    pub sort: SortOption,
    #[serde(default)]
    pub ignore_intermediate: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            load_threshold: default_load_threshold(),
            sort: SortOption::default(),
            ignore_intermediate: false,
        }
    }
}

fn default_page_size() -> u32 {
    50
}

fn default_load_threshold() -> f64 {
    36.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_tick_rate", with = "humantime_serde")]
    pub tick_rate: Duration,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            tick_rate: default_tick_rate(),
        }
    }
}

fn default_tick_rate() -> Duration {
    Duration::from_millis(120)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_directory")]
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_directory(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_directory() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("subview").join("logs"))
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        cfg = read_config_file(path)?;
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);
    normalize(&mut cfg);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "reddit.client_id" => cfg.reddit.client_id = value,
        "reddit.client_secret" => cfg.reddit.client_secret = value,
        "reddit.refresh_token" => cfg.reddit.refresh_token = value,
        "reddit.user_agent" => cfg.reddit.user_agent = value,
        "reddit.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.reddit.timeout = duration;
            }
        }
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.feed.page_size = parsed;
            }
        }
        "feed.load_threshold" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.feed.load_threshold = parsed;
            }
        }
        "feed.sort" => {
            if let Some(sort) = SortOption::from_key(&value) {
                cfg.feed.sort = sort;
            }
        }
        "feed.ignore_intermediate" => {
            cfg.feed.ignore_intermediate =
                matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        "ui.tick_rate" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.ui.tick_rate = duration;
            }
        }
        "log.level" => cfg.log.level = value,
        "log.directory" => cfg.log.directory = Some(PathBuf::from(value)),
        _ => {}
    }
}

fn normalize(cfg: &mut Config) {
    cfg.feed.page_size = cfg.feed.page_size.clamp(1, MAX_PAGE_SIZE);
    if !cfg.feed.load_threshold.is_finite() || cfg.feed.load_threshold < 0.0 {
        cfg.feed.load_threshold = default_load_threshold();
    }
    if cfg.reddit.user_agent.trim().is_empty() {
        cfg.reddit.user_agent = default_user_agent();
    }
    if cfg.ui.tick_rate.is_zero() {
        cfg.ui.tick_rate = default_tick_rate();
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("subview").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_feed_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.feed.page_size, 50);
        assert_eq!(cfg.feed.load_threshold, 36.0);
        assert_eq!(cfg.feed.sort, SortOption::Hot);
        assert!(!cfg.feed.ignore_intermediate);
        assert!(!cfg.reddit.has_credentials());
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "reddit:\n  client_id: abc\n  refresh_token: xyz\n  timeout: 5s\nfeed:\n  page_size: 25\n  sort: new\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("SUBVIEW_TEST_FILE".into()),
        })
        .unwrap();
        assert!(cfg.reddit.has_credentials());
        assert_eq!(cfg.reddit.timeout, Duration::from_secs(5));
        assert_eq!(cfg.feed.page_size, 25);
        assert_eq!(cfg.feed.sort, SortOption::New);
        assert_eq!(cfg.feed.load_threshold, 36.0);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = load(LoadOptions {
            config_file: Some(dir.path().join("absent.yaml")),
            env_prefix: Some("SUBVIEW_TEST_MISSING".into()),
        });
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_and_clamps() {
        env::set_var("SUBVIEW_TEST_ENV_FEED__PAGE_SIZE", "500");
        env::set_var("SUBVIEW_TEST_ENV_FEED__SORT", "top");
        env::set_var("SUBVIEW_TEST_ENV_UI__TICK_RATE", "250ms");
        let mut cfg = Config::default();
        apply_env(&mut cfg, "SUBVIEW_TEST_ENV");
        normalize(&mut cfg);
        env::remove_var("SUBVIEW_TEST_ENV_FEED__PAGE_SIZE");
        env::remove_var("SUBVIEW_TEST_ENV_FEED__SORT");
        env::remove_var("SUBVIEW_TEST_ENV_UI__TICK_RATE");

        assert_eq!(cfg.feed.page_size, MAX_PAGE_SIZE);
        assert_eq!(cfg.feed.sort, SortOption::Top);
        assert_eq!(cfg.ui.tick_rate, Duration::from_millis(250));
    }
}
