use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming};

use crate::auth;
use crate::config::{self, Config, LogConfig};
use crate::data::{
    FeedService, MockFeedService, MockSubredditService, RedditFeedService, RedditSubredditService,
    SubredditService,
};
use crate::page::SubredditPage;
use crate::reddit::{self, SortOption};
use crate::ui;

/// Command line arguments for one page session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub subreddit: String,
    pub sort: Option<SortOption>,
    pub config_file: Option<PathBuf>,
    pub offline: bool,
}

pub fn run(args: Args) -> Result<()> {
    let mut cfg = config::load(config::LoadOptions {
        config_file: args.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    if let Some(sort) = args.sort {
        cfg.feed.sort = sort;
    }

    let _logger = init_logging(&cfg.log);
    log::info!(
        "subview {} starting for r/{} ({})",
        crate::VERSION,
        reddit::normalize_subreddit(&args.subreddit),
        cfg.feed.sort.as_str()
    );

    let (feed_service, subreddit_service, mode) = build_services(&cfg, args.offline)?;
    let page = SubredditPage::open(&args.subreddit, feed_service, subreddit_service, &cfg.feed)?;

    let status_message = format!(
        "{} · {} · config {}",
        page.subreddit().prefixed_name(),
        mode,
        friendly_path(args.config_file.as_ref().or(config::default_path().as_ref()))
    );
    let mut model = ui::Model::new(ui::Options {
        page,
        status_message,
        tick_rate: cfg.ui.tick_rate,
    });
    let result = model.run();
    if let Err(err) = &result {
        log::error!("ui exited with error: {err:#}");
    }
    result
}

fn build_services(
    cfg: &Config,
    offline: bool,
) -> Result<(Arc<dyn FeedService>, Arc<dyn SubredditService>, &'static str)> {
    if offline {
        log::info!("offline mode: using generated sample content");
        let feed: Arc<dyn FeedService> = Arc::new(MockFeedService::default());
        let subreddits: Arc<dyn SubredditService> = Arc::new(MockSubredditService);
        return Ok((feed, subreddits, "offline"));
    }

    let token_provider: Option<Arc<dyn reddit::TokenProvider>> = if cfg.reddit.has_credentials() {
        let provider = auth::RefreshTokenProvider::new(auth::Config {
            client_id: cfg.reddit.client_id.clone(),
            client_secret: cfg.reddit.client_secret.clone(),
            refresh_token: cfg.reddit.refresh_token.clone(),
            user_agent: cfg.reddit.user_agent.clone(),
            timeout: cfg.reddit.timeout,
            ..Default::default()
        })
        .context("configure reddit credentials")?;
        let provider: Arc<dyn reddit::TokenProvider> = Arc::new(provider);
        Some(provider)
    } else {
        None
    };
    let mode = if token_provider.is_some() {
        "signed in"
    } else {
        "anonymous"
    };

    let client = Arc::new(
        reddit::Client::new(
            token_provider,
            reddit::ClientConfig {
                user_agent: cfg.reddit.user_agent.clone(),
                timeout: Some(cfg.reddit.timeout),
                ..Default::default()
            },
        )
        .context("create reddit client")?,
    );
    log::debug!("reddit client ready ({mode})");

    let feed: Arc<dyn FeedService> = Arc::new(RedditFeedService::new(client.clone()));
    let subreddits: Arc<dyn SubredditService> = Arc::new(RedditSubredditService::new(client));
    Ok((feed, subreddits, mode))
}

/// Starts file logging. The terminal belongs to the UI, so nothing is
/// mirrored to stderr.
fn init_logging(cfg: &LogConfig) -> Option<LoggerHandle> {
    let dir = cfg.directory.as_ref()?;
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("Failed to create log directory {}: {err}", dir.display());
        return None;
    }
    let filter = format!("{}, reqwest=warn, rustls=warn", cfg.level);
    let logger = match Logger::try_with_str(&filter) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("Invalid log level {:?}: {err}", cfg.level);
            return None;
        }
    };
    match logger
        .log_to_file(
            FileSpec::default()
                .directory(dir)
                .basename("subview")
                .suffix("log")
                .suppress_timestamp(),
        )
        .rotate(
            Criterion::Size(64 * 1024),
            Naming::Numbers,
            Cleanup::KeepLogFiles(3),
        )
        .start()
    {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("Failed to start logging: {err}");
            None
        }
    }
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/subview/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_services_are_generated() {
        let (feed, subreddits, mode) = build_services(&Config::default(), true).unwrap();
        assert_eq!(mode, "offline");
        let about = subreddits.about("rust").unwrap();
        assert_eq!(about.display_name, "rust");
        let posts = feed.fetch_page("rust", SortOption::Hot, None, 5).unwrap();
        assert_eq!(posts.len(), 5);
    }

    #[test]
    fn anonymous_without_credentials() {
        let (_, _, mode) = build_services(&Config::default(), false).unwrap();
        assert_eq!(mode, "anonymous");
    }

    #[test]
    fn credentials_enable_signed_in_mode() {
        let mut cfg = Config::default();
        cfg.reddit.client_id = "id".into();
        cfg.reddit.refresh_token = "refresh".into();
        let (_, _, mode) = build_services(&cfg, false).unwrap();
        assert_eq!(mode, "signed in");
    }

    #[test]
    fn friendly_path_falls_back_to_default() {
        assert_eq!(friendly_path(None), "~/.config/subview/config.yaml");
        let path = PathBuf::from("/etc/subview.yaml");
        assert_eq!(friendly_path(Some(&path)), "/etc/subview.yaml");
    }

    #[test]
    fn logging_is_skipped_without_directory() {
        let cfg = LogConfig {
            level: "info".into(),
            directory: None,
        };
        assert!(init_logging(&cfg).is_none());
    }
}
