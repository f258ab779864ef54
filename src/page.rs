use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::FeedConfig;
use crate::data::{FeedService, SubredditService};
use crate::feed::{FeedOptions, FeedSession, ProximityPolicy};
use crate::reddit::{self, Post, SortOption, Subreddit};

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("failed to {action} {subreddit}: {cause:#}")]
    Membership {
        action: &'static str,
        subreddit: String,
        cause: anyhow::Error,
    },
    #[error("post {0} has no permalink")]
    MissingPermalink(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Joined,
    NotJoined,
}

impl Membership {
    pub fn label(self) -> &'static str {
        match self {
            Membership::Joined => "Joined",
            Membership::NotJoined => "Join",
        }
    }
}

/// A pending join or leave, computed from the current membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub target: Membership,
    pub fullnames: Vec<String>,
}

impl MembershipChange {
    fn verb(&self) -> &'static str {
        match self.target {
            Membership::Joined => "join",
            Membership::NotJoined => "leave",
        }
    }

    pub fn run(&self, service: &dyn SubredditService) -> Result<()> {
        match self.target {
            Membership::Joined => service.subscribe(&self.fullnames),
            Membership::NotJoined => service.unsubscribe(&self.fullnames),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Profile { username: String, url: String },
    Post { name: String, url: String },
}

impl Navigation {
    pub fn url(&self) -> &str {
        match self {
            Navigation::Profile { url, .. } | Navigation::Post { url, .. } => url,
        }
    }
}

pub fn feed_options(collection: &str, cfg: &FeedConfig) -> FeedOptions {
    FeedOptions {
        collection: reddit::normalize_subreddit(collection),
        sort: cfg.sort,
        page_size: cfg.page_size,
        policy: ProximityPolicy {
            threshold: cfg.load_threshold,
            ignore_intermediate: cfg.ignore_intermediate,
        },
    }
}

/// One subreddit's info page: its metadata, its feed, and the page commands.
pub struct SubredditPage {
    subreddit: Subreddit,
    feed: FeedSession,
    subreddits: Arc<dyn SubredditService>,
}

impl SubredditPage {
    pub fn new(
        subreddit: Subreddit,
        feed_service: Arc<dyn FeedService>,
        subreddit_service: Arc<dyn SubredditService>,
        cfg: &FeedConfig,
    ) -> Self {
        let options = feed_options(&subreddit.display_name, cfg);
        Self {
            subreddit,
            feed: FeedSession::new(feed_service, options),
            subreddits: subreddit_service,
        }
    }

    /// Opens a page by name, fetching the subreddit's metadata first.
    pub fn open(
        name: &str,
        feed_service: Arc<dyn FeedService>,
        subreddit_service: Arc<dyn SubredditService>,
        cfg: &FeedConfig,
    ) -> Result<Self> {
        let subreddit = subreddit_service
            .about(name)
            .with_context(|| format!("open r/{}", reddit::normalize_subreddit(name)))?;
        log::info!("page: opened {}", subreddit.prefixed_name());
        Ok(Self::new(subreddit, feed_service, subreddit_service, cfg))
    }

    /// Requests the first page.
    pub fn start(&mut self) -> bool {
        self.feed.load_next()
    }

    pub fn subreddit(&self) -> &Subreddit {
        &self.subreddit
    }

    pub fn feed(&self) -> &FeedSession {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut FeedSession {
        &mut self.feed
    }

    pub fn posts(&self) -> &[Post] {
        self.feed.posts()
    }

    pub fn sort(&self) -> SortOption {
        self.feed.sort()
    }

    pub fn subreddit_service(&self) -> Arc<dyn SubredditService> {
        self.subreddits.clone()
    }

    pub fn membership(&self) -> Membership {
        if self.subreddit.user_is_subscriber.unwrap_or(false) {
            Membership::Joined
        } else {
            Membership::NotJoined
        }
    }

    /// The title is redundant when missing or equal to the prefixed name.
    pub fn display_title(&self) -> Option<&str> {
        let title = self.subreddit.title.trim();
        if title.is_empty() || title == self.subreddit.prefixed_name() {
            None
        } else {
            Some(title)
        }
    }

    pub fn banner_url(&self) -> Option<String> {
        let raw = self.subreddit.banner_background_image.trim();
        if raw.is_empty() {
            None
        } else {
            Some(reddit::unescape_url(raw))
        }
    }

    pub fn membership_change(&self) -> MembershipChange {
        let target = match self.membership() {
            Membership::Joined => Membership::NotJoined,
            Membership::NotJoined => Membership::Joined,
        };
        MembershipChange {
            target,
            fullnames: vec![self.subreddit.name.clone()],
        }
    }

    /// Records the outcome of a membership change. On failure the subscriber
    /// flag is left as it was.
    pub fn apply_membership(
        &mut self,
        change: &MembershipChange,
        result: Result<()>,
    ) -> Result<Membership, PageError> {
        match result {
            Ok(()) => {
                self.subreddit.user_is_subscriber = Some(change.target == Membership::Joined);
                log::info!(
                    "page: {} {}",
                    change.verb(),
                    self.subreddit.prefixed_name()
                );
                Ok(change.target)
            }
            Err(cause) => {
                log::warn!(
                    "page: {} {} failed: {cause:#}",
                    change.verb(),
                    self.subreddit.prefixed_name()
                );
                Err(PageError::Membership {
                    action: change.verb(),
                    subreddit: self.subreddit.prefixed_name(),
                    cause,
                })
            }
        }
    }

    pub fn toggle_membership(&mut self) -> Result<Membership, PageError> {
        let change = self.membership_change();
        let result = change.run(self.subreddits.as_ref());
        self.apply_membership(&change, result)
    }
}

pub fn post_link(post: &Post) -> Result<String, PageError> {
    if post.permalink.trim().is_empty() {
        return Err(PageError::MissingPermalink(post.name.clone()));
    }
    Ok(post.thread_url())
}

/// Deleted authors have no profile to visit.
pub fn author_navigation(post: &Post) -> Option<Navigation> {
    let username = post.author.trim();
    if username.is_empty() || post.author_deleted() {
        return None;
    }
    Some(Navigation::Profile {
        username: username.to_string(),
        url: format!("{}/user/{}", reddit::WEB_URL, username),
    })
}

pub fn post_navigation(post: &Post) -> Result<Navigation, PageError> {
    Ok(Navigation::Post {
        name: post.name.clone(),
        url: post_link(post)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockFeedService, MockSubredditService};
    use crate::feed::LoadOutcome;
    use anyhow::anyhow;
    use std::time::Duration;

    struct FailingMembership;

    impl SubredditService for FailingMembership {
        fn about(&self, name: &str) -> Result<Subreddit> {
            MockSubredditService.about(name)
        }

        fn subscribe(&self, _fullnames: &[String]) -> Result<()> {
            Err(anyhow!("reddit: forbidden"))
        }

        fn unsubscribe(&self, _fullnames: &[String]) -> Result<()> {
            Err(anyhow!("reddit: forbidden"))
        }
    }

    fn open_page(service: Arc<dyn SubredditService>) -> SubredditPage {
        SubredditPage::open(
            "r/rust",
            Arc::new(MockFeedService::default()),
            service,
            &FeedConfig::default(),
        )
        .unwrap()
    }

    fn sample_post(author: &str, permalink: &str) -> Post {
        MockFeedService::default()
            .fetch_page("rust", SortOption::Hot, None, 1)
            .map(|mut posts| {
                let mut post = posts.remove(0);
                post.author = author.into();
                post.permalink = permalink.into();
                post
            })
            .unwrap()
    }

    #[test]
    fn toggle_membership_flips_subscriber_flag() {
        let mut page = open_page(Arc::new(MockSubredditService));
        assert_eq!(page.membership(), Membership::NotJoined);
        assert_eq!(page.toggle_membership().unwrap(), Membership::Joined);
        assert_eq!(page.subreddit().user_is_subscriber, Some(true));
        assert_eq!(page.toggle_membership().unwrap(), Membership::NotJoined);
        assert_eq!(page.subreddit().user_is_subscriber, Some(false));
    }

    #[test]
    fn failed_membership_change_keeps_state() {
        let mut page = open_page(Arc::new(FailingMembership));
        let err = page.toggle_membership().unwrap_err();
        assert!(err.to_string().contains("join r/rust"));
        assert_eq!(page.membership(), Membership::NotJoined);
    }

    #[test]
    fn title_hidden_when_redundant() {
        let mut page = open_page(Arc::new(MockSubredditService));
        assert!(page.display_title().is_some());
        page.subreddit.title = "r/rust".into();
        assert!(page.display_title().is_none());
        page.subreddit.title = "   ".into();
        assert!(page.display_title().is_none());
    }

    #[test]
    fn banner_url_is_unescaped() {
        let mut page = open_page(Arc::new(MockSubredditService));
        assert!(page.banner_url().is_none());
        page.subreddit.banner_background_image = "https://x.test/b.png?w=1&amp;h=2".into();
        assert_eq!(
            page.banner_url().as_deref(),
            Some("https://x.test/b.png?w=1&h=2")
        );
    }

    #[test]
    fn deleted_authors_have_no_profile() {
        let post = sample_post("[deleted]", "/r/rust/comments/a/x/");
        assert!(author_navigation(&post).is_none());

        let post = sample_post("ferris", "/r/rust/comments/a/x/");
        assert_eq!(
            author_navigation(&post).map(|nav| nav.url().to_string()),
            Some("https://www.reddit.com/user/ferris".to_string())
        );
    }

    #[test]
    fn links_use_reddit_web_host() {
        let post = sample_post("ferris", "/r/rust/comments/a/x/");
        assert_eq!(
            post_link(&post).unwrap(),
            "https://www.reddit.com/r/rust/comments/a/x/"
        );
        let nav = post_navigation(&post).unwrap();
        assert_eq!(nav.url(), "https://www.reddit.com/r/rust/comments/a/x/");

        let orphan = sample_post("ferris", "");
        assert!(post_link(&orphan).is_err());
    }

    #[test]
    fn start_loads_first_page() {
        let mut page = open_page(Arc::new(MockSubredditService));
        assert!(page.start());
        assert!(!page.start());
        let outcome = page
            .feed_mut()
            .wait(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(outcome, LoadOutcome::Appended(50));
        assert_eq!(page.posts().len(), 50);
        assert_eq!(page.posts()[0].subreddit, "rust");
    }
}
