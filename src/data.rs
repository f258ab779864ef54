use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::reddit::{self, ListingOptions, Post, SortOption, SubscribeAction, Subreddit};

/// Failure of a single page fetch against a paginated source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to load {collection} ({sort}): {cause:#}")]
    Failed {
        collection: String,
        sort: &'static str,
        cause: anyhow::Error,
    },
}

impl FetchError {
    pub fn new(collection: &str, sort: SortOption, cause: anyhow::Error) -> Self {
        FetchError::Failed {
            collection: collection.to_string(),
            sort: sort.as_str(),
            cause,
        }
    }
}

pub trait FeedService: Send + Sync {
    fn fetch_page(
        &self,
        collection: &str,
        sort: SortOption,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Post>, FetchError>;
}

pub trait SubredditService: Send + Sync {
    fn about(&self, name: &str) -> Result<Subreddit>;
    fn subscribe(&self, fullnames: &[String]) -> Result<()>;
    fn unsubscribe(&self, fullnames: &[String]) -> Result<()>;
}

pub struct RedditFeedService {
    client: Arc<reddit::Client>,
}

impl RedditFeedService {
    pub fn new(client: Arc<reddit::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for RedditFeedService {
    fn fetch_page(
        &self,
        collection: &str,
        sort: SortOption,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Post>, FetchError> {
        let opts = ListingOptions {
            after: after.map(str::to_string),
            limit: Some(limit),
        };
        let listing = self
            .client
            .subreddit_listing(collection, sort, opts)
            .context("fetch subreddit feed")
            .map_err(|err| FetchError::new(collection, sort, err))?;
        let rate = self.client.rate_limit();
        log::debug!(
            "reddit: {} page after {:?}, {} requests left",
            collection,
            after,
            rate.remaining
        );
        Ok(listing
            .children
            .into_iter()
            .map(|thing| thing.data)
            .collect())
    }
}

pub struct RedditSubredditService {
    client: Arc<reddit::Client>,
}

impl RedditSubredditService {
    pub fn new(client: Arc<reddit::Client>) -> Self {
        Self { client }
    }
}

impl SubredditService for RedditSubredditService {
    fn about(&self, name: &str) -> Result<Subreddit> {
        self.client
            .subreddit_about(name)
            .with_context(|| format!("fetch subreddit info for {name}"))
    }

    fn subscribe(&self, fullnames: &[String]) -> Result<()> {
        self.client
            .subscribe(fullnames, SubscribeAction::Subscribe)
            .context("join subreddit")
    }

    fn unsubscribe(&self, fullnames: &[String]) -> Result<()> {
        self.client
            .subscribe(fullnames, SubscribeAction::Unsubscribe)
            .context("leave subreddit")
    }
}

/// Offline feed with a fixed number of generated posts.
pub struct MockFeedService {
    total: usize,
}

impl Default for MockFeedService {
    fn default() -> Self {
        Self { total: 240 }
    }
}

impl MockFeedService {
    pub fn with_total(total: usize) -> Self {
        Self { total }
    }
}

impl FeedService for MockFeedService {
    fn fetch_page(
        &self,
        collection: &str,
        sort: SortOption,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Post>, FetchError> {
        let start = match after {
            None => 0,
            Some(cursor) => cursor
                .strip_prefix("t3_mock")
                .and_then(|index| index.parse::<usize>().ok())
                .map(|index| index + 1)
                .ok_or_else(|| {
                    FetchError::new(collection, sort, anyhow!("unknown cursor {cursor}"))
                })?,
        };
        let end = (start + limit as usize).min(self.total);
        Ok((start..end).map(|index| mock_post(collection, index)).collect())
    }
}

#[derive(Default)]
pub struct MockSubredditService;

impl SubredditService for MockSubredditService {
    fn about(&self, name: &str) -> Result<Subreddit> {
        let name = reddit::normalize_subreddit(name);
        Ok(Subreddit {
            id: "mock".into(),
            name: "t5_mock".into(),
            display_name: name.clone(),
            display_name_prefixed: format!("r/{name}"),
            title: format!("Sample community for {name}"),
            public_description: "Offline sample content. Posts are generated locally.".into(),
            subscribers: 4242,
            active_user_count: Some(42),
            banner_background_image: String::new(),
            user_is_subscriber: Some(false),
            url: format!("/r/{name}/"),
            over_18: false,
            created_utc: 0.0,
        })
    }

    fn subscribe(&self, _fullnames: &[String]) -> Result<()> {
        Ok(())
    }

    fn unsubscribe(&self, _fullnames: &[String]) -> Result<()> {
        Ok(())
    }
}

fn mock_post(collection: &str, index: usize) -> Post {
    let subreddit = reddit::normalize_subreddit(collection);
    Post {
        id: format!("mock{index}"),
        name: format!("t3_mock{index}"),
        title: format!("Sample post #{}", index + 1),
        subreddit: subreddit.clone(),
        author: if index % 7 == 3 {
            "[deleted]".into()
        } else {
            format!("sample_user_{}", index % 5)
        },
        selftext: String::new(),
        url: String::new(),
        permalink: format!("/r/{subreddit}/comments/mock{index}/sample_post/"),
        score: (index as i64 * 37) % 1000,
        num_comments: (index as i64 * 11) % 300,
        created_utc: 0.0,
        link_flair_text: None,
        stickied: index == 0,
        over_18: false,
        spoiler: false,
        is_self: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_feed_pages_by_cursor() {
        let feed = MockFeedService::with_total(120);
        let first = feed.fetch_page("r/rust", SortOption::Hot, None, 50).unwrap();
        assert_eq!(first.len(), 50);
        assert_eq!(first[0].name, "t3_mock0");

        let cursor = first.last().map(|post| post.name.clone());
        let second = feed
            .fetch_page("r/rust", SortOption::Hot, cursor.as_deref(), 50)
            .unwrap();
        assert_eq!(second[0].name, "t3_mock50");

        let cursor = Some("t3_mock99");
        let tail = feed.fetch_page("rust", SortOption::Hot, cursor, 50).unwrap();
        assert_eq!(tail.len(), 20);

        let cursor = Some("t3_mock119");
        let empty = feed.fetch_page("rust", SortOption::Hot, cursor, 50).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn mock_feed_rejects_foreign_cursor() {
        let feed = MockFeedService::default();
        let err = feed
            .fetch_page("rust", SortOption::New, Some("t3_zzz"), 10)
            .unwrap_err();
        assert!(err.to_string().contains("rust (new)"));
    }
}
