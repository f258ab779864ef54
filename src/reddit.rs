use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::RwLock;
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

pub const OAUTH_BASE_URL: &str = "https://oauth.reddit.com/";
pub const PUBLIC_BASE_URL: &str = "https://www.reddit.com/";
pub const WEB_URL: &str = "https://www.reddit.com";

pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<OAuthToken>;
}

#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<SystemTime>,
}

#[derive(Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingOptions {
    pub after: Option<String>,
    pub limit: Option<u32>,
}

impl ListingOptions {
    fn into_params(self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(after) = self.after {
            params.push(("after".into(), after));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOption {
    #[default]
    Hot,
    New,
    Top,
    Rising,
    Controversial,
}

impl SortOption {
    /// Orders a subreddit listing accepts. `best` is front-page only.
    pub const ALL: [SortOption; 5] = [
        SortOption::Hot,
        SortOption::New,
        SortOption::Top,
        SortOption::Rising,
        SortOption::Controversial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOption::Hot => "hot",
            SortOption::New => "new",
            SortOption::Top => "top",
            SortOption::Rising => "rising",
            SortOption::Controversial => "controversial",
        }
    }

    pub fn from_key(key: &str) -> Option<SortOption> {
        let key = key.trim().trim_start_matches('/');
        SortOption::ALL
            .into_iter()
            .find(|sort| sort.as_str().eq_ignore_ascii_case(key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeAction {
    Subscribe,
    Unsubscribe,
}

impl SubscribeAction {
    fn as_str(&self) -> &'static str {
        match self {
            SubscribeAction::Subscribe => "sub",
            SubscribeAction::Unsubscribe => "unsub",
        }
    }
}

pub struct Client {
    token_provider: Option<Arc<dyn TokenProvider>>,
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    rate: RwLock<RateLimit>,
}

/// Last `x-ratelimit-*` values reported by reddit.
#[derive(Debug, Clone, Default)]
pub struct RateLimit {
    pub used: f64,
    pub remaining: f64,
    pub reset_at: Option<SystemTime>,
}

impl RateLimit {
    /// Returns `None` when the response carried no rate headers.
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |key: &str| {
            headers
                .get(key)
                .and_then(|value| value.to_str().ok())
                .and_then(|text| text.trim().parse::<f64>().ok())
        };
        let used = read("x-ratelimit-used");
        let remaining = read("x-ratelimit-remaining");
        let reset = read("x-ratelimit-reset");
        if used.is_none() && remaining.is_none() && reset.is_none() {
            return None;
        }
        Some(RateLimit {
            used: used.unwrap_or_default(),
            remaining: remaining.unwrap_or_default(),
            reset_at: reset.and_then(|secs| {
                SystemTime::now().checked_add(Duration::from_secs_f64(secs.max(0.0)))
            }),
        })
    }
}

impl Client {
    /// Builds a client. Without a token provider the client talks to the
    /// public JSON endpoints and cannot perform account actions.
    pub fn new(token_provider: Option<Arc<dyn TokenProvider>>, config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("reddit client user agent required");
        }
        let base = config.base_url.unwrap_or_else(|| {
            if token_provider.is_some() {
                OAUTH_BASE_URL.to_string()
            } else {
                PUBLIC_BASE_URL.to_string()
            }
        });
        let base_url = Url::parse(&base).with_context(|| format!("reddit: parse base url {base}"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            token_provider,
            http,
            user_agent: config.user_agent,
            base_url,
            rate: RwLock::new(RateLimit::default()),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.token_provider.is_some()
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.rate.read().clone()
    }

    pub fn subreddit_listing(
        &self,
        subreddit: &str,
        sort: SortOption,
        opts: ListingOptions,
    ) -> Result<Listing<Post>> {
        let name = normalize_subreddit(subreddit);
        let path = if name.is_empty() {
            format!("/{}.json", sort.as_str())
        } else {
            format!("/r/{}/{}.json", name, sort.as_str())
        };
        self.fetch_listing(&path, opts)
    }

    pub fn subreddit_about(&self, subreddit: &str) -> Result<Subreddit> {
        let name = normalize_subreddit(subreddit);
        if name.is_empty() {
            bail!("reddit: subreddit name required");
        }
        let path = format!("/r/{}/about.json", name);
        let resp = self.request(Method::GET, &path, &[], None)?;
        let thing: Thing<Subreddit> = resp
            .json()
            .with_context(|| format!("reddit: decode about for r/{name}"))?;
        Ok(thing.data)
    }

    pub fn subscribe(&self, fullnames: &[String], action: SubscribeAction) -> Result<()> {
        if !self.is_authenticated() {
            bail!("reddit: joining or leaving a subreddit requires a signed-in session");
        }
        if fullnames.is_empty() {
            return Ok(());
        }
        let form = vec![
            ("action".to_string(), action.as_str().to_string()),
            ("sr".to_string(), fullnames.join(",")),
        ];
        self.request(Method::POST, "/api/subscribe", &[], Some(form))?;
        Ok(())
    }

    fn fetch_listing<T>(&self, path: &str, opts: ListingOptions) -> Result<Listing<T>>
    where
        T: DeserializeOwned,
    {
        let params = opts.into_params();
        let resp = self.request(Method::GET, path, &params, None)?;
        let listing: ListingEnvelope<T> = resp
            .json()
            .with_context(|| format!("reddit: decode listing {path}"))?;
        Ok(listing.data)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        form: Option<Vec<(String, String)>>,
    ) -> Result<Response> {
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        if !params.is_empty() || method == Method::GET {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
            if method == Method::GET {
                pairs.append_pair("raw_json", "1");
            }
        }

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(provider) = &self.token_provider {
            let token = provider.token()?;
            req = req.header(AUTHORIZATION, format!("Bearer {}", token.access_token));
        }
        if let Some(form_data) = form {
            req = req.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
            req = req.form(&form_data);
        }

        let resp = req.send()?;
        if let Some(rate) = RateLimit::from_headers(resp.headers()) {
            if rate.remaining < 1.0 {
                log::warn!("reddit: rate limit exhausted, resets at {:?}", rate.reset_at);
            }
            *self.rate.write() = rate;
        }
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        Err(status_error(status.as_u16(), path, body.trim()))
    }
}

fn status_error(status: u16, path: &str, body: &str) -> anyhow::Error {
    match status {
        401 => anyhow!("reddit: unauthorized ({path})"),
        403 => anyhow!("reddit: forbidden ({path})"),
        404 => anyhow!("reddit: not found: {path}"),
        429 => anyhow!("reddit: rate limited: {body}"),
        _ => anyhow!("reddit: api error {status} for {path}: {body}"),
    }
}

/// Strips `r/` and `/r/` prefixes and surrounding slashes.
pub fn normalize_subreddit(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    let without_prefix = trimmed
        .strip_prefix("r/")
        .or_else(|| trimmed.strip_prefix("R/"))
        .unwrap_or(trimmed);
    without_prefix.trim_matches('/').to_string()
}

/// Reddit escapes `&` in media urls unless `raw_json` is requested.
pub fn unescape_url(raw: &str) -> String {
    raw.replace("&amp;", "&")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing<T> {
    pub after: Option<String>,
    pub before: Option<String>,
    pub children: Vec<Thing<T>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub name: String,
    pub title: String,
    pub subreddit: String,
    pub author: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub spoiler: bool,
    #[serde(default)]
    pub is_self: bool,
}

impl Post {
    pub fn created_at(&self) -> Option<SystemTime> {
        if self.created_utc == 0.0 {
            return None;
        }
        let secs = self.created_utc.trunc() as u64;
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Full web link to the post's comment thread.
    pub fn thread_url(&self) -> String {
        format!("{}{}", WEB_URL, self.permalink)
    }

    pub fn author_deleted(&self) -> bool {
        self.author == "[deleted]"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subreddit {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub display_name_prefixed: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub public_description: String,
    #[serde(default)]
    pub subscribers: i64,
    #[serde(default)]
    pub active_user_count: Option<i64>,
    #[serde(default)]
    pub banner_background_image: String,
    #[serde(default)]
    pub user_is_subscriber: Option<bool>,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "over18")]
    pub over_18: bool,
    #[serde(default)]
    pub created_utc: f64,
}

impl Subreddit {
    pub fn prefixed_name(&self) -> String {
        if self.display_name_prefixed.is_empty() {
            format!("r/{}", self.display_name)
        } else {
            self.display_name_prefixed.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListingEnvelope<T> {
    kind: String,
    data: Listing<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn rate_limit_read_from_headers() {
        assert!(RateLimit::from_headers(&HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-used", HeaderValue::from_static("12"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("88.0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("240"));
        let rate = RateLimit::from_headers(&headers).unwrap();
        assert_eq!(rate.used, 12.0);
        assert_eq!(rate.remaining, 88.0);
        assert!(rate.reset_at.is_some());
    }

    #[test]
    fn status_errors_are_distinct() {
        let path = "/r/rust/about.json";
        assert!(status_error(401, path, "").to_string().contains("unauthorized"));
        assert!(status_error(403, path, "").to_string().contains("forbidden"));
        assert_eq!(
            status_error(404, path, "").to_string(),
            "reddit: not found: /r/rust/about.json"
        );
        assert!(status_error(429, path, "slow down")
            .to_string()
            .contains("rate limited: slow down"));
        assert!(status_error(502, path, "").to_string().contains("502"));
    }

    #[test]
    fn listing_options_skip_missing_fields() {
        let params = ListingOptions {
            after: Some("t3_abc".into()),
            limit: Some(50),
        }
        .into_params();
        assert_eq!(
            params,
            vec![
                ("after".to_string(), "t3_abc".to_string()),
                ("limit".to_string(), "50".to_string()),
            ]
        );
    }

    #[test]
    fn sort_keys_parse_case_insensitively() {
        assert_eq!(SortOption::from_key("new"), Some(SortOption::New));
        assert_eq!(SortOption::from_key("/TOP"), Some(SortOption::Top));
        assert_eq!(SortOption::from_key("sideways"), None);
        assert_eq!(SortOption::from_key("best"), None);
        assert!(SortOption::ALL.iter().all(|sort| sort.as_str() != "best"));
    }

    #[test]
    fn subreddit_names_are_normalized() {
        assert_eq!(normalize_subreddit("r/rust"), "rust");
        assert_eq!(normalize_subreddit("/r/rust/"), "rust");
        assert_eq!(normalize_subreddit(" rust "), "rust");
    }

    #[test]
    fn about_payload_decodes() {
        let raw = r#"{
            "kind": "t5",
            "data": {
                "name": "t5_2s7lj",
                "display_name": "rust",
                "display_name_prefixed": "r/rust",
                "title": "The Rust Programming Language",
                "public_description": "A place for all things Rust",
                "subscribers": 300000,
                "active_user_count": 1200,
                "banner_background_image": "https://styles.redditmedia.com/b.png?a=1&amp;b=2",
                "user_is_subscriber": null,
                "url": "/r/rust/",
                "over18": false
            }
        }"#;
        let thing: Thing<Subreddit> = serde_json::from_str(raw).unwrap();
        let sub = thing.data;
        assert_eq!(sub.name, "t5_2s7lj");
        assert_eq!(sub.prefixed_name(), "r/rust");
        assert_eq!(sub.user_is_subscriber, None);
        assert_eq!(
            unescape_url(&sub.banner_background_image),
            "https://styles.redditmedia.com/b.png?a=1&b=2"
        );
    }

    #[test]
    fn listing_payload_decodes_posts() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": "t3_b",
                "before": null,
                "children": [
                    {"kind": "t3", "data": {"id": "a", "name": "t3_a", "title": "First", "subreddit": "rust", "author": "ferris", "permalink": "/r/rust/comments/a/first/"}},
                    {"kind": "t3", "data": {"id": "b", "name": "t3_b", "title": "Second", "subreddit": "rust", "author": "[deleted]"}}
                ]
            }
        }"#;
        let envelope: ListingEnvelope<Post> = serde_json::from_str(raw).unwrap();
        let listing = envelope.data;
        assert_eq!(listing.after.as_deref(), Some("t3_b"));
        assert_eq!(listing.children.len(), 2);
        let first = &listing.children[0].data;
        assert_eq!(
            first.thread_url(),
            "https://www.reddit.com/r/rust/comments/a/first/"
        );
        assert!(listing.children[1].data.author_deleted());
    }

    #[test]
    fn anonymous_client_cannot_subscribe() {
        let client = Client::new(
            None,
            ClientConfig {
                user_agent: "subview-test/0.1".into(),
                ..Default::default()
            },
        )
        .unwrap();
        let err = client
            .subscribe(&["t5_2s7lj".to_string()], SubscribeAction::Subscribe)
            .unwrap_err();
        assert!(err.to_string().contains("signed-in"));
    }

    #[test]
    fn client_requires_user_agent() {
        assert!(Client::new(None, ClientConfig::default()).is_err());
    }
}
