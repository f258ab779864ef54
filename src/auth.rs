use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;

use crate::reddit::{OAuthToken, TokenProvider};

pub const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
const MAX_TOKEN_LIFETIME_SECS: u64 = 86_400 * 365;

#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub token_url: String,
    pub refresh_skew: Duration,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            user_agent: format!("subview/{}", crate::VERSION),
            token_url: TOKEN_URL.into(),
            refresh_skew: Duration::from_secs(30),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    token_type: String,
    expires_at: DateTime<Utc>,
}

/// Trades a long-lived refresh token for short-lived access tokens and keeps
/// the current one until it is within `refresh_skew` of expiring.
pub struct RefreshTokenProvider {
    cfg: Config,
    client: Client,
    current: Mutex<Option<CachedToken>>,
}

impl RefreshTokenProvider {
    pub fn new(cfg: Config) -> Result<Self> {
        if cfg.client_id.trim().is_empty() {
            bail!("auth: reddit.client_id is required");
        }
        if cfg.refresh_token.trim().is_empty() {
            bail!("auth: reddit.refresh_token is required");
        }
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("auth: build http client")?;
        Ok(Self {
            cfg,
            client,
            current: Mutex::new(None),
        })
    }

    fn is_fresh(&self, token: &CachedToken) -> bool {
        let skew = chrono::Duration::from_std(self.cfg.refresh_skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(0));
        token.expires_at - skew > Utc::now()
    }

    fn refresh(&self) -> Result<CachedToken> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.cfg.refresh_token.as_str()),
        ];
        let resp = self
            .client
            .post(&self.cfg.token_url)
            .header(USER_AGENT, self.cfg.user_agent.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .basic_auth(&self.cfg.client_id, Some(self.cfg.client_secret.as_str()))
            .form(&form)
            .send()
            .context("auth: refresh token request")?;
        if !resp.status().is_success() {
            let body = resp.text().unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<TokenError>(&body) {
                bail!("auth: refresh failed: {}", err);
            }
            bail!("auth: refresh failed: {}", body);
        }

        let payload: TokenResponse = resp.json().context("auth: decode refresh response")?;
        if payload.access_token.is_empty() {
            bail!("auth: missing refreshed access token");
        }
        let expires_in = token_lifetime(payload.expires_in);
        log::debug!("auth: refreshed access token, valid for {expires_in}s");
        Ok(CachedToken {
            access_token: payload.access_token,
            token_type: payload.token_type.unwrap_or_else(|| "bearer".into()),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        })
    }
}

impl TokenProvider for RefreshTokenProvider {
    fn token(&self) -> Result<OAuthToken> {
        let mut current = self.current.lock();
        let token = match current.as_ref() {
            Some(token) if self.is_fresh(token) => token.clone(),
            _ => {
                let token = self.refresh()?;
                *current = Some(token.clone());
                token
            }
        };
        Ok(OAuthToken {
            access_token: token.access_token,
            token_type: token.token_type,
            expires_at: Some(token.expires_at.into()),
        })
    }
}

/// A fixed access token, handy for scripting and tests.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Result<OAuthToken> {
        if self.token.trim().is_empty() {
            bail!("auth: access token is empty");
        }
        Ok(OAuthToken {
            access_token: self.token.clone(),
            token_type: "bearer".into(),
            expires_at: None,
        })
    }
}

/// Seconds a refreshed token stays valid. Missing values fall back to an
/// hour; absurd ones are capped at a year.
fn token_lifetime(expires_in: u64) -> i64 {
    match expires_in {
        0 => DEFAULT_TOKEN_LIFETIME_SECS as i64,
        secs => secs.min(MAX_TOKEN_LIFETIME_SECS) as i64,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    #[serde(default)]
    error: String,
    #[serde(default, rename = "error_description")]
    description: String,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error.is_empty() && self.description.is_empty() {
            return write!(f, "unknown token error");
        }
        if self.description.is_empty() {
            write!(f, "authorization error: {}", self.error)
        } else if self.error.is_empty() {
            write!(f, "authorization error: {}", self.description)
        } else {
            write!(
                f,
                "authorization error: {} ({})",
                self.error, self.description
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_provider_requires_credentials() {
        assert!(RefreshTokenProvider::new(Config::default()).is_err());
        let cfg = Config {
            client_id: "client".into(),
            ..Default::default()
        };
        assert!(RefreshTokenProvider::new(cfg).is_err());
    }

    #[test]
    fn static_provider_returns_token() {
        let token = StaticTokenProvider::new("abc").token().unwrap();
        assert_eq!(token.access_token, "abc");
        assert!(StaticTokenProvider::new("  ").token().is_err());
    }

    #[test]
    fn token_lifetime_is_bounded() {
        assert_eq!(token_lifetime(0), 3600);
        assert_eq!(token_lifetime(86_400), 86_400);
        assert_eq!(token_lifetime(u64::MAX), 86_400 * 365);
        let _ = Utc::now() + chrono::Duration::seconds(token_lifetime(u64::MAX));
    }

    #[test]
    fn token_error_display() {
        let err: TokenError =
            serde_json::from_str(r#"{"error":"invalid_grant"}"#).unwrap();
        assert_eq!(err.to_string(), "authorization error: invalid_grant");
    }
}
