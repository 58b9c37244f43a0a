//! Runtime configuration handed to each component at construction.

use anyhow::{Result, anyhow};
use chrono::Duration;
use url::Url;

/// Lifetime of a magic-link token.
pub const TOKEN_TTL_MINUTES: i64 = 10;

/// How long a paid posting stays listed.
pub const LISTING_DAYS: i64 = 90;

pub const DEFAULT_EMAIL_SUBJECT: &str = "Your Upfront Login Link";

#[must_use]
pub fn token_ttl() -> Duration {
    Duration::minutes(TOKEN_TTL_MINUTES)
}

#[must_use]
pub fn listing_duration() -> Duration {
    Duration::days(LISTING_DAYS)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpfrontConfig {
    email_from: String,
    email_subject: String,
    allowed_origins: Vec<String>,
}

impl UpfrontConfig {
    #[must_use]
    pub fn new(email_from: impl Into<String>) -> Self {
        Self {
            email_from: email_from.into(),
            email_subject: DEFAULT_EMAIL_SUBJECT.to_string(),
            allowed_origins: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_email_subject(mut self, subject: impl Into<String>) -> Self {
        self.email_subject = subject.into();
        self
    }

    /// Restrict the origins magic links may point at. Empty means any http(s) origin.
    #[must_use]
    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_origins = origins
            .into_iter()
            .map(|origin| origin.as_ref().trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn email_from(&self) -> &str {
        &self.email_from
    }

    #[must_use]
    pub fn email_subject(&self) -> &str {
        &self.email_subject
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    /// Normalize a request origin: an absolute http(s) URL without trailing `/`.
    ///
    /// # Errors
    /// Returns an error if the origin is not an absolute http(s) URL.
    pub fn parse_origin(&self, origin: &str) -> Result<String> {
        let trimmed = origin.trim().trim_end_matches('/');

        let url = Url::parse(trimmed).map_err(|e| anyhow!("invalid request origin: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(anyhow!("request origin must be an http(s) URL"));
        }

        Ok(trimmed.to_string())
    }

    /// Whether magic links may point at `origin` (already normalized).
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty()
            || self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin))
    }
}
