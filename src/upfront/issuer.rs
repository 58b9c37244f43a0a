//! Magic-link issuance for a sign-in request.

use super::{
    Error,
    clock,
    config::{UpfrontConfig, token_ttl},
    email::{EmailMessage, EmailSender},
    error::Upstream,
    identity::{CHALLENGE_ATTRIBUTE, IdentityProvider, normalize_email},
    store::ResourceStore,
    token::{IdentityClaim, TokenCodec, TokenError},
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

#[must_use]
pub fn valid_email(email: &str) -> bool {
    EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}

/// Outcome of a sign-in request.
///
/// The provider write and the email are two separate side effects; a
/// challenge counts as started only when both succeeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChallengeIssuance {
    pub resources_found: bool,
    pub provider_write_ok: bool,
    pub email_send_ok: bool,
}

impl ChallengeIssuance {
    #[must_use]
    pub fn challenge_started(&self) -> bool {
        self.resources_found && self.provider_write_ok && self.email_send_ok
    }

    /// Issuance stopped after the provider write; the stored token is stale
    /// and a new request overwrites it.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.provider_write_ok && !self.email_send_ok
    }
}

/// `{origin}/magic-link?email={email}&token={token}`, both values url-encoded.
#[must_use]
pub fn magic_link(origin: &str, email: &str, token: &str) -> String {
    let email: String = url::form_urlencoded::byte_serialize(email.as_bytes()).collect();
    let token: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    format!(
        "{}/magic-link?email={email}&token={token}",
        origin.trim_end_matches('/')
    )
}

#[must_use]
pub fn login_email_body(link: &str) -> String {
    format!(
        "<h1>You are nearly there! Please use the link below to log in:</h1><br/><br/><a href='{link}'>Log In</a>"
    )
}

// Only a key-service failure is worth retrying; a claim that cannot be
// serialized is a bug.
fn encode_error(err: TokenError) -> Error {
    match err {
        TokenError::Encryption(source) => Error::upstream(Upstream::KeyService, source),
        other => Error::Internal(other.into()),
    }
}

#[derive(Clone)]
pub struct ChallengeIssuer {
    config: Arc<UpfrontConfig>,
    codec: TokenCodec,
    store: Arc<dyn ResourceStore>,
    identity: Arc<dyn IdentityProvider>,
    email: Arc<dyn EmailSender>,
}

impl ChallengeIssuer {
    #[must_use]
    pub fn new(
        config: Arc<UpfrontConfig>,
        codec: TokenCodec,
        store: Arc<dyn ResourceStore>,
        identity: Arc<dyn IdentityProvider>,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            config,
            codec,
            store,
            identity,
            email,
        }
    }

    /// Start a magic-link challenge for `login_email`.
    ///
    /// # Errors
    /// [`Error::Validation`] for a malformed email or origin,
    /// [`Error::SecurityRejection`] for an origin outside the allow-list,
    /// [`Error::NotFound`] when the owner has no account yet,
    /// [`Error::Upstream`] when the store, key service or identity provider fails.
    /// A failed email send is not an error: it is reported in the returned
    /// [`ChallengeIssuance`].
    pub async fn start_challenge(
        &self,
        login_email: &str,
        request_origin: &str,
    ) -> Result<ChallengeIssuance, Error> {
        self.start_challenge_at(login_email, request_origin, clock::now())
            .await
    }

    /// # Errors
    /// See [`ChallengeIssuer::start_challenge`].
    #[instrument(skip(self, login_email), fields(owner_email = tracing::field::Empty))]
    pub async fn start_challenge_at(
        &self,
        login_email: &str,
        request_origin: &str,
        now: DateTime<Utc>,
    ) -> Result<ChallengeIssuance, Error> {
        let email = normalize_email(login_email);
        tracing::Span::current().record("owner_email", email.as_str());

        if !valid_email(&email) {
            return Err(Error::Validation("invalid email".to_string()));
        }
        let origin = self
            .config
            .parse_origin(request_origin)
            .map_err(|err| Error::Validation(err.to_string()))?;
        if !self.config.origin_allowed(&origin) {
            warn!(request_origin = %origin, "request origin not in allow-list");
            return Err(Error::SecurityRejection);
        }

        let mut issuance = ChallengeIssuance::default();

        let owned = self
            .store
            .count_by_owner(&email)
            .await
            .map_err(|err| Error::upstream(Upstream::ResourceStore, err))?;
        if owned == 0 {
            warn!("no job posts found, not starting challenge");
            return Ok(issuance);
        }
        issuance.resources_found = true;
        info!(job_posts = owned, "job posts found");

        // Posts exist before payment, the account only after it.
        let account = self
            .identity
            .get_user(&email)
            .await
            .map_err(|err| Error::upstream(Upstream::IdentityProvider, err))?;
        if account.is_none() {
            warn!("job posts found but no account yet, not starting challenge");
            return Err(Error::NotFound(format!("account for {email}")));
        }

        let claim = IdentityClaim::new(email.clone(), now + token_ttl());
        let token = self.codec.encode(&claim).await.map_err(encode_error)?;

        self.identity
            .update_user_attribute(&email, CHALLENGE_ATTRIBUTE, &token)
            .await
            .map_err(|err| Error::upstream(Upstream::IdentityProvider, err))?;
        issuance.provider_write_ok = true;

        let link = magic_link(&origin, &email, &token);
        let message = EmailMessage {
            from_email: self.config.email_from().to_string(),
            to_email: email.clone(),
            subject: self.config.email_subject().to_string(),
            html_body: login_email_body(&link),
        };

        match self.email.send(&message).await {
            Ok(()) => {
                issuance.email_send_ok = true;
                info!("magic link sent");
            }
            Err(err) => {
                error!(error = %err, "failed to send magic link; challenge not started");
            }
        }

        Ok(issuance)
    }
}
