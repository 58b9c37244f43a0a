//! Outbound email delivery.
//!
//! Magic links are sent inline while the sign-in request is being served; there
//! is no outbox, so a failed send is reported back to the caller who can simply
//! ask for a new link. `LogEmailSender` is the default for local development.
//! `HttpEmailSender` posts to a transactional-mail HTTP API.

use crate::APP_USER_AGENT;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{Instrument, info, info_span, instrument};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub from_email: String,
    pub to_email: String,
    pub subject: String,
    pub html_body: String,
}

/// Email delivery abstraction.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error if it was not accepted.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            from_email = %message.from_email,
            to_email = %message.to_email,
            subject = %message.subject,
            body = %message.html_body,
            "email send stub"
        );
        Ok(())
    }
}

/// Sender for JSON mail APIs (`{from, to, subject, html}` with a bearer token).
#[derive(Clone)]
pub struct HttpEmailSender {
    client: Client,
    api_url: String,
    api_token: SecretString,
}

impl HttpEmailSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: String, api_token: SecretString) -> Result<Self> {
        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
        Ok(Self {
            client,
            api_url,
            api_token,
        })
    }
}

impl std::fmt::Debug for HttpEmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmailSender")
            .field("api_url", &self.api_url)
            .field("api_token", &"***")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    #[instrument(skip(self, message), fields(to_email = %message.to_email))]
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let payload = json!({
            "from": message.from_email,
            "to": [message.to_email],
            "subject": message.subject,
            "html": message.html_body,
        });

        let span = info_span!("email.send", http.method = "POST", url = %self.api_url);
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_token.expose_secret())
            .json(&payload)
            .send()
            .instrument(span)
            .await
            .context("failed to reach mail API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("mail API rejected message: {status} {body}"));
        }

        Ok(())
    }
}
