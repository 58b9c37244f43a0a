//! Checkout-session lookups against the payment processor.

use crate::APP_USER_AGENT;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{Instrument, error, info_span, instrument};

pub const DEFAULT_STRIPE_API_URL: &str = "https://api.stripe.com";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub payment_status: PaymentStatus,
}

impl CheckoutSession {
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn checkout_session(&self, session_id: &str) -> Result<CheckoutSession>;
}

/// [`PaymentGateway`] for the Stripe Checkout API.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    api_url: String,
    secret_key: SecretString,
}

impl StripeGateway {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: &str, secret_key: SecretString) -> Result<Self> {
        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_url", &self.api_url)
            .field("secret_key", &"***")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self))]
    async fn checkout_session(&self, session_id: &str) -> Result<CheckoutSession> {
        let url = format!("{}/v1/checkout/sessions/{session_id}", self.api_url);

        let span = info_span!("stripe.checkout_session", http.method = "GET", url = %url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .instrument(span)
            .await
            .context("failed to reach payment processor")?;

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or(Value::Null);
            let message = json_response
                .get("error")
                .and_then(|v| v.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default();

            error!("Failed to retrieve checkout session: {status} {message}");

            return Err(anyhow!("{status}, {message}"));
        }

        response
            .json::<CheckoutSession>()
            .await
            .context("invalid checkout session response")
    }
}
