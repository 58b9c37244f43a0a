//! Magic-link token codec.
//!
//! A token is the JSON form of an [`IdentityClaim`], encrypted by the
//! [`KeyService`] and base64 encoded (standard alphabet, padded). The codec
//! holds no state beyond its key-service handle.

use super::{clock, keys::KeyService};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

/// Subject and expiry asserted by a magic-link token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityClaim {
    #[serde(rename = "email")]
    pub subject: String,
    #[serde(rename = "expiration", with = "clock::rfc3339_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl IdentityClaim {
    #[must_use]
    pub fn new(subject: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            subject,
            expires_at,
        }
    }

    /// Valid up to and including the expiry second.
    #[must_use]
    pub fn is_expired_at(&self, now: &DateTime<Utc>) -> bool {
        clock::format_timestamp(now) > clock::format_timestamp(&self.expires_at)
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("key service failed to encrypt the claim: {0}")]
    Encryption(#[source] anyhow::Error),
    #[error("claim could not be serialized: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("token is not valid base64")]
    Decode,
    #[error("token could not be decrypted: {0}")]
    Decryption(#[source] anyhow::Error),
    #[error("decrypted token is not a valid claim: {0}")]
    MalformedClaim(#[source] serde_json::Error),
}

#[derive(Clone)]
pub struct TokenCodec {
    keys: Arc<dyn KeyService>,
}

impl TokenCodec {
    #[must_use]
    pub fn new(keys: Arc<dyn KeyService>) -> Self {
        Self { keys }
    }

    /// Serialize, encrypt and base64-encode a claim.
    ///
    /// # Errors
    /// [`TokenError::Encryption`] when the key service is unavailable,
    /// [`TokenError::Serialization`] if the claim cannot be serialized.
    #[instrument(skip(self, claim))]
    pub async fn encode(&self, claim: &IdentityClaim) -> Result<String, TokenError> {
        let plaintext = serde_json::to_vec(claim).map_err(TokenError::Serialization)?;
        let ciphertext = self
            .keys
            .encrypt(&plaintext)
            .await
            .map_err(TokenError::Encryption)?;
        Ok(Base64::encode_string(&ciphertext))
    }

    /// Reverse of [`TokenCodec::encode`].
    ///
    /// # Errors
    /// [`TokenError::Decode`], [`TokenError::Decryption`] or
    /// [`TokenError::MalformedClaim`]; callers treat all three as a rejected answer.
    #[instrument(skip(self, token))]
    pub async fn decode(&self, token: &str) -> Result<IdentityClaim, TokenError> {
        let ciphertext = Base64::decode_vec(token.trim()).map_err(|_| TokenError::Decode)?;
        let plaintext = self
            .keys
            .decrypt(&ciphertext)
            .await
            .map_err(TokenError::Decryption)?;
        let claim: IdentityClaim =
            serde_json::from_slice(&plaintext).map_err(TokenError::MalformedClaim)?;

        debug!(expires_at = %clock::format_timestamp(&claim.expires_at), "token decoded");

        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upfront::test_support::FakeKeyService;
    use anyhow::Result;
    use chrono::Duration;

    fn codec() -> (TokenCodec, Arc<FakeKeyService>) {
        let keys = Arc::new(FakeKeyService::new("magic-link"));
        (TokenCodec::new(keys.clone()), keys)
    }

    fn claim() -> IdentityClaim {
        IdentityClaim::new(
            "recruiter@example.com".to_string(),
            clock::now() + Duration::minutes(10),
        )
    }

    #[tokio::test]
    async fn encode_then_decode_returns_the_claim() -> Result<()> {
        let (codec, _) = codec();
        let claim = claim();

        let token = codec.encode(&claim).await?;

        assert_eq!(codec.decode(&token).await?, claim);
        Ok(())
    }

    #[test]
    fn claim_serializes_with_wire_names() -> Result<()> {
        let claim = IdentityClaim::new(
            "a@b.co".to_string(),
            clock::parse_timestamp("2026-01-02T03:04:05Z").unwrap_or_default(),
        );
        assert_eq!(
            serde_json::to_string(&claim)?,
            r#"{"email":"a@b.co","expiration":"2026-01-02T03:04:05Z"}"#
        );
        Ok(())
    }

    #[tokio::test]
    async fn bad_base64_is_a_decode_error() {
        let (codec, keys) = codec();

        let result = codec.decode("not base64 at all!").await;

        assert!(matches!(result, Err(TokenError::Decode)));
        assert_eq!(keys.decrypt_calls(), 0);
    }

    #[tokio::test]
    async fn foreign_ciphertext_is_a_decryption_error() {
        let (codec, _) = codec();
        let forged = Base64::encode_string(b"forged-ciphertext");

        let result = codec.decode(&forged).await;

        assert!(matches!(result, Err(TokenError::Decryption(_))));
    }

    #[tokio::test]
    async fn token_from_another_key_is_rejected() -> Result<()> {
        let (codec, _) = codec();
        let other = TokenCodec::new(Arc::new(FakeKeyService::new("rotated-key")));

        let token = other.encode(&claim()).await?;

        assert!(matches!(
            codec.decode(&token).await,
            Err(TokenError::Decryption(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn valid_plaintext_with_wrong_shape_is_malformed() -> Result<()> {
        let (codec, keys) = codec();
        for plaintext in [
            br#"{"email":"a@b.co"}"#.as_slice(),
            br#"{"email":"a@b.co","expiration":"tomorrow"}"#.as_slice(),
            br#"{"email":"a@b.co","expiration":"2026-01-02T03:04:05Z","admin":true}"#.as_slice(),
            b"[]".as_slice(),
        ] {
            let ciphertext = keys.encrypt(plaintext).await?;
            let token = Base64::encode_string(&ciphertext);

            assert!(matches!(
                codec.decode(&token).await,
                Err(TokenError::MalformedClaim(_))
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn key_service_outage_is_an_encryption_error() {
        let (codec, keys) = codec();
        keys.set_unavailable(true);

        assert!(matches!(
            codec.encode(&claim()).await,
            Err(TokenError::Encryption(_))
        ));
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = clock::now();
        let claim = IdentityClaim::new("a@b.co".to_string(), now);

        assert!(!claim.is_expired_at(&now));
        assert!(claim.is_expired_at(&(now + Duration::seconds(1))));
    }
}
