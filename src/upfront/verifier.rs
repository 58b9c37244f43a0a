//! Answer verification for the magic-link challenge.

use super::{clock, identity::normalize_email, token::TokenCodec};
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{info, instrument, warn};

/// Why an answer was refused; logged, never returned to the client.
#[derive(Debug, PartialEq, Eq)]
enum Rejection {
    NoPendingChallenge,
    AnswerMismatch,
    Undecodable,
    SubjectMismatch,
    Expired,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NoPendingChallenge => "no pending challenge",
            Self::AnswerMismatch => "answer does not match the pending challenge",
            Self::Undecodable => "token could not be decoded",
            Self::SubjectMismatch => "token subject does not match the user",
            Self::Expired => "token expired",
        };
        f.write_str(reason)
    }
}

/// Stateless: a function of its inputs, the current time and the shared key.
#[derive(Clone)]
pub struct ChallengeVerifier {
    codec: TokenCodec,
}

impl ChallengeVerifier {
    #[must_use]
    pub fn new(codec: TokenCodec) -> Self {
        Self { codec }
    }

    pub async fn verify(&self, submitted: &str, expected: &str, subject_email: &str) -> bool {
        self.verify_at(submitted, expected, subject_email, clock::now())
            .await
    }

    #[instrument(skip(self, submitted, expected))]
    pub async fn verify_at(
        &self,
        submitted: &str,
        expected: &str,
        subject_email: &str,
        now: DateTime<Utc>,
    ) -> bool {
        match self.check(submitted, expected, subject_email, now).await {
            Ok(()) => {
                info!("challenge answer accepted");
                true
            }
            Err(rejection) => {
                warn!(reason = %rejection, "challenge answer rejected");
                false
            }
        }
    }

    async fn check(
        &self,
        submitted: &str,
        expected: &str,
        subject_email: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        if expected.is_empty() {
            return Err(Rejection::NoPendingChallenge);
        }

        // Compared before decoding so a tampered link never reaches the key service.
        if submitted != expected {
            return Err(Rejection::AnswerMismatch);
        }

        let claim = self
            .codec
            .decode(submitted)
            .await
            .map_err(|err| {
                info!(error = %err, "failed to decode challenge answer");
                Rejection::Undecodable
            })?;

        if normalize_email(&claim.subject) != normalize_email(subject_email) {
            return Err(Rejection::SubjectMismatch);
        }

        if claim.is_expired_at(&now) {
            return Err(Rejection::Expired);
        }

        Ok(())
    }
}
