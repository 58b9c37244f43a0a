//! Custom authentication challenge: the per-attempt state machine and the
//! three identity-provider hooks that drive it.
//!
//! The wire types use the provider's camelCase field names so the hook
//! endpoints can be registered as-is.

use super::{
    identity::{CHALLENGE_ATTRIBUTE, EMAIL_ATTRIBUTE},
    verifier::ChallengeVerifier,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use utoipa::ToSchema;

pub const CUSTOM_CHALLENGE: &str = "CUSTOM_CHALLENGE";

/// Key of the expected answer in the private challenge parameters.
pub const PRIVATE_CHALLENGE_KEY: &str = "challenge";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeState {
    NoSession,
    ChallengeIssued,
    Succeeded,
    Failed,
}

impl ChallengeState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeDecision {
    IssueChallenge,
    Succeed,
    Fail,
}

impl ChallengeDecision {
    #[must_use]
    pub fn next_state(self) -> ChallengeState {
        match self {
            Self::IssueChallenge => ChallengeState::ChallengeIssued,
            Self::Succeed => ChallengeState::Succeeded,
            Self::Fail => ChallengeState::Failed,
        }
    }
}

/// One prior attempt of the current sign-in session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeAttempt {
    #[serde(default)]
    pub challenge_name: String,
    pub challenge_result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_metadata: Option<String>,
}

/// Decide the next step of a sign-in session from its attempt history.
///
/// Only the last attempt counts and there is a single attempt per session:
/// a wrong or expired answer fails the session and the user has to request a
/// new link.
#[must_use]
pub fn decide(user_not_found: bool, session: &[ChallengeAttempt]) -> ChallengeDecision {
    if user_not_found {
        return ChallengeDecision::Fail;
    }

    match session.last() {
        None => ChallengeDecision::IssueChallenge,
        Some(attempt) if attempt.challenge_result => ChallengeDecision::Succeed,
        Some(_) => ChallengeDecision::Fail,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefineChallengeRequest {
    #[serde(default)]
    pub user_attributes: HashMap<String, String>,
    #[serde(default)]
    pub user_not_found: bool,
    #[serde(default)]
    pub session: Vec<ChallengeAttempt>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefineChallengeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_name: Option<String>,
    pub issue_tokens: bool,
    pub fail_authentication: bool,
}

impl From<ChallengeDecision> for DefineChallengeResponse {
    fn from(decision: ChallengeDecision) -> Self {
        match decision {
            ChallengeDecision::IssueChallenge => Self {
                challenge_name: Some(CUSTOM_CHALLENGE.to_string()),
                issue_tokens: false,
                fail_authentication: false,
            },
            ChallengeDecision::Succeed => Self {
                challenge_name: None,
                issue_tokens: true,
                fail_authentication: false,
            },
            ChallengeDecision::Fail => Self {
                challenge_name: None,
                issue_tokens: false,
                fail_authentication: true,
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChallengeRequest {
    #[serde(default)]
    pub user_attributes: HashMap<String, String>,
    #[serde(default)]
    pub challenge_name: String,
    #[serde(default)]
    pub session: Vec<ChallengeAttempt>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChallengeResponse {
    /// Sent to the client: only the email, never the token.
    pub public_challenge_parameters: HashMap<String, String>,
    pub private_challenge_parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_metadata: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyChallengeRequest {
    #[serde(default)]
    pub user_attributes: HashMap<String, String>,
    #[serde(default)]
    pub private_challenge_parameters: HashMap<String, String>,
    #[serde(default)]
    pub challenge_answer: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyChallengeResponse {
    pub answer_correct: bool,
}

/// The identity provider's three extension points of a custom challenge.
#[async_trait]
pub trait ChallengeHooks: Send + Sync {
    /// Decide the next step from the attempt history.
    async fn on_define_challenge(&self, request: &DefineChallengeRequest) -> DefineChallengeResponse;

    /// Populate the public and private challenge parameters.
    async fn on_create_challenge(&self, request: &CreateChallengeRequest) -> CreateChallengeResponse;

    /// Check the submitted answer against the expected one.
    async fn on_verify_challenge(&self, request: &VerifyChallengeRequest) -> VerifyChallengeResponse;
}

/// Magic-link implementation of [`ChallengeHooks`].
///
/// The expected answer is the token the issuer stored on the user; the
/// answer the client submits is the token from the link.
#[derive(Clone)]
pub struct MagicLinkHooks {
    verifier: ChallengeVerifier,
}

impl MagicLinkHooks {
    #[must_use]
    pub fn new(verifier: ChallengeVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl ChallengeHooks for MagicLinkHooks {
    async fn on_define_challenge(&self, request: &DefineChallengeRequest) -> DefineChallengeResponse {
        let decision = decide(request.user_not_found, &request.session);

        debug!(
            attempts = request.session.len(),
            user_not_found = request.user_not_found,
            next_state = ?decision.next_state(),
            "define auth challenge"
        );

        decision.into()
    }

    async fn on_create_challenge(&self, request: &CreateChallengeRequest) -> CreateChallengeResponse {
        let email = request
            .user_attributes
            .get(EMAIL_ATTRIBUTE)
            .cloned()
            .unwrap_or_default();
        let challenge = request
            .user_attributes
            .get(CHALLENGE_ATTRIBUTE)
            .cloned()
            .unwrap_or_default();

        if challenge.is_empty() {
            info!(email = %email, "no pending magic link for user");
        }

        CreateChallengeResponse {
            public_challenge_parameters: HashMap::from([(EMAIL_ATTRIBUTE.to_string(), email)]),
            private_challenge_parameters: HashMap::from([(
                PRIVATE_CHALLENGE_KEY.to_string(),
                challenge,
            )]),
            challenge_metadata: None,
        }
    }

    async fn on_verify_challenge(&self, request: &VerifyChallengeRequest) -> VerifyChallengeResponse {
        let expected = request
            .private_challenge_parameters
            .get(PRIVATE_CHALLENGE_KEY)
            .map(String::as_str)
            .unwrap_or_default();
        let email = request
            .user_attributes
            .get(EMAIL_ATTRIBUTE)
            .map(String::as_str)
            .unwrap_or_default();

        VerifyChallengeResponse {
            answer_correct: self
                .verifier
                .verify(&request.challenge_answer, expected, email)
                .await,
        }
    }
}
