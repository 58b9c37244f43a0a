//! Error taxonomy shared by the issuer, verifier and provisioner.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;

/// External collaborator that failed while serving a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upstream {
    KeyService,
    ResourceStore,
    IdentityProvider,
    PaymentService,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::KeyService => "key service",
            Self::ResourceStore => "resource store",
            Self::IdentityProvider => "identity provider",
            Self::PaymentService => "payment service",
        };
        f.write_str(name)
    }
}

/// JSON body of every error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{service} unavailable: {source}")]
    Upstream {
        service: Upstream,
        #[source]
        source: anyhow::Error,
    },
    #[error("conflicting write on {0}")]
    Conflict(String),
    #[error("request rejected")]
    SecurityRejection,
    #[error("checkout session not paid")]
    PaymentRequired,
    #[error("resource {resource_id} is active but account provisioning for {owner_email} failed: {source}")]
    PartialProvisioning {
        resource_id: String,
        owner_email: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl Error {
    pub(crate) fn upstream(service: Upstream, source: anyhow::Error) -> Self {
        Self::Upstream { service, source }
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// Conflicts are retryable after re-fetching; partial provisioning is
    /// retried through the provisioning-only path.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::Conflict(_) | Self::PartialProvisioning { .. }
        )
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::SecurityRejection => StatusCode::UNAUTHORIZED,
            Self::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            Self::PartialProvisioning { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    // Upstream details and security rejection reasons stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Validation(_) | Self::NotFound(_) | Self::Conflict(_) => self.to_string(),
            Self::Upstream { service, .. } => format!("{service} unavailable"),
            Self::SecurityRejection => "request rejected".to_string(),
            Self::PaymentRequired => "checkout session not paid".to_string(),
            Self::PartialProvisioning { .. } => "account provisioning incomplete".to_string(),
            Self::Internal(_) => "internal error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.public_message(),
            retryable: self.is_retryable(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
