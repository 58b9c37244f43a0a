pub mod challenge;
pub use self::challenge::{
    create_auth_challenge, define_auth_challenge, start_challenge, verify_auth_challenge,
};

pub mod health;
pub use self::health::health;

pub mod purchase;
pub use self::purchase::validate_purchase;

// common functions for the handlers
use crate::upfront::Error;
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

/// Log an error with its full cause chain, then turn it into its response.
pub(crate) fn reject(err: Error) -> Response {
    if err.status_code().is_server_error() {
        error!(retryable = err.is_retryable(), "{err:#}");
    } else {
        info!("{err}");
    }
    err.into_response()
}
