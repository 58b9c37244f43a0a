use super::reject;
use crate::upfront::{AppState, ErrorBody, store::JobPost};
use axum::{
    Json,
    extract::{Extension, Path},
    response::{IntoResponse, Response},
};
use tracing::instrument;

#[utoipa::path(
    get,
    path = "/upfront/validate-purchase/{id}",
    params(("id" = String, Path, description = "Job id, `[A-Za-z0-9_-]{1,128}`")),
    responses (
        (status = 200, description = "Job post is active and its owner has an account", body = JobPost),
        (status = 400, description = "Invalid job id", body = ErrorBody),
        (status = 402, description = "Checkout session not paid", body = ErrorBody),
        (status = 404, description = "Job post not found", body = ErrorBody),
        (status = 409, description = "Job post cannot be activated", body = ErrorBody),
        (status = 500, description = "Job post active, account provisioning incomplete", body = ErrorBody),
        (status = 503, description = "Upstream service unavailable", body = ErrorBody),
    ),
    tag = "upfront",
)]
/// Confirm payment for a job post, activate it and provision its owner.
#[instrument(skip(state))]
pub async fn validate_purchase(
    Extension(state): Extension<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.provisioner.confirm_purchase(&id).await {
        Ok(post) => Json(post).into_response(),
        Err(err) => reject(err),
    }
}
