use super::reject;
use crate::upfront::{
    AppState, ErrorBody,
    challenge::{
        CreateChallengeRequest, CreateChallengeResponse, DefineChallengeRequest,
        DefineChallengeResponse, VerifyChallengeRequest, VerifyChallengeResponse,
    },
    error::Error,
};
use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StartChallengeRequest {
    email: String,
    request_origin: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartChallengeResponse {
    challenge_started: bool,
    jobs_found: bool,
    provider_write_ok: bool,
    email_send_ok: bool,
}

#[utoipa::path(
    post,
    path = "/upfront/start-challenge",
    request_body = StartChallengeRequest,
    responses (
        (status = 201, description = "Magic link sent", body = StartChallengeResponse),
        (status = 400, description = "Invalid email or request origin", body = ErrorBody),
        (status = 401, description = "Request origin not allowed", body = ErrorBody),
        (status = 404, description = "No job posts for this email, or no account yet (ErrorBody)", body = StartChallengeResponse),
        (status = 503, description = "Link could not be issued, retry", body = StartChallengeResponse),
    ),
    tag = "upfront",
)]
/// Email a magic link to the owner of at least one job post.
#[instrument(skip(state, payload))]
pub async fn start_challenge(
    Extension(state): Extension<AppState>,
    payload: Option<Json<StartChallengeRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return reject(Error::Validation("missing payload".to_string()));
    };

    let issuance = match state
        .issuer
        .start_challenge(&request.email, &request.request_origin)
        .await
    {
        Ok(issuance) => issuance,
        Err(err) => return reject(err),
    };

    let status = if !issuance.resources_found {
        StatusCode::NOT_FOUND
    } else if issuance.challenge_started() {
        StatusCode::CREATED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = StartChallengeResponse {
        challenge_started: issuance.challenge_started(),
        jobs_found: issuance.resources_found,
        provider_write_ok: issuance.provider_write_ok,
        email_send_ok: issuance.email_send_ok,
    };

    (status, Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/hooks/define-auth-challenge",
    request_body = DefineChallengeRequest,
    responses (
        (status = 200, description = "Next step of the sign-in session", body = DefineChallengeResponse),
    ),
    tag = "hooks",
)]
pub async fn define_auth_challenge(
    Extension(state): Extension<AppState>,
    Json(request): Json<DefineChallengeRequest>,
) -> Json<DefineChallengeResponse> {
    Json(state.hooks.on_define_challenge(&request).await)
}

#[utoipa::path(
    post,
    path = "/hooks/create-auth-challenge",
    request_body = CreateChallengeRequest,
    responses (
        (status = 200, description = "Challenge parameters", body = CreateChallengeResponse),
    ),
    tag = "hooks",
)]
pub async fn create_auth_challenge(
    Extension(state): Extension<AppState>,
    Json(request): Json<CreateChallengeRequest>,
) -> Json<CreateChallengeResponse> {
    Json(state.hooks.on_create_challenge(&request).await)
}

#[utoipa::path(
    post,
    path = "/hooks/verify-auth-challenge",
    request_body = VerifyChallengeRequest,
    responses (
        (status = 200, description = "Whether the submitted answer is correct", body = VerifyChallengeResponse),
    ),
    tag = "hooks",
)]
pub async fn verify_auth_challenge(
    Extension(state): Extension<AppState>,
    Json(request): Json<VerifyChallengeRequest>,
) -> Json<VerifyChallengeResponse> {
    Json(state.hooks.on_verify_challenge(&request).await)
}
