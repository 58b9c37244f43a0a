use crate::upfront::{
    challenge::{
        ChallengeAttempt, CreateChallengeRequest, CreateChallengeResponse, DefineChallengeRequest,
        DefineChallengeResponse, VerifyChallengeRequest, VerifyChallengeResponse,
    },
    error::ErrorBody,
    handlers::{challenge, health, purchase},
    store::{JobPost, Status},
};
use utoipa::OpenApi;

// Title, version, description, contact and license come from Cargo.toml.
#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        challenge::start_challenge,
        challenge::define_auth_challenge,
        challenge::create_auth_challenge,
        challenge::verify_auth_challenge,
        purchase::validate_purchase,
    ),
    components(schemas(
        health::Health,
        challenge::StartChallengeRequest,
        challenge::StartChallengeResponse,
        ChallengeAttempt,
        DefineChallengeRequest,
        DefineChallengeResponse,
        CreateChallengeRequest,
        CreateChallengeResponse,
        VerifyChallengeRequest,
        VerifyChallengeResponse,
        JobPost,
        Status,
        ErrorBody,
    )),
    tags(
        (name = "upfront", description = "Magic-link sign-in and purchase confirmation"),
        (name = "hooks", description = "Custom authentication challenge hooks"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route() {
        let doc = openapi();
        for path in [
            "/health",
            "/upfront/start-challenge",
            "/upfront/validate-purchase/{id}",
            "/hooks/define-auth-challenge",
            "/hooks/create-auth-challenge",
            "/hooks/verify-auth-challenge",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
    }
}
