//! HTTP endpoints under `/api/v1/auth`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::{get, post},
};
use tracing::{info, warn};

use stretchroom_infrastructure::{
    ApiError, ApiResult, Authenticated, JwtClaims, JwtGenerator, JwtValidator, ProblemDetails,
    Valid, jwt::JwtError,
};

use crate::contracts::{GenerateTokenRequest, GenerateTokenResponse, routes};

#[derive(Debug, Clone)]
pub struct AuthState {
    pub generator: Arc<JwtGenerator>,
    pub validator: Arc<JwtValidator>,
}

/// Sign a token whose `nameid` is `user_name`.
pub fn issue_token(
    generator: &JwtGenerator,
    user_name: &str,
) -> Result<GenerateTokenResponse, JwtError> {
    let token = generator.generate(JwtClaims::for_user(user_name))?;
    Ok(GenerateTokenResponse { token })
}

pub fn router(state: AuthState) -> Router {
    Router::new()
        .route(&routes::auth_v1(routes::TOKEN), post(get_token))
        .route(&routes::auth_v1(routes::VALIDATE_TOKEN), post(validate_token))
        .route(&routes::auth_v1(routes::VALIDATE_AUTH), get(validate_auth))
        .with_state(state)
}

/// Handle POST /api/v1/auth/token.
async fn get_token(
    State(state): State<AuthState>,
    Valid(request): Valid<GenerateTokenRequest>,
) -> ApiResult<Json<GenerateTokenResponse>> {
    let response = issue_token(&state.generator, &request.user_name)
        .map_err(|e| ApiError::from_error(e, None))?;
    info!(user = %request.user_name, "token issued");
    Ok(Json(response))
}

fn not_authorized() -> ApiError {
    ApiError::new(
        ProblemDetails::from_status(StatusCode::FORBIDDEN)
            .with_title("Unauthorized")
            .with_detail("Not Authorized"),
    )
}

/// Handle POST /api/v1/auth/validate/token.
///
/// Only checks that the header holds a readable token naming a user; the
/// signature is not verified here.
async fn validate_token(State(state): State<AuthState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        warn!("validate token called without authorization header");
        return Err(not_authorized());
    };

    let claims = state.validator.read(value).ok_or_else(not_authorized)?;
    match claims.name_id() {
        Some(user) => {
            info!(user = %user, "token accepted");
            Ok(StatusCode::OK)
        }
        None => Err(not_authorized()),
    }
}

/// Handle GET /api/v1/auth/validate/auth.
async fn validate_auth(Authenticated(claims): Authenticated) -> StatusCode {
    info!(user = claims.name_id().unwrap_or("-"), "authenticated call");
    StatusCode::OK
}
