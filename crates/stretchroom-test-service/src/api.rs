//! HTTP endpoints under `/api/v1/test` and `/api/v2/testv2`.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Query, State},
    http::{StatusCode, request::Parts},
    routing::{get, post},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;

use stretchroom_auth_service::client::AuthServiceClient;
use stretchroom_auth_service::contracts::{GenerateTokenRequest, GenerateTokenResponse};
use stretchroom_infrastructure::{ApiError, ApiResult, CommandExecutor, ProblemDetails, Valid};

use crate::commands::{
    AddEntityContext, AddEntityResult, DeleteElementContext, DeleteElementResult,
    GetEntitiesContext, GetEntitiesResult, UpdateEntityContext, UpdateEntityResult,
};
use crate::contracts::{
    ChangeNameRequest, CommandResultResponse, EntityResponseDto, NameQuery, SomeBodyRequest,
    SomeBodyResponse, TOKEN_USER, ValueQuery, routes,
};

#[derive(Debug, Clone)]
pub struct TestState {
    pub executor: CommandExecutor,
    /// Absent when no auth service is configured; the token routes then
    /// answer 503.
    pub auth: Option<AuthServiceClient>,
}

impl TestState {
    fn auth(&self) -> ApiResult<&AuthServiceClient> {
        self.auth.as_ref().ok_or_else(|| {
            ApiError::new(
                ProblemDetails::from_status(StatusCode::SERVICE_UNAVAILABLE)
                    .with_detail("Auth service is not configured"),
            )
        })
    }
}

/// Cancellation scoped to one request.
///
/// The token is cancelled once the handler future is dropped, which is what
/// happens when the client goes away mid-request.
pub struct RequestToken {
    token: CancellationToken,
    _guard: DropGuard,
}

impl RequestToken {
    pub fn new() -> Self {
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();
        Self {
            token,
            _guard: guard,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Default for RequestToken {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> FromRequestParts<S> for RequestToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::new())
    }
}

pub fn router(state: TestState) -> Router {
    Router::new()
        .route(&routes::test_v1(routes::OK), get(ok))
        .route(&routes::test_v1(routes::JSON), get(json))
        .route(&routes::test_v1(routes::EXCEPTION), get(exception))
        .route(&routes::test_v1(routes::BODY), post(body))
        .route(&routes::test_v1(routes::QUERY), get(query))
        .route(
            &routes::test_v1(routes::COMMAND),
            get(get_entities)
                .post(add_entity)
                .put(update_entity)
                .delete(delete_entity),
        )
        .route(&routes::test_v1(routes::TOKEN), get(token))
        .route(&routes::test_v1(routes::VALIDATE_TOKEN), get(validate_token))
        .route(&routes::test_v1(routes::VALIDATE_AUTH), get(validate_auth))
        .route(routes::TEST_V2, get(ok))
        .with_state(state)
}

async fn ok() -> StatusCode {
    StatusCode::OK
}

async fn json() -> Json<SomeBodyResponse> {
    Json(SomeBodyResponse {
        message: "ok".to_string(),
    })
}

async fn exception() -> ApiResult<StatusCode> {
    Err(ApiError::from_error("Test", None))
}

async fn body(Valid(request): Valid<SomeBodyRequest>) -> Json<SomeBodyResponse> {
    Json(SomeBodyResponse {
        message: request.message,
    })
}

async fn query(Query(query): Query<ValueQuery>) -> Json<SomeBodyResponse> {
    Json(SomeBodyResponse {
        message: query.value.to_string(),
    })
}

/// Handle POST /api/v1/test/command?name=.
async fn add_entity(
    State(state): State<TestState>,
    cancel: RequestToken,
    Query(query): Query<NameQuery>,
) -> ApiResult<Json<CommandResultResponse>> {
    let result: AddEntityResult = state
        .executor
        .execute_scoped(AddEntityContext { name: query.name }, cancel.token())
        .await?;
    info!(id = result.id, "entity created");
    Ok(Json(CommandResultResponse {
        entities: vec![EntityResponseDto {
            id: result.id,
            name: result.name,
        }],
    }))
}

/// Handle GET /api/v1/test/command.
async fn get_entities(
    State(state): State<TestState>,
    cancel: RequestToken,
) -> ApiResult<Json<CommandResultResponse>> {
    let result: GetEntitiesResult = state
        .executor
        .execute_scoped(GetEntitiesContext, cancel.token())
        .await?;
    Ok(Json(CommandResultResponse {
        entities: result.entities.into_iter().map(Into::into).collect(),
    }))
}

/// Handle DELETE /api/v1/test/command?name=.
async fn delete_entity(
    State(state): State<TestState>,
    cancel: RequestToken,
    Query(query): Query<NameQuery>,
) -> ApiResult<StatusCode> {
    let result: DeleteElementResult = state
        .executor
        .execute_scoped(DeleteElementContext { name: query.name }, cancel.token())
        .await?;
    if !result.success {
        return Err(ApiError::not_found("Element not found"));
    }
    Ok(StatusCode::OK)
}

/// Handle PUT /api/v1/test/command?name=.
async fn update_entity(
    State(state): State<TestState>,
    cancel: RequestToken,
    Query(query): Query<NameQuery>,
    Valid(request): Valid<ChangeNameRequest>,
) -> ApiResult<StatusCode> {
    let context = UpdateEntityContext {
        current_name: query.name,
        new_name: request.new_name,
    };
    let _: UpdateEntityResult = state
        .executor
        .execute_scoped(context, cancel.token())
        .await?;
    Ok(StatusCode::OK)
}

async fn token(State(state): State<TestState>) -> ApiResult<Json<GenerateTokenResponse>> {
    let response = state
        .auth()?
        .generate_token(&GenerateTokenRequest::new(TOKEN_USER))
        .await?;
    Ok(Json(response))
}

/// The caller's `Authorization` is forwarded by the auth client.
async fn validate_token(State(state): State<TestState>) -> ApiResult<StatusCode> {
    state.auth()?.validate_token().await?;
    Ok(StatusCode::OK)
}

async fn validate_auth(State(state): State<TestState>) -> ApiResult<StatusCode> {
    state.auth()?.validate_auth().await?;
    Ok(StatusCode::OK)
}
