use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::account_service::{
    AccountResponse, AccountService, AuthRequest, CreateAccountRequest, ServiceError,
};
use crate::infrastructure::auth::JwtTokenService;
use crate::web::middleware::CorrelationId;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AccountService>,
    pub tokens: Arc<JwtTokenService>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

pub(crate) fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::EmailAlreadyExists | ServiceError::Conflict { .. } => StatusCode::CONFLICT,
        ServiceError::NotFound => StatusCode::NOT_FOUND,
        ServiceError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        ServiceError::InactiveAccount => StatusCode::FORBIDDEN,
        ServiceError::Store(_) | ServiceError::ReadModel(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub user: AccountResponse,
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub user_id: Uuid,
    pub correlation_id: String,
}

/// Accepted rather than Created: the read model catches up asynchronously.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.service.create_account(request, &correlation_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CreatedResponse {
            user,
            correlation_id,
        }),
    ))
}

pub async fn authenticate(
    State(state): State<AppState>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    headers: HeaderMap,
    Json(request): Json<AuthRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let device = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let response = state
        .service
        .authenticate(request, &ip, &device, &correlation_id)
        .await?;
    Ok(Json(response))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.service.get_account(id).await?;
    Ok(Json(user))
}

pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let users = state.service.list_accounts().await?;
    Ok(Json(users))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.remove_account(id, &correlation_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DeletedResponse {
            user_id: id,
            correlation_id,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// Echoes back the identity carried by a bearer token.
pub async fn check(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = state
        .tokens
        .validate_token(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    Ok(Json(CheckResponse {
        id: claims.sub,
        name: claims.name,
        email: claims.email,
        role: claims.role,
    }))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_store::EventStoreError;

    #[test]
    fn service_errors_map_to_the_documented_status_codes() {
        assert_eq!(
            status_for(&ServiceError::Validation("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ServiceError::EmailAlreadyExists),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&ServiceError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&ServiceError::InvalidCredentials),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&ServiceError::InactiveAccount),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&ServiceError::Conflict {
                aggregate_id: Uuid::new_v4(),
                expected: 1,
                actual: 2
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ServiceError::Store(EventStoreError::ConcurrencyConflict {
                aggregate_id: Uuid::new_v4(),
                expected: 0,
                actual: 1
            })),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
