use axum::routing::{get, post};
use axum::{middleware, Router};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::web::handlers::{
    authenticate, check, create_user, delete_user, get_user, health, list_users, AppState,
};
use crate::web::middleware::correlation_id;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users", post(create_user).get(list_users))
        .route("/api/users/{id}", get(get_user).delete(delete_user))
        .route("/api/auth", post(authenticate))
        .route("/api/auth/check", get(check))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(correlation_id)),
        )
        .with_state(state)
}
