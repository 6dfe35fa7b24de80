use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use hostbroker_app::AppContext;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

pub fn build_app(ctx: Arc<AppContext>, auth_token: Arc<String>) -> Router {
    let state = AppState::new(ctx, auth_token);

    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        // Scheduler-facing provisioning API
        .route("/templates", get(handlers::get_available_templates).put(handlers::put_template))
        .route("/requestMachines", post(handlers::request_machines))
        .route("/requestReturnMachines", post(handlers::request_return_machines))
        .route("/getRequestStatus", post(handlers::get_request_status))
        // Operator endpoints
        .route("/requests", get(handlers::list_requests))
        .route("/requests/:id/cancel", post(handlers::cancel_request))
        // Auth middleware applies to all routes above
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
