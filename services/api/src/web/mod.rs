pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

pub use middleware::require_user;
pub use state::AppState;
pub use ws_handler::live_walk_handler;

/// Builds the API routes. CORS and the Swagger UI are layered on by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no caller id required)
    let public_routes = Router::new().route("/invites/{token}", get(rest::verify_invite_handler));

    // Protected routes (x-user-id required)
    let protected_routes = Router::new()
        .route("/families", post(rest::create_family_handler))
        .route("/families/me", get(rest::get_membership_handler))
        .route("/families/me/access", get(rest::get_access_handler))
        .route("/families/me/eligibility", get(rest::get_eligibility_handler))
        .route("/families/me/plan", put(rest::update_plan_handler))
        .route("/accounts/me", delete(rest::delete_account_handler))
        .route("/invites", post(rest::create_invite_handler))
        .route("/invites/{token}/accept", post(rest::accept_invite_handler))
        .route("/walks", get(rest::list_walks_handler))
        .route("/walks/stats", get(rest::walk_stats_handler))
        .route("/walks/ranking", get(rest::walk_ranking_handler))
        .route("/walks/{id}", delete(rest::delete_walk_handler))
        .route("/walks/live", get(live_walk_handler))
        .layer(axum_middleware::from_fn(require_user));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state)
}
