pub mod auth;
pub mod error;
pub mod listings;
pub mod messages;
pub mod middleware;
pub mod reviews;
pub mod safety;
pub mod threads;
pub mod users;
pub mod ws;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};

use mercat_db::Database;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// Runs a database call on the blocking pool.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    Ok(tokio::task::spawn_blocking(move || f(db.as_ref())).await??)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// All HTTP and WebSocket routes. Layers such as CORS and tracing are added
/// by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/listings", get(listings::list_listings))
        .route("/listings/{id}", get(listings::get_listing))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}/reviews", get(reviews::list_reviews))
        .route("/safety/scan", post(safety::scan))
        .route("/gateway", get(ws::ws_upgrade))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/me", get(users::me))
        .route("/listings", post(listings::create_listing))
        .route("/listings/{id}/status", put(listings::update_listing_status))
        .route("/threads", post(threads::open_thread))
        .route("/threads", get(threads::list_threads))
        .route("/threads/{id}/messages", get(messages::get_messages))
        .route("/threads/{id}/messages", post(messages::send_message))
        .route("/users/{id}/reviews", post(reviews::create_review))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
