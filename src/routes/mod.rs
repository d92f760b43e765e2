use axum::{routing::get, Router};

use crate::state::AppState;

pub mod database;
pub mod health;

/// Health and store diagnostics.
pub fn system_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/database/status", get(database::status))
}
