use crate::state::AppState;
use axum::Router;

pub mod bootstrap;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod session;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::setup_routes())
        .merge(handlers::session_routes())
}
