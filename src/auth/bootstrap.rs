use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{error::AppError, state::AppState};

/// Paths served while no user exists yet.
fn reachable_before_setup(path: &str) -> bool {
    matches!(path, "/setup" | "/webhook/email" | "/health")
}

/// Sends every request to `/setup` until the first admin has been created.
pub async fn bootstrap_gate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if reachable_before_setup(req.uri().path()) {
        return next.run(req).await;
    }
    match state.is_bootstrapped().await {
        Ok(true) => next.run(req).await,
        Ok(false) => Redirect::to("/setup").into_response(),
        Err(e) => AppError::Internal(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_setup_webhook_and_health_skip_the_gate() {
        assert!(reachable_before_setup("/setup"));
        assert!(reachable_before_setup("/webhook/email"));
        assert!(reachable_before_setup("/health"));
        assert!(!reachable_before_setup("/"));
        assert!(!reachable_before_setup("/login"));
        assert!(!reachable_before_setup("/setup/extra"));
    }
}
