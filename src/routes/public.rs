use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Defines endpoints reachable without an admin session. Nothing here touches
/// privileged state without its own check: the login exchange authenticates
/// by credentials, and the gateway callback authenticates by the shared
/// callback secret before the workflow runs.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // A simple, unauthenticated endpoint used for monitoring and load
        // balancer checks.
        .route("/health", get(|| async { "ok" }))
        // POST /admin/login
        // The email/password credential exchange. Returns a signed bearer
        // token and the resolved principal.
        .route("/admin/login", post(handlers::login))
        // POST /payments/gateway/callback
        // The payment gateway's confirmation callback (automatic trigger).
        // Guarded by the x-gateway-signature shared secret inside the handler.
        .route(
            "/payments/gateway/callback",
            post(handlers::gateway_callback),
        )
}
