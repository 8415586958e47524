use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Admin Router Module
///
/// Defines the routes exclusively accessible to authenticated operators.
///
/// Access Control:
/// This entire router is wrapped in a middleware layer that authenticates the
/// request (the `AuthUser` extractor). Capability-level authorization (which
/// role may trigger which privileged action) is enforced by the permission
/// policy inside the workflow, so denials are both rejected and audited.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/auth/check
        // The inbound authorization check: resolved principal plus the
        // capability set implied by its role.
        .route("/auth/check", get(handlers::auth_check))
        // POST /admin/payments/{payment_id}/verify
        // Manual payment-verification trigger. Requires `manage_payments`;
        // idempotent on already-verified ids.
        .route(
            "/payments/{payment_id}/verify",
            post(handlers::verify_payment),
        )
        // PUT /admin/users/{user_id}/plan
        // Administrative plan override, audited separately from
        // gateway-driven upgrades.
        .route("/users/{user_id}/plan", put(handlers::override_plan))
}
