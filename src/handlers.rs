use crate::{
    AppState, auth,
    auth::AuthUser,
    error::{AuthRejection, WorkflowError},
    models::{
        AuthCheckResponse, GatewayCallbackRequest, LoginRequest, LoginResponse,
        OverridePlanRequest, OverridePlanResponse, VerifyPaymentResponse,
    },
    policy,
    workflow::VerificationOutcome,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

/// Client origin for audit entries: the forwarded address when a proxy
/// supplies one, otherwise "unknown".
fn client_origin(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// --- Handlers ---

/// login
///
/// [Public Route] The email/password credential exchange. On an exact match
/// against the admin registry (salted-hash comparison), returns a signed
/// bearer token plus the resolved principal.
///
/// *Note*: every failure (unknown email, wrong password, unknown role) maps
/// to the same generic 401 so the endpoint does not leak which part failed.
#[utoipa::path(
    post,
    path = "/admin/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Response {
    match auth::verify_credentials(&state.repo, &payload.email, &payload.password).await {
        Some(user) => match auth::issue_token(&state.config, user.id) {
            Ok(token) => Json(LoginResponse {
                token,
                principal: user.principal(),
            })
            .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "failed to sign session token");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "success": false, "message": "internal error" })),
                )
                    .into_response()
            }
        },
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "invalid email or password" })),
        )
            .into_response(),
    }
}

/// auth_check
///
/// [Admin Route] The inbound authorization check: echoes the resolved
/// principal and the capability set its role implies. Rejections happen in
/// the `AuthUser` extractor and carry the reason codes `missing_header`,
/// `invalid_token`, `access_denied`.
#[utoipa::path(
    get,
    path = "/admin/auth/check",
    responses((status = 200, description = "Resolved principal", body = AuthCheckResponse))
)]
pub async fn auth_check(user: AuthUser) -> Json<AuthCheckResponse> {
    let capabilities = policy::capabilities(user.role).to_vec();
    Json(AuthCheckResponse {
        id: user.id,
        email: user.email,
        role: user.role,
        capabilities,
    })
}

/// verify_payment
///
/// [Admin Route] The manual verification trigger. Requires the
/// `manage_payments` capability (enforced, and audited on denial, inside the
/// workflow).
///
/// *Policy*: the response never carries gateway-level error detail. The
/// caller gets a success flag and a generic message; the detail goes to the
/// audit trail and the logs.
#[utoipa::path(
    post,
    path = "/admin/payments/{payment_id}/verify",
    params(("payment_id" = String, Path, description = "Externally issued payment id")),
    responses(
        (status = 200, description = "Verification outcome", body = VerifyPaymentResponse),
        (status = 403, description = "Capability denied"),
        (status = 404, description = "Payment unknown to the gateway"),
        (status = 409, description = "Attempt already in progress"),
        (status = 503, description = "Gateway unavailable, retry later")
    )
)]
pub async fn verify_payment(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> Result<Json<VerifyPaymentResponse>, WorkflowError> {
    let origin = client_origin(&headers);

    let outcome = state
        .workflow
        .verify_payment(&user, &payment_id, &origin)
        .await?;

    Ok(Json(match outcome {
        VerificationOutcome::Verified { audit_degraded, .. } => VerifyPaymentResponse {
            success: true,
            message: if audit_degraded {
                "payment verified and plan upgraded; audit record degraded".to_string()
            } else {
                "payment verified and plan upgraded".to_string()
            },
            already_verified: false,
        },
        VerificationOutcome::AlreadyVerified => VerifyPaymentResponse {
            success: true,
            message: "payment already verified".to_string(),
            already_verified: true,
        },
        VerificationOutcome::Failed { .. } => VerifyPaymentResponse {
            success: false,
            message: "payment verification failed".to_string(),
            already_verified: false,
        },
    }))
}

/// override_plan
///
/// [Admin Route] Administrative plan override, bypassing payment
/// verification. The plan name is validated against the closed enumeration
/// before any persistence call; the action is audited under `plan_override`,
/// distinct from gateway-driven upgrades.
#[utoipa::path(
    put,
    path = "/admin/users/{user_id}/plan",
    params(("user_id" = Uuid, Path, description = "User whose plan is overridden")),
    request_body = OverridePlanRequest,
    responses(
        (status = 200, description = "Plan updated", body = OverridePlanResponse),
        (status = 403, description = "Capability denied"),
        (status = 404, description = "No plan record for user"),
        (status = 409, description = "Concurrent modification, retry"),
        (status = 422, description = "Unknown plan name")
    )
)]
pub async fn override_plan(
    user: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<OverridePlanRequest>,
) -> Result<Json<OverridePlanResponse>, WorkflowError> {
    let origin = client_origin(&headers);

    let outcome = state
        .workflow
        .override_plan(&user, user_id, &payload.plan, &origin)
        .await?;

    Ok(Json(OverridePlanResponse {
        success: true,
        message: if outcome.audit_degraded {
            "plan updated; audit record degraded".to_string()
        } else {
            "plan updated".to_string()
        },
        plan: outcome.plan,
    }))
}

/// gateway_callback
///
/// [Public Route] The automatic trigger: the payment gateway's confirmation
/// callback. Authenticated by the shared callback secret in
/// `x-gateway-signature`; a mismatch is rejected before any workflow state is
/// touched. Responses stay generic; the gateway only needs to know whether
/// to redeliver.
#[utoipa::path(
    post,
    path = "/payments/gateway/callback",
    request_body = GatewayCallbackRequest,
    responses(
        (status = 200, description = "Callback processed", body = VerifyPaymentResponse),
        (status = 401, description = "Bad callback signature")
    )
)]
pub async fn gateway_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GatewayCallbackRequest>,
) -> Response {
    let presented = headers
        .get("x-gateway-signature")
        .and_then(|value| value.to_str().ok());

    if presented != Some(state.config.gateway_callback_secret.as_str()) {
        return AuthRejection::InvalidToken.into_response();
    }

    let origin = client_origin(&headers);

    match state
        .workflow
        .confirm_from_callback(&payload.payment_id, &origin)
        .await
    {
        Ok(outcome) => {
            let (success, message) = match outcome {
                VerificationOutcome::Verified { .. } => (true, "payment verified"),
                VerificationOutcome::AlreadyVerified => (true, "payment already verified"),
                VerificationOutcome::Failed { .. } => (false, "payment verification failed"),
            };
            Json(VerifyPaymentResponse {
                success,
                message: message.to_string(),
                already_verified: matches!(outcome, VerificationOutcome::AlreadyVerified),
            })
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}
