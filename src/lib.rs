use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod repository;
pub mod workflow;

// Module for routing segregation (Public, Admin).
pub mod routes;
use auth::AuthUser; // The resolved authenticated operator identity.
use routes::{admin, public};

// --- Public Re-exports ---

// Makes core state types easily accessible to the main application entry
// point (main.rs).
pub use audit::{AuditState, MemoryAuditLog, PostgresAuditLog};
pub use config::AppConfig;
pub use gateway::{GatewayState, HttpPaymentGateway, MockPaymentGateway};
pub use repository::{PostgresRepository, RepositoryState};
pub use workflow::{PaymentWorkflow, WorkflowState};

/// ApiDoc
///
/// Auto-generates the OpenAPI documentation (Swagger JSON) for the admin API.
/// It aggregates all paths and data schemas decorated with the
/// `#[utoipa::path]` and `#[derive(utoipa::ToSchema)]` macros. The resulting
/// JSON is served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::auth_check, handlers::verify_payment,
        handlers::override_plan, handlers::gateway_callback,
    ),
    components(
        schemas(
            models::AdminRole, models::Capability, models::PlanName,
            models::VerificationStatus, models::AdminPrincipal, models::UserPlan,
            models::LoginRequest, models::LoginResponse, models::AuthCheckResponse,
            models::VerifyPaymentResponse, models::OverridePlanRequest,
            models::OverridePlanResponse, models::GatewayCallbackRequest,
        )
    ),
    tags(
        (name = "academy-admin", description = "Academy Admin & Payment Verification API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Implements the **Unified State Pattern**: the single, thread-safe,
/// immutable container holding all essential application services and
/// configuration, shared across all incoming requests.
#[derive(Clone)]
pub struct AppState {
    /// Repository Layer: admin registry, plan store, verification attempts.
    pub repo: RepositoryState,
    /// The payment-verification workflow (composition root over repository,
    /// gateway, and audit log).
    pub workflow: WorkflowState,
    /// Configuration: the loaded, immutable environment configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// These implementations allow extractors and handlers to selectively pull
// components from the shared AppState.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for WorkflowState {
    fn from_ref(app_state: &AppState) -> WorkflowState {
        app_state.workflow.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the admin router.
///
/// *Mechanism*: attempts to extract `AuthUser` from the request. If
/// authentication (bearer validation, registry lookup, role validation)
/// fails, the extractor rejects the request with a reason-coded response
/// before the handler runs.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the application's entire routing structure, applies global and
/// scoped middleware, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        // Documentation: Serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public Routes: No middleware applied.
        .merge(public::public_routes())
        // Admin Routes: Nested under '/admin' and protected by the
        // authentication layer. Capability checks happen inside the workflow
        // after the request passes this layer.
        .nest(
            "/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        // Apply the Unified State to all routes.
        .with_state(state);

    // 3. Observability and Correlation Layers (Applied outermost/first)
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. Request ID Generation: a unique UUID for every request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 3b. Request Tracing: wraps the request/response lifecycle in
                // a tracing span carrying the generated request ID.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Request ID Propagation: returns the x-request-id header
                // to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Helper used by `TraceLayer` to customize span creation: extracts the
/// `x-request-id` header (if present) and includes it in the structured
/// logging metadata alongside the HTTP method and URI, so every log line for
/// a single request is correlated by a unique ID.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
