use academy_portal::{
    AppState, MemoryAuditLog, MockPaymentGateway, PaymentWorkflow,
    auth::{self, AuthUser},
    config::AppConfig,
    error::StoreError,
    gateway::GatewayConfirmation,
    handlers,
    models::{
        AdminRecord, AdminRole, GatewayCallbackRequest, LoginResponse, OverridePlanRequest,
        PaymentVerification, PlanName, UserPlan, VerificationStatus, VerifyPaymentResponse,
    },
    repository::{CasOutcome, ClaimOutcome, Repository, RepositoryState},
};
use async_trait::async_trait;
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::test;
use uuid::Uuid;

// --- MOCK REPOSITORY IMPLEMENTATION ---

// Handlers rely on traits, so we mock the trait implementation. This mock
// keeps just enough state for the handler flows: an admin registry keyed by
// email, a plan map, and a verification map with real claim semantics.
#[derive(Default)]
struct MockRepoControl {
    admins: Vec<AdminRecord>,
    plans: Mutex<HashMap<Uuid, UserPlan>>,
    verifications: Mutex<HashMap<String, PaymentVerification>>,
}

impl MockRepoControl {
    fn with_admin(mut self, record: AdminRecord) -> Self {
        self.admins.push(record);
        self
    }

    fn with_plan(self, user_id: Uuid, plan: PlanName) -> Self {
        self.plans.lock().unwrap().insert(
            user_id,
            UserPlan {
                user_id,
                plan,
                updated_at: Utc::now(),
            },
        );
        self
    }
}

#[async_trait]
impl Repository for MockRepoControl {
    async fn lookup_admin(&self, email: &str) -> Option<AdminRecord> {
        self.admins.iter().find(|a| a.email == email).cloned()
    }

    async fn get_admin(&self, id: Uuid) -> Option<AdminRecord> {
        self.admins.iter().find(|a| a.id == id).cloned()
    }

    async fn get_plan(&self, user_id: Uuid) -> Result<Option<UserPlan>, StoreError> {
        Ok(self.plans.lock().unwrap().get(&user_id).cloned())
    }

    async fn compare_and_set_plan(
        &self,
        user_id: Uuid,
        expected: PlanName,
        new: PlanName,
    ) -> Result<CasOutcome, StoreError> {
        let mut plans = self.plans.lock().unwrap();
        match plans.get_mut(&user_id) {
            Some(current) if current.plan == expected => {
                current.plan = new;
                current.updated_at = Utc::now();
                Ok(CasOutcome::Committed)
            }
            _ => Ok(CasOutcome::Conflict),
        }
    }

    async fn get_verification(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentVerification>, StoreError> {
        Ok(self.verifications.lock().unwrap().get(payment_id).cloned())
    }

    async fn claim_verification(&self, payment_id: &str) -> Result<ClaimOutcome, StoreError> {
        let mut verifications = self.verifications.lock().unwrap();
        match verifications.get_mut(payment_id) {
            None => {
                let fresh = PaymentVerification {
                    payment_id: payment_id.to_string(),
                    user_id: None,
                    plan: None,
                    status: VerificationStatus::Verifying,
                    attempts: 0,
                    last_attempted_at: Utc::now(),
                };
                verifications.insert(payment_id.to_string(), fresh.clone());
                Ok(ClaimOutcome::Claimed(fresh))
            }
            Some(existing) => match existing.status {
                VerificationStatus::Pending | VerificationStatus::Failed => {
                    existing.status = VerificationStatus::Verifying;
                    Ok(ClaimOutcome::Claimed(existing.clone()))
                }
                VerificationStatus::Verifying => Ok(ClaimOutcome::InProgress),
                VerificationStatus::Verified => Ok(ClaimOutcome::AlreadyVerified(existing.clone())),
            },
        }
    }

    async fn finish_verification(
        &self,
        payment_id: &str,
        status: VerificationStatus,
        attempts: i32,
        user_id: Option<Uuid>,
        plan: Option<PlanName>,
    ) -> Result<bool, StoreError> {
        let mut verifications = self.verifications.lock().unwrap();
        match verifications.get_mut(payment_id) {
            Some(v) if v.status == VerificationStatus::Verifying => {
                v.status = status;
                v.attempts = attempts;
                if user_id.is_some() {
                    v.user_id = user_id;
                }
                if plan.is_some() {
                    v.plan = plan;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// --- TEST UTILITIES ---

const TEST_ADMIN_ID: Uuid = Uuid::from_u128(456);
const TEST_MOD_ID: Uuid = Uuid::from_u128(123);
const BUYER: Uuid = Uuid::from_u128(42);

fn create_test_state(repo_control: MockRepoControl, gateway: MockPaymentGateway) -> AppState {
    let repo: RepositoryState = Arc::new(repo_control);
    let workflow = Arc::new(PaymentWorkflow::new(
        repo.clone(),
        Arc::new(gateway),
        Arc::new(MemoryAuditLog::new()),
    ));

    AppState {
        repo,
        workflow,
        config: AppConfig::default(),
    }
}

fn admin_user() -> AuthUser {
    AuthUser {
        id: TEST_ADMIN_ID,
        email: "admin@academy.io".to_string(),
        role: AdminRole::Admin,
    }
}

fn moderator_user() -> AuthUser {
    AuthUser {
        id: TEST_MOD_ID,
        email: "mod@academy.io".to_string(),
        role: AdminRole::Moderator,
    }
}

fn settled_response() -> Result<GatewayConfirmation, academy_portal::error::GatewayError> {
    Ok(GatewayConfirmation {
        settled: true,
        user_id: BUYER,
        tier: "professional".to_string(),
    })
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let (_parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).expect("Failed to deserialize JSON response from handler")
}

// --- HANDLER TESTS ---

#[test]
async fn test_login_success_returns_token_and_principal() {
    let record = AdminRecord {
        id: TEST_ADMIN_ID,
        email: "admin@academy.io".to_string(),
        password_hash: auth::hash_password("hunter2-but-longer").unwrap(),
        role: "admin".to_string(),
    };
    let state = create_test_state(
        MockRepoControl::default().with_admin(record),
        MockPaymentGateway::new(),
    );

    let response = handlers::login(
        State(state),
        Json(academy_portal::models::LoginRequest {
            email: "admin@academy.io".to_string(),
            password: "hunter2-but-longer".to_string(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: LoginResponse = body_json(response).await;
    assert!(!body.token.is_empty());
    assert_eq!(body.principal.email, "admin@academy.io");
    assert_eq!(body.principal.role, AdminRole::Admin);
}

#[test]
async fn test_login_rejects_bad_password() {
    let record = AdminRecord {
        id: TEST_ADMIN_ID,
        email: "admin@academy.io".to_string(),
        password_hash: auth::hash_password("hunter2-but-longer").unwrap(),
        role: "admin".to_string(),
    };
    let state = create_test_state(
        MockRepoControl::default().with_admin(record),
        MockPaymentGateway::new(),
    );

    let response = handlers::login(
        State(state),
        Json(academy_portal::models::LoginRequest {
            email: "admin@academy.io".to_string(),
            password: "wrong".to_string(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[test]
async fn test_auth_check_lists_capabilities_for_role() {
    let Json(body) = handlers::auth_check(moderator_user()).await;

    assert_eq!(body.role, AdminRole::Moderator);
    assert_eq!(
        body.capabilities,
        vec![academy_portal::models::Capability::ViewUsers]
    );
}

#[test]
async fn test_verify_payment_success_body() {
    let state = create_test_state(
        MockRepoControl::default().with_plan(BUYER, PlanName::Free),
        MockPaymentGateway::with_responses(vec![settled_response()]),
    );

    let result = handlers::verify_payment(
        admin_user(),
        State(state),
        HeaderMap::new(),
        Path("pay_123".to_string()),
    )
    .await;

    let Json(body) = result.unwrap();
    assert!(body.success);
    assert!(!body.already_verified);
}

#[test]
async fn test_verify_payment_already_verified_flag() {
    let state = create_test_state(
        MockRepoControl::default().with_plan(BUYER, PlanName::Free),
        MockPaymentGateway::with_responses(vec![settled_response()]),
    );

    handlers::verify_payment(
        admin_user(),
        State(state.clone()),
        HeaderMap::new(),
        Path("pay_123".to_string()),
    )
    .await
    .unwrap();

    let Json(body) = handlers::verify_payment(
        admin_user(),
        State(state),
        HeaderMap::new(),
        Path("pay_123".to_string()),
    )
    .await
    .unwrap();

    assert!(body.success);
    assert!(body.already_verified);
}

#[test]
async fn test_verify_payment_forbidden_for_moderator() {
    let state = create_test_state(
        MockRepoControl::default().with_plan(BUYER, PlanName::Free),
        MockPaymentGateway::new(),
    );

    let result = handlers::verify_payment(
        moderator_user(),
        State(state),
        HeaderMap::new(),
        Path("pay_123".to_string()),
    )
    .await;

    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[test]
async fn test_verify_payment_gateway_outage_maps_to_503() {
    let state = create_test_state(
        MockRepoControl::default().with_plan(BUYER, PlanName::Free),
        MockPaymentGateway::with_responses(vec![
            Err(academy_portal::error::GatewayError::Unavailable(
                "boom".to_string(),
            )),
            Err(academy_portal::error::GatewayError::Unavailable(
                "boom".to_string(),
            )),
        ]),
    );

    let result = handlers::verify_payment(
        admin_user(),
        State(state),
        HeaderMap::new(),
        Path("pay_999".to_string()),
    )
    .await;

    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // The generic message leaks no gateway detail.
    let body: serde_json::Value = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(!body["message"].as_str().unwrap().contains("boom"));
}

#[test]
async fn test_override_plan_rejects_unknown_plan_with_422() {
    let state = create_test_state(
        MockRepoControl::default().with_plan(BUYER, PlanName::Free),
        MockPaymentGateway::new(),
    );

    let result = handlers::override_plan(
        admin_user(),
        State(state),
        HeaderMap::new(),
        Path(BUYER),
        Json(OverridePlanRequest {
            plan: "platinum".to_string(),
        }),
    )
    .await;

    let response = result.unwrap_err().into_response();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[test]
async fn test_override_plan_success() {
    let state = create_test_state(
        MockRepoControl::default().with_plan(BUYER, PlanName::Free),
        MockPaymentGateway::new(),
    );

    let Json(body) = handlers::override_plan(
        admin_user(),
        State(state),
        HeaderMap::new(),
        Path(BUYER),
        Json(OverridePlanRequest {
            plan: "innovation".to_string(),
        }),
    )
    .await
    .unwrap();

    assert!(body.success);
    assert_eq!(body.plan.plan, PlanName::Innovation);
}

#[test]
async fn test_gateway_callback_rejects_bad_signature() {
    let state = create_test_state(
        MockRepoControl::default().with_plan(BUYER, PlanName::Free),
        MockPaymentGateway::with_responses(vec![settled_response()]),
    );

    let mut headers = HeaderMap::new();
    headers.insert("x-gateway-signature", "not-the-secret".parse().unwrap());

    let response = handlers::gateway_callback(
        State(state),
        headers,
        Json(GatewayCallbackRequest {
            payment_id: "pay_123".to_string(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = body_json(response).await;
    assert_eq!(body["error"], "invalid_token");
}

#[test]
async fn test_gateway_callback_with_valid_signature() {
    let state = create_test_state(
        MockRepoControl::default().with_plan(BUYER, PlanName::Free),
        MockPaymentGateway::with_responses(vec![settled_response()]),
    );

    let mut headers = HeaderMap::new();
    // AppConfig::default() carries the dev callback secret.
    headers.insert("x-gateway-signature", "dev-callback-secret".parse().unwrap());

    let response = handlers::gateway_callback(
        State(state),
        headers,
        Json(GatewayCallbackRequest {
            payment_id: "pay_123".to_string(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: VerifyPaymentResponse = body_json(response).await;
    assert!(body.success);
}
