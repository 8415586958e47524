use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Closed Vocabularies ---

/// AdminRole
///
/// The fixed set of operator roles recognised by the portal. Roles are stored
/// as text in `public.admins` and parsed at the authentication boundary; a row
/// carrying any other value is rejected there, never coerced to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AdminRole {
    SuperAdmin,
    Admin,
    Moderator,
}

impl AdminRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "super_admin" => Some(Self::SuperAdmin),
            "admin" => Some(Self::Admin),
            "moderator" => Some(Self::Moderator),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Moderator => "moderator",
        }
    }
}

/// Capability
///
/// A named permission governing one class of privileged action. The vocabulary
/// is closed: capability checks against names outside this enum fail closed in
/// the policy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Capability {
    ViewUsers,
    ManagePayments,
}

impl Capability {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "view_users" => Some(Self::ViewUsers),
            "manage_payments" => Some(Self::ManagePayments),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewUsers => "view_users",
            Self::ManagePayments => "manage_payments",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PlanName
///
/// The subscription tiers a user can hold. Every plan write goes through the
/// typed enum, so an out-of-vocabulary name (`"platinum"`) is rejected at the
/// parse boundary before any persistence call is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PlanName {
    #[default]
    Free,
    Professional,
    Mastery,
    Innovation,
}

impl PlanName {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "free" => Some(Self::Free),
            "professional" => Some(Self::Professional),
            "mastery" => Some(Self::Mastery),
            "innovation" => Some(Self::Innovation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Professional => "professional",
            Self::Mastery => "mastery",
            Self::Innovation => "innovation",
        }
    }
}

/// VerificationStatus
///
/// State of one payment-verification attempt. Transitions are
/// `pending -> verifying -> {verified | failed}`; `verified` is terminal for
/// side effects, `failed` re-enters only via an explicit trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verifying,
    Verified,
    Failed,
}

impl VerificationStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "verifying" => Some(Self::Verifying),
            "verified" => Some(Self::Verified),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }
}

// --- Core Application Schemas (Mapped to Database) ---

/// AdminRecord
///
/// The registry row for a privileged operator, from `public.admins`. The role
/// is kept as raw text here and validated into an [`AdminRole`] where
/// principals are constructed, so an unknown role surfaces as an
/// authentication rejection rather than a silent default.
///
/// Deliberately not `Serialize`: the password hash must never reach a response
/// body.
#[derive(Debug, Clone, FromRow, Default)]
pub struct AdminRecord {
    pub id: Uuid,
    pub email: String,
    /// Argon2 PHC string, e.g. `$argon2id$v=19$...`.
    pub password_hash: String,
    pub role: String,
}

/// AdminPrincipal
///
/// The response-facing identity of an authenticated operator: what the admin
/// frontend needs to render a session, nothing more.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AdminPrincipal {
    pub id: Uuid,
    pub email: String,
    pub role: AdminRole,
}

/// UserPlan
///
/// A user's current subscription plan, from `public.user_plans`. Mutated
/// exclusively through the repository's compare-and-set; the page-rendering
/// layer only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserPlan {
    pub user_id: Uuid,
    pub plan: PlanName,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// PaymentVerification
///
/// One verification attempt for an externally issued payment id, from
/// `public.payment_verifications`. The user id and purchased plan are learned
/// from the gateway confirmation, so they stay absent until a run reaches the
/// gateway.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentVerification {
    pub payment_id: String,
    pub user_id: Option<Uuid>,
    pub plan: Option<PlanName>,
    pub status: VerificationStatus,
    pub attempts: i32,
    pub last_attempted_at: DateTime<Utc>,
}

/// AuditEntry
///
/// One immutable record of a privileged action, from `public.audit_log`.
/// Append-only: this service exposes no read, update, or delete path for it.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub metadata: serde_json::Value,
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// LoginRequest
///
/// Input payload for the email/password exchange (POST /admin/login).
/// The password is compared against the stored Argon2 hash and never logged.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// OverridePlanRequest
///
/// Input payload for the administrative plan override (PUT /admin/users/{id}/plan).
/// The plan arrives as text and is validated against [`PlanName`] before any
/// persistence call.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct OverridePlanRequest {
    #[schema(example = "professional")]
    pub plan: String,
}

/// GatewayCallbackRequest
///
/// Body of the payment gateway's confirmation callback
/// (POST /payments/gateway/callback).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct GatewayCallbackRequest {
    pub payment_id: String,
}

// --- Response Schemas (Output) ---

/// LoginResponse
///
/// Output of a successful credential exchange: a signed bearer token plus the
/// resolved principal.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub principal: AdminPrincipal,
}

/// AuthCheckResponse
///
/// Output of the inbound authorization check (GET /admin/auth/check): the
/// principal plus the capability set its role resolves to.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthCheckResponse {
    pub id: Uuid,
    pub email: String,
    pub role: AdminRole,
    pub capabilities: Vec<Capability>,
}

/// OverridePlanResponse
///
/// Output of the administrative plan override.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct OverridePlanResponse {
    pub success: bool,
    pub message: String,
    pub plan: UserPlan,
}

/// VerifyPaymentResponse
///
/// Output of the manual verification trigger. The message stays generic by
/// policy; gateway-level detail goes to the audit log and tracing output, not
/// to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub message: String,
    /// True when the id had already reached `verified` and this trigger was a
    /// replay-safe no-op.
    pub already_verified: bool,
}
