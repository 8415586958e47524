use crate::error::StoreError;
use crate::models::{AdminRecord, PaymentVerification, PlanName, UserPlan, VerificationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

/// A `verifying` row older than this is treated as abandoned by a crashed
/// holder and becomes reclaimable (stuck-attempt recovery).
const STALE_VERIFYING_SECS: f64 = 600.0;

/// CasOutcome
///
/// Result of a conditional plan write. `Conflict` is an ordinary value, not a
/// failure: it tells the caller the stored plan no longer matched the expected
/// one and a re-read is required before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Committed,
    Conflict,
}

/// ClaimOutcome
///
/// Result of attempting to take the `verifying` slot for a payment id. The
/// claim is the durable concurrency token: exactly one caller observes
/// `Claimed` for any given in-flight attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The caller now owns the verifying attempt.
    Claimed(PaymentVerification),
    /// Another attempt currently holds the `verifying` state.
    InProgress,
    /// The id already reached terminal `verified`; no side effects may re-run.
    AlreadyVerified(PaymentVerification),
}

/// Repository Trait
///
/// Defines the abstract contract for all persistence operations this core
/// needs: the admin registry (read-only), the plan store (read +
/// compare-and-set), and the verification-attempt store (atomic claim +
/// conditional finish). Handlers and the workflow interact with the data layer
/// through this seam only, so tests can supply in-memory fakes.
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn Repository>`) safely shareable across Axum's asynchronous task
/// boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Admin Registry (read-only) ---
    async fn lookup_admin(&self, email: &str) -> Option<AdminRecord>;
    async fn get_admin(&self, id: Uuid) -> Option<AdminRecord>;

    // --- Plan Store ---
    async fn get_plan(&self, user_id: Uuid) -> Result<Option<UserPlan>, StoreError>;
    /// Conditional write: commits only while the stored plan still equals
    /// `expected`. The mechanism that prevents two concurrent attempts from
    /// both "winning" a plan upgrade.
    async fn compare_and_set_plan(
        &self,
        user_id: Uuid,
        expected: PlanName,
        new: PlanName,
    ) -> Result<CasOutcome, StoreError>;

    // --- Verification Attempts ---
    async fn get_verification(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentVerification>, StoreError>;
    /// Atomic claim: creates the attempt row as `verifying`, or transitions an
    /// existing row to `verifying` only from `pending`/`failed`. Single
    /// statement, so two racing claims cannot both succeed.
    async fn claim_verification(&self, payment_id: &str) -> Result<ClaimOutcome, StoreError>;
    /// Conditional finish: records the terminal status only while the row is
    /// still `verifying`. Returns whether a row transitioned.
    async fn finish_verification(
        &self,
        payment_id: &str,
        status: VerificationStatus,
        attempts: i32,
        user_id: Option<Uuid>,
        plan: Option<PlanName>,
    ) -> Result<bool, StoreError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

// --- Row Mapping ---

// Raw rows carry enumerated columns as text; conversion into the typed models
// happens here so an out-of-vocabulary value surfaces as CorruptRow.

#[derive(FromRow)]
struct UserPlanRow {
    user_id: Uuid,
    plan: String,
    updated_at: DateTime<Utc>,
}

impl UserPlanRow {
    fn into_model(self) -> Result<UserPlan, StoreError> {
        let plan = PlanName::parse(&self.plan)
            .ok_or_else(|| StoreError::CorruptRow(format!("plan '{}'", self.plan)))?;
        Ok(UserPlan {
            user_id: self.user_id,
            plan,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct VerificationRow {
    payment_id: String,
    user_id: Option<Uuid>,
    plan: Option<String>,
    status: String,
    attempts: i32,
    last_attempted_at: DateTime<Utc>,
}

impl VerificationRow {
    fn into_model(self) -> Result<PaymentVerification, StoreError> {
        let status = VerificationStatus::parse(&self.status)
            .ok_or_else(|| StoreError::CorruptRow(format!("status '{}'", self.status)))?;
        let plan = match self.plan {
            Some(p) => Some(
                PlanName::parse(&p)
                    .ok_or_else(|| StoreError::CorruptRow(format!("plan '{p}'")))?,
            ),
            None => None,
        };
        Ok(PaymentVerification {
            payment_id: self.payment_id,
            user_id: self.user_id,
            plan,
            status,
            attempts: self.attempts,
            last_attempted_at: self.last_attempted_at,
        })
    }
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by the
/// PostgreSQL database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// lookup_admin
    ///
    /// Resolves a registry row by email for the password exchange. Registry
    /// reads degrade to None on database errors: an unreachable registry must
    /// read as "no such admin", not as an authenticated session.
    async fn lookup_admin(&self, email: &str) -> Option<AdminRecord> {
        sqlx::query_as::<_, AdminRecord>(
            "SELECT id, email, password_hash, role FROM admins WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("lookup_admin error: {:?}", e);
            None
        })
    }

    /// get_admin
    ///
    /// Resolves a registry row by id for the bearer-token extractor.
    async fn get_admin(&self, id: Uuid) -> Option<AdminRecord> {
        sqlx::query_as::<_, AdminRecord>(
            "SELECT id, email, password_hash, role FROM admins WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_admin error: {:?}", e);
            None
        })
    }

    /// get_plan
    ///
    /// Reads the user's current plan. The read half of every compare-and-set
    /// round: the workflow re-reads through this before each retry.
    async fn get_plan(&self, user_id: Uuid) -> Result<Option<UserPlan>, StoreError> {
        let row = sqlx::query_as::<_, UserPlanRow>(
            "SELECT user_id, plan, updated_at FROM user_plans WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserPlanRow::into_model).transpose()
    }

    /// compare_and_set_plan
    ///
    /// The conditional-write primitive. The `WHERE plan = expected` clause is
    /// the comparison; `rows_affected` tells whether this writer won.
    async fn compare_and_set_plan(
        &self,
        user_id: Uuid,
        expected: PlanName,
        new: PlanName,
    ) -> Result<CasOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE user_plans SET plan = $3, updated_at = NOW() \
             WHERE user_id = $1 AND plan = $2",
        )
        .bind(user_id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(CasOutcome::Committed)
        } else {
            Ok(CasOutcome::Conflict)
        }
    }

    /// get_verification
    ///
    /// Reads the attempt record for a payment id, if one exists.
    async fn get_verification(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentVerification>, StoreError> {
        let row = sqlx::query_as::<_, VerificationRow>(
            "SELECT payment_id, user_id, plan, status, attempts, last_attempted_at \
             FROM payment_verifications WHERE payment_id = $1",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(VerificationRow::into_model).transpose()
    }

    /// claim_verification
    ///
    /// Insert-or-conditionally-update in one statement. The conditional
    /// `DO UPDATE` makes the database row the concurrency token: a returned
    /// row means this caller holds the claim, no row means someone else does
    /// (or the id is terminal). A `verifying` row past the staleness window is
    /// reclaimable, so an attempt abandoned by a crashed holder can be
    /// re-triggered.
    async fn claim_verification(&self, payment_id: &str) -> Result<ClaimOutcome, StoreError> {
        let row = sqlx::query_as::<_, VerificationRow>(
            "INSERT INTO payment_verifications \
                 (payment_id, status, attempts, last_attempted_at) \
             VALUES ($1, 'verifying', 0, NOW()) \
             ON CONFLICT (payment_id) DO UPDATE \
                 SET status = 'verifying', last_attempted_at = NOW() \
                 WHERE payment_verifications.status IN ('pending', 'failed') \
                    OR (payment_verifications.status = 'verifying' \
                        AND payment_verifications.last_attempted_at < \
                            NOW() - make_interval(secs => $2)) \
             RETURNING payment_id, user_id, plan, status, attempts, last_attempted_at",
        )
        .bind(payment_id)
        .bind(STALE_VERIFYING_SECS)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(ClaimOutcome::Claimed(row.into_model()?));
        }

        // No row came back: the id is either mid-flight or terminal.
        match self.get_verification(payment_id).await? {
            Some(v) if v.status == VerificationStatus::Verified => {
                Ok(ClaimOutcome::AlreadyVerified(v))
            }
            _ => Ok(ClaimOutcome::InProgress),
        }
    }

    /// finish_verification
    ///
    /// Terminal write for an attempt, guarded on still holding `verifying`.
    /// `COALESCE` keeps previously learned user/plan columns when a failure
    /// path finishes without them.
    async fn finish_verification(
        &self,
        payment_id: &str,
        status: VerificationStatus,
        attempts: i32,
        user_id: Option<Uuid>,
        plan: Option<PlanName>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE payment_verifications \
             SET status = $2, attempts = $3, \
                 user_id = COALESCE($4, user_id), \
                 plan = COALESCE($5, plan), \
                 last_attempted_at = NOW() \
             WHERE payment_id = $1 AND status = 'verifying'",
        )
        .bind(payment_id)
        .bind(status.as_str())
        .bind(attempts)
        .bind(user_id)
        .bind(plan.map(|p| p.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
