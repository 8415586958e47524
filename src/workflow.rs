use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::audit::{AuditState, actions};
use crate::auth::AuthUser;
use crate::error::{GatewayError, WorkflowError};
use crate::gateway::GatewayState;
use crate::models::{Capability, PlanName, UserPlan, VerificationStatus};
use crate::policy;
use crate::repository::{CasOutcome, ClaimOutcome, RepositoryState};

/// Bounded retry rounds for a contended plan compare-and-set. After this many
/// read-retry rounds the attempt transitions to `failed` with the conflict in
/// the audit metadata; an upgrade is never abandoned silently.
const CAS_RETRY_ROUNDS: u32 = 3;

/// Gateway confirmation calls allowed per trigger. One transient failure is
/// retried within the run; exhausting the budget persists the attempt as
/// `failed` while the caller still sees the retryable error.
const GATEWAY_ATTEMPTS_PER_TRIGGER: i32 = 2;

/// Actor recorded for gateway-callback triggers, which carry no admin
/// principal.
const SYSTEM_ACTOR: Uuid = Uuid::nil();

/// VerificationOutcome
///
/// The non-error results of driving a verification attempt. `Failed` is an
/// outcome, not an error: the state machine reached its terminal `failed`
/// state and the id stays eligible for a manual re-trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Settlement confirmed, plan committed, terminal state recorded.
    Verified {
        plan: PlanName,
        /// True when the plan commit succeeded but the audit append did not.
        /// Reported distinctly so operators can reconcile; never folded into
        /// a clean success.
        audit_degraded: bool,
    },
    /// The id had already reached `verified`; no side effect was re-run.
    AlreadyVerified,
    /// Non-settlement, exhausted plan-CAS retries, or a missing plan row.
    Failed { attempts: i32 },
}

/// OverrideOutcome
///
/// Result of the administrative plan override.
#[derive(Debug, Clone)]
pub struct OverrideOutcome {
    pub plan: UserPlan,
    pub audit_degraded: bool,
}

enum Trigger {
    Manual,
    Callback,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Callback => "gateway_callback",
        }
    }
}

/// PaymentWorkflow
///
/// The composition root of the core: drives the
/// `pending -> verifying -> {verified | failed}` state machine over the
/// repository, the external gateway, and the audit log.
///
/// Concurrency: the durable claim in the repository is the source of truth;
/// it is what keeps two service instances from double-running an attempt. The
/// in-process marker held here is only a fast path that rejects same-process
/// duplicate triggers before they reach the store.
pub struct PaymentWorkflow {
    repo: RepositoryState,
    gateway: GatewayState,
    audit: AuditState,
    in_flight: Mutex<HashSet<String>>,
}

/// WorkflowState
///
/// The concrete type used to share the workflow across the application state.
pub type WorkflowState = Arc<PaymentWorkflow>;

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    payment_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight marker set poisoned")
            .remove(&self.payment_id);
    }
}

impl PaymentWorkflow {
    pub fn new(repo: RepositoryState, gateway: GatewayState, audit: AuditState) -> Self {
        Self {
            repo,
            gateway,
            audit,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// verify_payment
    ///
    /// The manual trigger. Requires the `manage_payments` capability; a denial
    /// terminates the request *and* lands in the audit trail, so repeated
    /// probing by an under-privileged operator is visible.
    pub async fn verify_payment(
        &self,
        actor: &AuthUser,
        payment_id: &str,
        origin: &str,
    ) -> Result<VerificationOutcome, WorkflowError> {
        self.require(actor, Capability::ManagePayments, "payment", payment_id, origin)
            .await?;

        self.run(actor.id, payment_id, origin, Trigger::Manual).await
    }

    /// confirm_from_callback
    ///
    /// The automatic trigger, entered after the HTTP layer has checked the
    /// gateway's callback signature. Recorded against the system actor.
    pub async fn confirm_from_callback(
        &self,
        payment_id: &str,
        origin: &str,
    ) -> Result<VerificationOutcome, WorkflowError> {
        self.run(SYSTEM_ACTOR, payment_id, origin, Trigger::Callback)
            .await
    }

    /// override_plan
    ///
    /// The administrative override path: sets a user's plan directly,
    /// bypassing payment verification. Validates the plan name against the
    /// closed enumeration before any persistence call, then applies the same
    /// bounded compare-and-set discipline as the settlement path. Audited
    /// under its own action name so the trail distinguishes overrides from
    /// gateway-driven upgrades.
    pub async fn override_plan(
        &self,
        actor: &AuthUser,
        user_id: Uuid,
        requested_plan: &str,
        origin: &str,
    ) -> Result<OverrideOutcome, WorkflowError> {
        let target = &user_id.to_string();
        self.require(actor, Capability::ManagePayments, "user_plan", target, origin)
            .await?;

        let plan = PlanName::parse(requested_plan)
            .ok_or_else(|| WorkflowError::InvalidPlan(requested_plan.to_string()))?;

        let mut previous = None;
        let mut committed = false;
        for _ in 0..CAS_RETRY_ROUNDS {
            let current = self
                .repo
                .get_plan(user_id)
                .await?
                .ok_or(WorkflowError::PlanNotFound)?;
            previous = Some(current.plan);

            if current.plan == plan {
                committed = true;
                break;
            }

            match self
                .repo
                .compare_and_set_plan(user_id, current.plan, plan)
                .await?
            {
                CasOutcome::Committed => {
                    committed = true;
                    break;
                }
                CasOutcome::Conflict => continue,
            }
        }

        if !committed {
            tracing::warn!(user_id = %user_id, plan = plan.as_str(), "plan override exhausted CAS retries");
            return Err(WorkflowError::PlanConflict);
        }

        let audit_degraded = self
            .audit
            .record(
                actor.id,
                actions::PLAN_OVERRIDE,
                "user_plan",
                target,
                json!({
                    "from": previous.map(|p| p.as_str()),
                    "to": plan.as_str(),
                }),
                origin,
            )
            .await
            .is_err();

        if audit_degraded {
            tracing::error!(user_id = %user_id, "plan override committed but audit append failed");
        }

        Ok(OverrideOutcome {
            plan: UserPlan {
                user_id,
                plan,
                updated_at: chrono::Utc::now(),
            },
            audit_degraded,
        })
    }

    /// Capability gate shared by the manual paths. The denied-attempt audit
    /// entry is best-effort: the denial holds even when the trail is down.
    async fn require(
        &self,
        actor: &AuthUser,
        capability: Capability,
        target_type: &str,
        target_id: &str,
        origin: &str,
    ) -> Result<(), WorkflowError> {
        if policy::allows(actor.role, capability) {
            return Ok(());
        }

        if let Err(e) = self
            .audit
            .record(
                actor.id,
                actions::ADMIN_ACTION_DENIED,
                target_type,
                target_id,
                json!({
                    "capability": capability.as_str(),
                    "role": actor.role.as_str(),
                }),
                origin,
            )
            .await
        {
            tracing::error!(error = %e, "failed to record denied-attempt audit entry");
        }

        Err(WorkflowError::Denied(capability))
    }

    async fn run(
        &self,
        actor_id: Uuid,
        payment_id: &str,
        origin: &str,
        trigger: Trigger,
    ) -> Result<VerificationOutcome, WorkflowError> {
        // Same-process duplicate triggers are rejected before touching the
        // store; the durable claim below remains the cross-process guard.
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight marker set poisoned");
            if !in_flight.insert(payment_id.to_string()) {
                return Err(WorkflowError::AlreadyInProgress);
            }
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            payment_id: payment_id.to_string(),
        };

        self.drive(actor_id, payment_id, origin, trigger).await
    }

    async fn drive(
        &self,
        actor_id: Uuid,
        payment_id: &str,
        origin: &str,
        trigger: Trigger,
    ) -> Result<VerificationOutcome, WorkflowError> {
        // Terminal `verified` is a replay-safe no-op. A `verifying` row is
        // left for the claim to arbitrate: a fresh holder wins InProgress, a
        // stale one (crashed holder) is reclaimable.
        if let Some(existing) = self.repo.get_verification(payment_id).await? {
            if existing.status == VerificationStatus::Verified {
                return Ok(VerificationOutcome::AlreadyVerified);
            }
        }

        let claim = match self.repo.claim_verification(payment_id).await? {
            ClaimOutcome::Claimed(v) => v,
            ClaimOutcome::InProgress => return Err(WorkflowError::AlreadyInProgress),
            ClaimOutcome::AlreadyVerified(_) => return Ok(VerificationOutcome::AlreadyVerified),
        };

        // External confirmation, bounded per-trigger.
        let mut calls_made: i32 = 0;
        let confirmation = loop {
            calls_made += 1;
            match self.gateway.confirm(payment_id).await {
                Ok(confirmation) => break confirmation,
                Err(GatewayError::PaymentNotFound) => {
                    let attempts = claim.attempts + calls_made;
                    self.finish_failed(
                        actor_id,
                        payment_id,
                        attempts,
                        None,
                        None,
                        json!({ "reason": "payment_not_found", "trigger": trigger.as_str() }),
                        origin,
                    )
                    .await?;
                    return Err(WorkflowError::PaymentNotFound);
                }
                Err(GatewayError::Unavailable(detail)) => {
                    tracing::warn!(payment_id, attempt = calls_made, detail = %detail, "gateway confirmation failed");
                    if calls_made >= GATEWAY_ATTEMPTS_PER_TRIGGER {
                        let attempts = claim.attempts + calls_made;
                        self.finish_failed(
                            actor_id,
                            payment_id,
                            attempts,
                            None,
                            None,
                            json!({
                                "reason": "gateway_unavailable",
                                "detail": detail,
                                "trigger": trigger.as_str(),
                            }),
                            origin,
                        )
                        .await?;
                        return Err(WorkflowError::GatewayUnavailable);
                    }
                }
            }
        };

        let attempts = claim.attempts + calls_made;
        let user_id = confirmation.user_id;

        if !confirmation.settled {
            self.finish_failed(
                actor_id,
                payment_id,
                attempts,
                Some(user_id),
                None,
                json!({ "reason": "not_settled", "trigger": trigger.as_str() }),
                origin,
            )
            .await?;
            return Ok(VerificationOutcome::Failed { attempts });
        }

        // The purchased tier must map into the closed plan vocabulary before
        // the plan store sees anything.
        let Some(plan) = PlanName::parse(&confirmation.tier) else {
            let tier = confirmation.tier;
            self.finish_failed(
                actor_id,
                payment_id,
                attempts,
                Some(user_id),
                None,
                json!({
                    "reason": "invalid_plan",
                    "tier": tier.clone(),
                    "trigger": trigger.as_str(),
                }),
                origin,
            )
            .await?;
            return Err(WorkflowError::InvalidPlan(tier));
        };

        // Plan commit: compare-and-set with bounded re-read retries.
        let mut committed = false;
        let mut plan_row_missing = false;
        for _ in 0..CAS_RETRY_ROUNDS {
            let Some(current) = self.repo.get_plan(user_id).await? else {
                plan_row_missing = true;
                break;
            };

            if current.plan == plan {
                committed = true;
                break;
            }

            match self
                .repo
                .compare_and_set_plan(user_id, current.plan, plan)
                .await?
            {
                CasOutcome::Committed => {
                    committed = true;
                    break;
                }
                CasOutcome::Conflict => continue,
            }
        }

        if !committed {
            let reason = if plan_row_missing {
                "plan_row_missing"
            } else {
                "plan_conflict"
            };
            self.finish_failed(
                actor_id,
                payment_id,
                attempts,
                Some(user_id),
                Some(plan),
                json!({ "reason": reason, "plan": plan.as_str(), "trigger": trigger.as_str() }),
                origin,
            )
            .await?;
            return Ok(VerificationOutcome::Failed { attempts });
        }

        // Terminal state, then the audit append. An audit failure after the
        // plan commit surfaces as a degraded success, never a clean one.
        let transitioned = self
            .repo
            .finish_verification(
                payment_id,
                VerificationStatus::Verified,
                attempts,
                Some(user_id),
                Some(plan),
            )
            .await?;
        if !transitioned {
            tracing::warn!(payment_id, "verifying claim was lost before the terminal write");
        }

        let audit_degraded = self
            .audit
            .record(
                actor_id,
                actions::PAYMENT_VERIFIED,
                "payment",
                payment_id,
                json!({
                    "user_id": user_id,
                    "plan": plan.as_str(),
                    "attempts": attempts,
                    "trigger": trigger.as_str(),
                }),
                origin,
            )
            .await
            .is_err();

        if audit_degraded {
            tracing::error!(payment_id, "plan committed but audit append failed");
        }

        Ok(VerificationOutcome::Verified {
            plan,
            audit_degraded,
        })
    }

    /// Terminal `failed` write plus its audit entry. Audit failures here are
    /// logged, not propagated: the attempt record itself already carries the
    /// outcome.
    #[allow(clippy::too_many_arguments)]
    async fn finish_failed(
        &self,
        actor_id: Uuid,
        payment_id: &str,
        attempts: i32,
        user_id: Option<Uuid>,
        plan: Option<PlanName>,
        metadata: serde_json::Value,
        origin: &str,
    ) -> Result<(), WorkflowError> {
        self.repo
            .finish_verification(payment_id, VerificationStatus::Failed, attempts, user_id, plan)
            .await?;

        if let Err(e) = self
            .audit
            .record(
                actor_id,
                actions::PAYMENT_VERIFICATION_FAILED,
                "payment",
                payment_id,
                metadata,
                origin,
            )
            .await
        {
            tracing::error!(payment_id, error = %e, "failed to record verification-failure audit entry");
        }

        Ok(())
    }
}
