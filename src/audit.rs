use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::AuditError;
use crate::models::AuditEntry;

/// Action names recorded by this core. Gateway-driven upgrades and
/// administrative overrides carry distinct names so the trail can tell the two
/// paths apart.
pub mod actions {
    pub const PAYMENT_VERIFIED: &str = "payment_verified";
    pub const PAYMENT_VERIFICATION_FAILED: &str = "payment_verification_failed";
    pub const PLAN_OVERRIDE: &str = "plan_override";
    pub const ADMIN_ACTION_DENIED: &str = "admin_action_denied";
}

/// AuditLog Contract
///
/// Append-only recorder of privileged actions. Entries are immutable once
/// written; this trait deliberately exposes no read, update, or delete
/// operation. Reporting over the trail belongs to the excluded admin UI.
/// The only failure mode is the persistence layer being unavailable.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(
        &self,
        actor_id: Uuid,
        action: &str,
        target_type: &str,
        target_id: &str,
        metadata: serde_json::Value,
        origin: &str,
    ) -> Result<AuditEntry, AuditError>;
}

/// AuditState
///
/// The concrete type used to share the audit log across the application state.
pub type AuditState = Arc<dyn AuditLog>;

/// PostgresAuditLog
///
/// The concrete implementation appending to `public.audit_log`. Rows carry no
/// unique key beyond the generated id; ordering is insertion order plus the
/// timestamp.
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn record(
        &self,
        actor_id: Uuid,
        action: &str,
        target_type: &str,
        target_id: &str,
        metadata: serde_json::Value,
        origin: &str,
    ) -> Result<AuditEntry, AuditError> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            actor_id,
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            metadata,
            origin: origin.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO audit_log \
                 (id, actor_id, action, target_type, target_id, metadata, origin, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.target_type)
        .bind(&entry.target_id)
        .bind(&entry.metadata)
        .bind(&entry.origin)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::PersistenceUnavailable(e.to_string()))?;

        Ok(entry)
    }
}

// --- The In-Memory Implementation (For Unit Tests) ---

/// MemoryAuditLog
///
/// An in-memory implementation of `AuditLog` used for unit and integration
/// testing. Entries land in a shared Vec so tests can assert exactly which
/// privileged actions were recorded; the `should_fail` knob simulates the
/// persistence layer being down.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    should_fail: bool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            should_fail: true,
        }
    }

    /// Snapshot of everything recorded so far, in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit entries poisoned").clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(
        &self,
        actor_id: Uuid,
        action: &str,
        target_type: &str,
        target_id: &str,
        metadata: serde_json::Value,
        origin: &str,
    ) -> Result<AuditEntry, AuditError> {
        if self.should_fail {
            return Err(AuditError::PersistenceUnavailable(
                "simulated audit outage".to_string(),
            ));
        }

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            actor_id,
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            metadata,
            origin: origin.to_string(),
            created_at: Utc::now(),
        };

        self.entries
            .lock()
            .expect("audit entries poisoned")
            .push(entry.clone());

        Ok(entry)
    }
}
