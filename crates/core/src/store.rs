use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::audit::AuditEntry;
use crate::domain::content::Department;
use crate::domain::deferral::{Deferral, DeferralId, DeferralStatus};
use crate::domain::user::UserId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("deferral `{id}` was modified concurrently (expected version {expected_version})")]
    Conflict { id: DeferralId, expected_version: u32 },
    #[error("deferral `{0}` not found")]
    NotFound(DeferralId),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferralFilter {
    pub status: Option<DeferralStatus>,
    pub department: Option<Department>,
    pub initiator_id: Option<UserId>,
}

impl DeferralFilter {
    pub fn matches(&self, deferral: &Deferral) -> bool {
        self.status.map_or(true, |status| deferral.status == status)
            && self.department.map_or(true, |department| deferral.content.department == department)
            && self.initiator_id.as_ref().map_or(true, |initiator| &deferral.initiator_id == initiator)
    }
}

/// Persistence for deferrals and their audit trail.
///
/// Every write carries the audit entry describing it; implementations commit
/// both or neither. `update` and `delete` only apply when the stored version
/// still equals `expected_version` and report [`StoreError::Conflict`]
/// otherwise.
#[async_trait]
pub trait DeferralStore: Send + Sync {
    async fn find(&self, id: &DeferralId) -> Result<Option<Deferral>, StoreError>;

    /// Newest first.
    async fn list(&self, filter: &DeferralFilter) -> Result<Vec<Deferral>, StoreError>;

    async fn insert(&self, deferral: &Deferral, audit: &AuditEntry) -> Result<(), StoreError>;

    async fn update(
        &self,
        deferral: &Deferral,
        expected_version: u32,
        audit: &AuditEntry,
    ) -> Result<(), StoreError>;

    /// Removes the deferral and its audit rows, then records `audit` detached
    /// from any deferral.
    async fn delete(
        &self,
        id: &DeferralId,
        expected_version: u32,
        audit: &AuditEntry,
    ) -> Result<(), StoreError>;

    /// Oldest first.
    async fn list_audit(&self, id: &DeferralId) -> Result<Vec<AuditEntry>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    deferrals: HashMap<String, Deferral>,
    audit: Vec<AuditEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryDeferralStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryDeferralStore {
    /// Every audit entry recorded so far, including detached ones.
    pub async fn all_audit(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.clone()
    }
}

#[async_trait]
impl DeferralStore for InMemoryDeferralStore {
    async fn find(&self, id: &DeferralId) -> Result<Option<Deferral>, StoreError> {
        let state = self.state.read().await;
        Ok(state.deferrals.get(&id.0).cloned())
    }

    async fn list(&self, filter: &DeferralFilter) -> Result<Vec<Deferral>, StoreError> {
        let state = self.state.read().await;
        let mut deferrals: Vec<Deferral> =
            state.deferrals.values().filter(|deferral| filter.matches(deferral)).cloned().collect();
        deferrals.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(deferrals)
    }

    async fn insert(&self, deferral: &Deferral, audit: &AuditEntry) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.deferrals.contains_key(&deferral.id.0) {
            return Err(StoreError::Backend(format!("deferral `{}` already exists", deferral.id)));
        }
        state.deferrals.insert(deferral.id.0.clone(), deferral.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn update(
        &self,
        deferral: &Deferral,
        expected_version: u32,
        audit: &AuditEntry,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .deferrals
            .get_mut(&deferral.id.0)
            .ok_or_else(|| StoreError::NotFound(deferral.id.clone()))?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict { id: deferral.id.clone(), expected_version });
        }
        *stored = deferral.clone();
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn delete(
        &self,
        id: &DeferralId,
        expected_version: u32,
        audit: &AuditEntry,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state.deferrals.get(&id.0).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict { id: id.clone(), expected_version });
        }
        state.deferrals.remove(&id.0);
        state.audit.retain(|entry| entry.deferral_id.as_ref() != Some(id));
        let mut detached = audit.clone();
        detached.deferral_id = None;
        state.audit.push(detached);
        Ok(())
    }

    async fn list_audit(&self, id: &DeferralId) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.state.read().await;
        let mut entries: Vec<AuditEntry> = state
            .audit
            .iter()
            .filter(|entry| entry.deferral_id.as_ref() == Some(id))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.occurred_at);
        Ok(entries)
    }
}
