use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::deferral::DeferralId;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    DeferralCreated,
    DeferralUpdated,
    DeferralSubmitted,
    DeferralResubmitted,
    ReviewStarted,
    DeferralApproved,
    DeferralReturned,
    SignatureAdded,
    DeferralDeleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeferralCreated => "DEFERRAL_CREATED",
            Self::DeferralUpdated => "DEFERRAL_UPDATED",
            Self::DeferralSubmitted => "DEFERRAL_SUBMITTED",
            Self::DeferralResubmitted => "DEFERRAL_RESUBMITTED",
            Self::ReviewStarted => "REVIEW_STARTED",
            Self::DeferralApproved => "DEFERRAL_APPROVED",
            Self::DeferralReturned => "DEFERRAL_RETURNED",
            Self::SignatureAdded => "SIGNATURE_ADDED",
            Self::DeferralDeleted => "DEFERRAL_DELETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEFERRAL_CREATED" => Some(Self::DeferralCreated),
            "DEFERRAL_UPDATED" => Some(Self::DeferralUpdated),
            "DEFERRAL_SUBMITTED" => Some(Self::DeferralSubmitted),
            "DEFERRAL_RESUBMITTED" => Some(Self::DeferralResubmitted),
            "REVIEW_STARTED" => Some(Self::ReviewStarted),
            "DEFERRAL_APPROVED" => Some(Self::DeferralApproved),
            "DEFERRAL_RETURNED" => Some(Self::DeferralReturned),
            "SIGNATURE_ADDED" => Some(Self::SignatureAdded),
            "DEFERRAL_DELETED" => Some(Self::DeferralDeleted),
            _ => None,
        }
    }
}

/// One row of the deferral audit trail. Stores commit it together with the
/// state change it describes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    /// `None` once the deferral it described has been deleted.
    pub deferral_id: Option<DeferralId>,
    pub actor_id: UserId,
    pub action: AuditAction,
    pub details: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        deferral_id: &DeferralId,
        actor_id: &UserId,
        action: AuditAction,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            deferral_id: Some(deferral_id.clone()),
            actor_id: actor_id.clone(),
            action,
            details: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
