use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::deferral::DeferralId;
use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewSubmission,
    Resubmitted,
    ReviewApproved,
    Returned,
    SignatureRequired,
    SignatureAdded,
    FullyApproved,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewSubmission => "new_submission",
            Self::Resubmitted => "resubmitted",
            Self::ReviewApproved => "review_approved",
            Self::Returned => "returned",
            Self::SignatureRequired => "signature_required",
            Self::SignatureAdded => "signature_added",
            Self::FullyApproved => "fully_approved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new_submission" => Some(Self::NewSubmission),
            "resubmitted" => Some(Self::Resubmitted),
            "review_approved" => Some(Self::ReviewApproved),
            "returned" => Some(Self::Returned),
            "signature_required" => Some(Self::SignatureRequired),
            "signature_added" => Some(Self::SignatureAdded),
            "fully_approved" => Some(Self::FullyApproved),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipients: Vec<UserId>,
    pub deferral_id: DeferralId,
    pub kind: NotificationKind,
    pub message: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Enqueues notifications after a transition has committed. Failures are
/// reported back to the caller, which logs them and moves on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sent_to(&self, user: &UserId) -> Vec<Notification> {
        self.sent().into_iter().filter(|notification| notification.recipients.contains(user)).collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}
