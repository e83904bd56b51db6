use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::domain::deferral::{Deferral, DeferralStatus};
use crate::domain::signature::SignatureRole;
use crate::notify::NotificationKind;

/// Named transitions. Every status change goes through exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    CreateDraft,
    Edit,
    Submit,
    Resubmit,
    StartReview,
    ReviewApprove,
    ReviewReturn,
    Sign,
    Delete,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDraft => "create_draft",
            Self::Edit => "edit",
            Self::Submit => "submit",
            Self::Resubmit => "resubmit",
            Self::StartReview => "start_review",
            Self::ReviewApprove => "review_approve",
            Self::ReviewReturn => "review_return",
            Self::Sign => "sign",
            Self::Delete => "delete",
        }
    }

    /// Statuses the transition may start from.
    pub fn allowed_from(&self) -> &'static [DeferralStatus] {
        use DeferralStatus::{
            Draft, PartiallyApproved, PendingSignatures, Returned, Submitted, UnderReview,
        };
        match self {
            Self::CreateDraft => &[],
            Self::Edit => &[Draft, Returned],
            Self::Submit => &[Draft],
            Self::Resubmit => &[Returned, Draft],
            Self::StartReview => &[Submitted],
            Self::ReviewApprove | Self::ReviewReturn => &[Submitted, UnderReview],
            Self::Sign => &[PendingSignatures, PartiallyApproved],
            Self::Delete => &[Draft],
        }
    }

    pub fn permits(&self, status: DeferralStatus) -> bool {
        self.allowed_from().contains(&status)
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who should hear about a transition. The service resolves audiences to user
/// ids through the identity directory after the transition commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Audience {
    Initiator,
    Reliability,
    SignatureHolders(Vec<SignatureRole>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub audience: Audience,
    pub kind: NotificationKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub transition: Transition,
    pub from: DeferralStatus,
    pub to: DeferralStatus,
    /// The deferral as it must be persisted, version already bumped.
    pub deferral: Deferral,
    pub audit: AuditEntry,
    pub notifications: Vec<NotificationIntent>,
    /// Set by the signature that closed the required set.
    pub completed_now: bool,
}
