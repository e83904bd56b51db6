//! Pure transition rules.
//!
//! Each function takes the deferral as currently stored, the resolved actor and
//! the transition inputs, and either rejects the call or returns the complete
//! next state together with the audit entry and notifications it implies.
//! Nothing is persisted here; the service commits outcomes with a versioned
//! write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditAction, AuditEntry};
use crate::domain::content::{ContentError, DeferralContent};
use crate::domain::deferral::{Deferral, DeferralCode, DeferralId, DeferralStatus};
use crate::domain::signature::{RequiredSignatures, Signature, SignatureRole, SignatureSet};
use crate::domain::user::{Identity, UserId};
use crate::ledger::{self, SignatureError};
use crate::lifecycle::states::{Audience, NotificationIntent, Transition, TransitionOutcome};
use crate::notify::NotificationKind;
use crate::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("deferral `{0}` not found")]
    NotFound(DeferralId),
    #[error("user `{actor_id}` is not allowed to do this: {reason}")]
    Unauthorized { actor_id: UserId, reason: String },
    #[error("cannot {transition} a deferral in status `{status}`")]
    InvalidState { transition: Transition, status: DeferralStatus },
    #[error("signature role `{role}` has already signed this deferral")]
    AlreadySigned { role: SignatureRole },
    #[error("signature role `{role}` is not required for this deferral")]
    SignatureNotRequired { role: SignatureRole },
    #[error("at least one signature role must be selected")]
    NoSignaturesSelected,
    #[error("signature role `{role}` was selected more than once")]
    DuplicateSignatureRole { role: SignatureRole },
    #[error("comments are required when returning a deferral")]
    EmptyComments,
    #[error("invalid `{field}`: {reason}")]
    InvalidContent { field: &'static str, reason: String },
    #[error(transparent)]
    Storage(StoreError),
}

impl LifecycleError {
    /// The input field a business-rule rejection points at. Storage failures
    /// have none.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::NotFound(_) => Some("deferral_id"),
            Self::Unauthorized { .. } => Some("actor_id"),
            Self::InvalidState { .. } => Some("status"),
            Self::AlreadySigned { .. } | Self::SignatureNotRequired { .. } => Some("role"),
            Self::NoSignaturesSelected | Self::DuplicateSignatureRole { .. } => {
                Some("required_signatures")
            }
            Self::EmptyComments => Some("comments"),
            Self::InvalidContent { field, .. } => Some(*field),
            Self::Storage(_) => None,
        }
    }

    pub fn is_business_rule(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// A deferral that vanished under a write is the business `NotFound`, not a
/// storage failure.
impl From<StoreError> for LifecycleError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

impl From<SignatureError> for LifecycleError {
    fn from(value: SignatureError) -> Self {
        match value {
            SignatureError::NotRequired { role } => Self::SignatureNotRequired { role },
            SignatureError::AlreadySigned { role } => Self::AlreadySigned { role },
        }
    }
}

impl From<ContentError> for LifecycleError {
    fn from(value: ContentError) -> Self {
        Self::InvalidContent { field: value.field, reason: value.reason }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub role: SignatureRole,
    pub signer_name: String,
    #[serde(default)]
    pub comments: Option<String>,
}

pub fn create_draft(
    id: DeferralId,
    code: DeferralCode,
    initiator: &Identity,
    content: DeferralContent,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, LifecycleError> {
    content.validate()?;

    let deferral = Deferral {
        id,
        code,
        initiator_id: initiator.id.clone(),
        content,
        status: DeferralStatus::Draft,
        required_signatures: RequiredSignatures::default(),
        signatures: SignatureSet::default(),
        submitted_at: None,
        reviewed_by: None,
        reviewed_at: None,
        review_comments: None,
        approved_by: None,
        approval_date: None,
        version: 1,
        created_at: now,
        updated_at: now,
    };
    let audit = AuditEntry::new(&deferral.id, &initiator.id, AuditAction::DeferralCreated, now)
        .with_detail("code", deferral.code.0.clone());

    Ok(TransitionOutcome {
        transition: Transition::CreateDraft,
        from: DeferralStatus::Draft,
        to: DeferralStatus::Draft,
        deferral,
        audit,
        notifications: Vec::new(),
        completed_now: false,
    })
}

pub fn edit(
    current: &Deferral,
    actor: &Identity,
    content: DeferralContent,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, LifecycleError> {
    let transition = Transition::Edit;
    require_initiator(current, actor)?;
    require_status(transition, current)?;
    content.validate()?;

    let changes = content.changed_fields(&current.content).join(",");
    let mut next = advance(current, current.status, now);
    next.content = content;

    let audit = AuditEntry::new(&current.id, &actor.id, AuditAction::DeferralUpdated, now)
        .with_detail("status", current.status.as_str())
        .with_detail("changes", changes);
    Ok(outcome(transition, current, next, audit, Vec::new()))
}

pub fn submit(
    current: &Deferral,
    actor: &Identity,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, LifecycleError> {
    let transition = Transition::Submit;
    require_initiator(current, actor)?;
    require_status(transition, current)?;
    current.content.validate()?;

    let mut next = advance(current, DeferralStatus::Submitted, now);
    next.submitted_at = Some(now);

    let audit = status_audit(current, &next, actor, AuditAction::DeferralSubmitted, now);
    let notifications = vec![NotificationIntent {
        audience: Audience::Reliability,
        kind: NotificationKind::NewSubmission,
        message: format!(
            "New deferral {} submitted by {} from {} department",
            current.code.0,
            current.content.initiator_name,
            current.content.department.as_str()
        ),
    }];
    Ok(outcome(transition, current, next, audit, notifications))
}

/// Applies the edited content and sends the deferral back for review. The
/// previous review outcome is cleared; the required signature selection is
/// left for the next review to replace.
pub fn resubmit(
    current: &Deferral,
    actor: &Identity,
    content: DeferralContent,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, LifecycleError> {
    let transition = Transition::Resubmit;
    require_initiator(current, actor)?;
    require_status(transition, current)?;
    content.validate()?;

    let changes = content.changed_fields(&current.content).join(",");
    let mut next = advance(current, DeferralStatus::Submitted, now);
    next.content = content;
    next.submitted_at = Some(now);
    next.reviewed_at = None;
    next.reviewed_by = None;
    next.review_comments = None;

    let audit = status_audit(current, &next, actor, AuditAction::DeferralResubmitted, now)
        .with_detail("changes", changes);
    let notifications = vec![NotificationIntent {
        audience: Audience::Reliability,
        kind: NotificationKind::Resubmitted,
        message: format!(
            "Deferral {} has been resubmitted by {}",
            next.code.0, next.content.initiator_name
        ),
    }];
    Ok(outcome(transition, current, next, audit, notifications))
}

pub fn start_review(
    current: &Deferral,
    actor: &Identity,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, LifecycleError> {
    let transition = Transition::StartReview;
    require_reviewer(actor)?;
    require_status(transition, current)?;

    let next = advance(current, DeferralStatus::UnderReview, now);
    let audit = status_audit(current, &next, actor, AuditAction::ReviewStarted, now);
    Ok(outcome(transition, current, next, audit, Vec::new()))
}

pub fn review_approve(
    current: &Deferral,
    actor: &Identity,
    comments: Option<String>,
    selection: Vec<SignatureRole>,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, LifecycleError> {
    let transition = Transition::ReviewApprove;
    require_reviewer(actor)?;
    require_status(transition, current)?;
    if selection.is_empty() {
        return Err(LifecycleError::NoSignaturesSelected);
    }
    let required = RequiredSignatures::new(selection)
        .map_err(|duplicate| LifecycleError::DuplicateSignatureRole { role: duplicate.0 })?;

    let mut next = advance(current, DeferralStatus::PendingSignatures, now);
    next.reviewed_at = Some(now);
    next.reviewed_by = Some(actor.id.clone());
    next.review_comments = comments.and_then(non_blank);
    next.required_signatures = required.clone();
    next.signatures = SignatureSet::default();

    let roles = required.iter().map(|role| role.as_str()).collect::<Vec<_>>().join(",");
    let audit = status_audit(current, &next, actor, AuditAction::DeferralApproved, now)
        .with_detail("required", roles);
    let notifications = vec![
        NotificationIntent {
            audience: Audience::Initiator,
            kind: NotificationKind::ReviewApproved,
            message: format!(
                "Your deferral {} has been approved and is pending signatures",
                current.code.0
            ),
        },
        NotificationIntent {
            audience: Audience::SignatureHolders(required.as_slice().to_vec()),
            kind: NotificationKind::SignatureRequired,
            message: format!("Deferral {} is awaiting your signature", current.code.0),
        },
    ];
    Ok(outcome(transition, current, next, audit, notifications))
}

pub fn review_return(
    current: &Deferral,
    actor: &Identity,
    comments: &str,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, LifecycleError> {
    let transition = Transition::ReviewReturn;
    require_reviewer(actor)?;
    require_status(transition, current)?;
    let comments = non_blank(comments.to_owned()).ok_or(LifecycleError::EmptyComments)?;

    let mut next = advance(current, DeferralStatus::Returned, now);
    next.reviewed_at = Some(now);
    next.reviewed_by = Some(actor.id.clone());
    next.review_comments = Some(comments.clone());

    let audit = status_audit(current, &next, actor, AuditAction::DeferralReturned, now)
        .with_detail("comments", comments);
    let notifications = vec![NotificationIntent {
        audience: Audience::Initiator,
        kind: NotificationKind::Returned,
        message: format!("Your deferral {} has been returned for revision", current.code.0),
    }];
    Ok(outcome(transition, current, next, audit, notifications))
}

/// Records the actor's signature for `request.role`. The signer's contact
/// details are copied from `actor` as it is right now.
pub fn sign(
    current: &Deferral,
    actor: &Identity,
    request: SignRequest,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, LifecycleError> {
    let transition = Transition::Sign;
    require_status(transition, current)?;
    if !actor.holds(request.role) {
        return Err(LifecycleError::Unauthorized {
            actor_id: actor.id.clone(),
            reason: format!("does not hold signature role `{}`", request.role),
        });
    }
    let signer_name = non_blank(request.signer_name).ok_or_else(|| {
        LifecycleError::InvalidContent {
            field: "signer_name",
            reason: "must not be blank".to_owned(),
        }
    })?;

    let signature = Signature {
        role: request.role,
        signer_id: actor.id.clone(),
        signer_name: signer_name.clone(),
        signer_email: actor.email.clone(),
        signer_department: actor.department,
        signer_position: actor.position.clone(),
        signed_at: now,
        comments: request.comments.and_then(non_blank),
    };
    let recorded =
        ledger::record_signature(&current.required_signatures, &current.signatures, signature)?;

    let mut next = advance(current, recorded.status, now);
    next.signatures = recorded.signatures;
    if recorded.completed_now {
        next.approved_by = Some(actor.id.clone());
        next.approval_date = Some(now);
    }

    let audit = AuditEntry::new(&current.id, &actor.id, AuditAction::SignatureAdded, now)
        .with_detail("role", request.role.as_str())
        .with_detail("name", signer_name.clone())
        .with_detail("all_signed", recorded.completed_now.to_string());
    let notification = if recorded.completed_now {
        NotificationIntent {
            audience: Audience::Initiator,
            kind: NotificationKind::FullyApproved,
            message: format!("Your deferral {} has been fully approved", current.code.0),
        }
    } else {
        NotificationIntent {
            audience: Audience::Initiator,
            kind: NotificationKind::SignatureAdded,
            message: format!("{signer_name} has signed your deferral {}", current.code.0),
        }
    };

    let mut result = outcome(transition, current, next, audit, vec![notification]);
    result.completed_now = recorded.completed_now;
    Ok(result)
}

/// Authorizes removal of a draft and returns the audit entry that outlives it.
pub fn delete_draft(
    current: &Deferral,
    actor: &Identity,
    now: DateTime<Utc>,
) -> Result<AuditEntry, LifecycleError> {
    require_initiator(current, actor)?;
    require_status(Transition::Delete, current)?;

    Ok(AuditEntry::new(&current.id, &actor.id, AuditAction::DeferralDeleted, now)
        .with_detail("code", current.code.0.clone()))
}

fn require_initiator(current: &Deferral, actor: &Identity) -> Result<(), LifecycleError> {
    if current.initiator_id == actor.id {
        return Ok(());
    }
    Err(LifecycleError::Unauthorized {
        actor_id: actor.id.clone(),
        reason: "only the initiator may change this deferral".to_owned(),
    })
}

fn require_reviewer(actor: &Identity) -> Result<(), LifecycleError> {
    if actor.role.can_review() {
        return Ok(());
    }
    Err(LifecycleError::Unauthorized {
        actor_id: actor.id.clone(),
        reason: format!("role `{}` cannot review deferrals", actor.role.as_str()),
    })
}

fn require_status(transition: Transition, current: &Deferral) -> Result<(), LifecycleError> {
    if transition.permits(current.status) {
        return Ok(());
    }
    Err(LifecycleError::InvalidState { transition, status: current.status })
}

fn advance(current: &Deferral, status: DeferralStatus, now: DateTime<Utc>) -> Deferral {
    let mut next = current.clone();
    next.status = status;
    next.version = current.version + 1;
    next.updated_at = now;
    next
}

fn status_audit(
    current: &Deferral,
    next: &Deferral,
    actor: &Identity,
    action: AuditAction,
    now: DateTime<Utc>,
) -> AuditEntry {
    AuditEntry::new(&current.id, &actor.id, action, now)
        .with_detail("from", current.status.as_str())
        .with_detail("to", next.status.as_str())
}

fn outcome(
    transition: Transition,
    current: &Deferral,
    next: Deferral,
    audit: AuditEntry,
    notifications: Vec<NotificationIntent>,
) -> TransitionOutcome {
    TransitionOutcome {
        transition,
        from: current.status,
        to: next.status,
        deferral: next,
        audit,
        notifications,
        completed_now: false,
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
