use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::domain::content::DeferralContent;
use crate::domain::deferral::{Deferral, DeferralCodeGenerator, DeferralId, RandomCodeGenerator};
use crate::domain::signature::SignatureRole;
use crate::domain::user::{Identity, UserId, UserRole};
use crate::identity::IdentityDirectory;
use crate::lifecycle::engine::{self, LifecycleError, SignRequest};
use crate::lifecycle::states::{Audience, Transition, TransitionOutcome};
use crate::notify::{Notification, Notifier};
use crate::store::{DeferralFilter, DeferralStore, StoreError};

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Result of a successful `sign` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignReceipt {
    pub deferral: Deferral,
    /// True for exactly one signature per deferral: the one that completed it.
    pub completed_now: bool,
}

/// Runs lifecycle transitions against the collaborators.
///
/// Every transition reads the stored deferral, evaluates the rule in
/// [`engine`], and writes the result back conditioned on the version it read.
/// A concurrent writer makes that write fail with a conflict; the transition
/// is then re-read and re-evaluated, up to `max_conflict_retries` times.
/// Notifications go out after the write commits and never undo it.
pub struct LifecycleService<S, D, N, G = RandomCodeGenerator> {
    store: S,
    directory: D,
    notifier: N,
    codes: G,
    max_conflict_retries: u32,
}

impl<S, D, N> LifecycleService<S, D, N, RandomCodeGenerator>
where
    S: DeferralStore,
    D: IdentityDirectory,
    N: Notifier,
{
    pub fn new(store: S, directory: D, notifier: N) -> Self {
        Self {
            store,
            directory,
            notifier,
            codes: RandomCodeGenerator::default(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl<S, D, N, G> LifecycleService<S, D, N, G>
where
    S: DeferralStore,
    D: IdentityDirectory,
    N: Notifier,
    G: DeferralCodeGenerator,
{
    pub fn with_code_generator<C>(self, codes: C) -> LifecycleService<S, D, N, C>
    where
        C: DeferralCodeGenerator,
    {
        LifecycleService {
            store: self.store,
            directory: self.directory,
            notifier: self.notifier,
            codes,
            max_conflict_retries: self.max_conflict_retries,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub async fn create_draft(
        &self,
        actor_id: &UserId,
        content: DeferralContent,
    ) -> Result<Deferral, LifecycleError> {
        let transition = Transition::CreateDraft;
        let actor = self.resolve_actor(actor_id, transition).await?;
        let now = Utc::now();
        let id = DeferralId(Uuid::new_v4().to_string());
        let code = self.codes.next_code(now);

        let outcome = engine::create_draft(id, code, &actor, content, now)
            .map_err(|error| self.rejected(transition, None, actor_id, error))?;
        if let Err(error) = self.store.insert(&outcome.deferral, &outcome.audit).await {
            let id = &outcome.deferral.id;
            return Err(self.rejected(transition, Some(id), actor_id, error.into()));
        }

        self.applied(&outcome, actor_id);
        Ok(outcome.deferral)
    }

    pub async fn edit(
        &self,
        id: &DeferralId,
        actor_id: &UserId,
        content: DeferralContent,
    ) -> Result<Deferral, LifecycleError> {
        let outcome = self
            .transition(Transition::Edit, id, actor_id, |current, actor, now| {
                engine::edit(current, actor, content.clone(), now)
            })
            .await?;
        Ok(outcome.deferral)
    }

    pub async fn submit(&self, id: &DeferralId, actor_id: &UserId) -> Result<Deferral, LifecycleError> {
        let outcome = self.transition(Transition::Submit, id, actor_id, engine::submit).await?;
        Ok(outcome.deferral)
    }

    pub async fn resubmit(
        &self,
        id: &DeferralId,
        actor_id: &UserId,
        content: DeferralContent,
    ) -> Result<Deferral, LifecycleError> {
        let outcome = self
            .transition(Transition::Resubmit, id, actor_id, |current, actor, now| {
                engine::resubmit(current, actor, content.clone(), now)
            })
            .await?;
        Ok(outcome.deferral)
    }

    pub async fn start_review(
        &self,
        id: &DeferralId,
        actor_id: &UserId,
    ) -> Result<Deferral, LifecycleError> {
        let outcome =
            self.transition(Transition::StartReview, id, actor_id, engine::start_review).await?;
        Ok(outcome.deferral)
    }

    pub async fn review_approve(
        &self,
        id: &DeferralId,
        actor_id: &UserId,
        comments: Option<String>,
        required_signatures: Vec<SignatureRole>,
    ) -> Result<Deferral, LifecycleError> {
        let outcome = self
            .transition(Transition::ReviewApprove, id, actor_id, |current, actor, now| {
                engine::review_approve(
                    current,
                    actor,
                    comments.clone(),
                    required_signatures.clone(),
                    now,
                )
            })
            .await?;
        Ok(outcome.deferral)
    }

    pub async fn review_return(
        &self,
        id: &DeferralId,
        actor_id: &UserId,
        comments: &str,
    ) -> Result<Deferral, LifecycleError> {
        let outcome = self
            .transition(Transition::ReviewReturn, id, actor_id, |current, actor, now| {
                engine::review_return(current, actor, comments, now)
            })
            .await?;
        Ok(outcome.deferral)
    }

    pub async fn sign(
        &self,
        id: &DeferralId,
        actor_id: &UserId,
        request: SignRequest,
    ) -> Result<SignReceipt, LifecycleError> {
        let outcome = self
            .transition(Transition::Sign, id, actor_id, |current, actor, now| {
                engine::sign(current, actor, request.clone(), now)
            })
            .await?;
        Ok(SignReceipt { deferral: outcome.deferral, completed_now: outcome.completed_now })
    }

    pub async fn delete_draft(&self, id: &DeferralId, actor_id: &UserId) -> Result<(), LifecycleError> {
        let transition = Transition::Delete;
        let actor = self.resolve_actor(actor_id, transition).await?;
        let mut conflicts = 0;
        loop {
            let current = self.load(id, actor_id, transition).await?;
            let audit = engine::delete_draft(&current, &actor, Utc::now())
                .map_err(|error| self.rejected(transition, Some(id), actor_id, error))?;

            match self.store.delete(id, current.version, &audit).await {
                Ok(()) => {
                    info!(
                        event_name = "lifecycle.transition.applied",
                        deferral_id = %id,
                        actor_id = %actor_id,
                        transition = transition.as_str(),
                        from = current.status.as_str(),
                        "draft deferral deleted"
                    );
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) if conflicts < self.max_conflict_retries => {
                    conflicts += 1;
                    self.retrying(transition, id, conflicts);
                }
                Err(error) => return Err(self.rejected(transition, Some(id), actor_id, error.into())),
            }
        }
    }

    pub async fn get(&self, id: &DeferralId) -> Result<Deferral, LifecycleError> {
        self.store.find(id).await?.ok_or_else(|| LifecycleError::NotFound(id.clone()))
    }

    pub async fn list(&self, filter: &DeferralFilter) -> Result<Vec<Deferral>, LifecycleError> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn audit_trail(&self, id: &DeferralId) -> Result<Vec<AuditEntry>, LifecycleError> {
        self.get(id).await?;
        Ok(self.store.list_audit(id).await?)
    }

    async fn transition<F>(
        &self,
        transition: Transition,
        id: &DeferralId,
        actor_id: &UserId,
        rule: F,
    ) -> Result<TransitionOutcome, LifecycleError>
    where
        F: Fn(&Deferral, &Identity, DateTime<Utc>) -> Result<TransitionOutcome, LifecycleError>,
    {
        let actor = self.resolve_actor(actor_id, transition).await?;
        let mut conflicts = 0;
        loop {
            let current = self.load(id, actor_id, transition).await?;
            let outcome = rule(&current, &actor, Utc::now())
                .map_err(|error| self.rejected(transition, Some(id), actor_id, error))?;

            match self.store.update(&outcome.deferral, current.version, &outcome.audit).await {
                Ok(()) => {
                    self.applied(&outcome, actor_id);
                    self.dispatch(&outcome).await;
                    return Ok(outcome);
                }
                Err(StoreError::Conflict { .. }) if conflicts < self.max_conflict_retries => {
                    conflicts += 1;
                    self.retrying(transition, id, conflicts);
                }
                Err(error) => return Err(self.rejected(transition, Some(id), actor_id, error.into())),
            }
        }
    }

    async fn resolve_actor(
        &self,
        actor_id: &UserId,
        transition: Transition,
    ) -> Result<Identity, LifecycleError> {
        let found = self
            .directory
            .find_user(actor_id)
            .await
            .map_err(|error| self.rejected(transition, None, actor_id, error.into()))?;
        found.ok_or_else(|| {
            self.rejected(
                transition,
                None,
                actor_id,
                LifecycleError::Unauthorized {
                    actor_id: actor_id.clone(),
                    reason: "unknown user".to_owned(),
                },
            )
        })
    }

    async fn load(
        &self,
        id: &DeferralId,
        actor_id: &UserId,
        transition: Transition,
    ) -> Result<Deferral, LifecycleError> {
        let found = self
            .store
            .find(id)
            .await
            .map_err(|error| self.rejected(transition, Some(id), actor_id, error.into()))?;
        found.ok_or_else(|| {
            self.rejected(transition, Some(id), actor_id, LifecycleError::NotFound(id.clone()))
        })
    }

    async fn dispatch(&self, outcome: &TransitionOutcome) {
        let deferral = &outcome.deferral;
        for intent in &outcome.notifications {
            let recipients = match self.recipients(&intent.audience, deferral).await {
                Ok(recipients) => recipients,
                Err(error) => {
                    warn!(
                        event_name = "lifecycle.notify.failed",
                        deferral_id = %deferral.id,
                        kind = intent.kind.as_str(),
                        error = %error,
                        "could not resolve notification recipients"
                    );
                    continue;
                }
            };
            if recipients.is_empty() {
                debug!(
                    deferral_id = %deferral.id,
                    kind = intent.kind.as_str(),
                    "no recipients for notification"
                );
                continue;
            }

            let notification = Notification {
                recipients,
                deferral_id: deferral.id.clone(),
                kind: intent.kind,
                message: intent.message.clone(),
            };
            if let Err(error) = self.notifier.notify(notification).await {
                warn!(
                    event_name = "lifecycle.notify.failed",
                    deferral_id = %deferral.id,
                    kind = intent.kind.as_str(),
                    error = %error,
                    "notification dropped after committed transition"
                );
            }
        }
    }

    async fn recipients(
        &self,
        audience: &Audience,
        deferral: &Deferral,
    ) -> Result<Vec<UserId>, StoreError> {
        match audience {
            Audience::Initiator => Ok(vec![deferral.initiator_id.clone()]),
            Audience::Reliability => Ok(self
                .directory
                .users_with_role(UserRole::Reliability)
                .await?
                .into_iter()
                .map(|user| user.id)
                .collect()),
            Audience::SignatureHolders(roles) => {
                let mut holders = BTreeSet::new();
                for role in roles {
                    for user in self.directory.holders_of(*role).await? {
                        holders.insert(user.id);
                    }
                }
                Ok(holders.into_iter().collect())
            }
        }
    }

    fn applied(&self, outcome: &TransitionOutcome, actor_id: &UserId) {
        info!(
            event_name = "lifecycle.transition.applied",
            deferral_id = %outcome.deferral.id,
            code = %outcome.deferral.code.0,
            actor_id = %actor_id,
            transition = outcome.transition.as_str(),
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            version = outcome.deferral.version,
            completed_now = outcome.completed_now,
            "deferral transition applied"
        );
    }

    fn rejected(
        &self,
        transition: Transition,
        id: Option<&DeferralId>,
        actor_id: &UserId,
        error: LifecycleError,
    ) -> LifecycleError {
        let deferral_id = id.map(|id| id.0.as_str()).unwrap_or("-");
        if error.is_business_rule() {
            info!(
                event_name = "lifecycle.transition.rejected",
                deferral_id,
                actor_id = %actor_id,
                transition = transition.as_str(),
                field = error.field().unwrap_or("-"),
                error = %error,
                "deferral transition rejected"
            );
        } else {
            warn!(
                event_name = "lifecycle.transition.failed",
                deferral_id,
                actor_id = %actor_id,
                transition = transition.as_str(),
                error = %error,
                "deferral transition failed in storage"
            );
        }
        error
    }

    fn retrying(&self, transition: Transition, id: &DeferralId, attempt: u32) {
        debug!(
            event_name = "lifecycle.transition.retry",
            deferral_id = %id,
            transition = transition.as_str(),
            attempt,
            max_attempts = self.max_conflict_retries,
            "version conflict, re-reading deferral"
        );
    }
}
