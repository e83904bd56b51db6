use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use deferra_core::domain::content::{
    Criticality, DeferralContent, Department, Likelihood, MitigationAction, RiskAssessment,
    RiskItem, Severity,
};
use deferra_core::domain::deferral::{
    Deferral, DeferralCode, DeferralCodeGenerator, DeferralId, DeferralStatus,
};
use deferra_core::domain::signature::{RequiredSignatures, SignatureRole, SignatureSet};
use deferra_core::domain::user::{Identity, UserId, UserRole};
use deferra_core::lifecycle::{LifecycleError, LifecycleService, SignRequest};
use deferra_core::store::{DeferralFilter, DeferralStore};

use crate::connection::DbPool;
use crate::repositories::{
    RepositoryError, SqlDeferralStore, SqlIdentityDirectory, SqlNotificationOutbox,
};

pub const DEMO_DEFERRAL_CODE: &str = "DEF-2026-000001";
pub const DEMO_INITIATOR_ID: &str = "usr-initiator";
pub const DEMO_RELIABILITY_ID: &str = "usr-reliability";
pub const DEMO_HEAD_ID: &str = "usr-head";
pub const DEMO_DFGM_ID: &str = "usr-dfgm";

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("demo workflow failed: {0}")]
    Lifecycle(#[from] LifecycleError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub users_seeded: usize,
    pub deferral_id: String,
    pub deferral_code: String,
    pub status: DeferralStatus,
    /// False when the demo deferral was already present.
    pub created: bool,
}

/// Deterministic users covering every role the workflow needs.
pub fn demo_users() -> Vec<Identity> {
    vec![
        user(
            DEMO_INITIATOR_ID,
            "Amal Haddad",
            Department::Instrument,
            "Instrument Engineer",
            UserRole::User,
            &[],
        ),
        user(
            DEMO_RELIABILITY_ID,
            "Rana Saleh",
            Department::Reliability,
            "Reliability Engineer",
            UserRole::Reliability,
            &[],
        ),
        user(
            "usr-reliability-2",
            "Omar Khalil",
            Department::Reliability,
            "Reliability Lead",
            UserRole::Reliability,
            &[],
        ),
        user(
            DEMO_HEAD_ID,
            "Layla Nasser",
            Department::Instrument,
            "Instrument Department Head",
            UserRole::Approver,
            &[SignatureRole::DepartmentHead],
        ),
        user(
            DEMO_DFGM_ID,
            "Karim Aziz",
            Department::Production,
            "Deputy Field General Manager",
            UserRole::Approver,
            &[SignatureRole::Dfgm, SignatureRole::Sod],
        ),
        user(
            "usr-admin",
            "Site Administrator",
            Department::Reliability,
            "System Administrator",
            UserRole::Admin,
            &[],
        ),
    ]
}

pub fn demo_content() -> DeferralContent {
    DeferralContent {
        initiator_name: "Amal Haddad".to_owned(),
        job_title: "Instrument Engineer".to_owned(),
        department: Department::Instrument,
        work_order_numbers: vec!["WO-50231".to_owned(), "WO-50232".to_owned()],
        equipment_full_codes: vec!["FT-2204".to_owned()],
        equipment_description: "Fuel gas flow transmitter".to_owned(),
        equipment_safety_criticality: Some(Criticality::High),
        task_criticality: Some(Criticality::Medium),
        deferral_request_date: date(2026, 3, 2),
        current_lafd: Some(date(2026, 3, 20)),
        deferred_to_new_lafd: date(2026, 6, 15),
        description: "Six-monthly loop check of FT-2204".to_owned(),
        justification: "Unit shutdown window moved to June".to_owned(),
        consequence: "Undetected drift on fuel gas metering".to_owned(),
        risk_assessment: Some(RiskAssessment {
            people: risk(Severity::Low, Likelihood::Rare, "No personnel exposure"),
            asset: risk(Severity::Medium, Likelihood::Unlikely, "Redundant FT-2205 in service"),
            environment: risk(Severity::Low, Likelihood::Rare, "Closed system"),
            reputation: risk(Severity::Low, Likelihood::Rare, "Internal metering only"),
        }),
        mitigations: vec![MitigationAction {
            action_no: 1,
            action: "Compare FT-2204 against FT-2205 each shift".to_owned(),
            owner: "Control room operator".to_owned(),
            date: Some(date(2026, 3, 21)),
            comments: String::new(),
        }],
        attachments: Vec::new(),
    }
}

/// A stored-shape draft for repository tests; lifecycle rules are not applied.
pub fn demo_deferral() -> Deferral {
    let created_at = at(2026, 3, 2, 7, 30);
    Deferral {
        id: DeferralId("dfr-demo-0001".to_owned()),
        code: DeferralCode(DEMO_DEFERRAL_CODE.to_owned()),
        initiator_id: UserId(DEMO_INITIATOR_ID.to_owned()),
        content: demo_content(),
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
        created_at,
        updated_at: created_at,
    }
}

struct DemoCode;

impl DeferralCodeGenerator for DemoCode {
    fn next_code(&self, _now: DateTime<Utc>) -> DeferralCode {
        DeferralCode(DEMO_DEFERRAL_CODE.to_owned())
    }
}

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// Upserts the demo users and walks one deferral from draft to fully approved
    /// through the lifecycle service. Running it twice leaves the deferral alone.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, SeedError> {
        let directory = SqlIdentityDirectory::new(pool.clone());
        let users = demo_users();
        for user in &users {
            directory.save(user).await?;
        }

        let store = SqlDeferralStore::new(pool.clone());
        let initiator = UserId(DEMO_INITIATOR_ID.to_owned());
        if let Some(existing) = find_demo_deferral(&store, &initiator).await? {
            return Ok(SeedResult {
                users_seeded: users.len(),
                deferral_id: existing.id.0,
                deferral_code: existing.code.0,
                status: existing.status,
                created: false,
            });
        }

        let service =
            LifecycleService::new(store, directory, SqlNotificationOutbox::new(pool.clone()))
                .with_code_generator(DemoCode);

        let draft = service.create_draft(&initiator, demo_content()).await?;
        service.submit(&draft.id, &initiator).await?;

        let reliability = UserId(DEMO_RELIABILITY_ID.to_owned());
        service.start_review(&draft.id, &reliability).await?;
        service
            .review_approve(
                &draft.id,
                &reliability,
                Some("Redundant transmitter covers the gap".to_owned()),
                vec![SignatureRole::DepartmentHead, SignatureRole::Dfgm],
            )
            .await?;

        service
            .sign(
                &draft.id,
                &UserId(DEMO_HEAD_ID.to_owned()),
                SignRequest {
                    role: SignatureRole::DepartmentHead,
                    signer_name: "Layla Nasser".to_owned(),
                    comments: None,
                },
            )
            .await?;
        let receipt = service
            .sign(
                &draft.id,
                &UserId(DEMO_DFGM_ID.to_owned()),
                SignRequest {
                    role: SignatureRole::Dfgm,
                    signer_name: "Karim Aziz".to_owned(),
                    comments: Some("Approved until June shutdown".to_owned()),
                },
            )
            .await?;

        Ok(SeedResult {
            users_seeded: users.len(),
            deferral_id: receipt.deferral.id.0,
            deferral_code: receipt.deferral.code.0,
            status: receipt.deferral.status,
            created: true,
        })
    }
}

async fn find_demo_deferral(
    store: &SqlDeferralStore,
    initiator: &UserId,
) -> Result<Option<Deferral>, LifecycleError> {
    let filter = DeferralFilter { initiator_id: Some(initiator.clone()), ..Default::default() };
    let deferrals = store.list(&filter).await?;
    Ok(deferrals.into_iter().find(|deferral| deferral.code.0 == DEMO_DEFERRAL_CODE))
}

fn user(
    id: &str,
    name: &str,
    department: Department,
    position: &str,
    role: UserRole,
    signature_roles: &[SignatureRole],
) -> Identity {
    let local = name.to_ascii_lowercase().replace(' ', ".");
    Identity {
        id: UserId(id.to_owned()),
        name: name.to_owned(),
        email: format!("{local}@example.com"),
        department: Some(department),
        position: Some(position.to_owned()),
        role,
        signature_roles: signature_roles.iter().copied().collect::<BTreeSet<_>>(),
    }
}

fn risk(severity: Severity, likelihood: Likelihood, justification: &str) -> RiskItem {
    RiskItem { severity, likelihood, justification: justification.to_owned() }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use deferra_core::domain::deferral::{DeferralId, DeferralStatus};
    use deferra_core::domain::signature::SignatureRole;
    use deferra_core::domain::user::UserId;
    use deferra_core::store::DeferralStore;

    use super::{demo_content, demo_users, DemoSeedDataset, DEMO_DEFERRAL_CODE, DEMO_INITIATOR_ID};
    use crate::repositories::{SqlDeferralStore, SqlNotificationOutbox, INBOX_LIMIT};
    use crate::{connect_with_settings, migrations};

    type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

    #[test]
    fn demo_users_have_unique_ids_and_emails() {
        let users = demo_users();
        let ids: std::collections::BTreeSet<_> = users.iter().map(|user| &user.id).collect();
        let emails: std::collections::BTreeSet<_> = users.iter().map(|user| &user.email).collect();
        assert_eq!(ids.len(), users.len());
        assert_eq!(emails.len(), users.len());
        assert!(demo_content().validate().is_ok());
    }

    #[tokio::test]
    async fn seed_walks_demo_deferral_to_fully_approved() -> TestResult {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await?;
        migrations::run_pending(&pool).await?;

        let first = DemoSeedDataset::load(&pool).await?;
        assert!(first.created);
        assert_eq!(first.status, DeferralStatus::FullyApproved);
        assert_eq!(first.deferral_code, DEMO_DEFERRAL_CODE);

        let store = SqlDeferralStore::new(pool.clone());
        let id = DeferralId(first.deferral_id.clone());
        let stored = store.find(&id).await?.ok_or("seeded deferral")?;
        assert!(stored.signatures.contains(SignatureRole::DepartmentHead));
        assert!(stored.signatures.contains(SignatureRole::Dfgm));
        assert_eq!(store.list_audit(&id).await?.len(), 6);

        let inbox = SqlNotificationOutbox::new(pool.clone())
            .list_for_user(&UserId(DEMO_INITIATOR_ID.to_owned()), INBOX_LIMIT)
            .await?;
        assert!(!inbox.notifications.is_empty());

        let second = DemoSeedDataset::load(&pool).await?;
        assert!(!second.created);
        assert_eq!(second.deferral_id, first.deferral_id);
        Ok(())
    }
}
