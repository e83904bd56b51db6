use deferra_core::domain::deferral::DeferralStatus;
use deferra_core::domain::signature::SignatureRole;
use deferra_core::domain::user::UserId;
use deferra_core::lifecycle::{LifecycleError, LifecycleService, SignRequest};
use deferra_core::notify::NotificationKind;
use deferra_db::fixtures::{demo_content, demo_users, DEMO_DFGM_ID, DEMO_HEAD_ID, DEMO_INITIATOR_ID};
use deferra_db::repositories::INBOX_LIMIT;
use deferra_db::{
    connect_with_settings, migrations, DbPool, SqlDeferralStore, SqlIdentityDirectory,
    SqlNotificationOutbox,
};

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;
type SqlService = LifecycleService<SqlDeferralStore, SqlIdentityDirectory, SqlNotificationOutbox>;

async fn setup() -> TestResult<(DbPool, SqlService)> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await?;
    migrations::run_pending(&pool).await?;
    let directory = SqlIdentityDirectory::new(pool.clone());
    for user in demo_users() {
        directory.save(&user).await?;
    }
    let service = LifecycleService::new(
        SqlDeferralStore::new(pool.clone()),
        directory,
        SqlNotificationOutbox::new(pool.clone()),
    );
    Ok((pool, service))
}

fn user(id: &str) -> UserId {
    UserId(id.to_owned())
}

fn sign_request(role: SignatureRole, name: &str) -> SignRequest {
    SignRequest { role, signer_name: name.to_owned(), comments: None }
}

#[tokio::test]
async fn submission_reaches_every_reliability_inbox() -> TestResult {
    let (pool, service) = setup().await?;
    let initiator = user(DEMO_INITIATOR_ID);

    let draft = service.create_draft(&initiator, demo_content()).await?;
    let submitted = service.submit(&draft.id, &initiator).await?;
    assert_eq!(submitted.status, DeferralStatus::Submitted);
    assert_eq!(submitted.version, 2);

    let outbox = SqlNotificationOutbox::new(pool);
    for reliability in ["usr-reliability", "usr-reliability-2"] {
        let inbox = outbox.list_for_user(&user(reliability), INBOX_LIMIT).await?;
        assert_eq!(inbox.notifications.len(), 1);
        assert_eq!(inbox.notifications[0].kind, NotificationKind::NewSubmission);
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_signatures_both_land_and_complete_once() -> TestResult {
    let (_pool, service) = setup().await?;
    let initiator = user(DEMO_INITIATOR_ID);
    let reliability = user("usr-reliability");

    let draft = service.create_draft(&initiator, demo_content()).await?;
    service.submit(&draft.id, &initiator).await?;
    service
        .review_approve(
            &draft.id,
            &reliability,
            None,
            vec![SignatureRole::DepartmentHead, SignatureRole::Dfgm],
        )
        .await?;

    let head = user(DEMO_HEAD_ID);
    let dfgm = user(DEMO_DFGM_ID);
    let (first, second) = tokio::join!(
        service.sign(&draft.id, &head, sign_request(SignatureRole::DepartmentHead, "Layla Nasser")),
        service.sign(&draft.id, &dfgm, sign_request(SignatureRole::Dfgm, "Karim Aziz")),
    );
    let first = first?;
    let second = second?;
    assert_eq!(
        u8::from(first.completed_now) + u8::from(second.completed_now),
        1,
        "exactly one signature completes the set",
    );

    let stored = service.get(&draft.id).await?;
    assert_eq!(stored.status, DeferralStatus::FullyApproved);
    assert_eq!(stored.signatures.len(), 2);
    let completer = if first.completed_now { head } else { dfgm };
    assert_eq!(stored.approved_by, Some(completer));
    Ok(())
}

#[tokio::test]
async fn second_signature_for_same_role_is_rejected() -> TestResult {
    let (_pool, service) = setup().await?;
    let initiator = user(DEMO_INITIATOR_ID);

    let draft = service.create_draft(&initiator, demo_content()).await?;
    service.submit(&draft.id, &initiator).await?;
    service
        .review_approve(
            &draft.id,
            &user("usr-reliability"),
            None,
            vec![SignatureRole::Sod, SignatureRole::Dfgm],
        )
        .await?;

    let dfgm = user(DEMO_DFGM_ID);
    service.sign(&draft.id, &dfgm, sign_request(SignatureRole::Dfgm, "Karim Aziz")).await?;
    let error = service
        .sign(&draft.id, &dfgm, sign_request(SignatureRole::Dfgm, "Karim Aziz"))
        .await
        .expect_err("double sign");
    assert_eq!(error, LifecycleError::AlreadySigned { role: SignatureRole::Dfgm });

    let stored = service.get(&draft.id).await?;
    assert_eq!(stored.status, DeferralStatus::PartiallyApproved);
    Ok(())
}

#[tokio::test]
async fn deleting_a_draft_cascades_its_notifications_and_trail() -> TestResult {
    let (pool, service) = setup().await?;
    let initiator = user(DEMO_INITIATOR_ID);

    let draft = service.create_draft(&initiator, demo_content()).await?;
    service.edit(&draft.id, &initiator, demo_content()).await?;
    service.delete_draft(&draft.id, &initiator).await?;

    let error = service.get(&draft.id).await.expect_err("deleted");
    assert!(matches!(error, LifecycleError::NotFound(_)));

    let remaining: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT action, deferral_id FROM audit_log").fetch_all(&pool).await?;
    assert_eq!(remaining, vec![("DEFERRAL_DELETED".to_owned(), None)]);
    Ok(())
}
