use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use deferra_core::domain::deferral::DeferralId;
use deferra_core::domain::user::UserId;
use deferra_core::notify::{Notification, NotificationKind, Notifier, NotifyError};

use super::{encode_timestamp, parse_enum, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Size of the inbox page returned to a user.
pub const INBOX_LIMIT: u32 = 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNotification {
    pub id: String,
    pub user_id: UserId,
    pub deferral_id: Option<DeferralId>,
    pub kind: NotificationKind,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbox {
    pub notifications: Vec<StoredNotification>,
    pub unread_count: u64,
}

/// Notification outbox: one row per recipient, read back as a per-user inbox.
#[derive(Clone)]
pub struct SqlNotificationOutbox {
    pool: DbPool,
}

impl SqlNotificationOutbox {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, notification: &Notification) -> Result<usize, RepositoryError> {
        let created_at = encode_timestamp(&Utc::now());
        let mut tx = self.pool.begin().await?;

        for recipient in &notification.recipients {
            sqlx::query(
                "INSERT INTO notifications (id, user_id, deferral_id, kind, message, is_read, created_at)
                 VALUES (?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&recipient.0)
            .bind(&notification.deferral_id.0)
            .bind(notification.kind.as_str())
            .bind(&notification.message)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(notification.recipients.len())
    }

    /// Latest notifications first, capped at `limit`, plus the user's total unread count.
    pub async fn list_for_user(&self, user_id: &UserId, limit: u32) -> Result<Inbox, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, deferral_id, kind, message, is_read, created_at
             FROM notifications
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&user_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let unread: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM notifications WHERE user_id = ? AND is_read = 0",
        )
        .bind(&user_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(Inbox {
            notifications: rows.iter().map(notification_from_row).collect::<Result<_, _>>()?,
            unread_count: u64::try_from(unread).unwrap_or_default(),
        })
    }

    /// Returns `false` when the notification does not exist or belongs to someone else.
    pub async fn mark_read(&self, user_id: &UserId, id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(&user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
                .bind(&user_id.0)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Notifier for SqlNotificationOutbox {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.enqueue(&notification).await.map(|_| ()).map_err(|error| NotifyError(error.to_string()))
    }
}

fn notification_from_row(row: &SqliteRow) -> Result<StoredNotification, RepositoryError> {
    let kind: String = row.try_get("kind")?;
    let is_read: i64 = row.try_get("is_read")?;

    Ok(StoredNotification {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get("user_id")?),
        deferral_id: row.try_get::<Option<String>, _>("deferral_id")?.map(DeferralId),
        kind: parse_enum("kind", &kind, NotificationKind::parse)?,
        message: row.try_get("message")?,
        is_read: is_read != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use deferra_core::audit::{AuditAction, AuditEntry};
    use deferra_core::domain::deferral::DeferralId;
    use deferra_core::domain::user::UserId;
    use deferra_core::notify::{Notification, NotificationKind, Notifier};
    use deferra_core::store::DeferralStore;

    use super::{SqlNotificationOutbox, INBOX_LIMIT};
    use crate::fixtures::{demo_deferral, demo_users};
    use crate::repositories::{SqlDeferralStore, SqlIdentityDirectory};
    use crate::{connect_with_settings, migrations, DbPool};

    type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

    async fn setup() -> TestResult<(DbPool, DeferralId)> {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await?;
        migrations::run_pending(&pool).await?;
        let directory = SqlIdentityDirectory::new(pool.clone());
        for user in demo_users() {
            directory.save(&user).await?;
        }
        let deferral = demo_deferral();
        let entry = AuditEntry::new(
            &deferral.id,
            &deferral.initiator_id,
            AuditAction::DeferralCreated,
            deferral.created_at,
        );
        SqlDeferralStore::new(pool.clone()).insert(&deferral, &entry).await?;
        Ok((pool, deferral.id))
    }

    fn notification(deferral_id: &DeferralId, recipients: &[&str], message: &str) -> Notification {
        Notification {
            recipients: recipients.iter().map(|id| UserId((*id).to_owned())).collect(),
            deferral_id: deferral_id.clone(),
            kind: NotificationKind::NewSubmission,
            message: message.to_owned(),
        }
    }

    #[tokio::test]
    async fn notify_writes_one_row_per_recipient() -> TestResult {
        let (pool, deferral_id) = setup().await?;
        let outbox = SqlNotificationOutbox::new(pool);

        outbox
            .notify(notification(&deferral_id, &["usr-reliability", "usr-reliability-2"], "New"))
            .await?;

        for user in ["usr-reliability", "usr-reliability-2"] {
            let inbox = outbox.list_for_user(&UserId(user.to_owned()), INBOX_LIMIT).await?;
            assert_eq!(inbox.unread_count, 1);
            assert_eq!(inbox.notifications.len(), 1);
            assert_eq!(inbox.notifications[0].kind, NotificationKind::NewSubmission);
            assert_eq!(inbox.notifications[0].deferral_id.as_ref(), Some(&deferral_id));
        }
        Ok(())
    }

    #[tokio::test]
    async fn unknown_recipient_fails_the_whole_batch() -> TestResult {
        let (pool, deferral_id) = setup().await?;
        let outbox = SqlNotificationOutbox::new(pool);

        let result =
            outbox.notify(notification(&deferral_id, &["usr-reliability", "ghost"], "New")).await;
        assert!(result.is_err());

        let inbox = outbox.list_for_user(&UserId("usr-reliability".to_owned()), INBOX_LIMIT).await?;
        assert!(inbox.notifications.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn inbox_is_capped_and_marking_is_owner_scoped() -> TestResult {
        let (pool, deferral_id) = setup().await?;
        let outbox = SqlNotificationOutbox::new(pool);
        let owner = UserId("usr-initiator".to_owned());

        for index in 0..(INBOX_LIMIT + 5) {
            outbox
                .enqueue(&notification(&deferral_id, &["usr-initiator"], &format!("update {index}")))
                .await?;
        }

        let inbox = outbox.list_for_user(&owner, INBOX_LIMIT).await?;
        assert_eq!(inbox.notifications.len(), INBOX_LIMIT as usize);
        assert_eq!(inbox.unread_count, u64::from(INBOX_LIMIT + 5));

        let first_id = inbox.notifications[0].id.clone();
        let stranger = UserId("usr-reliability".to_owned());
        assert!(!outbox.mark_read(&stranger, &first_id).await?);
        assert!(outbox.mark_read(&owner, &first_id).await?);

        let after_one = outbox.list_for_user(&owner, INBOX_LIMIT).await?;
        assert_eq!(after_one.unread_count, u64::from(INBOX_LIMIT + 4));

        assert_eq!(outbox.mark_all_read(&owner).await?, u64::from(INBOX_LIMIT + 4));
        assert_eq!(outbox.list_for_user(&owner, INBOX_LIMIT).await?.unread_count, 0);
        Ok(())
    }
}
