use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use deferra_core::audit::AuditEntry;
use deferra_core::domain::content::DeferralContent;
use deferra_core::domain::deferral::{Deferral, DeferralCode, DeferralId, DeferralStatus};
use deferra_core::domain::signature::{RequiredSignatures, SignatureSet};
use deferra_core::domain::user::UserId;
use deferra_core::store::{DeferralFilter, DeferralStore, StoreError};

use super::audit;
use super::{
    encode_json, encode_optional_timestamp, encode_timestamp, parse_enum, parse_json,
    parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError,
};
use crate::DbPool;

const DEFERRAL_COLUMNS: &str = "id, code, initiator_id, department, status, content_json,
    required_signatures_json, signatures_json, submitted_at, reviewed_by, reviewed_at,
    review_comments, approved_by, approval_date, version, created_at, updated_at";

/// Result of a version-guarded write.
enum Guarded {
    Applied,
    Missing,
    Stale,
}

/// SQLite-backed [`DeferralStore`]. Each write shares one transaction with its
/// audit row; updates and deletes are keyed on `(id, version)`.
#[derive(Clone)]
pub struct SqlDeferralStore {
    pool: DbPool,
}

impl SqlDeferralStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: &DeferralId) -> Result<Option<Deferral>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {DEFERRAL_COLUMNS} FROM deferrals WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(deferral_from_row).transpose()
    }

    async fn fetch_filtered(&self, filter: &DeferralFilter) -> Result<Vec<Deferral>, RepositoryError> {
        let mut query_builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {DEFERRAL_COLUMNS} FROM deferrals WHERE 1=1"));

        if let Some(status) = filter.status {
            query_builder.push(" AND status = ");
            query_builder.push_bind(status.as_str());
        }
        if let Some(department) = filter.department {
            query_builder.push(" AND department = ");
            query_builder.push_bind(department.as_str());
        }
        if let Some(initiator_id) = &filter.initiator_id {
            query_builder.push(" AND initiator_id = ");
            query_builder.push_bind(initiator_id.0.clone());
        }
        query_builder.push(" ORDER BY created_at DESC, id ASC");

        let rows = query_builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(deferral_from_row).collect()
    }

    async fn insert_row(&self, deferral: &Deferral, entry: &AuditEntry) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO deferrals (
                id, code, initiator_id, department, status, content_json,
                required_signatures_json, signatures_json, submitted_at, reviewed_by,
                reviewed_at, review_comments, approved_by, approval_date, version,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&deferral.id.0)
        .bind(&deferral.code.0)
        .bind(&deferral.initiator_id.0)
        .bind(deferral.content.department.as_str())
        .bind(deferral.status.as_str())
        .bind(encode_json("content_json", &deferral.content)?)
        .bind(encode_json("required_signatures_json", &deferral.required_signatures)?)
        .bind(encode_json("signatures_json", &deferral.signatures)?)
        .bind(encode_optional_timestamp(deferral.submitted_at.as_ref()))
        .bind(deferral.reviewed_by.as_ref().map(|id| id.0.as_str()))
        .bind(encode_optional_timestamp(deferral.reviewed_at.as_ref()))
        .bind(deferral.review_comments.as_deref())
        .bind(deferral.approved_by.as_ref().map(|id| id.0.as_str()))
        .bind(encode_optional_timestamp(deferral.approval_date.as_ref()))
        .bind(i64::from(deferral.version))
        .bind(encode_timestamp(&deferral.created_at))
        .bind(encode_timestamp(&deferral.updated_at))
        .execute(&mut *tx)
        .await?;

        audit::insert_entry(&mut tx, entry, Some(&deferral.id)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_row(
        &self,
        deferral: &Deferral,
        expected_version: u32,
        entry: &AuditEntry,
    ) -> Result<Guarded, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE deferrals SET
                department = ?, status = ?, content_json = ?, required_signatures_json = ?,
                signatures_json = ?, submitted_at = ?, reviewed_by = ?, reviewed_at = ?,
                review_comments = ?, approved_by = ?, approval_date = ?, version = ?,
                updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(deferral.content.department.as_str())
        .bind(deferral.status.as_str())
        .bind(encode_json("content_json", &deferral.content)?)
        .bind(encode_json("required_signatures_json", &deferral.required_signatures)?)
        .bind(encode_json("signatures_json", &deferral.signatures)?)
        .bind(encode_optional_timestamp(deferral.submitted_at.as_ref()))
        .bind(deferral.reviewed_by.as_ref().map(|id| id.0.as_str()))
        .bind(encode_optional_timestamp(deferral.reviewed_at.as_ref()))
        .bind(deferral.review_comments.as_deref())
        .bind(deferral.approved_by.as_ref().map(|id| id.0.as_str()))
        .bind(encode_optional_timestamp(deferral.approval_date.as_ref()))
        .bind(i64::from(deferral.version))
        .bind(encode_timestamp(&deferral.updated_at))
        .bind(&deferral.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let outcome = classify_miss(&mut tx, &deferral.id).await?;
            tx.rollback().await?;
            return Ok(outcome);
        }

        audit::insert_entry(&mut tx, entry, Some(&deferral.id)).await?;
        tx.commit().await?;
        Ok(Guarded::Applied)
    }

    async fn delete_row(
        &self,
        id: &DeferralId,
        expected_version: u32,
        entry: &AuditEntry,
    ) -> Result<Guarded, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM deferrals WHERE id = ? AND version = ?")
            .bind(&id.0)
            .bind(i64::from(expected_version))
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            let outcome = classify_miss(&mut tx, id).await?;
            tx.rollback().await?;
            return Ok(outcome);
        }

        // Audit rows and notifications for the draft go with it through the cascade.
        audit::insert_entry(&mut tx, entry, None).await?;
        tx.commit().await?;
        Ok(Guarded::Applied)
    }
}

async fn classify_miss(
    conn: &mut SqliteConnection,
    id: &DeferralId,
) -> Result<Guarded, RepositoryError> {
    let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM deferrals WHERE id = ?)")
        .bind(&id.0)
        .fetch_one(conn)
        .await?;

    Ok(if exists == 1 { Guarded::Stale } else { Guarded::Missing })
}

fn guarded(outcome: Guarded, id: &DeferralId, expected_version: u32) -> Result<(), StoreError> {
    match outcome {
        Guarded::Applied => Ok(()),
        Guarded::Missing => Err(StoreError::NotFound(id.clone())),
        Guarded::Stale => Err(StoreError::Conflict { id: id.clone(), expected_version }),
    }
}

#[async_trait]
impl DeferralStore for SqlDeferralStore {
    async fn find(&self, id: &DeferralId) -> Result<Option<Deferral>, StoreError> {
        Ok(self.fetch(id).await?)
    }

    async fn list(&self, filter: &DeferralFilter) -> Result<Vec<Deferral>, StoreError> {
        Ok(self.fetch_filtered(filter).await?)
    }

    async fn insert(&self, deferral: &Deferral, audit: &AuditEntry) -> Result<(), StoreError> {
        Ok(self.insert_row(deferral, audit).await?)
    }

    async fn update(
        &self,
        deferral: &Deferral,
        expected_version: u32,
        audit: &AuditEntry,
    ) -> Result<(), StoreError> {
        let outcome = self.update_row(deferral, expected_version, audit).await?;
        guarded(outcome, &deferral.id, expected_version)
    }

    async fn delete(
        &self,
        id: &DeferralId,
        expected_version: u32,
        audit: &AuditEntry,
    ) -> Result<(), StoreError> {
        let outcome = self.delete_row(id, expected_version, audit).await?;
        guarded(outcome, id, expected_version)
    }

    async fn list_audit(&self, id: &DeferralId) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(audit::list_for_deferral(&self.pool, id).await?)
    }
}

fn deferral_from_row(row: &SqliteRow) -> Result<Deferral, RepositoryError> {
    let status: String = row.try_get("status")?;
    let content: String = row.try_get("content_json")?;
    let required: String = row.try_get("required_signatures_json")?;
    let signatures: String = row.try_get("signatures_json")?;

    Ok(Deferral {
        id: DeferralId(row.try_get("id")?),
        code: DeferralCode(row.try_get("code")?),
        initiator_id: UserId(row.try_get("initiator_id")?),
        content: parse_json::<DeferralContent>("content_json", &content)?,
        status: parse_enum("status", &status, DeferralStatus::parse)?,
        required_signatures: parse_json::<RequiredSignatures>(
            "required_signatures_json",
            &required,
        )?,
        signatures: parse_json::<SignatureSet>("signatures_json", &signatures)?,
        submitted_at: parse_optional_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        reviewed_by: row.try_get::<Option<String>, _>("reviewed_by")?.map(UserId),
        reviewed_at: parse_optional_timestamp("reviewed_at", row.try_get("reviewed_at")?)?,
        review_comments: row.try_get("review_comments")?,
        approved_by: row.try_get::<Option<String>, _>("approved_by")?.map(UserId),
        approval_date: parse_optional_timestamp("approval_date", row.try_get("approval_date")?)?,
        version: parse_u32("version", row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
