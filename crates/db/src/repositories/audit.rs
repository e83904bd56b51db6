use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use deferra_core::audit::{AuditAction, AuditEntry};
use deferra_core::domain::deferral::DeferralId;
use deferra_core::domain::user::UserId;

use super::{encode_json, encode_timestamp, parse_enum, parse_json, parse_timestamp};
use super::RepositoryError;
use crate::DbPool;

/// Writes `entry` inside the caller's transaction. `deferral_id` overrides the
/// entry's own link so deletes can record a detached row.
pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &AuditEntry,
    deferral_id: Option<&DeferralId>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO audit_log (id, deferral_id, actor_id, action, details_json, occurred_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(deferral_id.map(|id| id.0.as_str()))
    .bind(&entry.actor_id.0)
    .bind(entry.action.as_str())
    .bind(encode_json("details_json", &entry.details)?)
    .bind(encode_timestamp(&entry.occurred_at))
    .execute(conn)
    .await?;

    Ok(())
}

pub(crate) async fn list_for_deferral(
    pool: &DbPool,
    deferral_id: &DeferralId,
) -> Result<Vec<AuditEntry>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, deferral_id, actor_id, action, details_json, occurred_at
         FROM audit_log
         WHERE deferral_id = ?
         ORDER BY occurred_at ASC, rowid ASC",
    )
    .bind(&deferral_id.0)
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

fn entry_from_row(row: &SqliteRow) -> Result<AuditEntry, RepositoryError> {
    let action: String = row.try_get("action")?;
    let details: String = row.try_get("details_json")?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        deferral_id: row.try_get::<Option<String>, _>("deferral_id")?.map(DeferralId),
        actor_id: UserId(row.try_get("actor_id")?),
        action: parse_enum("action", &action, AuditAction::parse)?,
        details: parse_json::<BTreeMap<String, String>>("details_json", &details)?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
