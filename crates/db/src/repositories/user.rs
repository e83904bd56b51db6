use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use deferra_core::domain::content::Department;
use deferra_core::domain::signature::SignatureRole;
use deferra_core::domain::user::{Identity, UserId, UserRole};
use deferra_core::identity::IdentityDirectory;
use deferra_core::store::StoreError;

use super::{encode_json, encode_timestamp, parse_enum, parse_json, RepositoryError};
use crate::DbPool;

const USER_COLUMNS: &str = "id, name, email, department, position, role, signature_roles_json";

#[derive(Clone)]
pub struct SqlIdentityDirectory {
    pool: DbPool,
}

impl SqlIdentityDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts or refreshes a profile. Signatures already recorded keep the
    /// snapshot taken when they were signed.
    pub async fn save(&self, user: &Identity) -> Result<(), RepositoryError> {
        let now = encode_timestamp(&Utc::now());

        sqlx::query(
            "INSERT INTO users (id, name, email, department, position, role,
                                signature_roles_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 department = excluded.department,
                 position = excluded.position,
                 role = excluded.role,
                 signature_roles_json = excluded.signature_roles_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.department.map(|department| department.as_str()))
        .bind(user.position.as_deref())
        .bind(user.role.as_str())
        .bind(encode_json("signature_roles_json", &user.signature_roles)?)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Identity>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY name ASC, id ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(identity_from_row).collect()
    }

    async fn fetch(&self, id: &UserId) -> Result<Option<Identity>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn fetch_by_role(&self, role: UserRole) -> Result<Vec<Identity>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = ? ORDER BY name ASC, id ASC"
        ))
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(identity_from_row).collect()
    }

    async fn fetch_holders(&self, role: SignatureRole) -> Result<Vec<Identity>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE EXISTS (
                 SELECT 1 FROM json_each(users.signature_roles_json) WHERE json_each.value = ?
             )
             ORDER BY name ASC, id ASC"
        ))
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(identity_from_row).collect()
    }
}

#[async_trait]
impl IdentityDirectory for SqlIdentityDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<Identity>, StoreError> {
        Ok(self.fetch(id).await?)
    }

    async fn users_with_role(&self, role: UserRole) -> Result<Vec<Identity>, StoreError> {
        Ok(self.fetch_by_role(role).await?)
    }

    async fn holders_of(&self, role: SignatureRole) -> Result<Vec<Identity>, StoreError> {
        Ok(self.fetch_holders(role).await?)
    }
}

fn identity_from_row(row: &SqliteRow) -> Result<Identity, RepositoryError> {
    let role: String = row.try_get("role")?;
    let department: Option<String> = row.try_get("department")?;
    let signature_roles: String = row.try_get("signature_roles_json")?;

    Ok(Identity {
        id: UserId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        department: department
            .map(|value| parse_enum("department", &value, Department::parse))
            .transpose()?,
        position: row.try_get("position")?,
        role: parse_enum("role", &role, UserRole::parse)?,
        signature_roles: parse_json::<BTreeSet<SignatureRole>>(
            "signature_roles_json",
            &signature_roles,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use deferra_core::domain::signature::SignatureRole;
    use deferra_core::domain::user::{UserId, UserRole};
    use deferra_core::identity::IdentityDirectory;

    use super::SqlIdentityDirectory;
    use crate::fixtures::demo_users;
    use crate::{connect_with_settings, migrations};

    type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

    async fn setup() -> TestResult<SqlIdentityDirectory> {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await?;
        migrations::run_pending(&pool).await?;
        let directory = SqlIdentityDirectory::new(pool);
        for user in demo_users() {
            directory.save(&user).await?;
        }
        Ok(directory)
    }

    #[tokio::test]
    async fn saved_profiles_load_back_unchanged() -> TestResult {
        let directory = setup().await?;

        for user in demo_users() {
            let loaded = directory.find_user(&user.id).await?.ok_or("user should exist")?;
            assert_eq!(loaded, user);
        }
        assert!(directory.find_user(&UserId("ghost".to_owned())).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn save_refreshes_an_existing_profile() -> TestResult {
        let directory = setup().await?;
        let mut user = demo_users().into_iter().next().ok_or("demo users")?;
        user.position = Some("Lead Technician".to_owned());

        directory.save(&user).await?;

        let loaded = directory.find_user(&user.id).await?.ok_or("user should exist")?;
        assert_eq!(loaded.position.as_deref(), Some("Lead Technician"));
        assert_eq!(directory.list().await?.len(), demo_users().len());
        Ok(())
    }

    #[tokio::test]
    async fn role_and_signature_holder_lookups() -> TestResult {
        let directory = setup().await?;

        let reliability = directory.users_with_role(UserRole::Reliability).await?;
        assert!(!reliability.is_empty());
        assert!(reliability.iter().all(|user| user.role == UserRole::Reliability));

        let dfgm_holders = directory.holders_of(SignatureRole::Dfgm).await?;
        let expected: Vec<UserId> = demo_users()
            .into_iter()
            .filter(|user| user.holds(SignatureRole::Dfgm))
            .map(|user| user.id)
            .collect();
        let mut found: Vec<UserId> = dfgm_holders.into_iter().map(|user| user.id).collect();
        found.sort();
        let mut expected = expected;
        expected.sort();
        assert_eq!(found, expected);
        assert!(!found.is_empty());
        Ok(())
    }
}
