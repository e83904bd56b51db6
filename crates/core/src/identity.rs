use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::signature::SignatureRole;
use crate::domain::user::{Identity, UserId, UserRole};
use crate::store::StoreError;

/// Resolves callers and notification audiences.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<Identity>, StoreError>;

    async fn users_with_role(&self, role: UserRole) -> Result<Vec<Identity>, StoreError>;

    /// Users whose profile lists `role` among their signature roles.
    async fn holders_of(&self, role: SignatureRole) -> Result<Vec<Identity>, StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryIdentityDirectory {
    users: Arc<RwLock<BTreeMap<UserId, Identity>>>,
}

impl InMemoryIdentityDirectory {
    pub fn with_users(users: impl IntoIterator<Item = Identity>) -> Self {
        let users = users.into_iter().map(|user| (user.id.clone(), user)).collect();
        Self { users: Arc::new(RwLock::new(users)) }
    }

    pub async fn upsert(&self, user: Identity) {
        self.users.write().await.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<Identity>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn users_with_role(&self, role: UserRole) -> Result<Vec<Identity>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().filter(|user| user.role == role).cloned().collect())
    }

    async fn holders_of(&self, role: SignatureRole) -> Result<Vec<Identity>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().filter(|user| user.holds(role)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{IdentityDirectory, InMemoryIdentityDirectory};
    use crate::domain::signature::SignatureRole;
    use crate::domain::user::{Identity, UserId, UserRole};

    fn user(id: &str, role: UserRole, signature_roles: &[SignatureRole]) -> Identity {
        Identity {
            id: UserId(id.to_owned()),
            name: id.to_owned(),
            email: format!("{id}@plant.example"),
            department: None,
            position: None,
            role,
            signature_roles: signature_roles.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    #[tokio::test]
    async fn directory_filters_by_user_and_signature_role() {
        let directory = InMemoryIdentityDirectory::with_users([
            user("rel-1", UserRole::Reliability, &[]),
            user("gm-1", UserRole::Approver, &[SignatureRole::Dfgm, SignatureRole::Sod]),
            user("gm-2", UserRole::Approver, &[SignatureRole::Sod]),
        ]);

        let reliability = directory.users_with_role(UserRole::Reliability).await.expect("query");
        assert_eq!(reliability.len(), 1);

        let sod = directory.holders_of(SignatureRole::Sod).await.expect("query");
        assert_eq!(sod.len(), 2);

        let missing = directory.find_user(&UserId("ghost".to_owned())).await.expect("query");
        assert!(missing.is_none());
    }
}
