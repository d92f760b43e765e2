use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::auth::ids::EntityKind;
use crate::auth::repo::{DirectoryError, UserDirectory};
use crate::auth::repo_types::User;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    counts: HashMap<EntityKind, i64>,
}

/// Process-local directory with the same uniqueness and versioning rules as
/// the Postgres one. Used by tests and database-less local runs.
#[derive(Default)]
pub struct MemoryDirectory {
    tables: RwLock<Tables>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the row count reported for a non-user kind.
    pub async fn set_count(&self, kind: EntityKind, count: i64) {
        self.tables.write().await.counts.insert(kind, count);
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.users.len()
    }

    pub async fn get(&self, id: &str) -> Option<User> {
        self.tables.read().await.users.iter().find(|u| u.id == id).cloned()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), DirectoryError> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|u| u.id == user.id) {
            return Err(DirectoryError::DuplicateId(user.id.clone()));
        }
        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(DirectoryError::DuplicateEmail);
        }
        tables.users.push(user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<User, DirectoryError> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .users
            .iter_mut()
            .find(|u| u.id == user.id && u.version == user.version)
            .ok_or_else(|| DirectoryError::StaleVersion(user.id.clone()))?;
        *stored = User {
            version: user.version + 1,
            ..user.clone()
        };
        Ok(stored.clone())
    }

    async fn count_by_kind(&self, kind: EntityKind) -> Result<i64, DirectoryError> {
        let tables = self.tables.read().await;
        Ok(match kind {
            EntityKind::User | EntityKind::Organization => tables.users.len() as i64,
            other => tables.counts.get(&other).copied().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::NewAccount;
    use time::OffsetDateTime;

    fn user(id: &str, email: &str) -> User {
        User::new(
            id.into(),
            NewAccount {
                name: None,
                email: email.into(),
                roles: "User".into(),
                organization_id: None,
                organization_name: None,
            },
            "hash".into(),
            OffsetDateTime::now_utc(),
        )
    }

    #[tokio::test]
    async fn insert_enforces_unique_id_and_email() {
        let dir = MemoryDirectory::new();
        dir.insert(&user("usr-001", "a@example.com")).await.unwrap();
        assert!(matches!(
            dir.insert(&user("usr-002", "a@example.com")).await,
            Err(DirectoryError::DuplicateEmail)
        ));
        assert!(matches!(
            dir.insert(&user("usr-001", "b@example.com")).await,
            Err(DirectoryError::DuplicateId(id)) if id == "usr-001"
        ));
        assert_eq!(dir.len().await, 1);
    }

    #[tokio::test]
    async fn email_lookup_is_case_sensitive() {
        let dir = MemoryDirectory::new();
        dir.insert(&user("usr-001", "a@example.com")).await.unwrap();
        assert!(dir.find_by_email("a@example.com").await.unwrap().is_some());
        assert!(dir.find_by_email("A@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_is_compare_and_swap() {
        let dir = MemoryDirectory::new();
        dir.insert(&user("usr-001", "a@example.com")).await.unwrap();

        let mut first = dir.find_by_email("a@example.com").await.unwrap().unwrap();
        let mut second = first.clone();

        first.failed_login_attempts = 1;
        let saved = dir.update(&first).await.unwrap();
        assert_eq!(saved.version, 1);

        second.failed_login_attempts = 1;
        assert!(matches!(
            dir.update(&second).await,
            Err(DirectoryError::StaleVersion(_))
        ));
        assert_eq!(dir.get("usr-001").await.unwrap().failed_login_attempts, 1);
    }

    #[tokio::test]
    async fn counts_by_kind() {
        let dir = MemoryDirectory::new();
        dir.insert(&user("usr-001", "a@example.com")).await.unwrap();
        dir.set_count(EntityKind::Carrier, 3).await;
        assert_eq!(dir.count_by_kind(EntityKind::User).await.unwrap(), 1);
        assert_eq!(dir.count_by_kind(EntityKind::Organization).await.unwrap(), 1);
        assert_eq!(dir.count_by_kind(EntityKind::Carrier).await.unwrap(), 3);
        assert_eq!(dir.count_by_kind(EntityKind::Product).await.unwrap(), 0);
    }
}
