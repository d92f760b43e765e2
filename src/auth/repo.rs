use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::auth::ids::EntityKind;
use crate::auth::repo_types::User;

const USER_COLUMNS: &str = "id, name, email, password_hash, roles, organization_id, organization_name, \
     failed_login_attempts, lockout_end, last_login_at, is_active, created_at, version";

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("user id already taken: {0}")]
    DuplicateId(String),
    /// The row changed since it was read; the caller should re-read.
    #[error("user {0} was modified concurrently")]
    StaleVersion(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence seam for user records.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Exact, case-sensitive email match.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError>;

    async fn insert(&self, user: &User) -> Result<(), DirectoryError>;

    /// Writes `user` only if the stored version still equals `user.version`,
    /// returning the row with its bumped version.
    async fn update(&self, user: &User) -> Result<User, DirectoryError>;

    async fn count_by_kind(&self, kind: EntityKind) -> Result<i64, DirectoryError>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    db: PgPool,
}

impl PgUserDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        // organizations have no table of their own; their ids follow the user count
        EntityKind::User | EntityKind::Organization => "users",
        EntityKind::Carrier => "carriers",
        EntityKind::Product => "products",
        EntityKind::Rule => "rules",
    }
}

/// Primary-key constraint of `users`, named in the initial migration.
const USERS_PKEY: &str = "users_pkey";

/// A `users_pkey` violation means the id was taken; any other unique
/// violation on `users` is the `idx_users_email` index.
fn classify_insert_error(err: sqlx::Error, id: &str) -> DirectoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return match db_err.constraint() {
                Some(USERS_PKEY) => DirectoryError::DuplicateId(id.to_string()),
                _ => DirectoryError::DuplicateEmail,
            };
        }
    }
    DirectoryError::Database(err)
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: &User) -> Result<(), DirectoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, roles, organization_id,
                               organization_name, failed_login_attempts, lockout_end,
                               last_login_at, is_active, created_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.roles)
        .bind(&user.organization_id)
        .bind(&user.organization_name)
        .bind(user.failed_login_attempts)
        .bind(user.lockout_end)
        .bind(user.last_login_at)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.version)
        .execute(&self.db)
        .await
        .map_err(|e| classify_insert_error(e, &user.id))?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<User, DirectoryError> {
        let updated = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET name = $3, email = $4, password_hash = $5, roles = $6,
                organization_id = $7, organization_name = $8,
                failed_login_attempts = $9, lockout_end = $10, last_login_at = $11,
                is_active = $12, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.id)
        .bind(user.version)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.roles)
        .bind(&user.organization_id)
        .bind(&user.organization_name)
        .bind(user.failed_login_attempts)
        .bind(user.lockout_end)
        .bind(user.last_login_at)
        .bind(user.is_active)
        .fetch_optional(&self.db)
        .await?;
        updated.ok_or_else(|| DirectoryError::StaleVersion(user.id.clone()))
    }

    async fn count_by_kind(&self, kind: EntityKind) -> Result<i64, DirectoryError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table_for(kind)))
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}
