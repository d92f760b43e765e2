use sqlx::FromRow;
use time::{Duration, OffsetDateTime};

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String, // argon2 PHC string, never returned to clients
    pub roles: String,
    pub organization_id: Option<String>,
    pub organization_name: Option<String>,
    pub failed_login_attempts: i32,
    pub lockout_end: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub version: i64, // bumped by every update
}

/// Failure threshold and lock length.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub threshold: i32,
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: Duration::minutes(15),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("lockout end {now} + {duration} is out of range")]
pub struct LockoutOutOfRange {
    pub now: OffsetDateTime,
    pub duration: Duration,
}

/// Fields supplied when an account is created.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: Option<String>,
    pub email: String,
    pub roles: String,
    pub organization_id: Option<String>,
    pub organization_name: Option<String>,
}

impl User {
    pub fn new(id: String, account: NewAccount, password_hash: String, now: OffsetDateTime) -> Self {
        let name = account
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| account.email.clone());
        Self {
            id,
            name,
            email: account.email,
            password_hash,
            roles: account.roles,
            organization_id: account.organization_id,
            organization_name: account.organization_name,
            failed_login_attempts: 0,
            lockout_end: None,
            last_login_at: None,
            is_active: true,
            created_at: now,
            version: 0,
        }
    }

    pub fn is_locked_at(&self, now: OffsetDateTime) -> bool {
        matches!(self.lockout_end, Some(end) if end > now)
    }

    /// Counts a failed password check. Returns true when this failure locks the account.
    /// The record is left untouched when the lock end cannot be represented.
    pub fn record_failure(
        &mut self,
        now: OffsetDateTime,
        policy: &LockoutPolicy,
    ) -> Result<bool, LockoutOutOfRange> {
        let attempts = self.failed_login_attempts.saturating_add(1);
        if attempts < policy.threshold {
            self.failed_login_attempts = attempts;
            return Ok(false);
        }
        let end = now.checked_add(policy.duration).ok_or(LockoutOutOfRange {
            now,
            duration: policy.duration,
        })?;
        self.failed_login_attempts = attempts;
        self.lockout_end = Some(end);
        Ok(true)
    }

    pub fn record_success(&mut self, now: OffsetDateTime) {
        self.failed_login_attempts = 0;
        self.lockout_end = None;
        self.last_login_at = Some(now);
    }
}
