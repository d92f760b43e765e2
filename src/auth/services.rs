use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Context;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::auth::{
    dto::{AuthResponse, CreateUserRequest, LoginRequest, RegisterRequest, UserSummary},
    errors::AuthError,
    ids::{EntityKind, IdGenerator, IdStrategy},
    jwt::TokenService,
    password::Argon2Hasher,
    repo::{DirectoryError, UserDirectory},
    repo_types::{LockoutPolicy, NewAccount, User},
};

pub const DEFAULT_ROLE: &str = "User";

/// Login attempts that hit a concurrent update are re-read this many times in total.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Login and registration workflow.
pub struct AuthService {
    directory: Arc<dyn UserDirectory>,
    hasher: Argon2Hasher,
    tokens: TokenService,
    ids: IdGenerator,
    lockout: LockoutPolicy,
    store_timeout: Duration,
}

fn required<'a>(email: &'a str, password: &'a str) -> Result<(&'a str, &'a str), AuthError> {
    if email.trim().is_empty() || password.trim().is_empty() {
        return Err(AuthError::InvalidRequest("Email and password are required"));
    }
    Ok((email, password))
}

impl AuthService {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        hasher: Argon2Hasher,
        tokens: TokenService,
        lockout: LockoutPolicy,
        store_timeout: Duration,
    ) -> Self {
        let ids = IdGenerator::new(directory.clone());
        Self {
            directory,
            hasher,
            tokens,
            ids,
            lockout,
            store_timeout,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, AuthError> {
        self.login_at(req, OffsetDateTime::now_utc()).await
    }

    /// Login evaluated against `now`.
    pub async fn login_at(&self, req: LoginRequest, now: OffsetDateTime) -> Result<AuthResponse, AuthError> {
        let (email, password) = required(&req.email, &req.password)?;

        let mut attempt = 1;
        loop {
            match self.try_login(email, password, now).await {
                Err(AuthError::Contention) if attempt < MAX_UPDATE_ATTEMPTS => {
                    warn!(attempt, "user changed during login, re-reading");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_login(&self, email: &str, password: &str, now: OffsetDateTime) -> Result<AuthResponse, AuthError> {
        let mut user = match self.bounded(self.directory.find_by_email(email)).await? {
            Some(u) if u.is_active => u,
            Some(u) => {
                warn!(user_id = %u.id, "login for inactive user");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                warn!(email = %email, "login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if user.is_locked_at(now) {
            warn!(user_id = %user.id, "login while account locked");
            return Err(AuthError::AccountLocked);
        }

        if !self.verify_password(password, &user.password_hash).await? {
            let locked = user
                .record_failure(now, &self.lockout)
                .context("record failed login")?;
            self.bounded(self.directory.update(&user)).await?;
            if locked {
                warn!(user_id = %user.id, attempts = user.failed_login_attempts, "account locked after repeated failures");
            } else {
                warn!(user_id = %user.id, attempts = user.failed_login_attempts, "login invalid password");
            }
            return Err(AuthError::InvalidCredentials);
        }

        user.record_success(now);
        let user = self.bounded(self.directory.update(&user)).await?;
        let token = self.tokens.issue(
            &user.id,
            &user.email,
            &user.roles,
            user.organization_id.as_deref(),
            now,
        )?;

        info!(user_id = %user.id, "user logged in");
        Ok(AuthResponse {
            token,
            user: UserSummary::from(&user),
        })
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, AuthError> {
        self.register_at(req, OffsetDateTime::now_utc()).await
    }

    pub async fn register_at(&self, req: RegisterRequest, now: OffsetDateTime) -> Result<AuthResponse, AuthError> {
        let (email, password) = required(&req.email, &req.password)?;
        let account = NewAccount {
            name: req.name,
            email: email.to_string(),
            roles: DEFAULT_ROLE.to_string(),
            organization_id: req.organization_id,
            organization_name: req.organization_name,
        };
        let user = self.create_account(account, password, now).await?;
        let token = self.tokens.issue(
            &user.id,
            &user.email,
            &user.roles,
            user.organization_id.as_deref(),
            now,
        )?;

        info!(user_id = %user.id, "user registered");
        Ok(AuthResponse {
            token,
            user: UserSummary::from(&user),
        })
    }

    /// Account creation on behalf of an administrator; no token is issued.
    pub async fn create_user(&self, req: CreateUserRequest) -> Result<UserSummary, AuthError> {
        let (email, password) = required(&req.email, &req.password)?;
        let roles = req
            .roles
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());
        let account = NewAccount {
            name: req.name,
            email: email.to_string(),
            roles,
            organization_id: req.organization_id,
            organization_name: req.organization_name,
        };
        let user = self
            .create_account(account, password, OffsetDateTime::now_utc())
            .await?;
        info!(user_id = %user.id, roles = %user.roles, "user created by admin");
        Ok(UserSummary::from(&user))
    }

    async fn create_account(
        &self,
        account: NewAccount,
        password: &str,
        now: OffsetDateTime,
    ) -> Result<User, AuthError> {
        if self.bounded(self.directory.find_by_email(&account.email)).await?.is_some() {
            warn!(email = %account.email, "email already registered");
            return Err(AuthError::DuplicateEmail);
        }

        let id = self
            .bounded(self.ids.generate(EntityKind::User, IdStrategy::Sequential))
            .await?;
        let password_hash = self.hash_password(password).await?;
        let user = User::new(id, account, password_hash, now);

        match self.bounded(self.directory.insert(&user)).await {
            Ok(()) => Ok(user),
            Err(DirectoryError::DuplicateId(id)) => {
                // a concurrent retry of the same registration may own the id
                if self.bounded(self.directory.find_by_email(&user.email)).await?.is_some() {
                    warn!(email = %user.email, "email registered concurrently");
                    return Err(AuthError::DuplicateEmail);
                }
                error!(user_id = %id, "sequential user id collided with a concurrent registration");
                Err(AuthError::Internal(anyhow::anyhow!("user id {id} already taken")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn hash_password(&self, plain: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let plain = plain.to_string();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .context("password hashing task failed")??;
        Ok(hash)
    }

    async fn verify_password(&self, plain: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let plain = plain.to_string();
        let hash = hash.to_string();
        let ok = tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash))
            .await
            .context("password verification task failed")?;
        Ok(ok)
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, DirectoryError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout(self.store_timeout)),
        }
    }
}
