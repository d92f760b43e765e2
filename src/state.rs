use std::{sync::Arc, time::Duration};

use axum::extract::FromRef;
use time::Duration as TimeDuration;

use crate::auth::{
    jwt::TokenService,
    memory::MemoryDirectory,
    password::Argon2Hasher,
    repo::{PgUserDirectory, UserDirectory},
    repo_types::LockoutPolicy,
    services::AuthService,
};
use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub directory: Arc<dyn UserDirectory>,
    pub auth: Arc<AuthService>,
}

impl FromRef<AppState> for TokenService {
    fn from_ref(state: &AppState) -> Self {
        state.auth.tokens().clone()
    }
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let pool = db::connect(&config).await?;
        db::migrate(&pool).await;
        Self::from_parts(config, Arc::new(PgUserDirectory::new(pool)))
    }

    pub fn from_parts(config: AppConfig, directory: Arc<dyn UserDirectory>) -> anyhow::Result<Self> {
        let tokens = TokenService::new(&config.jwt)?;
        let hasher = Argon2Hasher::new(&config.argon2)?;
        let lockout = LockoutPolicy {
            threshold: config.lockout.threshold,
            duration: TimeDuration::minutes(config.lockout.minutes),
        };
        let auth = AuthService::new(
            directory.clone(),
            hasher,
            tokens,
            lockout,
            Duration::from_secs(config.db_timeout_secs),
        );
        Ok(Self {
            config: Arc::new(config),
            directory,
            auth: Arc::new(auth),
        })
    }

    /// State backed by a process-local directory instead of Postgres.
    pub fn in_memory(config: AppConfig) -> anyhow::Result<Self> {
        Self::from_parts(config, Arc::new(MemoryDirectory::new()))
    }
}
