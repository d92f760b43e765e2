use std::str::FromStr;

use tracing::{debug, warn};

/// Secret used when `JWT_SECRET` is unset outside production.
pub const DEV_JWT_SECRET: &str = "local-development-secret-change-me-0123456789";

/// Minimum accepted length of the token signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Upper bound for `JWT_TTL_MINUTES` (30 days).
pub const MAX_TOKEN_TTL_MINUTES: i64 = 30 * 24 * 60;

/// Upper bound for `LOCKOUT_MINUTES` (one year).
pub const MAX_LOCKOUT_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("invalid value for {name}: {reason}")]
    InvalidEnvVar { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Case-insensitive, so `Production` and `production` agree.
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" => Some(Environment::Development),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub threshold: i32,
    pub minutes: i64,
}

/// Argon2id work factor.
#[derive(Debug, Clone)]
pub struct Argon2Config {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub jwt: JwtConfig,
    pub lockout: LockoutConfig,
    pub argon2: Argon2Config,
    pub db_timeout_secs: u64,
    pub db_max_connections: u32,
    pub cors_allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV") {
            None => Environment::Development,
            Some(raw) => Environment::parse(&raw).ok_or_else(|| ConfigError::InvalidEnvVar {
                name: "APP_ENV",
                reason: format!("unrecognised environment {raw:?}, expected development or production"),
            })?,
        };

        let database_url = get("DATABASE_URL").ok_or(ConfigError::MissingEnvVar("DATABASE_URL"))?;

        let secret = match (get("JWT_SECRET"), environment) {
            (None, Environment::Production) => {
                return Err(ConfigError::MissingEnvVar("JWT_SECRET"));
            }
            (Some(s), Environment::Production) if s == DEV_JWT_SECRET => {
                return Err(ConfigError::InvalidEnvVar {
                    name: "JWT_SECRET",
                    reason: "the development default cannot be used in production".into(),
                });
            }
            (None, Environment::Development) => {
                warn!("JWT_SECRET not set, using the development default");
                DEV_JWT_SECRET.to_string()
            }
            (Some(s), _) => s,
        };
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidEnvVar {
                name: "JWT_SECRET",
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }

        let jwt = JwtConfig {
            secret,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "AppetiteChecker".into()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "AppetiteCheckerUsers".into()),
            ttl_minutes: at_most(
                positive(parse_or(&get, "JWT_TTL_MINUTES", 60i64)?, "JWT_TTL_MINUTES")?,
                MAX_TOKEN_TTL_MINUTES,
                "JWT_TTL_MINUTES",
            )?,
        };

        let lockout = LockoutConfig {
            threshold: positive(parse_or(&get, "LOCKOUT_THRESHOLD", 5i32)?, "LOCKOUT_THRESHOLD")?,
            minutes: at_most(
                positive(parse_or(&get, "LOCKOUT_MINUTES", 15i64)?, "LOCKOUT_MINUTES")?,
                MAX_LOCKOUT_MINUTES,
                "LOCKOUT_MINUTES",
            )?,
        };

        let argon2 = Argon2Config {
            memory_kib: parse_or(&get, "ARGON2_MEMORY_KIB", 19_456u32)?,
            iterations: parse_or(&get, "ARGON2_ITERATIONS", 2u32)?,
            parallelism: parse_or(&get, "ARGON2_PARALLELISM", 1u32)?,
        };

        let cors_allowed_origins = match get("CORS_ALLOWED_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            None => vec![
                "http://localhost:3000".into(),
                "http://localhost:3001".into(),
                "http://localhost:3002".into(),
            ],
        };

        let config = Self {
            database_url,
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&get, "APP_PORT", 8080u16)?,
            environment,
            jwt,
            lockout,
            argon2,
            db_timeout_secs: positive(parse_or(&get, "DB_TIMEOUT_SECS", 5u64)?, "DB_TIMEOUT_SECS")?,
            db_max_connections: positive(parse_or(&get, "DB_MAX_CONNECTIONS", 10u32)?, "DB_MAX_CONNECTIONS")?,
            cors_allowed_origins,
        };
        debug!(env = config.environment.as_str(), port = config.port, "configuration loaded");
        Ok(config)
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
            name,
            reason: e.to_string(),
        }),
    }
}

fn positive<T>(value: T, name: &'static str) -> Result<T, ConfigError>
where
    T: PartialOrd + Default,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidEnvVar {
            name,
            reason: "must be greater than 0".into(),
        })
    }
}

fn at_most(value: i64, max: i64, name: &'static str) -> Result<i64, ConfigError> {
    if value <= max {
        Ok(value)
    } else {
        Err(ConfigError::InvalidEnvVar {
            name,
            reason: format!("must be at most {max}"),
        })
    }
}
