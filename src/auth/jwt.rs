use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::claims::Claims;
use crate::config::{JwtConfig, MIN_SECRET_LEN};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("signing secret must be at least {} bytes", MIN_SECRET_LEN)]
    WeakSecret,
    /// Bad signature, wrong issuer or audience, expired, or malformed.
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("token expiry is out of range")]
    ExpiryOutOfRange,
    #[error("token signing failed")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Issues and validates HS256 session tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Result<Self, TokenError> {
        if cfg.secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret);
        }
        let ttl = cfg
            .ttl_minutes
            .checked_mul(60)
            .map(Duration::seconds)
            .ok_or(TokenError::ExpiryOutOfRange)?;
        Ok(Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl,
        })
    }

    pub fn issue(
        &self,
        user_id: &str,
        email: &str,
        roles: &str,
        organization_id: Option<&str>,
        issued_at: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let claims = self.claims_for(user_id, email, roles, organization_id, issued_at)?;
        self.sign(&claims)
    }

    pub fn claims_for(
        &self,
        user_id: &str,
        email: &str,
        roles: &str,
        organization_id: Option<&str>,
        issued_at: OffsetDateTime,
    ) -> Result<Claims, TokenError> {
        let expires_at = issued_at
            .checked_add(self.ttl)
            .ok_or(TokenError::ExpiryOutOfRange)?;
        Ok(Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: roles.to_string(),
            org: organization_id.map(str::to_string),
            iat: issued_at.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(TokenError::Signing)?;
        debug!(user_id = %claims.sub, "jwt signed");
        Ok(token)
    }

    /// Checks signature, issuer, audience and expiry with no leeway.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            debug!(error = %e, "jwt rejected");
            TokenError::Unauthenticated
        })?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}
