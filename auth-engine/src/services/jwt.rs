use chrono::{DateTime, Duration};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{LegacyRole, Principal};
use crate::utils::Clock;

/// Signs and verifies bearer tokens (HS256).
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry: Duration,
    clock: Arc<dyn Clock>,
}

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    /// Legacy single role
    pub role: LegacyRole,
    /// Effective permissions at issue time
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// JWT ID
    pub jti: String,
}

impl AccessTokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<chrono::Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

impl JwtService {
    pub fn new(secret: &SecretString, access_token_expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_token_expiry,
            clock,
        }
    }

    /// Sign a bearer token for `principal` with a snapshot of its permissions.
    pub fn generate_access_token(
        &self,
        principal: &Principal,
        permissions: Vec<String>,
    ) -> Result<String, anyhow::Error> {
        let now = self.clock.now();
        let exp = now + self.access_token_expiry;

        let claims = AccessTokenClaims {
            sub: principal.id.clone(),
            email: principal.email.clone(),
            role: principal.role,
            permissions,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))
    }

    /// Verify signature and expiry. Expiry is judged against the service clock.
    pub fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<AccessTokenClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)?.claims;
        if claims.exp <= self.clock.now().timestamp() {
            return Err(jsonwebtoken::errors::ErrorKind::ExpiredSignature.into());
        }

        Ok(claims)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry.num_seconds()
    }
}
