//! Bearer issuance, refresh rotation and session teardown.
//!
//! The refresh secret is opaque: 40 random bytes, hex encoded, returned to the
//! caller once. Only its SHA-256 digest is stored on the user, and every
//! successful refresh replaces it with a digest of a brand-new secret.

use chrono::Duration;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::error::ServiceError;
use super::jwt::{AccessTokenClaims, JwtService};
use super::metrics::REFRESH_REUSE_TOTAL;
use super::permissions::PermissionResolver;
use super::revocation::RevocationService;
use super::store::UserStore;
use crate::models::{Principal, RefreshCredential, TokenClass, User};
use crate::utils::Clock;
use service_core::utils::{generate_secret, hash_token, verify_token_hash};

const REFRESH_SECRET_BYTES: usize = 40;
pub const REFRESH_REUSE_REASON: &str = "refresh token reuse detected";

#[derive(Clone, Serialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Clone)]
pub struct SessionService {
    users: Arc<dyn UserStore>,
    jwt: JwtService,
    resolver: PermissionResolver,
    revocations: RevocationService,
    clock: Arc<dyn Clock>,
    refresh_token_expiry: Duration,
}

impl SessionService {
    pub fn new(
        users: Arc<dyn UserStore>,
        jwt: JwtService,
        resolver: PermissionResolver,
        revocations: RevocationService,
        clock: Arc<dyn Clock>,
        refresh_token_expiry: Duration,
    ) -> Self {
        Self {
            users,
            jwt,
            resolver,
            revocations,
            clock,
            refresh_token_expiry,
        }
    }

    /// Mint a bearer token and a fresh refresh secret for `principal`,
    /// superseding any refresh secret it held before.
    pub async fn issue_session(&self, principal: &Principal) -> Result<SessionTokens, ServiceError> {
        let (tokens, credential) = self.mint(principal).await?;

        if !self
            .users
            .set_refresh_credential(&principal.id, Some(credential))
            .await?
        {
            return Err(ServiceError::UserNotFound);
        }

        tracing::info!(user_id = %principal.id, "Session issued");
        Ok(tokens)
    }

    /// Exchange `candidate` for a new token pair.
    ///
    /// A candidate that does not match the stored digest is treated as replay
    /// of a stolen or rotated-out secret: the stored credential is dropped
    /// so the legitimate holder has to sign in again.
    pub async fn rotate(
        &self,
        subject_id: &str,
        candidate: &str,
    ) -> Result<SessionTokens, ServiceError> {
        let user = self
            .users
            .find_user_by_id(subject_id)
            .await?
            .ok_or(ServiceError::InvalidRefreshToken)?;

        let Some(current) = user.refresh_token.clone() else {
            tracing::info!(user_id = %subject_id, "Refresh attempted with no active session");
            return Err(ServiceError::InvalidRefreshToken);
        };

        if current.is_expired(self.clock.now()) {
            self.users.set_refresh_credential(subject_id, None).await?;
            tracing::info!(user_id = %subject_id, "Refresh credential expired");
            return Err(ServiceError::InvalidRefreshToken);
        }

        if !verify_token_hash(candidate, &current.token_hash) {
            return Err(self.reject_reuse(&user, candidate).await?);
        }

        let (tokens, next) = self.mint(&user.principal()).await?;
        if !self
            .users
            .swap_refresh_credential(subject_id, &current.token_hash, next)
            .await?
        {
            // Another request rotated this secret first.
            return Err(self.reject_reuse(&user, candidate).await?);
        }

        tracing::info!(user_id = %subject_id, "Refresh token rotated");
        Ok(tokens)
    }

    /// Drop the refresh credential. A presented bearer token is recorded as
    /// revoked until its own expiry.
    pub async fn end_session(
        &self,
        subject_id: &str,
        bearer: Option<&str>,
    ) -> Result<(), ServiceError> {
        self.users.set_refresh_credential(subject_id, None).await?;

        if let Some(bearer) = bearer {
            match self.jwt.validate_access_token(bearer) {
                Ok(claims) => {
                    self.revocations
                        .revoke(
                            bearer,
                            TokenClass::Access,
                            Some(subject_id),
                            claims.expires_at(),
                            None,
                        )
                        .await?;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Bearer token at logout already invalid, not recorded")
                }
            }
        }

        tracing::info!(user_id = %subject_id, "Session ended");
        Ok(())
    }

    /// Signature, expiry and revocation check for a bearer token.
    pub async fn validate_bearer(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        let claims = self.jwt.validate_access_token(token).map_err(|e| {
            tracing::debug!(error = %e, "Bearer token rejected");
            ServiceError::InvalidToken
        })?;

        if self.revocations.is_revoked(token).await? {
            tracing::info!(user_id = %claims.sub, "Revoked bearer token presented");
            return Err(ServiceError::InvalidToken);
        }

        Ok(claims)
    }

    /// Force sign-out: drop the refresh credential and flag the owner's
    /// outstanding revocation records.
    pub async fn revoke_all_sessions(
        &self,
        subject_id: &str,
        reason: Option<&str>,
    ) -> Result<u64, ServiceError> {
        if !self.users.set_refresh_credential(subject_id, None).await? {
            return Err(ServiceError::UserNotFound);
        }
        let annotated = self
            .revocations
            .revoke_all_for_owner(subject_id, reason)
            .await?;
        tracing::warn!(user_id = %subject_id, annotated, "All sessions revoked");
        Ok(annotated)
    }

    async fn mint(
        &self,
        principal: &Principal,
    ) -> Result<(SessionTokens, RefreshCredential), ServiceError> {
        let permissions = self
            .resolver
            .effective_permissions(principal)
            .await?
            .into_iter()
            .collect();
        let access_token = self.jwt.generate_access_token(principal, permissions)?;

        let refresh_token = generate_secret(REFRESH_SECRET_BYTES);
        let credential = RefreshCredential::new(
            &refresh_token,
            self.clock.now() + self.refresh_token_expiry,
        );

        Ok((
            SessionTokens {
                access_token,
                refresh_token,
                token_type: "Bearer".to_string(),
                expires_in: self.jwt.access_token_expiry_seconds(),
            },
            credential,
        ))
    }

    async fn reject_reuse(&self, user: &User, candidate: &str) -> Result<ServiceError, ServiceError> {
        self.users.set_refresh_credential(&user.id, None).await?;
        self.revocations
            .revoke_hash(
                hash_token(candidate),
                TokenClass::Refresh,
                Some(&user.id),
                None,
                Some(REFRESH_REUSE_REASON),
            )
            .await?;

        metrics::counter!(REFRESH_REUSE_TOTAL).increment(1);
        tracing::warn!(user_id = %user.id, "Refresh token reuse detected, session revoked");
        Ok(ServiceError::InvalidRefreshToken)
    }
}
