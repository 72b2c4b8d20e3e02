//! The engine's external surface: one facade over verification, sessions,
//! links and authorization.

use std::collections::BTreeSet;

use super::credentials::CredentialVerifier;
use super::error::ServiceError;
use super::jwt::AccessTokenClaims;
use super::links::{LinkAction, LinkIssued, LinkOutcome, LinkService};
use super::permissions::PermissionResolver;
use super::session::{SessionService, SessionTokens};
use crate::models::{LinkPurpose, Principal};
use crate::utils::Password;

#[derive(Clone)]
pub struct AuthService {
    verifier: CredentialVerifier,
    sessions: SessionService,
    links: LinkService,
    resolver: PermissionResolver,
}

impl AuthService {
    pub fn new(
        verifier: CredentialVerifier,
        sessions: SessionService,
        links: LinkService,
        resolver: PermissionResolver,
    ) -> Self {
        Self {
            verifier,
            sessions,
            links,
            resolver,
        }
    }

    /// Verify credentials. Unknown email and wrong password both come back
    /// as `InvalidCredentials`.
    pub async fn authenticate(
        &self,
        email: &str,
        password: Password,
    ) -> Result<Principal, ServiceError> {
        self.verifier
            .verify(email, password)
            .await?
            .ok_or(ServiceError::InvalidCredentials)
    }

    /// `authenticate` followed by `issue_session`.
    pub async fn login(
        &self,
        email: &str,
        password: Password,
    ) -> Result<(Principal, SessionTokens), ServiceError> {
        let principal = self.authenticate(email, password).await?;
        let tokens = self.sessions.issue_session(&principal).await?;
        Ok((principal, tokens))
    }

    pub async fn issue_session(&self, principal: &Principal) -> Result<SessionTokens, ServiceError> {
        self.sessions.issue_session(principal).await
    }

    pub async fn rotate(
        &self,
        subject_id: &str,
        refresh_candidate: &str,
    ) -> Result<SessionTokens, ServiceError> {
        self.sessions.rotate(subject_id, refresh_candidate).await
    }

    pub async fn end_session(
        &self,
        subject_id: &str,
        bearer: Option<&str>,
    ) -> Result<(), ServiceError> {
        self.sessions.end_session(subject_id, bearer).await
    }

    pub async fn validate_bearer(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        self.sessions.validate_bearer(token).await
    }

    pub async fn revoke_all_sessions(
        &self,
        subject_id: &str,
        reason: Option<&str>,
    ) -> Result<u64, ServiceError> {
        self.sessions.revoke_all_sessions(subject_id, reason).await
    }

    pub async fn issue_single_use_link(
        &self,
        email: &str,
        purpose: LinkPurpose,
    ) -> Result<LinkIssued, ServiceError> {
        self.links.issue(email, purpose).await
    }

    pub async fn redeem_single_use_link(
        &self,
        email: &str,
        token: &str,
        action: LinkAction,
    ) -> Result<LinkOutcome, ServiceError> {
        self.links.redeem(email, token, action).await
    }

    pub async fn effective_permissions(
        &self,
        principal: &Principal,
    ) -> Result<BTreeSet<String>, ServiceError> {
        self.resolver.effective_permissions(principal).await
    }

    pub async fn authorize_role<S: AsRef<str>>(
        &self,
        principal: &Principal,
        required: &[S],
    ) -> Result<bool, ServiceError> {
        self.resolver.authorize_role(principal, required).await
    }

    pub async fn authorize_permissions<S: AsRef<str>>(
        &self,
        principal: &Principal,
        required: &[S],
    ) -> Result<bool, ServiceError> {
        self.resolver.authorize_permissions(principal, required).await
    }

    /// Failure count currently tracked for `email`.
    pub fn failed_attempts(&self, email: &str) -> u32 {
        self.verifier.failed_attempts(email)
    }
}
