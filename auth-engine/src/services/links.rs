//! Magic-link sign-in, email verification and password reset links.
//!
//! One active link per user, stored as a digest with a 30 minute deadline
//! (configurable). Issuance answers with the same message whether or not the
//! address is registered.

use chrono::Duration;
use std::sync::Arc;

use super::email::EmailProvider;
use super::error::ServiceError;
use super::policy::PasswordPolicy;
use super::session::{SessionService, SessionTokens};
use super::store::{LinkEffect, UserStore};
use crate::models::{LinkPurpose, Principal, SingleUseLink, User};
use crate::utils::{hash_password_blocking, normalize_email, Clock, Password};
use service_core::utils::{generate_secret, hash_token};

const LINK_TOKEN_BYTES: usize = 32;

/// Generic issuance response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkIssued {
    pub message: String,
}

/// What redeeming a link should do.
#[derive(Debug, Clone)]
pub enum LinkAction {
    MagicLogin,
    VerifyEmail,
    ResetPassword(Password),
}

impl LinkAction {
    pub fn purpose(&self) -> LinkPurpose {
        match self {
            LinkAction::MagicLogin => LinkPurpose::MagicLogin,
            LinkAction::VerifyEmail => LinkPurpose::EmailVerification,
            LinkAction::ResetPassword(_) => LinkPurpose::PasswordReset,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LinkOutcome {
    SignedIn {
        principal: Principal,
        tokens: SessionTokens,
    },
    EmailVerified(Principal),
    PasswordReset(Principal),
}

fn issued_message(purpose: LinkPurpose) -> &'static str {
    match purpose {
        LinkPurpose::MagicLogin => "If your email is registered, you will receive a magic link",
        LinkPurpose::EmailVerification => {
            "If your email is registered, you will receive a verification link"
        }
        LinkPurpose::PasswordReset => {
            "If your email is registered, you will receive a password reset link"
        }
    }
}

fn link_path(purpose: LinkPurpose) -> &'static str {
    match purpose {
        LinkPurpose::MagicLogin => "/auth/magic-link/verify",
        LinkPurpose::EmailVerification => "/auth/verify-email",
        LinkPurpose::PasswordReset => "/auth/reset-password",
    }
}

#[derive(Clone)]
pub struct LinkService {
    users: Arc<dyn UserStore>,
    email: Arc<dyn EmailProvider>,
    sessions: SessionService,
    password_policy: PasswordPolicy,
    clock: Arc<dyn Clock>,
    expiry: Duration,
    app_url: String,
}

impl LinkService {
    pub fn new(
        users: Arc<dyn UserStore>,
        email: Arc<dyn EmailProvider>,
        sessions: SessionService,
        password_policy: PasswordPolicy,
        clock: Arc<dyn Clock>,
        expiry: Duration,
        app_url: String,
    ) -> Self {
        Self {
            users,
            email,
            sessions,
            password_policy,
            clock,
            expiry,
            app_url,
        }
    }

    /// Issue a link for `email` if it belongs to an active user.
    ///
    /// Delivery failures are logged, never reported, so the response cannot
    /// reveal which addresses exist.
    pub async fn issue(&self, email: &str, purpose: LinkPurpose) -> Result<LinkIssued, ServiceError> {
        let key = normalize_email(email);
        let generic = LinkIssued {
            message: issued_message(purpose).to_string(),
        };

        let user = match self.users.find_user_by_email(&key).await? {
            Some(user) if user.is_active => user,
            _ => {
                tracing::debug!(purpose = purpose.as_str(), "Link requested for unknown or inactive account");
                return Ok(generic);
            }
        };

        if let Err(e) = self.issue_for_user(&user, purpose).await {
            match e {
                ServiceError::EmailError(_) => {
                    tracing::error!(user_id = %user.id, error = %e, "Link delivery failed")
                }
                other => return Err(other),
            }
        }

        Ok(generic)
    }

    /// Store a fresh link on `user` (superseding the previous one) and send it.
    pub async fn issue_for_user(&self, user: &User, purpose: LinkPurpose) -> Result<(), ServiceError> {
        let token = generate_secret(LINK_TOKEN_BYTES);
        let link = SingleUseLink::new(&token, purpose, self.clock.now() + self.expiry);

        if !self.users.set_single_use_link(&user.id, link).await? {
            return Err(ServiceError::UserNotFound);
        }

        let url = format!(
            "{}{}?token={}&email={}",
            self.app_url,
            link_path(purpose),
            token,
            urlencoding::encode(&user.email)
        );
        self.email
            .send_single_use_link(&user.email, purpose, &url, self.expiry.num_minutes())
            .await?;

        tracing::info!(user_id = %user.id, purpose = purpose.as_str(), "Single-use link issued");
        Ok(())
    }

    /// Redeem a link. The stored link is consumed in the same update that
    /// applies the side effect, so a token works at most once.
    pub async fn redeem(
        &self,
        email: &str,
        token: &str,
        action: LinkAction,
    ) -> Result<LinkOutcome, ServiceError> {
        let purpose = action.purpose();
        let effect = match &action {
            LinkAction::MagicLogin | LinkAction::VerifyEmail => LinkEffect::MarkEmailVerified,
            LinkAction::ResetPassword(password) => {
                self.password_policy.validate(password.as_str())?;
                LinkEffect::ReplacePassword(hash_password_blocking(password.clone()).await?)
            }
        };

        let user = self
            .users
            .take_single_use_link(
                &normalize_email(email),
                &hash_token(token),
                purpose,
                self.clock.now(),
                effect,
            )
            .await?
            .ok_or(ServiceError::InvalidOrExpiredLink)?;
        let principal = user.principal();

        tracing::info!(user_id = %user.id, purpose = purpose.as_str(), "Single-use link redeemed");

        Ok(match action {
            LinkAction::MagicLogin => {
                let tokens = self.sessions.issue_session(&principal).await?;
                LinkOutcome::SignedIn { principal, tokens }
            }
            LinkAction::VerifyEmail => LinkOutcome::EmailVerified(principal),
            LinkAction::ResetPassword(_) => LinkOutcome::PasswordReset(principal),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_generic() {
        for purpose in [
            LinkPurpose::MagicLogin,
            LinkPurpose::EmailVerification,
            LinkPurpose::PasswordReset,
        ] {
            assert!(issued_message(purpose).starts_with("If your email is registered"));
        }
    }

    #[test]
    fn test_action_purpose() {
        assert_eq!(LinkAction::MagicLogin.purpose(), LinkPurpose::MagicLogin);
        assert_eq!(
            LinkAction::ResetPassword(Password::new("x")).purpose(),
            LinkPurpose::PasswordReset
        );
    }
}
