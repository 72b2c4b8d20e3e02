//! Registration and per-user authorization administration.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::error::ServiceError;
use super::links::LinkService;
use super::permissions::PermissionResolver;
use super::policy::PasswordPolicy;
use super::store::{RoleStore, SetUpdate, UserStore};
use crate::models::{LegacyRole, LinkPurpose, Principal, User};
use crate::utils::{hash_password_blocking, normalize_email, Clock, Password};
use validator::Validate;

#[derive(Debug, Clone, Validate)]
pub struct Registration {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    /// `None` registers a passwordless (magic-link only) account.
    pub password: Option<Password>,
    /// Role ids. Empty means the default role.
    pub roles: Vec<String>,
}

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleStore>,
    resolver: PermissionResolver,
    links: LinkService,
    password_policy: PasswordPolicy,
    clock: Arc<dyn Clock>,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserStore>,
        roles: Arc<dyn RoleStore>,
        resolver: PermissionResolver,
        links: LinkService,
        password_policy: PasswordPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            roles,
            resolver,
            links,
            password_policy,
            clock,
        }
    }

    pub async fn register(&self, registration: Registration) -> Result<Principal, ServiceError> {
        let registration = Registration {
            name: registration.name.trim().to_string(),
            email: normalize_email(&registration.email),
            ..registration
        };
        registration.validate()?;
        let email = registration.email;

        if self.users.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }

        let password_hash = match registration.password {
            Some(password) => {
                self.password_policy.validate(password.as_str())?;
                Some(hash_password_blocking(password).await?)
            }
            None => None,
        };

        let mut user = User::new(registration.name, &email, password_hash, self.clock.now());
        user.roles = self.initial_roles(registration.roles).await?;

        self.users.insert_user(&user).await?;
        tracing::info!(user_id = %user.id, roles = user.roles.len(), "User registered");

        if let Err(e) = self
            .links
            .issue_for_user(&user, LinkPurpose::EmailVerification)
            .await
        {
            tracing::error!(user_id = %user.id, error = %e, "Failed to send verification link");
        }

        Ok(user.principal())
    }

    pub async fn find_principal(&self, user_id: &str) -> Result<Principal, ServiceError> {
        self.users
            .find_user_by_id(user_id)
            .await?
            .map(|user| user.principal())
            .ok_or(ServiceError::UserNotFound)
    }

    pub async fn set_legacy_role(&self, user_id: &str, role: LegacyRole) -> Result<(), ServiceError> {
        if !self.users.set_legacy_role(user_id, role).await? {
            return Err(ServiceError::UserNotFound);
        }
        tracing::info!(user_id = %user_id, role = role.as_str(), "Legacy role changed");
        Ok(())
    }

    pub async fn add_permissions(
        &self,
        user_id: &str,
        permissions: Vec<String>,
    ) -> Result<Principal, ServiceError> {
        self.update_permissions(user_id, SetUpdate::Add(permissions))
            .await
    }

    pub async fn remove_permissions(
        &self,
        user_id: &str,
        permissions: Vec<String>,
    ) -> Result<Principal, ServiceError> {
        self.update_permissions(user_id, SetUpdate::Remove(permissions))
            .await
    }

    pub async fn set_permissions(
        &self,
        user_id: &str,
        permissions: Vec<String>,
    ) -> Result<Principal, ServiceError> {
        self.update_permissions(user_id, SetUpdate::Replace(permissions))
            .await
    }

    pub async fn add_roles(
        &self,
        user_id: &str,
        role_ids: Vec<String>,
    ) -> Result<Principal, ServiceError> {
        self.update_roles(user_id, SetUpdate::Add(role_ids)).await
    }

    pub async fn remove_roles(
        &self,
        user_id: &str,
        role_ids: Vec<String>,
    ) -> Result<Principal, ServiceError> {
        self.update_roles(user_id, SetUpdate::Remove(role_ids))
            .await
    }

    pub async fn set_roles(
        &self,
        user_id: &str,
        role_ids: Vec<String>,
    ) -> Result<Principal, ServiceError> {
        self.update_roles(user_id, SetUpdate::Replace(role_ids))
            .await
    }

    pub async fn user_permissions(&self, user_id: &str) -> Result<BTreeSet<String>, ServiceError> {
        let principal = self.find_principal(user_id).await?;
        self.resolver.effective_permissions(&principal).await
    }

    async fn update_permissions(
        &self,
        user_id: &str,
        update: SetUpdate,
    ) -> Result<Principal, ServiceError> {
        let user = self
            .users
            .update_direct_permissions(user_id, update)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        tracing::info!(user_id = %user_id, permissions = user.permissions.len(), "Direct permissions updated");
        Ok(user.principal())
    }

    async fn update_roles(&self, user_id: &str, update: SetUpdate) -> Result<Principal, ServiceError> {
        let update = match update {
            SetUpdate::Remove(_) => update,
            other => {
                let known = self.known_role_ids(other.values()).await?;
                other.map_values(|_| known)
            }
        };

        let user = self
            .users
            .update_assigned_roles(user_id, update)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        tracing::info!(user_id = %user_id, roles = user.roles.len(), "Assigned roles updated");
        Ok(user.principal())
    }

    async fn known_role_ids(&self, role_ids: &[String]) -> Result<Vec<String>, ServiceError> {
        let found = self.roles.find_roles_by_ids(role_ids).await?;
        let known: Vec<String> = role_ids
            .iter()
            .filter(|id| found.iter().any(|role| &role.id == *id))
            .cloned()
            .collect();
        if known.len() < role_ids.len() {
            tracing::warn!(dropped = role_ids.len() - known.len(), "Ignoring unknown role ids");
        }
        Ok(known)
    }

    async fn initial_roles(&self, requested: Vec<String>) -> Result<Vec<String>, ServiceError> {
        let known = self.known_role_ids(&requested).await?;
        if !known.is_empty() {
            return Ok(known);
        }
        Ok(self
            .roles
            .find_default_role()
            .await?
            .map(|role| vec![role.id])
            .unwrap_or_default())
    }
}
