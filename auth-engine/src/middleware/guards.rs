//! Request-time role and permission checks.
//!
//! These assume authentication already ran; a request without a principal
//! is refused, not authenticated.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{
    models::Principal,
    services::{PermissionResolver, ServiceError},
    AppState,
};

const NO_PRINCIPAL: &str = "You do not have permission to access this resource";

#[derive(Clone)]
pub struct AccessGuard {
    resolver: PermissionResolver,
}

impl AccessGuard {
    pub fn new(resolver: PermissionResolver) -> Self {
        Self { resolver }
    }

    /// Allow when the principal holds any of `required`. An empty list allows.
    pub async fn require_any_role<S: AsRef<str>>(
        &self,
        principal: Option<&Principal>,
        required: &[S],
    ) -> Result<(), ServiceError> {
        if required.is_empty() {
            return Ok(());
        }
        let principal = principal.ok_or_else(|| ServiceError::Forbidden(NO_PRINCIPAL.to_string()))?;

        if self.resolver.authorize_role(principal, required).await? {
            return Ok(());
        }

        tracing::info!(user_id = %principal.id, "Role requirement not met");
        Err(ServiceError::Forbidden(format!(
            "Requires one of these roles: {}",
            join(required)
        )))
    }

    /// Allow when the principal holds every entry of `required`.
    /// Administrators always pass.
    pub async fn require_all_permissions<S: AsRef<str>>(
        &self,
        principal: Option<&Principal>,
        required: &[S],
    ) -> Result<(), ServiceError> {
        if required.is_empty() {
            return Ok(());
        }
        let principal = principal.ok_or_else(|| ServiceError::Forbidden(NO_PRINCIPAL.to_string()))?;

        let missing = self.resolver.missing_permissions(principal, required).await?;
        if missing.is_empty() {
            return Ok(());
        }

        tracing::info!(user_id = %principal.id, missing = ?missing, "Permission requirement not met");
        Err(ServiceError::Forbidden(format!(
            "Missing required permissions: {}",
            missing.join(", ")
        )))
    }
}

fn join<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(", ")
}

/// State for [`role_guard`]: the app plus the accepted role keys.
#[derive(Clone)]
pub struct RoleGate {
    pub state: AppState,
    pub roles: Vec<String>,
}

impl RoleGate {
    pub fn new<I, S>(state: AppState, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// State for [`permission_guard`]: the app plus the permissions all required.
#[derive(Clone)]
pub struct PermissionGate {
    pub state: AppState,
    pub permissions: Vec<String>,
}

impl PermissionGate {
    pub fn new<I, S>(state: AppState, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state,
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Route layer: `from_fn_with_state(RoleGate::new(state, ["admin"]), role_guard)`.
pub async fn role_guard(
    State(gate): State<RoleGate>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    gate.state
        .guard
        .require_any_role(req.extensions().get::<Principal>(), &gate.roles)
        .await?;
    Ok(next.run(req).await)
}

/// Route layer: `from_fn_with_state(PermissionGate::new(state, ["read:users"]), permission_guard)`.
pub async fn permission_guard(
    State(gate): State<PermissionGate>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    gate.state
        .guard
        .require_all_permissions(req.extensions().get::<Principal>(), &gate.permissions)
        .await?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LegacyRole, User};
    use crate::services::MemoryStore;
    use chrono::Utc;
    use std::sync::Arc;

    fn guard() -> AccessGuard {
        AccessGuard::new(PermissionResolver::new(Arc::new(MemoryStore::new())))
    }

    fn principal(role: LegacyRole, permissions: &[&str]) -> Principal {
        let mut user = User::new("Guarded".to_string(), "guarded@example.com", None, Utc::now());
        user.role = role;
        user.permissions = permissions.iter().map(|p| p.to_string()).collect();
        user.principal()
    }

    #[tokio::test]
    async fn test_missing_principal_is_forbidden() {
        let guard = guard();

        let role = guard.require_any_role(None, &["admin"]).await;
        assert!(matches!(role, Err(ServiceError::Forbidden(ref msg)) if msg == NO_PRINCIPAL));

        let permission = guard.require_all_permissions(None, &["read:users"]).await;
        assert!(matches!(permission, Err(ServiceError::Forbidden(ref msg)) if msg == NO_PRINCIPAL));
    }

    #[tokio::test]
    async fn test_empty_requirement_allows_anyone() {
        let guard = guard();
        let none: [&str; 0] = [];

        assert!(guard.require_any_role(None, &none).await.is_ok());
        assert!(guard.require_all_permissions(None, &none).await.is_ok());
    }

    #[tokio::test]
    async fn test_denial_lists_required_roles() {
        let guard = guard();
        let user = principal(LegacyRole::User, &[]);

        match guard.require_any_role(Some(&user), &["admin", "editor"]).await {
            Err(ServiceError::Forbidden(msg)) => {
                assert_eq!(msg, "Requires one of these roles: admin, editor")
            }
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_denial_lists_only_missing_permissions() {
        let guard = guard();
        let user = principal(LegacyRole::User, &["read:users"]);

        match guard
            .require_all_permissions(Some(&user), &["read:users", "delete:users"])
            .await
        {
            Err(ServiceError::Forbidden(msg)) => {
                assert_eq!(msg, "Missing required permissions: delete:users")
            }
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_administrator_passes_permission_check() {
        let guard = guard();
        let admin = principal(LegacyRole::Admin, &[]);

        assert!(guard
            .require_all_permissions(Some(&admin), &["delete:users", "assign:roles"])
            .await
            .is_ok());
    }
}
