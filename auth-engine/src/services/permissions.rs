//! Effective-permission resolution.
//!
//! A principal's permissions come from three independent sources: the legacy
//! single role, direct grants and assigned roles. [`EffectivePermissions::resolve`]
//! merges them; [`PermissionResolver`] loads assigned roles through a single
//! lookup path before resolving.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::error::ServiceError;
use super::store::RoleStore;
use crate::models::{LegacyRole, Principal, Role};

/// The three inputs of resolution, already materialized.
#[derive(Debug, Clone, Copy)]
pub struct PermissionSources<'a> {
    pub legacy_role: LegacyRole,
    pub direct: &'a [String],
    pub roles: &'a [Role],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePermissions {
    administrator: bool,
    permissions: BTreeSet<String>,
}

impl EffectivePermissions {
    pub fn resolve(sources: PermissionSources<'_>) -> Self {
        let permissions = sources
            .direct
            .iter()
            .chain(sources.roles.iter().flat_map(|role| role.permissions.iter()))
            .cloned()
            .collect();

        Self {
            administrator: sources.legacy_role.is_administrator(),
            permissions,
        }
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn into_permissions(self) -> BTreeSet<String> {
        self.permissions
    }

    pub fn is_administrator(&self) -> bool {
        self.administrator
    }

    /// Required entries not held. Always empty for administrators.
    pub fn missing<S: AsRef<str>>(&self, required: &[S]) -> Vec<String> {
        if self.administrator {
            return Vec::new();
        }
        required
            .iter()
            .map(AsRef::as_ref)
            .filter(|permission| !self.permissions.contains(*permission))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Clone)]
pub struct PermissionResolver {
    roles: Arc<dyn RoleStore>,
}

impl PermissionResolver {
    pub fn new(roles: Arc<dyn RoleStore>) -> Self {
        Self { roles }
    }

    /// Load the principal's assigned roles. Dangling ids are skipped.
    pub async fn materialize_roles(&self, principal: &Principal) -> Result<Vec<Role>, ServiceError> {
        self.roles.find_roles_by_ids(&principal.roles).await
    }

    pub async fn resolve(&self, principal: &Principal) -> Result<EffectivePermissions, ServiceError> {
        let roles = self.materialize_roles(principal).await?;
        Ok(EffectivePermissions::resolve(PermissionSources {
            legacy_role: principal.role,
            direct: &principal.permissions,
            roles: &roles,
        }))
    }

    pub async fn effective_permissions(
        &self,
        principal: &Principal,
    ) -> Result<BTreeSet<String>, ServiceError> {
        Ok(self.resolve(principal).await?.into_permissions())
    }

    /// Any-of role check. Administrators and a literal legacy-role match are
    /// allowed without loading assigned roles.
    pub async fn authorize_role<S: AsRef<str>>(
        &self,
        principal: &Principal,
        required: &[S],
    ) -> Result<bool, ServiceError> {
        if required.is_empty() || principal.role.is_administrator() {
            return Ok(true);
        }
        if required
            .iter()
            .any(|role| role.as_ref() == principal.role.as_str())
        {
            return Ok(true);
        }

        let roles = self.materialize_roles(principal).await?;
        Ok(roles
            .iter()
            .any(|role| required.iter().any(|key| key.as_ref() == role.key)))
    }

    /// Permissions from `required` the principal lacks.
    pub async fn missing_permissions<S: AsRef<str>>(
        &self,
        principal: &Principal,
        required: &[S],
    ) -> Result<Vec<String>, ServiceError> {
        if required.is_empty() || principal.role.is_administrator() {
            return Ok(Vec::new());
        }
        Ok(self.resolve(principal).await?.missing(required))
    }

    /// All-of permission check with administrator bypass.
    pub async fn authorize_permissions<S: AsRef<str>>(
        &self,
        principal: &Principal,
        required: &[S],
    ) -> Result<bool, ServiceError> {
        Ok(self.missing_permissions(principal, required).await?.is_empty())
    }
}
