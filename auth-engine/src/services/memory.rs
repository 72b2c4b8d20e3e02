//! In-process implementation of the store traits, used by tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::ServiceError;
use super::store::{LinkEffect, RevocationStore, RoleStore, SetUpdate, UserStore};
use crate::models::{
    LegacyRole, LinkPurpose, RefreshCredential, RevocationRecord, Role, SingleUseLink, User,
};
use crate::utils::{Clock, SystemClock};
use service_core::utils::constant_time_eq;

pub struct MemoryStore {
    users: Mutex<HashMap<String, User>>,
    roles: Mutex<HashMap<String, Role>>,
    revocations: Mutex<Vec<RevocationRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

fn locked<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, ServiceError> {
    mutex
        .lock()
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Memory {} mutex poisoned: {}", name, e)))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose `updated_at` stamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            users: Mutex::default(),
            roles: Mutex::default(),
            revocations: Mutex::default(),
            clock,
        }
    }

    /// Number of stored revocation records, including expired ones not yet swept.
    pub fn revocation_count(&self) -> Result<usize, ServiceError> {
        Ok(locked(&self.revocations, "revocations")?.len())
    }

    pub fn revocations_for_owner(&self, owner_id: &str) -> Result<Vec<RevocationRecord>, ServiceError> {
        Ok(locked(&self.revocations, "revocations")?
            .iter()
            .filter(|record| record.owner_id.as_deref() == Some(owner_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, ServiceError> {
        Ok(locked(&self.users, "users")?.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(locked(&self.users, "users")?
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        let mut users = locked(&self.users, "users")?;
        if users.values().any(|existing| existing.email == user.email) {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn set_refresh_credential(
        &self,
        user_id: &str,
        credential: Option<RefreshCredential>,
    ) -> Result<bool, ServiceError> {
        let mut users = locked(&self.users, "users")?;
        Ok(match users.get_mut(user_id) {
            Some(user) => {
                user.refresh_token = credential;
                user.updated_at = self.clock.now();
                true
            }
            None => false,
        })
    }

    async fn swap_refresh_credential(
        &self,
        user_id: &str,
        expected_hash: &str,
        next: RefreshCredential,
    ) -> Result<bool, ServiceError> {
        let mut users = locked(&self.users, "users")?;
        let Some(user) = users.get_mut(user_id) else {
            return Ok(false);
        };
        let matches = user
            .refresh_token
            .as_ref()
            .is_some_and(|current| constant_time_eq(&current.token_hash, expected_hash));
        if matches {
            user.refresh_token = Some(next);
            user.updated_at = self.clock.now();
        }
        Ok(matches)
    }

    async fn set_single_use_link(
        &self,
        user_id: &str,
        link: SingleUseLink,
    ) -> Result<bool, ServiceError> {
        let mut users = locked(&self.users, "users")?;
        Ok(match users.get_mut(user_id) {
            Some(user) => {
                user.single_use_link = Some(link);
                user.updated_at = self.clock.now();
                true
            }
            None => false,
        })
    }

    async fn take_single_use_link(
        &self,
        email: &str,
        token_hash: &str,
        purpose: LinkPurpose,
        now: DateTime<Utc>,
        effect: LinkEffect,
    ) -> Result<Option<User>, ServiceError> {
        let mut users = locked(&self.users, "users")?;
        let Some(user) = users.values_mut().find(|user| user.email == email) else {
            return Ok(None);
        };

        let redeemable = user.single_use_link.as_ref().is_some_and(|link| {
            link.purpose == purpose
                && !link.is_expired(now)
                && constant_time_eq(&link.token_hash, token_hash)
        });
        if !redeemable {
            return Ok(None);
        }

        user.single_use_link = None;
        match effect {
            LinkEffect::MarkEmailVerified => user.is_email_verified = true,
            LinkEffect::ReplacePassword(password_hash) => {
                user.password_hash = Some(password_hash);
                user.refresh_token = None;
            }
        }
        user.updated_at = self.clock.now();
        Ok(Some(user.clone()))
    }

    async fn set_legacy_role(
        &self,
        user_id: &str,
        role: LegacyRole,
    ) -> Result<bool, ServiceError> {
        let mut users = locked(&self.users, "users")?;
        Ok(match users.get_mut(user_id) {
            Some(user) => {
                user.role = role;
                user.updated_at = self.clock.now();
                true
            }
            None => false,
        })
    }

    async fn update_direct_permissions(
        &self,
        user_id: &str,
        update: SetUpdate,
    ) -> Result<Option<User>, ServiceError> {
        let mut users = locked(&self.users, "users")?;
        Ok(users.get_mut(user_id).map(|user| {
            update.apply(&mut user.permissions);
            user.updated_at = self.clock.now();
            user.clone()
        }))
    }

    async fn update_assigned_roles(
        &self,
        user_id: &str,
        update: SetUpdate,
    ) -> Result<Option<User>, ServiceError> {
        let mut users = locked(&self.users, "users")?;
        Ok(users.get_mut(user_id).map(|user| {
            update.apply(&mut user.roles);
            user.updated_at = self.clock.now();
            user.clone()
        }))
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn find_role_by_id(&self, role_id: &str) -> Result<Option<Role>, ServiceError> {
        Ok(locked(&self.roles, "roles")?.get(role_id).cloned())
    }

    async fn find_role_by_key(&self, key: &str) -> Result<Option<Role>, ServiceError> {
        Ok(locked(&self.roles, "roles")?
            .values()
            .find(|role| role.key == key)
            .cloned())
    }

    async fn find_roles_by_ids(&self, role_ids: &[String]) -> Result<Vec<Role>, ServiceError> {
        let roles = locked(&self.roles, "roles")?;
        Ok(role_ids
            .iter()
            .filter_map(|id| roles.get(id).cloned())
            .collect())
    }

    async fn find_default_role(&self) -> Result<Option<Role>, ServiceError> {
        Ok(locked(&self.roles, "roles")?
            .values()
            .find(|role| role.is_default)
            .cloned())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, ServiceError> {
        let mut roles: Vec<Role> = locked(&self.roles, "roles")?.values().cloned().collect();
        roles.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(roles)
    }

    async fn count_roles(&self) -> Result<u64, ServiceError> {
        Ok(locked(&self.roles, "roles")?.len() as u64)
    }

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError> {
        let mut roles = locked(&self.roles, "roles")?;
        if roles.values().any(|existing| existing.key == role.key) {
            return Err(ServiceError::Conflict(format!(
                "Role with key '{}' already exists",
                role.key
            )));
        }
        roles.insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn clear_default_flag(&self, except_id: &str) -> Result<u64, ServiceError> {
        let mut roles = locked(&self.roles, "roles")?;
        let mut cleared = 0;
        for role in roles.values_mut() {
            if role.id != except_id && role.is_default {
                role.is_default = false;
                role.updated_at = self.clock.now();
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn replace_role(&self, role: &Role) -> Result<bool, ServiceError> {
        let mut roles = locked(&self.roles, "roles")?;
        Ok(match roles.get_mut(&role.id) {
            Some(existing) => {
                *existing = role.clone();
                true
            }
            None => false,
        })
    }

    async fn update_role_permissions(
        &self,
        role_id: &str,
        update: SetUpdate,
    ) -> Result<Option<Role>, ServiceError> {
        let mut roles = locked(&self.roles, "roles")?;
        Ok(roles.get_mut(role_id).map(|role| {
            update.apply(&mut role.permissions);
            role.updated_at = self.clock.now();
            role.clone()
        }))
    }

    async fn delete_role(&self, role_id: &str) -> Result<bool, ServiceError> {
        Ok(locked(&self.roles, "roles")?.remove(role_id).is_some())
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn insert_revocation(&self, record: &RevocationRecord) -> Result<(), ServiceError> {
        locked(&self.revocations, "revocations")?.push(record.clone());
        Ok(())
    }

    async fn is_hash_revoked(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        Ok(locked(&self.revocations, "revocations")?
            .iter()
            .any(|record| record.token_hash == token_hash && record.is_live(now)))
    }

    async fn annotate_owner_revocations(
        &self,
        owner_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut revocations = locked(&self.revocations, "revocations")?;
        let mut touched = 0;
        for record in revocations
            .iter_mut()
            .filter(|record| record.owner_id.as_deref() == Some(owner_id) && record.is_live(now))
        {
            record.reason = reason.to_string();
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete_expired_revocations(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let mut revocations = locked(&self.revocations, "revocations")?;
        let before = revocations.len();
        revocations.retain(|record| record.is_live(now));
        Ok((before - revocations.len()) as u64)
    }
}
