//! Durable keyed-record store contracts.
//!
//! Each operation touches a single document. Operations that must not race
//! (refresh rotation, link redemption) are conditional single-document updates,
//! which gives compare-and-swap semantics without cross-record transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::ServiceError;
use crate::models::{
    LegacyRole, LinkPurpose, RefreshCredential, RevocationRecord, Role, SingleUseLink, User,
};

/// Change to a string set stored on a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetUpdate {
    Add(Vec<String>),
    Remove(Vec<String>),
    Replace(Vec<String>),
}

impl SetUpdate {
    pub fn apply(&self, current: &mut Vec<String>) {
        match self {
            SetUpdate::Add(values) => {
                for value in values {
                    if !current.contains(value) {
                        current.push(value.clone());
                    }
                }
            }
            SetUpdate::Remove(values) => current.retain(|value| !values.contains(value)),
            SetUpdate::Replace(values) => {
                current.clear();
                SetUpdate::Add(values.clone()).apply(current);
            }
        }
    }

    pub fn values(&self) -> &[String] {
        match self {
            SetUpdate::Add(values) | SetUpdate::Remove(values) | SetUpdate::Replace(values) => {
                values
            }
        }
    }

    pub fn map_values(self, f: impl FnOnce(Vec<String>) -> Vec<String>) -> Self {
        match self {
            SetUpdate::Add(values) => SetUpdate::Add(f(values)),
            SetUpdate::Remove(values) => SetUpdate::Remove(f(values)),
            SetUpdate::Replace(values) => SetUpdate::Replace(f(values)),
        }
    }
}

/// Side effect applied in the same update that consumes a single-use link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEffect {
    MarkEmailVerified,
    /// New Argon2 hash. Also drops the refresh credential.
    ReplacePassword(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, ServiceError>;

    /// `email` must already be normalized.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;

    /// Fails with `Conflict` when the email is taken.
    async fn insert_user(&self, user: &User) -> Result<(), ServiceError>;

    /// Overwrite (or clear) the stored refresh credential. Returns whether the user exists.
    async fn set_refresh_credential(
        &self,
        user_id: &str,
        credential: Option<RefreshCredential>,
    ) -> Result<bool, ServiceError>;

    /// Replace the refresh credential only if its digest still equals `expected_hash`.
    async fn swap_refresh_credential(
        &self,
        user_id: &str,
        expected_hash: &str,
        next: RefreshCredential,
    ) -> Result<bool, ServiceError>;

    /// Store a link, superseding any previous one. Returns whether the user exists.
    async fn set_single_use_link(
        &self,
        user_id: &str,
        link: SingleUseLink,
    ) -> Result<bool, ServiceError>;

    /// Atomically consume a matching, unexpired link and apply `effect`.
    ///
    /// Returns the updated user, or `None` when nothing matched.
    async fn take_single_use_link(
        &self,
        email: &str,
        token_hash: &str,
        purpose: LinkPurpose,
        now: DateTime<Utc>,
        effect: LinkEffect,
    ) -> Result<Option<User>, ServiceError>;

    async fn set_legacy_role(&self, user_id: &str, role: LegacyRole)
        -> Result<bool, ServiceError>;

    async fn update_direct_permissions(
        &self,
        user_id: &str,
        update: SetUpdate,
    ) -> Result<Option<User>, ServiceError>;

    async fn update_assigned_roles(
        &self,
        user_id: &str,
        update: SetUpdate,
    ) -> Result<Option<User>, ServiceError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_role_by_id(&self, role_id: &str) -> Result<Option<Role>, ServiceError>;

    async fn find_role_by_key(&self, key: &str) -> Result<Option<Role>, ServiceError>;

    /// Unknown ids are skipped.
    async fn find_roles_by_ids(&self, role_ids: &[String]) -> Result<Vec<Role>, ServiceError>;

    async fn find_default_role(&self) -> Result<Option<Role>, ServiceError>;

    async fn list_roles(&self) -> Result<Vec<Role>, ServiceError>;

    async fn count_roles(&self) -> Result<u64, ServiceError>;

    /// Fails with `Conflict` when the key is taken.
    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError>;

    /// Clear `is_default` on every role other than `except_id`.
    async fn clear_default_flag(&self, except_id: &str) -> Result<u64, ServiceError>;

    async fn replace_role(&self, role: &Role) -> Result<bool, ServiceError>;

    async fn update_role_permissions(
        &self,
        role_id: &str,
        update: SetUpdate,
    ) -> Result<Option<Role>, ServiceError>;

    async fn delete_role(&self, role_id: &str) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn insert_revocation(&self, record: &RevocationRecord) -> Result<(), ServiceError>;

    /// Records past their expiry do not count.
    async fn is_hash_revoked(&self, token_hash: &str, now: DateTime<Utc>)
        -> Result<bool, ServiceError>;

    /// Set `reason` on every live record owned by `owner_id`. Returns the number touched.
    async fn annotate_owner_revocations(
        &self,
        owner_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    async fn delete_expired_revocations(&self, now: DateTime<Utc>) -> Result<u64, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_add_skips_existing() {
        let mut current = set(&["a", "b"]);
        SetUpdate::Add(set(&["b", "c", "c"])).apply(&mut current);
        assert_eq!(current, set(&["a", "b", "c"]));
    }

    #[test]
    fn test_remove_and_replace() {
        let mut current = set(&["a", "b", "c"]);
        SetUpdate::Remove(set(&["b", "x"])).apply(&mut current);
        assert_eq!(current, set(&["a", "c"]));

        SetUpdate::Replace(set(&["z", "z"])).apply(&mut current);
        assert_eq!(current, set(&["z"]));
    }
}
