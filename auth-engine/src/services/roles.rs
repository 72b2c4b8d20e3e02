//! Role administration. Owns the single-default-role invariant.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::error::ServiceError;
use super::store::{RoleStore, SetUpdate};
use crate::models::{NewRole, Role, RoleChanges};
use crate::utils::Clock;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Built-in roles created on an empty role collection.
pub fn default_roles() -> Vec<NewRole> {
    vec![
        NewRole {
            name: "User".to_string(),
            key: "user".to_string(),
            description: Some("Default role for registered users".to_string()),
            permissions: strings(&["read:own", "update:own"]),
            is_default: true,
            is_system: true,
        },
        NewRole {
            name: "Administrator".to_string(),
            key: "admin".to_string(),
            description: Some("Full access to user and role management".to_string()),
            permissions: strings(&[
                "read:users",
                "create:users",
                "update:users",
                "delete:users",
                "read:own",
                "update:own",
                "delete:own",
                "read:roles",
                "create:roles",
                "update:roles",
                "delete:roles",
                "assign:roles",
            ]),
            is_default: false,
            is_system: true,
        },
        NewRole {
            name: "Editor".to_string(),
            key: "editor".to_string(),
            description: Some("Can read other users".to_string()),
            permissions: strings(&["read:own", "update:own", "read:users"]),
            is_default: false,
            is_system: true,
        },
    ]
}

#[derive(Clone)]
pub struct RoleService {
    store: Arc<dyn RoleStore>,
    clock: Arc<dyn Clock>,
    /// Held across "write role, clear other defaults" so concurrent default
    /// changes cannot clear each other and leave no default role.
    default_change: Arc<Mutex<()>>,
}

impl RoleService {
    pub fn new(store: Arc<dyn RoleStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            default_change: Arc::new(Mutex::new(())),
        }
    }

    pub async fn create(&self, new_role: NewRole) -> Result<Role, ServiceError> {
        let key = new_role.key.trim().to_string();
        if key.is_empty() {
            return Err(ServiceError::Validation("Role key must not be empty".to_string()));
        }
        if self.store.find_role_by_key(&key).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Role with key '{}' already exists",
                key
            )));
        }

        let role = Role::new(NewRole { key, ..new_role }, self.clock.now());
        if role.is_default {
            let _serialized = self.default_change.lock().await;
            self.store.insert_role(&role).await?;
            self.store.clear_default_flag(&role.id).await?;
        } else {
            self.store.insert_role(&role).await?;
        }

        tracing::info!(role_id = %role.id, key = %role.key, is_default = role.is_default, "Role created");
        Ok(role)
    }

    pub async fn update(&self, role_id: &str, changes: RoleChanges) -> Result<Role, ServiceError> {
        let mut role = self.find(role_id).await?;
        changes.apply(&mut role, self.clock.now());

        let _serialized = if role.is_default {
            Some(self.default_change.lock().await)
        } else {
            None
        };
        if !self.store.replace_role(&role).await? {
            return Err(ServiceError::RoleNotFound);
        }
        if role.is_default {
            self.store.clear_default_flag(&role.id).await?;
        }

        tracing::info!(role_id = %role.id, "Role updated");
        Ok(role)
    }

    pub async fn delete(&self, role_id: &str) -> Result<(), ServiceError> {
        let role = self.find(role_id).await?;
        if role.is_default {
            return Err(ServiceError::Validation(
                "Cannot delete the default role".to_string(),
            ));
        }

        if !self.store.delete_role(role_id).await? {
            return Err(ServiceError::RoleNotFound);
        }
        tracing::info!(role_id = %role_id, key = %role.key, "Role deleted");
        Ok(())
    }

    pub async fn find(&self, role_id: &str) -> Result<Role, ServiceError> {
        self.store
            .find_role_by_id(role_id)
            .await?
            .ok_or(ServiceError::RoleNotFound)
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Role, ServiceError> {
        self.store
            .find_role_by_key(key)
            .await?
            .ok_or(ServiceError::RoleNotFound)
    }

    pub async fn list(&self) -> Result<Vec<Role>, ServiceError> {
        self.store.list_roles().await
    }

    pub async fn default_role(&self) -> Result<Option<Role>, ServiceError> {
        self.store.find_default_role().await
    }

    pub async fn add_permissions(
        &self,
        role_id: &str,
        permissions: Vec<String>,
    ) -> Result<Role, ServiceError> {
        self.update_permissions(role_id, SetUpdate::Add(permissions))
            .await
    }

    pub async fn remove_permissions(
        &self,
        role_id: &str,
        permissions: Vec<String>,
    ) -> Result<Role, ServiceError> {
        self.update_permissions(role_id, SetUpdate::Remove(permissions))
            .await
    }

    pub async fn set_permissions(
        &self,
        role_id: &str,
        permissions: Vec<String>,
    ) -> Result<Role, ServiceError> {
        self.update_permissions(role_id, SetUpdate::Replace(permissions))
            .await
    }

    async fn update_permissions(
        &self,
        role_id: &str,
        update: SetUpdate,
    ) -> Result<Role, ServiceError> {
        self.store
            .update_role_permissions(role_id, update)
            .await?
            .ok_or(ServiceError::RoleNotFound)
    }

    /// Create the built-in roles when no role exists yet. Returns how many were created.
    pub async fn seed_defaults(&self) -> Result<usize, ServiceError> {
        if self.store.count_roles().await? > 0 {
            tracing::debug!("Roles already present, skipping seed");
            return Ok(0);
        }

        let mut created = 0;
        for new_role in default_roles() {
            self.create(new_role).await?;
            created += 1;
        }
        tracing::info!(created, "Seeded default roles");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryStore;
    use crate::utils::{MockClock, SystemClock};
    use chrono::Duration;

    fn service() -> RoleService {
        RoleService::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    fn new_role(key: &str, is_default: bool) -> NewRole {
        NewRole {
            name: key.to_string(),
            key: key.to_string(),
            is_default,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_at_most_one_default() {
        let roles = service();
        let first = roles.create(new_role("first", true)).await.unwrap();
        let second = roles.create(new_role("second", true)).await.unwrap();

        assert_eq!(roles.default_role().await.unwrap().unwrap().id, second.id);
        assert!(!roles.find(&first.id).await.unwrap().is_default);

        roles
            .update(
                &first.id,
                RoleChanges {
                    is_default: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let defaults: Vec<_> = roles
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, first.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_default_creates_leave_one_default() {
        let roles = service();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let roles = roles.clone();
                tokio::spawn(async move { roles.create(new_role(&format!("role-{}", i), true)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let defaults = roles
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_default)
            .count();
        assert_eq!(defaults, 1);
    }

    #[tokio::test]
    async fn test_timestamps_follow_service_clock() {
        let clock = Arc::new(MockClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let roles = RoleService::new(store, clock.clone());

        let created_at = clock.now();
        let role = roles.create(new_role("ops", false)).await.unwrap();
        assert_eq!(role.created_at, created_at);
        assert_eq!(role.updated_at, created_at);

        clock.advance(Duration::hours(2));
        let role = roles
            .update(
                &role.id,
                RoleChanges {
                    name: Some("Operations".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(role.created_at, created_at);
        assert_eq!(role.updated_at, clock.now());

        let role = roles.add_permissions(&role.id, vec!["a".into()]).await.unwrap();
        assert_eq!(role.updated_at, clock.now());
    }

    #[tokio::test]
    async fn test_duplicate_key_conflicts() {
        let roles = service();
        roles.create(new_role("editor", false)).await.unwrap();
        let err = roles.create(new_role("editor", false)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_default_role_cannot_be_deleted() {
        let roles = service();
        let default = roles.create(new_role("user", true)).await.unwrap();
        let other = roles.create(new_role("temp", false)).await.unwrap();

        assert!(matches!(
            roles.delete(&default.id).await,
            Err(ServiceError::Validation(_))
        ));
        roles.delete(&other.id).await.unwrap();
        assert!(matches!(
            roles.find(&other.id).await,
            Err(ServiceError::RoleNotFound)
        ));
    }

    #[tokio::test]
    async fn test_permission_edits() {
        let roles = service();
        let role = roles.create(new_role("ops", false)).await.unwrap();

        roles
            .add_permissions(&role.id, vec!["a".into(), "b".into()])
            .await
            .unwrap();
        let role = roles.remove_permissions(&role.id, vec!["a".into()]).await.unwrap();
        assert_eq!(role.permissions, vec!["b"]);

        let role = roles
            .set_permissions(&role.id, vec!["x".into()])
            .await
            .unwrap();
        assert_eq!(role.permissions, vec!["x"]);
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let roles = service();
        assert_eq!(roles.seed_defaults().await.unwrap(), 3);
        assert_eq!(roles.seed_defaults().await.unwrap(), 0);

        let default = roles.default_role().await.unwrap().unwrap();
        assert_eq!(default.key, "user");
        assert!(roles
            .find_by_key("admin")
            .await
            .unwrap()
            .permissions
            .contains(&"assign:roles".to_string()));
    }
}
