//! Role model - named permission bundles referenced by principals.

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role document as persisted in the `roles` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    /// Unique, machine-facing identifier (`admin`, `editor`).
    pub key: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// At most one role carries this flag.
    #[serde(default)]
    pub is_default: bool,
    /// Seeded roles.
    #[serde(default)]
    pub is_system: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(new_role: NewRole, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: new_role.name,
            key: new_role.key,
            description: new_role.description,
            permissions: dedup(new_role.permissions),
            is_default: new_role.is_default,
            is_system: new_role.is_system,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for role creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_system: bool,
}

/// Partial role update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub is_default: Option<bool>,
}

impl RoleChanges {
    pub fn apply(self, role: &mut Role, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            role.name = name;
        }
        if let Some(description) = self.description {
            role.description = Some(description);
        }
        if let Some(permissions) = self.permissions {
            role.permissions = dedup(permissions);
        }
        if let Some(is_default) = self.is_default {
            role.is_default = is_default;
        }
        role.updated_at = now;
    }
}

/// Drop repeated entries, keeping first occurrence order.
pub(crate) fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_role_collapses_duplicate_permissions() {
        let role = Role::new(
            NewRole {
                name: "Editor".into(),
                key: "editor".into(),
                permissions: vec!["read:own".into(), "read:users".into(), "read:own".into()],
                ..Default::default()
            },
            Utc::now(),
        );

        assert_eq!(role.permissions, vec!["read:own", "read:users"]);
        assert!(!role.is_default);
    }

    #[test]
    fn test_changes_leave_unset_fields() {
        let created_at = Utc::now();
        let mut role = Role::new(
            NewRole {
                name: "User".into(),
                key: "user".into(),
                permissions: vec!["read:own".into()],
                is_default: true,
                ..Default::default()
            },
            created_at,
        );

        let later = created_at + chrono::Duration::minutes(5);
        RoleChanges {
            name: Some("Member".into()),
            ..Default::default()
        }
        .apply(&mut role, later);

        assert_eq!(role.name, "Member");
        assert_eq!(role.key, "user");
        assert!(role.is_default);
        assert_eq!(role.permissions, vec!["read:own"]);
        assert_eq!(role.created_at, created_at);
        assert_eq!(role.updated_at, later);
    }
}
