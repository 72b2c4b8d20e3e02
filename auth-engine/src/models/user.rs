//! Principal records: identity, credentials and the three authorization sources.

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::utils::hash_token;
use std::str::FromStr;
use uuid::Uuid;

/// Legacy single role kept on every principal for backward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyRole {
    #[default]
    User,
    Admin,
    Editor,
}

impl LegacyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyRole::User => "user",
            LegacyRole::Admin => "admin",
            LegacyRole::Editor => "editor",
        }
    }

    /// Administrators bypass every role and permission guard.
    pub fn is_administrator(&self) -> bool {
        matches!(self, LegacyRole::Admin)
    }
}

impl FromStr for LegacyRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(LegacyRole::User),
            "admin" => Ok(LegacyRole::Admin),
            "editor" => Ok(LegacyRole::Editor),
            _ => Err(format!("Invalid legacy role: {}", s)),
        }
    }
}

/// Stored refresh credential: digest of the opaque refresh secret plus its expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshCredential {
    pub token_hash: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}

impl RefreshCredential {
    pub fn new(refresh_secret: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_hash: hash_token(refresh_secret),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// What a single-use link is good for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPurpose {
    MagicLogin,
    EmailVerification,
    PasswordReset,
}

impl LinkPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPurpose::MagicLogin => "magic_login",
            LinkPurpose::EmailVerification => "email_verification",
            LinkPurpose::PasswordReset => "password_reset",
        }
    }
}

/// The one active single-use link of a principal. Issuing a new one overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleUseLink {
    pub token_hash: String,
    pub purpose: LinkPurpose,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}

impl SingleUseLink {
    pub fn new(token: &str, purpose: LinkPurpose, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_hash: hash_token(token),
            purpose,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// User document as persisted in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    /// Lower-cased, unique.
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default)]
    pub role: LegacyRole,
    /// Role ids. Weak references; roles are owned by the role collection.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Direct per-user grants.
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshCredential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_use_link: Option<SingleUseLink>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        name: String,
        email: &str,
        password_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            email: crate::utils::normalize_email(email),
            password_hash,
            is_active: true,
            is_email_verified: false,
            role: LegacyRole::default(),
            roles: Vec::new(),
            permissions: Vec::new(),
            refresh_token: None,
            single_use_link: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn principal(&self) -> Principal {
        Principal::from(self)
    }
}

/// A user stripped of every credential field. This is what authentication
/// returns and what guards see on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub role: LegacyRole,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            is_active: user.is_active,
            is_email_verified: user.is_email_verified,
            role: user.role,
            roles: user.roles.clone(),
            permissions: user.permissions.clone(),
        }
    }
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Principal::from(&user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_user_normalizes_email() {
        let user = User::new("Ada".to_string(), "  Ada@Example.COM ", None, Utc::now());
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.role, LegacyRole::User);
        assert!(user.password_hash.is_none());
    }

    #[test]
    fn test_principal_has_no_credentials() {
        let mut user = User::new("Ada".to_string(), "ada@example.com", Some("hash".into()), Utc::now());
        user.refresh_token = Some(RefreshCredential::new("secret", Utc::now()));

        let json = serde_json::to_value(user.principal()).expect("principal serializes");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("refresh_token").is_none());
        assert_eq!(json["email"], "ada@example.com");
    }

    #[test]
    fn test_credentials_store_digests_only() {
        let now = Utc::now();
        let refresh = RefreshCredential::new("raw-refresh", now);
        let link = SingleUseLink::new("raw-link", LinkPurpose::MagicLogin, now);

        assert_ne!(refresh.token_hash, "raw-refresh");
        assert_ne!(link.token_hash, "raw-link");
    }

    #[test]
    fn test_link_expiry_is_strictly_after_deadline() {
        let now = Utc::now();
        let link = SingleUseLink::new("t", LinkPurpose::PasswordReset, now);

        assert!(!link.is_expired(now));
        assert!(link.is_expired(now + Duration::seconds(1)));
    }

    #[test]
    fn test_legacy_role_parse() {
        assert_eq!("ADMIN".parse::<LegacyRole>(), Ok(LegacyRole::Admin));
        assert!("owner".parse::<LegacyRole>().is_err());
        assert!(LegacyRole::Admin.is_administrator());
        assert!(!LegacyRole::Editor.is_administrator());
    }
}
