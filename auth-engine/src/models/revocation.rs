use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_REVOCATION_REASON: &str = "User-initiated logout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenClass {
    Access,
    Refresh,
    MagicLink,
    ResetPassword,
    Other,
}

impl TokenClass {
    /// Lifetime of a record when the caller gives no explicit expiry.
    pub fn default_ttl(&self) -> Duration {
        match self {
            TokenClass::Access => Duration::minutes(60),
            TokenClass::Refresh => Duration::days(30),
            TokenClass::MagicLink | TokenClass::ResetPassword => Duration::minutes(30),
            TokenClass::Other => Duration::hours(24),
        }
    }
}

/// A revoked token, identified only by its digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevocationRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub token_hash: String,
    pub token_class: TokenClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl RevocationRecord {
    pub fn new(
        token_hash: String,
        token_class: TokenClass,
        owner_id: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            token_hash,
            token_class,
            owner_id,
            expires_at: expires_at.unwrap_or_else(|| now + token_class.default_ttl()),
            reason: reason.unwrap_or_else(|| DEFAULT_REVOCATION_REASON.to_string()),
            created_at: now,
        }
    }

    /// Expired records are logically absent even before the sweep removes them.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
