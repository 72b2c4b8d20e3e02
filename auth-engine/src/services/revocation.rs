use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::error::ServiceError;
use super::metrics::REVOCATIONS_SWEPT_TOTAL;
use super::store::RevocationStore;
use crate::models::{RevocationRecord, TokenClass};
use crate::utils::Clock;
use service_core::utils::hash_token;

pub const SECURITY_MEASURE_REASON: &str = "Security measure";

/// Records invalidated tokens by digest.
#[derive(Clone)]
pub struct RevocationService {
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
}

impl RevocationService {
    pub fn new(store: Arc<dyn RevocationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Revoke `token`. Without `expires_at` the record lives for the class default.
    pub async fn revoke(
        &self,
        token: &str,
        token_class: TokenClass,
        owner_id: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> Result<RevocationRecord, ServiceError> {
        self.revoke_hash(
            hash_token(token),
            token_class,
            owner_id,
            expires_at,
            reason,
        )
        .await
    }

    /// Same as [`revoke`](Self::revoke) for a token only known by its digest.
    pub async fn revoke_hash(
        &self,
        token_hash: String,
        token_class: TokenClass,
        owner_id: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> Result<RevocationRecord, ServiceError> {
        let record = RevocationRecord::new(
            token_hash,
            token_class,
            owner_id.map(str::to_string),
            expires_at,
            reason.map(str::to_string),
            self.clock.now(),
        );
        self.store.insert_revocation(&record).await?;

        tracing::info!(
            token_class = ?token_class,
            owner_id = ?owner_id,
            expires_at = %record.expires_at,
            "Token revoked"
        );
        Ok(record)
    }

    pub async fn is_revoked(&self, token: &str) -> Result<bool, ServiceError> {
        self.store
            .is_hash_revoked(&hash_token(token), self.clock.now())
            .await
    }

    /// Annotate every live record of `owner_id`. Does not touch the owner's
    /// stored refresh credential.
    pub async fn revoke_all_for_owner(
        &self,
        owner_id: &str,
        reason: Option<&str>,
    ) -> Result<u64, ServiceError> {
        let reason = reason.unwrap_or(SECURITY_MEASURE_REASON);
        let touched = self
            .store
            .annotate_owner_revocations(owner_id, reason, self.clock.now())
            .await?;
        tracing::info!(owner_id = %owner_id, touched, reason, "Annotated owner revocations");
        Ok(touched)
    }

    /// Delete records past their expiry. Returns the number removed.
    pub async fn sweep_expired(&self) -> Result<u64, ServiceError> {
        let removed = self.store.delete_expired_revocations(self.clock.now()).await?;
        metrics::counter!(REVOCATIONS_SWEPT_TOTAL).increment(removed);
        if removed > 0 {
            tracing::info!(removed, "Swept expired revocation records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryStore;
    use crate::utils::MockClock;
    use chrono::Duration;

    fn service() -> (RevocationService, Arc<MemoryStore>, Arc<MockClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MockClock::default());
        (
            RevocationService::new(store.clone(), clock.clone()),
            store,
            clock,
        )
    }

    #[tokio::test]
    async fn test_revoked_until_expiry() {
        let (revocations, _, clock) = service();

        revocations
            .revoke("magic", TokenClass::MagicLink, None, None, None)
            .await
            .unwrap();
        assert!(revocations.is_revoked("magic").await.unwrap());
        assert!(!revocations.is_revoked("other").await.unwrap());

        clock.advance(Duration::minutes(31));
        assert!(!revocations.is_revoked("magic").await.unwrap());
    }

    #[tokio::test]
    async fn test_stores_digest_not_token() {
        let (revocations, store, _) = service();

        let record = revocations
            .revoke("raw-token", TokenClass::Access, Some("u1"), None, None)
            .await
            .unwrap();

        assert_ne!(record.token_hash, "raw-token");
        assert_eq!(store.revocations_for_owner("u1").unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_revoke_all_only_touches_live_records() {
        let (revocations, store, clock) = service();
        let now = clock.now();

        revocations
            .revoke("a", TokenClass::Access, Some("u1"), None, None)
            .await
            .unwrap();
        revocations
            .revoke("b", TokenClass::Access, Some("u1"), Some(now - Duration::seconds(1)), None)
            .await
            .unwrap();
        revocations
            .revoke("c", TokenClass::Access, Some("u2"), None, None)
            .await
            .unwrap();

        assert_eq!(revocations.revoke_all_for_owner("u1", None).await.unwrap(), 1);
        let reasons: Vec<String> = store
            .revocations_for_owner("u1")
            .unwrap()
            .into_iter()
            .map(|r| r.reason)
            .collect();
        assert!(reasons.contains(&SECURITY_MEASURE_REASON.to_string()));
        assert!(reasons.contains(&"User-initiated logout".to_string()));
    }
}
