//! Password verification with per-email lockout.
//!
//! Failed-attempt counters live in process memory, keyed by the normalized
//! email. An attempt is reserved under the `DashMap` shard lock for its key
//! before the password is checked, so a parallel burst cannot get more than
//! `max_attempts` guesses past the lock. The counter only resets on success
//! or once a lockout has run its course.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use super::error::ServiceError;
use super::metrics::{LOCKOUTS_TOTAL, LOGIN_FAILURES_TOTAL};
use super::store::UserStore;
use crate::models::Principal;
use crate::utils::{normalize_email, password_matches_blocking, Clock, Password};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout: Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailedAttempts {
    count: u32,
    last_attempt: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CredentialVerifier {
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
    attempts: Arc<DashMap<String, FailedAttempts>>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<dyn UserStore>, clock: Arc<dyn Clock>, policy: LockoutPolicy) -> Self {
        Self {
            users,
            clock,
            policy,
            attempts: Arc::new(DashMap::new()),
        }
    }

    /// Check `password` for `email`.
    ///
    /// `Ok(None)` covers both an unknown email and a wrong password; callers
    /// must not distinguish them. `AccountLocked` is returned while the lockout
    /// window is open, even for the correct password.
    pub async fn verify(
        &self,
        email: &str,
        password: Password,
    ) -> Result<Option<Principal>, ServiceError> {
        let key = normalize_email(email);
        let attempt = self.reserve_attempt(&key)?;

        match self.check_password(&key, password).await {
            Ok(Some(principal)) => {
                self.attempts.remove(&key);
                tracing::debug!(user_id = %principal.id, "Credentials verified");
                Ok(Some(principal))
            }
            Ok(None) => {
                self.record_failure(attempt);
                Ok(None)
            }
            Err(e) => {
                // Infrastructure failures are not guesses.
                self.release_attempt(&key);
                Err(e)
            }
        }
    }

    /// Current failure count for `email` (0 when none is tracked).
    pub fn failed_attempts(&self, email: &str) -> u32 {
        self.attempts
            .get(&normalize_email(email))
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    async fn check_password(
        &self,
        key: &str,
        password: Password,
    ) -> Result<Option<Principal>, ServiceError> {
        let Some(user) = self.users.find_user_by_email(key).await? else {
            return Ok(None);
        };
        if password_matches_blocking(password, user.password_hash.clone()).await? {
            Ok(Some(user.principal()))
        } else {
            Ok(None)
        }
    }

    /// Refuse while locked, otherwise count this attempt. Returns the new count.
    fn reserve_attempt(&self, key: &str) -> Result<u32, ServiceError> {
        let now = self.clock.now();
        let mut entry = self
            .attempts
            .entry(key.to_string())
            .or_insert(FailedAttempts {
                count: 0,
                last_attempt: now,
            });

        if entry.count >= self.policy.max_attempts {
            let locked_until = entry.last_attempt + self.policy.lockout;
            if now < locked_until {
                let minutes_remaining = ((locked_until - now).num_milliseconds() + 59_999) / 60_000;
                tracing::warn!(attempts = entry.count, minutes_remaining, "Login attempt on locked account");
                return Err(ServiceError::AccountLocked { minutes_remaining });
            }
            // The lockout has run its course.
            entry.count = 0;
        }

        entry.count += 1;
        entry.last_attempt = now;
        Ok(entry.count)
    }

    fn release_attempt(&self, key: &str) {
        if let Some(mut entry) = self.attempts.get_mut(key) {
            entry.count = entry.count.saturating_sub(1);
        }
        self.attempts.remove_if(key, |_, attempts| attempts.count == 0);
    }

    fn record_failure(&self, count: u32) {
        metrics::counter!(LOGIN_FAILURES_TOTAL).increment(1);
        if count == self.policy.max_attempts {
            metrics::counter!(LOCKOUTS_TOTAL).increment(1);
            tracing::warn!(attempts = count, "Account locked after repeated failed logins");
        } else {
            tracing::info!(attempts = count, "Failed login attempt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::services::MemoryStore;
    use crate::utils::{hash_password, MockClock};

    async fn verifier_with_user() -> (CredentialVerifier, Arc<MockClock>) {
        let store = Arc::new(MemoryStore::new());
        let hash = hash_password(&Password::new("Sup3r$ecret")).unwrap();
        store
            .insert_user(&User::new("A".into(), "a@x.com", Some(hash), Utc::now()))
            .await
            .unwrap();
        let clock = Arc::new(MockClock::default());
        let verifier = CredentialVerifier::new(store, clock.clone(), LockoutPolicy::default());
        (verifier, clock)
    }

    #[tokio::test]
    async fn test_success_clears_counter() {
        let (verifier, _) = verifier_with_user().await;

        assert!(verifier
            .verify("a@x.com", Password::new("wrong"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(verifier.failed_attempts("A@X.COM"), 1);

        let principal = verifier
            .verify("A@x.com", Password::new("Sup3r$ecret"))
            .await
            .unwrap()
            .expect("correct password");
        assert_eq!(principal.email, "a@x.com");
        assert_eq!(verifier.failed_attempts("a@x.com"), 0);
    }

    #[tokio::test]
    async fn test_unknown_email_counts_as_failure() {
        let (verifier, _) = verifier_with_user().await;

        let result = verifier
            .verify("ghost@x.com", Password::new("whatever"))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(verifier.failed_attempts("ghost@x.com"), 1);
    }

    #[tokio::test]
    async fn test_failures_below_limit_do_not_expire() {
        let (verifier, clock) = verifier_with_user().await;

        for _ in 0..4 {
            verifier.verify("a@x.com", Password::new("bad")).await.unwrap();
        }
        clock.advance(Duration::minutes(20));
        verifier.verify("a@x.com", Password::new("bad")).await.unwrap();
        assert_eq!(verifier.failed_attempts("a@x.com"), 5);

        let result = verifier.verify("a@x.com", Password::new("Sup3r$ecret")).await;
        assert!(matches!(
            result,
            Err(ServiceError::AccountLocked { minutes_remaining: 15 })
        ));
    }

    #[tokio::test]
    async fn test_expired_lockout_starts_over() {
        let (verifier, clock) = verifier_with_user().await;

        for _ in 0..5 {
            verifier.verify("a@x.com", Password::new("bad")).await.unwrap();
        }
        clock.advance(Duration::minutes(15));
        verifier.verify("a@x.com", Password::new("bad")).await.unwrap();

        assert_eq!(verifier.failed_attempts("a@x.com"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_guesses_cannot_exceed_limit() {
        let (verifier, _) = verifier_with_user().await;
        let verifier = Arc::new(verifier);

        let tasks: Vec<_> = (0..30)
            .map(|_| {
                let verifier = verifier.clone();
                tokio::spawn(async move {
                    verifier.verify("a@x.com", Password::new("bad")).await
                })
            })
            .collect();

        let mut checked = 0;
        let mut locked = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(None) => checked += 1,
                Err(ServiceError::AccountLocked { .. }) => locked += 1,
                other => panic!("unexpected outcome: {:?}", other.map(|p| p.map(|p| p.email))),
            }
        }

        assert_eq!(checked, 5);
        assert_eq!(locked, 25);
        assert_eq!(verifier.failed_attempts("a@x.com"), 5);
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_all_counted() {
        let (verifier, _) = verifier_with_user().await;
        let verifier = Arc::new(CredentialVerifier {
            policy: LockoutPolicy {
                max_attempts: 100,
                lockout: Duration::minutes(15),
            },
            ..verifier
        });

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let verifier = verifier.clone();
                tokio::spawn(async move {
                    verifier.verify("a@x.com", Password::new("bad")).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(verifier.failed_attempts("a@x.com"), 20);
    }
}
