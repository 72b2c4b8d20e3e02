//! Shared setup for auth-engine integration tests.
//!
//! Everything runs against the in-memory store, the recording email provider
//! and a manually driven clock, so no MongoDB or SMTP server is needed.

#![allow(dead_code)]

use auth_engine::{
    models::{LegacyRole, Principal, User},
    services::{MemoryStore, MockEmailService, UserStore},
    utils::{hash_password, Clock, MockClock, Password},
    AppState, EngineSettings,
};
use secrecy::SecretString;
use std::sync::Arc;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-at-least-32-bytes";
pub const TEST_PASSWORD: &str = "Corr3ct!Horse";

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub email: MockEmailService,
    pub clock: Arc<MockClock>,
}

impl TestApp {
    /// Fresh engine with the default roles seeded.
    pub async fn spawn() -> Self {
        let clock = Arc::new(MockClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let email = MockEmailService::new();

        let state = AppState::new(
            store.clone(),
            Arc::new(email.clone()),
            clock.clone(),
            EngineSettings::new(SecretString::new(TEST_JWT_SECRET.to_string())),
        );
        state
            .roles
            .seed_defaults()
            .await
            .expect("Failed to seed default roles");

        Self {
            state,
            store,
            email,
            clock,
        }
    }

    /// Insert an active user with `TEST_PASSWORD` directly into the store.
    pub async fn create_user(&self, email: &str, role: LegacyRole) -> Principal {
        let hash = hash_password(&Password::new(TEST_PASSWORD)).expect("Failed to hash password");
        let mut user = User::new("Test User".to_string(), email, Some(hash), self.clock.now());
        user.role = role;
        self.store
            .insert_user(&user)
            .await
            .expect("Failed to insert user");
        user.principal()
    }

    pub async fn user(&self, user_id: &str) -> User {
        self.store
            .find_user_by_id(user_id)
            .await
            .expect("store lookup failed")
            .expect("user exists")
    }

    /// Raw token of the last link mailed to `email`.
    pub fn last_link_token(&self, email: &str) -> String {
        self.email
            .last_to(email)
            .and_then(|sent| sent.token())
            .expect("a link was mailed")
    }
}
