pub mod config;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Duration;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::middleware::AccessGuard;
use crate::services::{
    AuthService, CredentialVerifier, EmailProvider, JwtService, LinkService, LockoutPolicy,
    MongoDb, PasswordPolicy, PermissionResolver, RevocationService, RevocationStore, RoleService,
    RoleStore, SessionService, UserService, UserStore,
};
use crate::utils::Clock;

/// Tunables the services are built from.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub jwt_secret: SecretString,
    pub access_token_expiry: Duration,
    pub refresh_token_expiry: Duration,
    pub lockout: LockoutPolicy,
    pub password_policy: PasswordPolicy,
    pub link_expiry: Duration,
    pub app_url: String,
}

impl EngineSettings {
    /// Default windows: 60 min bearer, 30 day refresh, 5 attempts / 15 min
    /// lockout, 30 min links.
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            access_token_expiry: Duration::minutes(60),
            refresh_token_expiry: Duration::days(30),
            lockout: LockoutPolicy::default(),
            password_policy: PasswordPolicy::default(),
            link_expiry: Duration::minutes(30),
            app_url: "http://localhost:3000".to_string(),
        }
    }
}

impl From<&AuthConfig> for EngineSettings {
    fn from(config: &AuthConfig) -> Self {
        Self {
            jwt_secret: config.jwt.secret.clone(),
            access_token_expiry: config.access_token_expiry(),
            refresh_token_expiry: config.refresh_token_expiry(),
            lockout: config.lockout_policy(),
            password_policy: config.password_policy(),
            link_expiry: config.link_expiry(),
            app_url: config.links.app_url.clone(),
        }
    }
}

/// Everything a request handler or middleware needs.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub users: UserService,
    pub roles: RoleService,
    pub revocations: RevocationService,
    pub guard: AccessGuard,
    pub db: Option<MongoDb>,
}

impl AppState {
    /// Wire every service over one store implementing all three store traits.
    pub fn new<S>(
        store: Arc<S>,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self
    where
        S: UserStore + RoleStore + RevocationStore + 'static,
    {
        let users: Arc<dyn UserStore> = store.clone();
        let roles: Arc<dyn RoleStore> = store.clone();
        let revocation_store: Arc<dyn RevocationStore> = store;

        let jwt = JwtService::new(
            &settings.jwt_secret,
            settings.access_token_expiry,
            clock.clone(),
        );
        let resolver = PermissionResolver::new(roles.clone());
        let revocations = RevocationService::new(revocation_store, clock.clone());
        let verifier = CredentialVerifier::new(users.clone(), clock.clone(), settings.lockout);
        let sessions = SessionService::new(
            users.clone(),
            jwt,
            resolver.clone(),
            revocations.clone(),
            clock.clone(),
            settings.refresh_token_expiry,
        );
        let links = LinkService::new(
            users.clone(),
            email,
            sessions.clone(),
            settings.password_policy,
            clock.clone(),
            settings.link_expiry,
            settings.app_url,
        );
        let user_service = UserService::new(
            users,
            roles.clone(),
            resolver.clone(),
            links.clone(),
            settings.password_policy,
            clock.clone(),
        );

        Self {
            auth: AuthService::new(verifier, sessions, links, resolver.clone()),
            users: user_service,
            roles: RoleService::new(roles, clock),
            revocations,
            guard: AccessGuard::new(resolver),
            db: None,
        }
    }

    pub fn with_database(mut self, db: MongoDb) -> Self {
        self.db = Some(db);
        self
    }
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match &state.db {
        Some(db) => match db.health_check().await {
            Ok(()) => "up",
            Err(_) => "down",
        },
        None => "not_configured",
    };

    let status = if database == "down" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "database": database,
        })),
    )
}

async fn metrics_endpoint() -> String {
    services::metrics::get_metrics()
}

/// Operational routes: `/health` and `/metrics`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}
