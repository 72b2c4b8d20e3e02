//! Services layer for auth-engine.
//!
//! Business logic for credential verification, sessions, single-use links,
//! role administration and permission resolution, over the store traits.

mod auth;
mod credentials;
mod database;
pub mod email;
pub mod error;
mod jwt;
mod links;
mod memory;
pub mod metrics;
mod permissions;
mod policy;
mod revocation;
mod roles;
mod session;
pub mod store;
mod sweeper;
mod users;

pub use auth::AuthService;
pub use credentials::{CredentialVerifier, LockoutPolicy};
pub use database::MongoDb;
pub use email::{EmailProvider, EmailService, MockEmailService, SentEmail};
pub use error::ServiceError;
pub use jwt::{AccessTokenClaims, JwtService};
pub use links::{LinkAction, LinkIssued, LinkOutcome, LinkService};
pub use memory::MemoryStore;
pub use permissions::{EffectivePermissions, PermissionResolver, PermissionSources};
pub use policy::{PasswordPolicy, PolicyError};
pub use revocation::{RevocationService, SECURITY_MEASURE_REASON};
pub use roles::{default_roles, RoleService};
pub use session::{SessionService, SessionTokens, REFRESH_REUSE_REASON};
pub use store::{LinkEffect, RevocationStore, RoleStore, SetUpdate, UserStore};
pub use sweeper::RevocationSweeper;
pub use users::{Registration, UserService};
