pub mod auth;
pub mod guards;

pub use auth::{auth_middleware, BearerToken, CurrentPrincipal};
pub use guards::{permission_guard, role_guard, AccessGuard, PermissionGate, RoleGate};
