pub mod revocation;
pub mod role;
pub mod user;

pub use revocation::{RevocationRecord, TokenClass, DEFAULT_REVOCATION_REASON};
pub use role::{NewRole, Role, RoleChanges};
pub use user::{LegacyRole, LinkPurpose, Principal, RefreshCredential, SingleUseLink, User};
