pub mod clock;
pub mod password;

pub use clock::{Clock, MockClock, SystemClock};
pub use password::{
    hash_password, hash_password_blocking, password_matches, password_matches_blocking, Password,
};

/// Canonical form of an email used as lookup and lockout key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
