pub mod secrets;

pub use secrets::{constant_time_eq, generate_secret, hash_token, verify_token_hash};
