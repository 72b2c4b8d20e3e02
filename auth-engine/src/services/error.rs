use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Account temporarily locked. Try again in {minutes_remaining} minutes")]
    AccountLocked { minutes_remaining: i64 },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired link")]
    InvalidOrExpiredLink,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("{0}")]
    Forbidden(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Role not found")]
    RoleNotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Email error: {0}")]
    EmailError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ServiceError::Validation(errors.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::AccountLocked { minutes_remaining } => AppError::Locked(
                format!(
                    "Account temporarily locked. Try again in {} minutes",
                    minutes_remaining
                ),
                Some(minutes_remaining.max(0) as u64 * 60),
            ),
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::InvalidOrExpiredLink => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired link"))
            }
            ServiceError::InvalidRefreshToken => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid refresh token"))
            }
            ServiceError::InvalidToken => AppError::Unauthorized(anyhow::anyhow!("Invalid token")),
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::RoleNotFound => AppError::NotFound(anyhow::anyhow!("Role not found")),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::Validation(msg) => AppError::ValidationError(msg),
            ServiceError::EmailError(e) => AppError::EmailError(e),
        }
    }
}
