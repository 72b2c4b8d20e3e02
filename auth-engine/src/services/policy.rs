//! Password strength rules applied at registration and password reset.

use super::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    PasswordTooShort {
        min_length: usize,
        actual_length: usize,
    },
    PasswordMissingUppercase,
    PasswordMissingLowercase,
    PasswordMissingNumber,
    PasswordMissingSpecial,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::PasswordTooShort {
                min_length,
                actual_length,
            } => write!(
                f,
                "Password must be at least {} characters (got {})",
                min_length, actual_length
            ),
            PolicyError::PasswordMissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PolicyError::PasswordMissingLowercase => {
                write!(f, "Password must contain at least one lowercase letter")
            }
            PolicyError::PasswordMissingNumber => {
                write!(f, "Password must contain at least one number")
            }
            PolicyError::PasswordMissingSpecial => {
                write!(f, "Password must contain at least one special character")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

impl PasswordPolicy {
    pub fn new(min_length: usize) -> Self {
        Self { min_length }
    }

    /// Every violation, in a stable order.
    pub fn violations(&self, password: &str) -> Vec<PolicyError> {
        let mut errors = Vec::new();
        let length = password.chars().count();

        if length < self.min_length {
            errors.push(PolicyError::PasswordTooShort {
                min_length: self.min_length,
                actual_length: length,
            });
        }
        if !password.chars().any(|c| c.is_uppercase()) {
            errors.push(PolicyError::PasswordMissingUppercase);
        }
        if !password.chars().any(|c| c.is_lowercase()) {
            errors.push(PolicyError::PasswordMissingLowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push(PolicyError::PasswordMissingNumber);
        }
        if !password.chars().any(|c| c.is_ascii_punctuation()) {
            errors.push(PolicyError::PasswordMissingSpecial);
        }

        errors
    }

    /// `Validation` error listing every violation, joined with "; ".
    pub fn validate(&self, password: &str) -> Result<(), ServiceError> {
        let errors = self.violations(password);
        if errors.is_empty() {
            return Ok(());
        }

        Err(ServiceError::Validation(
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_password_passes() {
        assert!(PasswordPolicy::default().validate("Sup3r$ecret").is_ok());
    }

    #[test]
    fn test_reports_all_violations() {
        let errors = PasswordPolicy::default().violations("abc");
        assert_eq!(
            errors,
            vec![
                PolicyError::PasswordTooShort {
                    min_length: 8,
                    actual_length: 3
                },
                PolicyError::PasswordMissingUppercase,
                PolicyError::PasswordMissingNumber,
                PolicyError::PasswordMissingSpecial,
            ]
        );
    }

    #[test]
    fn test_validation_message_joins_violations() {
        let err = PasswordPolicy::new(12).validate("Short1!").unwrap_err();
        match err {
            ServiceError::Validation(msg) => {
                assert!(msg.contains("at least 12 characters"));
                assert!(!msg.contains("uppercase"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
