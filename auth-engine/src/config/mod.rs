use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

use crate::services::{LockoutPolicy, PasswordPolicy};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub mongodb: MongoConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub links: LinkConfig,
    /// `None` when SMTP_HOST is unset outside production.
    pub smtp: Option<SmtpConfig>,
    pub revocation_sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub password_max_attempts: u32,
    pub lockout_minutes: i64,
    pub password_min_length: usize,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub expiry_minutes: i64,
    pub app_url: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: SecretString,
    pub from: String,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                user: get_env("SMTP_USER", None, is_prod)?,
                password: SecretString::new(get_env("SMTP_PASSWORD", None, is_prod)?),
                from: get_env("EMAIL_FROM", None, is_prod)?,
            }),
            Err(_) if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SMTP_HOST is required in production but not set"
                )))
            }
            Err(_) => None,
        };

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("auth-engine"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("auth"), is_prod)?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "60",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "30", is_prod)?,
            },
            security: SecurityConfig {
                password_max_attempts: parse_env("PASSWORD_MAX_ATTEMPTS", "5", is_prod)?,
                lockout_minutes: parse_env("AUTH_LOCKOUT_TIME", "15", is_prod)?,
                password_min_length: parse_env("PASSWORD_MIN_LENGTH", "8", is_prod)?,
            },
            links: LinkConfig {
                expiry_minutes: parse_env("MAGIC_LINK_EXPIRY_MINUTES", "30", is_prod)?,
                app_url: get_env("APP_URL", Some("http://localhost:3000"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
            },
            smtp,
            revocation_sweep_interval_seconds: parse_env(
                "REVOCATION_SWEEP_INTERVAL_SECONDS",
                "3600",
                is_prod,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.secret.expose_secret().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.security.password_max_attempts == 0 || self.security.lockout_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSWORD_MAX_ATTEMPTS and AUTH_LOCKOUT_TIME must be positive"
            )));
        }

        if self.links.expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MAGIC_LINK_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.revocation_sweep_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REVOCATION_SWEEP_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod && self.jwt.secret.expose_secret().len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 bytes in production"
            )));
        }

        Ok(())
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_attempts: self.security.password_max_attempts,
            lockout: Duration::minutes(self.security.lockout_minutes),
        }
    }

    pub fn password_policy(&self) -> PasswordPolicy {
        PasswordPolicy::new(self.security.password_min_length)
    }

    pub fn access_token_expiry(&self) -> Duration {
        Duration::minutes(self.jwt.access_token_expiry_minutes)
    }

    pub fn refresh_token_expiry(&self) -> Duration {
        Duration::days(self.jwt.refresh_token_expiry_days)
    }

    pub fn link_expiry(&self) -> Duration {
        Duration::minutes(self.links.expiry_minutes)
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
