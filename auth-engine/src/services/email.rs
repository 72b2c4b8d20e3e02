use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::ServiceError;
use crate::config::SmtpConfig;
use crate::models::LinkPurpose;

/// Delivery collaborator for single-use links.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_single_use_link(
        &self,
        to_email: &str,
        purpose: LinkPurpose,
        link_url: &str,
        expires_in_minutes: i64,
    ) -> Result<(), ServiceError>;
}

struct Template {
    subject: &'static str,
    heading: &'static str,
    intro: &'static str,
    action: &'static str,
}

fn template(purpose: LinkPurpose) -> Template {
    match purpose {
        LinkPurpose::MagicLogin => Template {
            subject: "Your Sign-In Link",
            heading: "Sign in to your account",
            intro: "Click the link below to sign in. No password needed:",
            action: "Sign In",
        },
        LinkPurpose::EmailVerification => Template {
            subject: "Verify Your Email Address",
            heading: "Welcome! Please verify your email",
            intro: "Thank you for registering. Please click the link below to verify your email address:",
            action: "Verify Email",
        },
        LinkPurpose::PasswordReset => Template {
            subject: "Reset Your Password",
            heading: "Password Reset Request",
            intro: "We received a request to reset your password. Click the link below to set a new password:",
            action: "Reset Password",
        },
    }
}

/// Plain text and HTML bodies for a link email.
fn render(purpose: LinkPurpose, link_url: &str, expires_in_minutes: i64) -> (String, String) {
    let t = template(purpose);
    let footer = format!(
        "This link will expire in {} minutes. If you didn't request this, please ignore this email.",
        expires_in_minutes
    );

    let html_body = format!(
        r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>{heading}</h2>
        <p>{intro}</p>
        <p>
            <a href="{link}" style="background-color: #2196F3; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">
                {action}
            </a>
        </p>
        <p style="color: #666; font-size: 12px;">{footer}</p>
    </body>
</html>
"###,
        heading = t.heading,
        intro = t.intro,
        link = link_url,
        action = t.action,
        footer = footer,
    );

    let plain_body = format!("{}\n\n{}\n\n{}\n\n{}", t.heading, t.intro, link_url, footer);

    (plain_body, html_body)
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, ServiceError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().to_string(),
        );

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(587)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email service initialized with SMTP relay");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_single_use_link(
        &self,
        to_email: &str,
        purpose: LinkPurpose,
        link_url: &str,
        expires_in_minutes: i64,
    ) -> Result<(), ServiceError> {
        let (plain_body, html_body) = render(purpose, link_url, expires_in_minutes);
        let subject = template(purpose).subject;

        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| ServiceError::Internal(e.into()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| ServiceError::EmailError(e.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| ServiceError::Internal(e.into()))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(purpose = purpose.as_str(), "Link email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, purpose = purpose.as_str(), "Failed to send link email");
                Err(ServiceError::EmailError(e.to_string()))
            }
        }
    }
}

/// A message captured by [`MockEmailService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub purpose: LinkPurpose,
    pub link_url: String,
    pub expires_in_minutes: i64,
}

impl SentEmail {
    /// Decoded value of query parameter `name` in the link.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.link_url.split_once('?')?.1;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .and_then(|(_, value)| urlencoding::decode(value).ok())
            .map(|value| value.into_owned())
    }

    /// The raw `token` query parameter of the link.
    pub fn token(&self) -> Option<String> {
        self.query_param("token")
    }
}

/// Records messages instead of sending them.
#[derive(Clone, Default)]
pub struct MockEmailService {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    fail: bool,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with `EmailError`.
    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn last_to(&self, to_email: &str) -> Option<SentEmail> {
        self.sent().into_iter().rev().find(|email| email.to == to_email)
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_single_use_link(
        &self,
        to_email: &str,
        purpose: LinkPurpose,
        link_url: &str,
        expires_in_minutes: i64,
    ) -> Result<(), ServiceError> {
        if self.fail {
            return Err(ServiceError::EmailError("mock delivery failure".to_string()));
        }
        self.sent
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Mock email mutex poisoned: {}", e)))?
            .push(SentEmail {
                to: to_email.to_string(),
                purpose,
                link_url: link_url.to_string(),
                expires_in_minutes,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_email_service_creation() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            user: "mailer@example.com".to_string(),
            password: SecretString::new("app-password".to_string()),
            from: "no-reply@example.com".to_string(),
        };

        assert!(EmailService::new(&config).is_ok());
    }

    #[test]
    fn test_templates_embed_link() {
        let (plain, html) = render(LinkPurpose::PasswordReset, "https://app/reset?token=abc", 45);
        assert!(plain.contains("https://app/reset?token=abc"));
        assert!(plain.contains("expire in 45 minutes"));
        assert!(html.contains("expire in 45 minutes"));
        assert!(html.contains("Reset Password"));
        assert_eq!(template(LinkPurpose::MagicLogin).subject, "Your Sign-In Link");
    }

    #[tokio::test]
    async fn test_mock_records_and_extracts_token() {
        let mock = MockEmailService::new();
        mock.send_single_use_link(
            "a@x.com",
            LinkPurpose::MagicLogin,
            "http://localhost/auth/magic-link?token=dead%2Bbeef&email=a%40x.com",
            30,
        )
        .await
        .unwrap();

        let sent = mock.last_to("a@x.com").unwrap();
        assert_eq!(sent.token().as_deref(), Some("dead+beef"));
        assert_eq!(sent.query_param("email").as_deref(), Some("a@x.com"));
        assert_eq!(sent.query_param("missing"), None);
        assert_eq!(sent.expires_in_minutes, 30);
        assert!(MockEmailService::failing()
            .send_single_use_link("a@x.com", LinkPurpose::MagicLogin, "x", 30)
            .await
            .is_err());
    }
}
