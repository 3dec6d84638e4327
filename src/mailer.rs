use std::time::Duration;

use anyhow::Context;
use axum::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::SmtpConfig;

const SEND_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);
const SMTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Email {
    Welcome { user_id: i64, activation_token: String },
    Activation { activation_token: String },
    PasswordReset { reset_token: String },
}

impl Email {
    pub fn subject(&self) -> &'static str {
        match self {
            Email::Welcome { .. } => "Welcome to Greenreel!",
            Email::Activation { .. } => "Activate your Greenreel account",
            Email::PasswordReset { .. } => "Reset your Greenreel password",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Email::Welcome {
                user_id,
                activation_token,
            } => format!(
                "Hi,\n\n\
                 Thanks for signing up for a Greenreel account. We're excited to have you on board!\n\n\
                 For future reference, your user ID number is {user_id}.\n\n\
                 Please send a request to the `PUT /v1/users/activated` endpoint with the \
                 following JSON body to activate your account:\n\n\
                 {{\"token\": \"{activation_token}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in 3 days.\n\n\
                 Thanks,\n\nThe Greenreel Team\n"
            ),
            Email::Activation { activation_token } => format!(
                "Hi,\n\n\
                 Please send a `PUT /v1/users/activated` request with the following JSON body \
                 to activate your account:\n\n\
                 {{\"token\": \"{activation_token}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in 3 days.\n\n\
                 Thanks,\n\nThe Greenreel Team\n"
            ),
            Email::PasswordReset { reset_token } => format!(
                "Hi,\n\n\
                 Please send a `PUT /v1/users/password` request with the following JSON body \
                 to set a new password:\n\n\
                 {{\"password\": \"your new password\", \"token\": \"{reset_token}\"}}\n\n\
                 Please note that this is a one-time use token and it will expire in 45 minutes. \
                 If you need another token please make a `POST /v1/tokens/password-reset` request.\n\n\
                 Thanks,\n\nThe Greenreel Team\n"
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, email: Email) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .with_context(|| format!("configure SMTP relay {}", cfg.host))?
            .port(cfg.port)
            .timeout(Some(SMTP_TIMEOUT));
        if !cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ));
        }
        let sender = cfg
            .sender
            .parse::<Mailbox>()
            .with_context(|| format!("parse SMTP sender {:?}", cfg.sender))?;

        Ok(Self {
            transport: builder.build(),
            sender,
        })
    }

    fn compose(&self, recipient: &str, email: &Email) -> anyhow::Result<Message> {
        let to = recipient
            .parse::<Mailbox>()
            .with_context(|| format!("parse recipient {recipient:?}"))?;
        Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(email.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body())
            .context("build email")
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, recipient: &str, email: Email) -> anyhow::Result<()> {
        let message = self.compose(recipient, &email)?;

        let mut attempt = 1;
        loop {
            match self.transport.send(message.clone()).await {
                Ok(_) => {
                    info!(subject = email.subject(), attempt, "email sent");
                    return Ok(());
                }
                Err(e) if attempt < SEND_ATTEMPTS => {
                    warn!(error = %e, attempt, "email send failed; retrying");
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("send email after {attempt} attempts"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp_config() -> SmtpConfig {
        SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: "user".into(),
            password: "secret".into(),
            sender: "Greenreel <no-reply@greenreel.local>".into(),
        }
    }

    #[test]
    fn welcome_email_mentions_user_and_token() {
        let email = Email::Welcome {
            user_id: 42,
            activation_token: "Y3QMGX3PJ3WLRL2YRTQGQ6KRHU".into(),
        };
        let body = email.body();
        assert!(body.contains("your user ID number is 42"));
        assert!(body.contains(r#"{"token": "Y3QMGX3PJ3WLRL2YRTQGQ6KRHU"}"#));
        assert_eq!(email.subject(), "Welcome to Greenreel!");
    }

    #[test]
    fn reset_email_mentions_expiry() {
        let body = Email::PasswordReset {
            reset_token: "TOKEN".into(),
        }
        .body();
        assert!(body.contains("45 minutes"));
        assert!(body.contains("TOKEN"));
    }

    #[tokio::test]
    async fn composes_message_with_headers() {
        let mailer = SmtpMailer::new(&smtp_config()).expect("mailer");
        let message = mailer
            .compose(
                "alice@example.com",
                &Email::Activation {
                    activation_token: "ABC".into(),
                },
            )
            .expect("compose");
        let raw = String::from_utf8(message.formatted()).expect("utf-8");
        assert!(raw.contains("To: alice@example.com"));
        assert!(raw.contains("Subject: Activate your Greenreel account"));
    }

    #[tokio::test]
    async fn rejects_bad_recipient() {
        let mailer = SmtpMailer::new(&smtp_config()).expect("mailer");
        assert!(mailer
            .compose("not an address", &Email::Activation { activation_token: "x".into() })
            .is_err());
    }

    #[tokio::test]
    async fn rejects_bad_sender() {
        let mut cfg = smtp_config();
        cfg.sender = "nobody".into();
        assert!(SmtpMailer::new(&cfg).is_err());
    }
}
