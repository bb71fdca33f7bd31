//! Outbound mail used by the password reset flow.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{MailConfig, SmtpConfig};
use crate::error::AuthError;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

impl From<MailError> for AuthError {
    fn from(_: MailError) -> Self {
        AuthError::delivery_failed("There was an error sending the email. Try again later!")
    }
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Picks the SMTP sender when a relay is configured, the log otherwise.
pub fn from_config(cfg: &MailConfig) -> Result<Arc<dyn MailSender>, MailError> {
    Ok(match &cfg.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp, &cfg.from)?) as Arc<dyn MailSender>,
        None => Arc::new(LogMailer) as Arc<dyn MailSender>,
    })
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig, from: &str) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)?
            .port(cfg.port);
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.parse()?,
        })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;
        self.transport.send(message).await?;
        info!(to = %to, subject = %subject, "mail sent");
        Ok(())
    }
}

/// Drops mail, logging recipient and subject. For local runs without a
/// relay. Bodies carry reset secrets and are never logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailError> {
        let _: Mailbox = to.parse()?;
        warn!(to = %to, subject = %subject, "mail dropped, no SMTP relay configured");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingMailer;

#[cfg(test)]
mod recording {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use super::*;

    #[derive(Debug, Clone)]
    pub struct SentMail {
        pub to: String,
        pub subject: String,
        pub body: String,
    }

    /// Keeps what it was asked to send; can be told to fail.
    #[derive(Debug, Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<SentMail>>,
        fail: AtomicBool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            let m = Self::default();
            m.fail.store(true, Ordering::SeqCst);
            m
        }

        pub fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().expect("mail lock").clone()
        }
    }

    #[async_trait]
    impl MailSender for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
            if self.fail.load(Ordering::SeqCst) {
                // any delivery error will do
                let bad: Result<Mailbox, _> = "not an address".parse();
                return Err(MailError::Address(bad.unwrap_err()));
            }
            self.sent.lock().expect("mail lock").push(SentMail {
                to: to.into(),
                subject: subject.into(),
                body: body.into(),
            });
            Ok(())
        }
    }
}
