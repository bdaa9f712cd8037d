//! Outgoing mail
//!
//! `MailSender` is the seam the activation flow sends through. `SmtpMailer`
//! delivers over SMTP with lettre; `LogMailer` stands in when no SMTP host is
//! configured and only logs what would have been sent.

use crate::config::MailConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;

/// Port on which SMTP servers expect implicit TLS instead of STARTTLS
const SMTPS_PORT: u16 = 465;

/// Something that can deliver an HTML email
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

/// SMTP delivery through lettre
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build a mailer from configuration; `None` when no SMTP host is set.
    pub fn from_config(config: &MailConfig) -> Result<Option<Self>> {
        let host = match config.smtp_host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => host,
            _ => return Ok(None),
        };

        let from: Mailbox = config
            .sender()
            .parse()
            .with_context(|| format!("Invalid mail sender address '{}'", config.sender()))?;

        let builder = if config.smtp_port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| anyhow!("Failed to create SMTP transport for {}: {}", host, e))?
        .port(config.smtp_port);

        let builder = if config.smtp_username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ))
        };

        Ok(Some(Self {
            transport: builder.build(),
            from,
        }))
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| anyhow!("Invalid recipient address '{}': {}", to, e))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;

        Ok(())
    }
}

/// Stand-in used when SMTP is not configured
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        tracing::warn!(
            "Email not configured, skipping \"{}\" to {} ({} bytes)",
            subject,
            to,
            html.len()
        );
        Ok(())
    }
}

/// Pick the SMTP mailer when configured, the logging stand-in otherwise
pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn MailSender>> {
    match SmtpMailer::from_config(config)? {
        Some(mailer) => {
            tracing::info!("Sending mail through SMTP");
            Ok(Arc::new(mailer))
        }
        None => Ok(Arc::new(LogMailer)),
    }
}
