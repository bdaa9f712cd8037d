//! Activation service
//!
//! New accounts start unactivated and receive an email with a one-time link.
//! Following the link activates the account and spends the link.

use crate::db::repositories::AccountRepository;
use crate::models::Account;
use crate::services::email::MailSender;
use anyhow::{Context, Result};
use std::sync::Arc;
use uuid::Uuid;

pub struct ActivationService {
    accounts: Arc<dyn AccountRepository>,
    mailer: Arc<dyn MailSender>,
    api_url: String,
}

impl ActivationService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        mailer: Arc<dyn MailSender>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            mailer,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fresh random link identifier
    pub fn generate_link(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Public URL that activates the account holding `link`
    pub fn activation_url(&self, link: &str) -> String {
        format!("{}/auth/activate/{}", self.api_url, link)
    }

    /// Email the activation URL to `address`
    pub async fn send_activation_email(&self, address: &str, link: &str) -> Result<()> {
        let url = self.activation_url(link);
        let subject = format!("Activation on the {}", self.api_url);
        let html = format!(
            "<div>\
             <h1>Follow the link for activation</h1>\
             <a href=\"{url}\">{url}</a>\
             </div>"
        );

        self.mailer
            .send_html(address, &subject, &html)
            .await
            .with_context(|| format!("Failed to send activation email to {}", address))
    }

    /// Activate the account holding `link`.
    ///
    /// Returns `None` when no account holds it, including a link already used.
    pub async fn activate(&self, link: &str) -> Result<Option<Account>> {
        let account = self.accounts.activate_by_link(link).await?;
        if let Some(account) = &account {
            tracing::info!("Account {} activated", account.id);
        }
        Ok(account)
    }
}
