//! Push notifications for fresh offers (Telegram Bot API)

use crate::config::NotifyConfig;
use crate::offers::Offer;
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// Notifications are enabled but a required setting is absent; this is a
    /// deployment mistake and is not retried
    #[error("notifications enabled but {0} is not configured")]
    MissingSetting(&'static str),

    #[error("telegram api returned status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Delivery sink for watcher messages
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Posts messages to a Telegram chat through the Bot API
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Build from configuration; missing credentials fail immediately.
    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let bot_token = config
            .bot_token
            .clone()
            .ok_or(NotifyError::MissingSetting("NOTIFY_BOT_TOKEN"))?;
        let chat_id = config
            .chat_id
            .clone()
            .ok_or(NotifyError::MissingSetting("NOTIFY_CHAT_ID"))?;

        Ok(Self {
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": self.chat_id, "text": message }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        debug!("Telegram message delivered");
        Ok(())
    }
}

/// Sink used when notifications are disabled: messages are only logged.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        debug!(%message, "Notifications disabled; not pushing");
        Ok(())
    }
}

/// Render the per-cycle alert text, one line per fresh offer.
pub fn format_alert(offers: &[Offer]) -> String {
    let mut lines = vec![format!("{} interesting offer(s) found:", offers.len())];
    for offer in offers {
        lines.push(format!("• Pay ${:.2} → Earn ${:.2}", offer.pay, offer.earn));
    }

    lines.join("\n")
}
