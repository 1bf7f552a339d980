//! Outbound notification channels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChannelError;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// A destination that accepts one formatted message at a time.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sends HTML-formatted text and returns the channel's message id.
    async fn send(&self, text: &str) -> Result<String, ChannelError>;
}

/// Telegram Bot API channel (`sendMessage`, HTML parse mode).
pub struct TelegramChannel {
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            bot_token: bot_token.filter(|t| !t.is_empty()),
            chat_id: chat_id.filter(|c| !c.is_empty()),
            api_base: TELEGRAM_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl NotifyChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, text: &str) -> Result<String, ChannelError> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or_else(|| ChannelError::NotConfigured("TELEGRAM_BOT_TOKEN".to_string()))?;
        let chat_id = self
            .chat_id
            .as_deref()
            .ok_or_else(|| ChannelError::NotConfigured("TELEGRAM_CHAT_ID".to_string()))?;

        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        debug!(channel = "telegram", bytes = text.len(), "Sending alert");

        let response = self
            .client
            .post(format!("{}/bot{token}/sendMessage", self.api_base))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(channel = "telegram", status = %status, body = %body, "Telegram request failed");
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TelegramResponse = serde_json::from_str(&body)
            .map_err(|err| ChannelError::Other(format!("unreadable Telegram response: {err}")))?;
        match parsed {
            TelegramResponse {
                ok: true,
                result: Some(message),
                ..
            } => Ok(message.message_id.to_string()),
            TelegramResponse { description, .. } => Err(ChannelError::Rejected {
                status: status.as_u16(),
                body: description.unwrap_or_else(|| "ok=false".to_string()),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    result: Option<TelegramMessage>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}
