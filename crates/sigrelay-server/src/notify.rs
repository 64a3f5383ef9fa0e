//! Best-effort outbound alerts.
//!
//! When a visitor arrives to an empty relay the hub fires a one-line alert
//! through a [`Notifier`]. Delivery failures are logged by the caller and
//! never reach the connection that triggered them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sigrelay_settings::NotificationSettings;
use tracing::info;

/// Request timeout for the Telegram Bot API.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Why an alert was not delivered.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Missing credentials; nothing was sent.
    #[error("notifier not configured: {0}")]
    Config(String),
    /// Transport failure.
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The API answered but refused the message.
    #[error("notification rejected: {0}")]
    Api(String),
}

/// Sink for operator alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`.
    async fn notify(&self, text: &str) -> Result<(), NotifyError>;
}

/// Alert text for a visitor who arrived alone.
pub fn lonely_visitor_message(flag: &str) -> String {
    format!(
        "New lonely visitor on the signaling relay (flag: {})",
        escape_html(flag)
    )
}

/// Escape the characters Telegram's HTML parse mode treats as markup.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends alerts through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("api_base", &self.api_base)
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    /// Build a notifier from settings.
    pub fn new(settings: &NotificationSettings) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        info!(api_base = %settings.api_base, "telegram notifier initialized");
        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_owned(),
            bot_token: settings.telegram_bot_token.clone(),
            chat_id: settings.telegram_chat_id.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        if self.bot_token.is_empty() || self.chat_id.is_empty() {
            return Err(NotifyError::Config(
                "telegram bot token and chat id are required".into(),
            ));
        }

        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
        };
        let response: ApiResponse = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if response.ok {
            Ok(())
        } else {
            Err(NotifyError::Api(
                response
                    .description
                    .unwrap_or_else(|| "unknown error".into()),
            ))
        }
    }
}
