use crate::delivery::{ChatSink, OutboundMessage};
use crate::inbound::{interpret_message, ChatSource, InboundEvent};
use crate::types::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
/// Seconds Telegram holds a `getUpdates` call open when nothing arrives.
const LONG_POLL_SECONDS: u64 = 25;

/// [`ChatSink`] backed by the Telegram Bot API.
pub struct TelegramSink {
    client: Client,
    api_base: String,
    token: String,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

#[derive(Serialize)]
struct ChatActionBody<'a> {
    chat_id: &'a str,
    action: &'static str,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramSink {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Point the sink at another Bot API server.
    pub fn with_api_base(token: impl Into<String>, api_base: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn call<B: Serialize + ?Sized>(&self, method: &str, destination: &str, body: &B) -> Result<()> {
        let url = format!("{}/bot{}/{}", self.api_base, self.token, method);

        let failure = |reason: String| RelayError::DeliveryFailure {
            destination: destination.to_string(),
            reason,
        };

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            // reqwest errors embed the URL, which carries the token
            .map_err(|e| failure(e.without_url().to_string()))?;

        let status = response.status();
        let reply: ApiResponse = response
            .json()
            .await
            .map_err(|_| failure(format!("HTTP {}: unreadable response", status.as_u16())))?;

        if !reply.ok {
            return Err(failure(format!(
                "HTTP {}: {}",
                status.as_u16(),
                reply.description.unwrap_or_else(|| "request rejected".to_string())
            )));
        }

        debug!("Telegram {} to {} succeeded", method, destination);
        Ok(())
    }
}

#[async_trait]
impl ChatSink for TelegramSink {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let body = SendMessageBody {
            chat_id: &message.destination,
            text: &message.text,
            disable_web_page_preview: false,
            reply_to_message_id: message.reply_to,
        };
        self.call("sendMessage", &message.destination, &body).await
    }

    async fn indicate_typing(&self, destination: &str) -> Result<()> {
        let body = ChatActionBody {
            chat_id: destination,
            action: "typing",
        };
        self.call("sendChatAction", destination, &body).await
    }
}

/// [`ChatSource`] long-polling the Bot API `getUpdates` method.
pub struct TelegramSource {
    client: Client,
    api_base: String,
    token: String,
    bot_username: String,
    offset: AtomicI64,
}

#[derive(Serialize)]
struct GetUpdatesBody {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Deserialize)]
struct BotApiReply<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct BotUser {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    message_id: i64,
    chat: TelegramChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct TelegramChat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
}

impl TelegramSource {
    /// Build a source, asking the Bot API for the bot's username when none is given.
    pub async fn connect(token: impl Into<String>, bot_username: Option<String>) -> Result<Self> {
        Self::connect_to(token, bot_username, DEFAULT_API_BASE).await
    }

    pub async fn connect_to(
        token: impl Into<String>,
        bot_username: Option<String>,
        api_base: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECONDS + 15))
            .build()?;

        let mut source = Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            bot_username: String::new(),
            offset: AtomicI64::new(0),
        };

        source.bot_username = match bot_username.filter(|u| !u.trim().is_empty()) {
            Some(username) => username.trim().trim_start_matches('@').to_string(),
            None => {
                let me: BotUser = source.call("getMe", &serde_json::json!({})).await?;
                me.username.unwrap_or_default()
            }
        };
        info!("Telegram bot username: @{}", source.bot_username);

        Ok(source)
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(&self, method: &str, body: &B) -> Result<T> {
        let url = format!("{}/bot{}/{}", self.api_base, self.token, method);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RelayError::Http(e.without_url()))?;

        let status = response.status();
        let reply: BotApiReply<T> = response.json().await.map_err(|e| RelayError::Http(e.without_url()))?;

        match reply.result {
            Some(result) if reply.ok => Ok(result),
            _ => Err(RelayError::ChatApi(format!(
                "Telegram {} failed with HTTP {}: {}",
                method,
                status.as_u16(),
                reply.description.unwrap_or_else(|| "request rejected".to_string())
            ))),
        }
    }
}

#[async_trait]
impl ChatSource for TelegramSource {
    async fn poll(&self) -> Result<Vec<InboundEvent>> {
        let body = GetUpdatesBody {
            offset: self.offset.load(Ordering::SeqCst),
            timeout: LONG_POLL_SECONDS,
            allowed_updates: ["message"],
        };
        let updates: Vec<TelegramUpdate> = self.call("getUpdates", &body).await?;

        let mut events = Vec::new();
        for update in updates {
            self.offset.fetch_max(update.update_id + 1, Ordering::SeqCst);

            let Some(message) = update.message else {
                continue;
            };
            let Some(text) = message.text.as_deref() else {
                continue;
            };

            let event = interpret_message(
                &message.chat.id.to_string(),
                Some(message.message_id),
                message.chat.chat_type == "private",
                text,
                &self.bot_username,
            );
            if let Some(event) = event {
                events.push(event);
            }
        }

        debug!("getUpdates produced {} events", events.len());
        Ok(events)
    }
}
