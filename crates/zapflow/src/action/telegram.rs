//! `sendTelegram` through the Telegram Bot API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::context::RunContext;
use super::handler::ActionHandler;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("invalid telegram parameters: {0}")]
    InvalidParameters(#[from] serde_json::Error),

    #[error("No chat specified for Telegram message")]
    MissingChat,

    #[error("Telegram message content is required")]
    MissingMessage,

    /// Transport failure. The request URL is stripped since it embeds the
    /// bot token.
    #[error("telegram request failed: {0}")]
    Http(reqwest::Error),

    #[error("telegram api error ({status}): {description}")]
    Api { status: u16, description: String },
}

impl From<reqwest::Error> for TelegramError {
    fn from(err: reqwest::Error) -> Self {
        TelegramError::Http(err.without_url())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatId {
    Text(String),
    Number(i64),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TelegramParameters {
    #[serde(default, alias = "userId")]
    chat_id: Option<ChatId>,
    #[serde(default, alias = "updateMessage")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

fn parse_parameters(parameters: &Value) -> Result<(String, String), TelegramError> {
    let params = TelegramParameters::deserialize(parameters)?;

    let chat_id = match params.chat_id {
        Some(ChatId::Text(id)) => id.trim().to_owned(),
        Some(ChatId::Number(id)) => id.to_string(),
        None => String::new(),
    };
    if chat_id.is_empty() {
        return Err(TelegramError::MissingChat);
    }

    let message = params
        .message
        .filter(|m| !m.is_empty())
        .ok_or(TelegramError::MissingMessage)?;

    Ok((chat_id, message))
}

/// Posts the step's message to a chat.
///
/// Parameters: `{ chatId | userId, message | updateMessage }`.
#[derive(Clone)]
pub struct TelegramHandler {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramHandler {
    pub fn new(token: impl Into<String>) -> Result<Self, TelegramError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_owned(),
            token: token.into(),
        })
    }

    /// Point the handler at a different API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }
}

#[async_trait]
impl ActionHandler for TelegramHandler {
    type Error = TelegramError;

    async fn execute(&self, parameters: &Value, ctx: &RunContext) -> Result<Value, TelegramError> {
        let (chat_id, message) = parse_parameters(parameters)?;

        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.base_url, self.token))
            .json(&json!({ "chat_id": chat_id, "text": message }))
            .send()
            .await?;

        let status = response.status();
        let body: ApiResponse = response.json().await?;

        let sent = match body {
            ApiResponse {
                ok: true,
                result: Some(sent),
                ..
            } if status.is_success() => sent,
            ApiResponse { description, .. } => {
                return Err(TelegramError::Api {
                    status: status.as_u16(),
                    description: description.unwrap_or_else(|| "no description".to_owned()),
                });
            }
        };

        info!(
            run_id = %ctx.run_id,
            stage = ctx.stage,
            message_id = sent.message_id,
            "Telegram message sent"
        );

        Ok(json!({
            "chatId": chat_id,
            "messageId": sent.message_id,
            "sentAt": super::sent_at(),
        }))
    }
}
