use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatId, MessageId, NotificationError, NotificationGateway, OutgoingMessage, ParseMode};
use crate::config::NotificationsConfig;
use crate::http::RateLimitedHttpClient;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a ChatId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<ParseMode>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<SentMessageResult>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessageResult {
    message_id: MessageId,
}

/// Telegram Bot API client for `sendMessage`.
#[derive(Debug, Clone)]
pub struct TelegramGateway {
    http: RateLimitedHttpClient,
    api_base: String,
    timeout: Duration,
}

impl TelegramGateway {
    pub fn new(api_base: impl Into<String>, http: RateLimitedHttpClient, timeout: Duration) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &NotificationsConfig) -> Result<Self, NotificationError> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let http = RateLimitedHttpClient::new(
            config.requests_per_second,
            config.burst_capacity,
            timeout,
        )
        .map_err(|e| NotificationError::Transport(e.without_url().to_string()))?;
        Ok(Self::new(&config.api_base_url, http, timeout))
    }

    fn transport_error(&self, err: reqwest::Error) -> NotificationError {
        if err.is_timeout() {
            return NotificationError::Timeout(self.timeout);
        }
        // The URL embeds the bot token.
        NotificationError::Transport(err.without_url().to_string())
    }
}

#[async_trait]
impl NotificationGateway for TelegramGateway {
    async fn send(&self, message: &OutgoingMessage) -> Result<MessageId, NotificationError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, message.bot_token);
        let body = SendMessageRequest {
            chat_id: &message.chat_id,
            text: &message.text,
            parse_mode: message.parse_mode,
        };

        debug!(chat_id = %message.chat_id, "Sending Telegram message");
        let response = self
            .http
            .post_json(&url, &body)
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        let parsed = serde_json::from_str::<ApiResponse>(&text);

        if !status.is_success() {
            let description = parsed
                .ok()
                .and_then(|r| r.description)
                .unwrap_or(text);
            warn!(chat_id = %message.chat_id, status = status.as_u16(), "Telegram rejected message");
            return Err(NotificationError::Remote {
                status: status.as_u16(),
                description,
            });
        }

        let parsed = parsed.map_err(|e| NotificationError::InvalidResponse(e.to_string()))?;
        if !parsed.ok {
            return Err(NotificationError::Remote {
                status: status.as_u16(),
                description: parsed.description.unwrap_or_default(),
            });
        }

        parsed
            .result
            .map(|result| result.message_id)
            .ok_or_else(|| NotificationError::InvalidResponse("missing result.message_id".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_absent_parse_mode() {
        let chat = ChatId::Numeric(42);
        let body = SendMessageRequest {
            chat_id: &chat,
            text: "hello",
            parse_mode: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"chat_id": 42, "text": "hello"})
        );

        let body = SendMessageRequest {
            parse_mode: Some(ParseMode::Html),
            ..body
        };
        assert_eq!(serde_json::to_value(&body).unwrap()["parse_mode"], "HTML");
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base() {
        let http = RateLimitedHttpClient::new(5, 5, Duration::from_secs(1)).unwrap();
        let gateway = TelegramGateway::new("http://localhost:9/", http, Duration::from_secs(1));
        assert_eq!(gateway.api_base, "http://localhost:9");
    }
}
