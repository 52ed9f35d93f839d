// Robot step configurations and their decoding from stored JSON text.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::fmt;

use super::errors::ConfigurationError;
use super::model::ActionType;
use crate::notifications::{ChatId, ParseMode};

pub const DEFAULT_MESSAGE_TEMPLATE: &str = "Status changed: {status}";

const SECRET_KEYS: &[&str] = &["bot_token"];
const REDACTED: &str = "<redacted>";

/// Stored step config as display text, with secrets masked. Text that is not
/// a JSON object is not echoed at all.
pub fn redacted_config(config: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(config) {
        Ok(serde_json::Value::Object(mut fields)) => {
            for key in SECRET_KEYS {
                if let Some(value) = fields.get_mut(*key) {
                    *value = serde_json::Value::String(REDACTED.to_string());
                }
            }
            serde_json::Value::Object(fields).to_string()
        }
        _ => "<unreadable config>".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MoveStatusConfig {
    pub target_status: String,
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_message")]
    pub message: String,
    pub bot_token: String,
    pub chat_id: ChatId,
    /// Absent: engine default. Explicit `null`: plain text.
    #[serde(default, deserialize_with = "present")]
    pub parse_mode: Option<Option<ParseMode>>,
}

impl fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("message", &self.message)
            .field("bot_token", &REDACTED)
            .field("chat_id", &self.chat_id)
            .field("parse_mode", &self.parse_mode)
            .finish()
    }
}

fn default_message() -> String {
    DEFAULT_MESSAGE_TEMPLATE.to_string()
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<ParseMode>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<ParseMode>::deserialize(deserializer).map(Some)
}

impl NotificationConfig {
    pub fn render(&self, status: &str) -> String {
        self.message.replace("{status}", status)
    }

    pub fn resolve_parse_mode(&self, default: Option<ParseMode>) -> Option<ParseMode> {
        self.parse_mode.unwrap_or(default)
    }
}

/// A decoded robot step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MoveStatus(MoveStatusConfig),
    Notification(NotificationConfig),
}

impl Action {
    pub fn parse(action_type: &str, config: &str) -> Result<Self, ConfigurationError> {
        let action_type: ActionType = action_type
            .parse()
            .map_err(ConfigurationError::UnknownActionType)?;
        match action_type {
            ActionType::MoveStatus => parse_config(action_type.as_str(), config).map(Action::MoveStatus),
            ActionType::Notification => {
                parse_config(action_type.as_str(), config).map(Action::Notification)
            }
        }
    }
}

/// Decode a step's JSON object into its typed configuration.
pub(crate) fn parse_config<T: DeserializeOwned>(
    kind: &'static str,
    text: &str,
) -> Result<T, ConfigurationError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ConfigurationError::InvalidJson(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ConfigurationError::InvalidConfig {
        kind,
        reason: e.to_string(),
    })
}
