use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use super::{MessageId, NotificationError, NotificationGateway, OutgoingMessage, ParseMode};

/// A delivery attempt as seen by [`RecordingGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
    pub parse_mode: Option<ParseMode>,
    pub delivered: bool,
}

#[derive(Debug, Default)]
struct Recorded {
    attempts: Vec<SentMessage>,
    failing_calls: HashSet<usize>,
    fail_all: bool,
}

/// In-process gateway that records every attempt instead of sending it.
///
/// Individual calls (0-based, in attempt order) can be scripted to fail with
/// a remote error.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    state: Mutex<Recorded>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `call`-th attempt fail.
    pub fn fail_call(self, call: usize) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.failing_calls.insert(call);
        }
        self
    }

    pub fn fail_all(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fail_all = true;
        }
        self
    }

    pub fn attempts(&self) -> Vec<SentMessage> {
        self.state
            .lock()
            .map(|state| state.attempts.clone())
            .unwrap_or_default()
    }

    pub fn delivered(&self) -> Vec<SentMessage> {
        self.attempts().into_iter().filter(|m| m.delivered).collect()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn send(&self, message: &OutgoingMessage) -> Result<MessageId, NotificationError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NotificationError::Transport("recorder poisoned".to_string()))?;

        let call = state.attempts.len();
        let delivered = !(state.fail_all || state.failing_calls.contains(&call));
        state.attempts.push(SentMessage {
            chat_id: message.chat_id.to_string(),
            text: message.text.clone(),
            parse_mode: message.parse_mode,
            delivered,
        });

        if delivered {
            Ok(call as MessageId + 1)
        } else {
            Err(NotificationError::Remote {
                status: 400,
                description: format!("scripted failure of call {call}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::ChatId;

    fn message(text: &str) -> OutgoingMessage {
        OutgoingMessage {
            bot_token: "t".to_string(),
            chat_id: ChatId::Numeric(1),
            text: text.to_string(),
            parse_mode: None,
        }
    }

    #[tokio::test]
    async fn scripted_failures_are_recorded_as_attempts() {
        let gateway = RecordingGateway::new().fail_call(1);

        assert_eq!(gateway.send(&message("first")).await.unwrap(), 1);
        assert!(matches!(
            gateway.send(&message("second")).await,
            Err(NotificationError::Remote { status: 400, .. })
        ));

        let attempts = gateway.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].chat_id, "1");
        assert!(!attempts[1].delivered);
        assert_eq!(gateway.delivered().len(), 1);
        assert_eq!(gateway.delivered()[0].text, "first");
    }
}
