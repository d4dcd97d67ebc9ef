//! Recording chat transport
//!
//! Captures every sent message for test assertions and can be switched
//! into a failing mode to exercise best-effort delivery paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use stevedore_relay::{ChatTransport, RelayError};

#[derive(Debug, Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(i64, String)>>,
    failing: AtomicBool,
}

impl RecordingChat {
    /// All messages sent so far as `(chat_id, text)` pairs.
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Last message sent to a given chat.
    pub fn last_for(&self, chat_id: i64) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
    }

    /// When failing, every send returns an error and records nothing.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), RelayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RelayError::Chat("stub send failure".into()));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_replays_sent_messages() {
        let chat = RecordingChat::default();
        chat.send_message(1, "first").await.unwrap();
        chat.send_message(2, "second").await.unwrap();
        chat.send_message(1, "third").await.unwrap();

        assert_eq!(chat.sent().len(), 3);
        assert_eq!(chat.last_for(1).as_deref(), Some("third"));
        assert_eq!(chat.last_for(3), None);
    }

    #[tokio::test]
    async fn failing_mode_rejects_sends() {
        let chat = RecordingChat::default();
        chat.set_failing(true);
        assert!(chat.send_message(1, "lost").await.is_err());
        assert!(chat.sent().is_empty());
    }
}
