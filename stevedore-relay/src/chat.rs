//! Chat transport boundary
//!
//! The operator binary implements this over the Telegram Bot API; tests
//! use the devkit recording stub. Result delivery is best-effort, so a
//! failed send is an error for the caller to log, never to retry.

use async_trait::async_trait;

use crate::error::RelayError;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), RelayError>;
}
