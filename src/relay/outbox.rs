//! Outbound message sink used by the relay engine.

use async_trait::async_trait;

use crate::relay::message::Button;

/// Outbound side of the transport.
///
/// Message ids returned here are what admin replies later reference, so
/// implementations must return the id the transport actually assigned.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, String>;

    async fn send_with_buttons(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[Button],
    ) -> Result<i64, String>;

    /// Replace the inline keyboard of an already sent message.
    async fn set_buttons(&self, chat_id: i64, message_id: i64, buttons: &[Button]) -> Result<(), String>;
}
